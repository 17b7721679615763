//! Editable view over a vehicle charge profile.
//!
//! The vendor sends one of two planner shapes. `weeklyPlanner` has three
//! weekday timers, an override timer and charge settings; `twoTimesTimer` has
//! two plain timers. Edits go straight into the typed planner so `to_json`
//! always reflects them, and a flat hour/minute cache backs the time getters.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Weekday;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::models::connected_drive::{ChargingWindow, Timer, TwoTimesTimer, WeeklyPlanner};

const WEEKLY_PLANNER_KEY: &str = "weeklyPlanner";
const TWO_TIMES_TIMER_KEY: &str = "twoTimesTimer";

#[derive(Debug)]
pub enum ChargeProfileError {
    /// Payload is not valid JSON.
    Json(serde_path_to_error::Error<serde_json::Error>),
    /// Payload is JSON but not an object.
    NotAnObject,
    /// A planner object does not have the expected shape.
    Planner {
        key: &'static str,
        source: serde_path_to_error::Error<serde_json::Error>,
    },
}

impl fmt::Display for ChargeProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChargeProfileError::Json(e) => write!(f, "charge profile parse failed at {}: {}", e.path(), e.inner()),
            ChargeProfileError::NotAnObject => write!(f, "charge profile is not a JSON object"),
            ChargeProfileError::Planner { key, source } => {
                write!(f, "{} malformed at {}: {}", key, source.path(), source.inner())
            }
        }
    }
}

impl std::error::Error for ChargeProfileError {}

/// Which planner shape the vehicle reported.
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeProfile {
    WeeklyPlanner(WeeklyPlanner),
    TwoTimesTimer(TwoTimesTimer),
    Empty,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TimerId {
    Timer1,
    Timer2,
    Timer3,
    Override,
}

impl TryFrom<u8> for TimerId {
    type Error = u8;

    /// `0` is the override timer, `1..=3` the numbered timers.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TimerId::Override),
            1 => Ok(TimerId::Timer1),
            2 => Ok(TimerId::Timer2),
            3 => Ok(TimerId::Timer3),
            other => Err(other),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimePart {
    Hour,
    Minute,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TimeSlot {
    WindowStart,
    WindowEnd,
    Departure(TimerId),
}

/// Every hour/minute value the profile exposes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeField {
    ChargeWindowStartHour,
    ChargeWindowStartMinute,
    ChargeWindowEndHour,
    ChargeWindowEndMinute,
    Timer1DepartureHour,
    Timer1DepartureMinute,
    Timer2DepartureHour,
    Timer2DepartureMinute,
    Timer3DepartureHour,
    Timer3DepartureMinute,
    OverrideDepartureHour,
    OverrideDepartureMinute,
}

impl TimeField {
    pub const ALL: [TimeField; 12] = [
        TimeField::ChargeWindowStartHour,
        TimeField::ChargeWindowStartMinute,
        TimeField::ChargeWindowEndHour,
        TimeField::ChargeWindowEndMinute,
        TimeField::Timer1DepartureHour,
        TimeField::Timer1DepartureMinute,
        TimeField::Timer2DepartureHour,
        TimeField::Timer2DepartureMinute,
        TimeField::Timer3DepartureHour,
        TimeField::Timer3DepartureMinute,
        TimeField::OverrideDepartureHour,
        TimeField::OverrideDepartureMinute,
    ];

    pub fn part(self) -> TimePart {
        use TimeField::*;
        match self {
            ChargeWindowStartHour | ChargeWindowEndHour | Timer1DepartureHour | Timer2DepartureHour
            | Timer3DepartureHour | OverrideDepartureHour => TimePart::Hour,
            _ => TimePart::Minute,
        }
    }

    pub fn departure(timer: TimerId, part: TimePart) -> TimeField {
        use TimeField::*;
        match (timer, part) {
            (TimerId::Timer1, TimePart::Hour) => Timer1DepartureHour,
            (TimerId::Timer1, TimePart::Minute) => Timer1DepartureMinute,
            (TimerId::Timer2, TimePart::Hour) => Timer2DepartureHour,
            (TimerId::Timer2, TimePart::Minute) => Timer2DepartureMinute,
            (TimerId::Timer3, TimePart::Hour) => Timer3DepartureHour,
            (TimerId::Timer3, TimePart::Minute) => Timer3DepartureMinute,
            (TimerId::Override, TimePart::Hour) => OverrideDepartureHour,
            (TimerId::Override, TimePart::Minute) => OverrideDepartureMinute,
        }
    }

    fn slot(self) -> TimeSlot {
        use TimeField::*;
        match self {
            ChargeWindowStartHour | ChargeWindowStartMinute => TimeSlot::WindowStart,
            ChargeWindowEndHour | ChargeWindowEndMinute => TimeSlot::WindowEnd,
            Timer1DepartureHour | Timer1DepartureMinute => TimeSlot::Departure(TimerId::Timer1),
            Timer2DepartureHour | Timer2DepartureMinute => TimeSlot::Departure(TimerId::Timer2),
            Timer3DepartureHour | Timer3DepartureMinute => TimeSlot::Departure(TimerId::Timer3),
            OverrideDepartureHour | OverrideDepartureMinute => TimeSlot::Departure(TimerId::Override),
        }
    }
}

/// Upper-case English day name as used in `weekdays` lists.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MONDAY",
        Weekday::Tue => "TUESDAY",
        Weekday::Wed => "WEDNESDAY",
        Weekday::Thu => "THURSDAY",
        Weekday::Fri => "FRIDAY",
        Weekday::Sat => "SATURDAY",
        Weekday::Sun => "SUNDAY",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeProfileWrapper {
    profile: ChargeProfile,
    /// Top-level keys besides the active planner, sent back untouched.
    extra: Map<String, Value>,
    times: BTreeMap<TimeField, u32>,
}

impl Default for ChargeProfileWrapper {
    fn default() -> Self {
        Self::new(ChargeProfile::Empty)
    }
}

impl ChargeProfileWrapper {
    pub fn new(profile: ChargeProfile) -> Self {
        Self::with_extra(profile, Map::new())
    }

    fn with_extra(profile: ChargeProfile, extra: Map<String, Value>) -> Self {
        let mut wrapper = Self { profile, extra, times: BTreeMap::new() };
        wrapper.rebuild_times();
        wrapper
    }

    /// Parse a charge-profile document. `weeklyPlanner` wins when both planners are present.
    pub fn from_json(content: &str) -> Result<Self, ChargeProfileError> {
        let de = &mut serde_json::Deserializer::from_str(content);
        let root: Value = serde_path_to_error::deserialize(de).map_err(ChargeProfileError::Json)?;
        let Value::Object(mut extra) = root else {
            return Err(ChargeProfileError::NotAnObject);
        };

        let profile = if let Some(raw) = take_planner(&mut extra, WEEKLY_PLANNER_KEY) {
            ChargeProfile::WeeklyPlanner(parse_planner(WEEKLY_PLANNER_KEY, raw)?)
        } else if let Some(raw) = take_planner(&mut extra, TWO_TIMES_TIMER_KEY) {
            ChargeProfile::TwoTimesTimer(parse_planner(TWO_TIMES_TIMER_KEY, raw)?)
        } else {
            ChargeProfile::Empty
        };
        Ok(Self::with_extra(profile, extra))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn profile(&self) -> &ChargeProfile {
        &self.profile
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.profile, ChargeProfile::Empty)
    }

    // ---------------------
    // Charge settings (weekly planner only)
    // ---------------------

    pub fn is_climate_enabled(&self) -> bool {
        match &self.profile {
            ChargeProfile::WeeklyPlanner(p) => p.climatization_enabled.unwrap_or(false),
            _ => false,
        }
    }

    pub fn set_climate_enabled(&mut self, enabled: bool) {
        if let ChargeProfile::WeeklyPlanner(p) = &mut self.profile {
            p.climatization_enabled = Some(enabled);
        }
    }

    pub fn mode(&self) -> Option<&str> {
        match &self.profile {
            ChargeProfile::WeeklyPlanner(p) => p.charging_mode.as_deref(),
            _ => None,
        }
    }

    pub fn set_mode(&mut self, mode: &str) {
        if let ChargeProfile::WeeklyPlanner(p) = &mut self.profile {
            p.charging_mode = Some(mode.to_string());
        }
    }

    pub fn preference(&self) -> Option<&str> {
        match &self.profile {
            ChargeProfile::WeeklyPlanner(p) => p.charging_preferences.as_deref(),
            _ => None,
        }
    }

    pub fn set_preference(&mut self, preference: &str) {
        if let ChargeProfile::WeeklyPlanner(p) = &mut self.profile {
            p.charging_preferences = Some(preference.to_string());
        }
    }

    // ---------------------
    // Timers
    // ---------------------

    pub fn is_timer_enabled(&self, timer: TimerId) -> bool {
        self.timer(timer).and_then(|t| t.timer_enabled).unwrap_or(false)
    }

    /// Only the named timer changes; missing timers are left alone.
    pub fn enable_disable_timer(&mut self, timer: TimerId, enabled: bool) {
        match self.timer_mut(timer) {
            Some(t) => t.timer_enabled = Some(enabled),
            None => debug!("Timer {:?} not present in charge profile; enable={} ignored", timer, enabled),
        }
    }

    /// Weekday selection only exists on the numbered timers of a weekly planner.
    pub fn is_day_selected(&self, timer: TimerId, day: Weekday) -> bool {
        let name = weekday_name(day);
        self.weekday_timer(timer)
            .and_then(|t| t.weekdays.as_ref())
            .is_some_and(|days| days.iter().any(|d| d.eq_ignore_ascii_case(name)))
    }

    /// Add or remove `day`. Selecting an already selected day is a no-op.
    pub fn day_selection(&mut self, timer: TimerId, day: Weekday, selected: bool) {
        let name = weekday_name(day);
        let Some(t) = self.weekday_timer_mut(timer) else {
            debug!("Timer {:?} has no weekday selection; {} ignored", timer, name);
            return;
        };
        if !selected && t.weekdays.is_none() {
            return;
        }
        let days = t.weekdays.get_or_insert_with(Vec::new);
        let present = days.iter().any(|d| d.eq_ignore_ascii_case(name));
        if selected && !present {
            days.push(name.to_string());
        } else if !selected && present {
            days.retain(|d| !d.eq_ignore_ascii_case(name));
        }
    }

    // ---------------------
    // Times
    // ---------------------

    /// Cached hour or minute, `-1` when the field is absent or not supported by the planner.
    pub fn get_time(&self, field: TimeField) -> i32 {
        self.times
            .get(&field)
            .and_then(|v| i32::try_from(*v).ok())
            .unwrap_or(-1)
    }

    /// Replace one component of an `HH:MM` string, keeping the other as is.
    pub fn set_time(&mut self, field: TimeField, value: u32) {
        let Some(slot) = self.time_slot_mut(field.slot()) else {
            debug!("{:?} not present in charge profile; ignored", field);
            return;
        };
        let rendered = splice_time(slot.as_deref(), field.part(), value);
        *slot = Some(rendered);
        self.times.insert(field, value);
    }

    fn rebuild_times(&mut self) {
        self.times.clear();
        for field in TimeField::ALL {
            let parsed = self
                .time_string(field.slot())
                .and_then(split_time)
                .map(|(hour, minute)| match field.part() {
                    TimePart::Hour => hour,
                    TimePart::Minute => minute,
                });
            if let Some(value) = parsed {
                self.times.insert(field, value);
            }
        }
    }

    fn window(&self) -> Option<&ChargingWindow> {
        match &self.profile {
            ChargeProfile::WeeklyPlanner(p) => p.preferred_charging_window.as_ref(),
            ChargeProfile::TwoTimesTimer(p) => p.preferred_charging_window.as_ref(),
            ChargeProfile::Empty => None,
        }
    }

    fn window_mut(&mut self) -> Option<&mut ChargingWindow> {
        match &mut self.profile {
            ChargeProfile::WeeklyPlanner(p) => p.preferred_charging_window.as_mut(),
            ChargeProfile::TwoTimesTimer(p) => p.preferred_charging_window.as_mut(),
            ChargeProfile::Empty => None,
        }
    }

    fn timer(&self, timer: TimerId) -> Option<&Timer> {
        match (&self.profile, timer) {
            (ChargeProfile::WeeklyPlanner(p), TimerId::Timer1) => p.timer1.as_ref(),
            (ChargeProfile::WeeklyPlanner(p), TimerId::Timer2) => p.timer2.as_ref(),
            (ChargeProfile::WeeklyPlanner(p), TimerId::Timer3) => p.timer3.as_ref(),
            (ChargeProfile::WeeklyPlanner(p), TimerId::Override) => p.override_timer.as_ref(),
            (ChargeProfile::TwoTimesTimer(p), TimerId::Timer1) => p.timer1.as_ref(),
            (ChargeProfile::TwoTimesTimer(p), TimerId::Timer2) => p.timer2.as_ref(),
            _ => None,
        }
    }

    fn timer_mut(&mut self, timer: TimerId) -> Option<&mut Timer> {
        match (&mut self.profile, timer) {
            (ChargeProfile::WeeklyPlanner(p), TimerId::Timer1) => p.timer1.as_mut(),
            (ChargeProfile::WeeklyPlanner(p), TimerId::Timer2) => p.timer2.as_mut(),
            (ChargeProfile::WeeklyPlanner(p), TimerId::Timer3) => p.timer3.as_mut(),
            (ChargeProfile::WeeklyPlanner(p), TimerId::Override) => p.override_timer.as_mut(),
            (ChargeProfile::TwoTimesTimer(p), TimerId::Timer1) => p.timer1.as_mut(),
            (ChargeProfile::TwoTimesTimer(p), TimerId::Timer2) => p.timer2.as_mut(),
            _ => None,
        }
    }

    fn has_weekdays(&self, timer: TimerId) -> bool {
        matches!(self.profile, ChargeProfile::WeeklyPlanner(_)) && timer != TimerId::Override
    }

    fn weekday_timer(&self, timer: TimerId) -> Option<&Timer> {
        if !self.has_weekdays(timer) {
            return None;
        }
        self.timer(timer)
    }

    fn weekday_timer_mut(&mut self, timer: TimerId) -> Option<&mut Timer> {
        if !self.has_weekdays(timer) {
            return None;
        }
        self.timer_mut(timer)
    }

    fn time_string(&self, slot: TimeSlot) -> Option<&str> {
        match slot {
            TimeSlot::WindowStart => self.window().and_then(|w| w.start_time.as_deref()),
            TimeSlot::WindowEnd => self.window().and_then(|w| w.end_time.as_deref()),
            TimeSlot::Departure(id) => self.timer(id).and_then(|t| t.departure_time.as_deref()),
        }
    }

    fn time_slot_mut(&mut self, slot: TimeSlot) -> Option<&mut Option<String>> {
        match slot {
            TimeSlot::WindowStart => self.window_mut().map(|w| &mut w.start_time),
            TimeSlot::WindowEnd => self.window_mut().map(|w| &mut w.end_time),
            TimeSlot::Departure(id) => self.timer_mut(id).map(|t| &mut t.departure_time),
        }
    }
}

impl Serialize for ChargeProfileWrapper {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Outgoing<'a> {
            #[serde(rename = "weeklyPlanner", skip_serializing_if = "Option::is_none")]
            weekly_planner: Option<&'a WeeklyPlanner>,
            #[serde(rename = "twoTimesTimer", skip_serializing_if = "Option::is_none")]
            two_times_timer: Option<&'a TwoTimesTimer>,
            #[serde(flatten)]
            extra: &'a Map<String, Value>,
        }

        let (weekly_planner, two_times_timer) = match &self.profile {
            ChargeProfile::WeeklyPlanner(p) => (Some(p), None),
            ChargeProfile::TwoTimesTimer(p) => (None, Some(p)),
            ChargeProfile::Empty => (None, None),
        };
        Outgoing { weekly_planner, two_times_timer, extra: &self.extra }.serialize(serializer)
    }
}

/// Remove a non-null planner object from the root map. `null` stays for round-tripping.
fn take_planner(root: &mut Map<String, Value>, key: &str) -> Option<Value> {
    match root.get(key) {
        Some(Value::Null) | None => None,
        Some(_) => root.remove(key),
    }
}

fn parse_planner<T: DeserializeOwned>(key: &'static str, raw: Value) -> Result<T, ChargeProfileError> {
    serde_path_to_error::deserialize(raw).map_err(|source| ChargeProfileError::Planner { key, source })
}

fn split_time(raw: &str) -> Option<(u32, u32)> {
    let (hour, minute) = raw.split_once(':')?;
    Some((hour.trim().parse().ok()?, minute.trim().parse().ok()?))
}

fn splice_time(current: Option<&str>, part: TimePart, value: u32) -> String {
    let (hour, minute) = current.and_then(|s| s.split_once(':')).unwrap_or(("00", "00"));
    let padded = format!("{:02}", value);
    match part {
        TimePart::Hour => format!("{}:{}", padded, minute),
        TimePart::Minute => format!("{}:{}", hour, padded),
    }
}
