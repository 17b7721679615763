//! Maps vendor responses onto channel states and applies channel commands.
//!
//! One handler serves one vehicle. It owns the browsable list cursors, the
//! editable copy of the charge profile and the last raw response per
//! endpoint; callers hand it `&mut` access for every update and command.

use chrono::{FixedOffset, Local, Weekday};
use log::{debug, info, warn};
use serde_json::json;

use crate::channels::{group, id, ChannelUid, Command, State, StateSink, Unit};
use crate::charge_profile::{ChargeProfileWrapper, TimeField, TimePart, TimerId};
use crate::client::{parse_json, ClientError, Endpoint};
use crate::config::{Units, VehicleCapabilities};
use crate::models::connected_drive::{
    AllTrips, AllTripsContainer, CbsMessage, CcmMessage, CommunityEntry, Destination, DestinationContainer,
    LastTrip, LastTripContainer, VehicleStatus, VehicleStatusContainer,
};
use crate::status::{INVALID, UNKNOWN};
use crate::units::{
    estimate_range_radius, format_date_time, local_date_time_without_offset, round, service_due_date,
    to_display_unit, to_local_date_time, to_title_case,
};

pub const ANONYMOUS: &str = "anonymous";

const WEEKDAYS: [(Weekday, &str); 7] = [
    (Weekday::Mon, "mon"),
    (Weekday::Tue, "tue"),
    (Weekday::Wed, "wed"),
    (Weekday::Thu, "thu"),
    (Weekday::Fri, "fri"),
    (Weekday::Sat, "sat"),
    (Weekday::Sun, "sun"),
];

const WEEKDAY_TIMERS: [TimerId; 3] = [TimerId::Timer1, TimerId::Timer2, TimerId::Timer3];

fn timer_prefix(timer: TimerId) -> &'static str {
    match timer {
        TimerId::Timer1 => "timer1",
        TimerId::Timer2 => "timer2",
        TimerId::Timer3 => "timer3",
        TimerId::Override => "override",
    }
}

/// What a command asks the caller to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Handled locally; any resulting states were published.
    Applied,
    /// POST this payload to the charging profile endpoint.
    SendChargeProfile(String),
}

/// Charge group channels that accept commands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ChargeChannel {
    Climate,
    Mode,
    Preference,
    Send,
    Time(TimeField),
    Enabled(TimerId),
    Day(TimerId, Weekday),
}

impl ChargeChannel {
    fn parse(channel_id: &str) -> Option<Self> {
        match channel_id {
            id::PROFILE_CLIMATE => return Some(ChargeChannel::Climate),
            id::PROFILE_MODE => return Some(ChargeChannel::Mode),
            id::PROFILE_PREFS => return Some(ChargeChannel::Preference),
            id::PROFILE_SEND => return Some(ChargeChannel::Send),
            id::WINDOW_START_HOUR => return Some(ChargeChannel::Time(TimeField::ChargeWindowStartHour)),
            id::WINDOW_START_MINUTE => return Some(ChargeChannel::Time(TimeField::ChargeWindowStartMinute)),
            id::WINDOW_END_HOUR => return Some(ChargeChannel::Time(TimeField::ChargeWindowEndHour)),
            id::WINDOW_END_MINUTE => return Some(ChargeChannel::Time(TimeField::ChargeWindowEndMinute)),
            _ => {}
        }

        let (prefix, rest) = channel_id.split_once('-')?;
        let timer = [TimerId::Timer1, TimerId::Timer2, TimerId::Timer3, TimerId::Override]
            .into_iter()
            .find(|t| timer_prefix(*t) == prefix)?;
        match rest {
            "departure-hour" => Some(ChargeChannel::Time(TimeField::departure(timer, TimePart::Hour))),
            "departure-minute" => Some(ChargeChannel::Time(TimeField::departure(timer, TimePart::Minute))),
            "enabled" => Some(ChargeChannel::Enabled(timer)),
            _ if timer == TimerId::Override => None,
            _ => {
                let day = rest.strip_prefix("day-")?;
                WEEKDAYS
                    .iter()
                    .find(|(_, short)| *short == day)
                    .map(|(weekday, _)| ChargeChannel::Day(timer, *weekday))
            }
        }
    }
}

/// A list published one entry at a time with a wrapping cursor.
#[derive(Debug)]
struct BrowsableList<T> {
    items: Vec<T>,
    index: Option<usize>,
}

impl<T> Default for BrowsableList<T> {
    fn default() -> Self {
        Self { items: Vec::new(), index: None }
    }
}

impl<T> BrowsableList<T> {
    fn replace(&mut self, items: Vec<T>) {
        self.items = items;
    }

    fn advance(&mut self) {
        self.index = Some(self.index.map_or(0, |i| i + 1));
    }

    /// Current entry; an unset or out-of-range cursor falls back to the first one.
    fn selected(&mut self) -> Option<(usize, &T)> {
        if self.items.is_empty() {
            self.index = None;
            return None;
        }
        let index = match self.index {
            Some(i) if i < self.items.len() => i,
            _ => 0,
        };
        self.index = Some(index);
        self.items.get(index).map(|item| (index, item))
    }
}

/// Last response text per endpoint, kept for the troubleshoot fingerprint.
#[derive(Debug, Default)]
struct ResponseCache {
    status: Option<String>,
    last_trip: Option<String>,
    all_trips: Option<String>,
    charge_profile: Option<String>,
    destinations: Option<String>,
}

impl ResponseCache {
    fn slot(&mut self, endpoint: Endpoint) -> &mut Option<String> {
        match endpoint {
            Endpoint::Status => &mut self.status,
            Endpoint::LastTrip => &mut self.last_trip,
            Endpoint::AllTrips => &mut self.all_trips,
            Endpoint::ChargeProfile => &mut self.charge_profile,
            Endpoint::Destinations => &mut self.destinations,
        }
    }

    fn has(&self, endpoint: Endpoint) -> bool {
        match endpoint {
            Endpoint::Status => self.status.is_some(),
            Endpoint::LastTrip => self.last_trip.is_some(),
            Endpoint::AllTrips => self.all_trips.is_some(),
            Endpoint::ChargeProfile => self.charge_profile.is_some(),
            Endpoint::Destinations => self.destinations.is_some(),
        }
    }
}

pub struct VehicleChannelHandler {
    units: Units,
    imperial: bool,
    caps: VehicleCapabilities,
    vin: String,
    /// Zone for local timestamps; `None` uses the host's local zone.
    zone: Option<FixedOffset>,
    services: BrowsableList<CbsMessage>,
    check_controls: BrowsableList<CcmMessage>,
    destinations: BrowsableList<Destination>,
    charge_profile: Option<ChargeProfileWrapper>,
    cache: ResponseCache,
}

impl VehicleChannelHandler {
    pub fn new(units: Units, caps: VehicleCapabilities, vin: impl Into<String>) -> Self {
        Self {
            units,
            imperial: units.imperial_for(None),
            caps,
            vin: vin.into(),
            zone: None,
            services: BrowsableList::default(),
            check_controls: BrowsableList::default(),
            destinations: BrowsableList::default(),
            charge_profile: None,
            cache: ResponseCache::default(),
        }
    }

    pub fn with_zone(mut self, zone: FixedOffset) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn imperial(&self) -> bool {
        self.imperial
    }

    pub fn capabilities(&self) -> VehicleCapabilities {
        self.caps
    }

    /// Whether `endpoint` has answered at least once, successfully or not.
    pub fn has_response(&self, endpoint: Endpoint) -> bool {
        self.cache.has(endpoint)
    }

    fn length_unit(&self) -> Unit {
        Unit::length(self.imperial)
    }

    fn local_time(&self, raw: &str) -> String {
        match &self.zone {
            Some(zone) => to_local_date_time(raw, zone),
            None => to_local_date_time(raw, &Local),
        }
    }

    // ---------------------
    // Responses
    // ---------------------

    /// Cache a response body and publish what it contains.
    pub fn on_response(&mut self, endpoint: Endpoint, body: &str, sink: &mut dyn StateSink) -> Result<(), ClientError> {
        *self.cache.slot(endpoint) = Some(body.to_string());
        match endpoint {
            Endpoint::Status => {
                let container: VehicleStatusContainer = parse_json(body)?;
                match container.vehicle_status {
                    Some(status) => self.update_vehicle_status(&status, sink),
                    None => warn!("Status response without vehicleStatus"),
                }
            }
            Endpoint::LastTrip => {
                let container: LastTripContainer = parse_json(body)?;
                if let Some(trip) = container.last_trip {
                    self.update_last_trip(&trip, sink);
                }
            }
            Endpoint::AllTrips => {
                let container: AllTripsContainer = parse_json(body)?;
                if let Some(trips) = container.all_trips {
                    self.update_all_trips(&trips, sink);
                }
            }
            Endpoint::Destinations => {
                let container: DestinationContainer = parse_json(body)?;
                self.update_destinations(container.destinations.unwrap_or_default(), sink);
            }
            Endpoint::ChargeProfile => match ChargeProfileWrapper::from_json(body) {
                Ok(profile) => self.update_charge_profile(profile, sink),
                Err(e) => warn!("Charge profile not usable: {}", e),
            },
        }
        Ok(())
    }

    /// Keep an error report in place of the response so the fingerprint shows it.
    pub fn on_error(&mut self, endpoint: Endpoint, error: &ClientError) {
        let report = json!({
            "endpoint": endpoint.path(),
            "status": error.status(),
            "reason": error.to_string(),
        });
        *self.cache.slot(endpoint) = Some(report.to_string());
    }

    pub fn update_vehicle_status(&mut self, status: &VehicleStatus, sink: &mut dyn StateSink) {
        if self.units == Units::Autodetect {
            let imperial = self.units.imperial_for(status.vehicle_country.as_deref());
            if imperial != self.imperial {
                info!("Vehicle country {:?}: switching to imperial={}", status.vehicle_country, imperial);
            }
            self.imperial = imperial;
        }
        let length = self.length_unit();
        let st = |channel: &'static str| ChannelUid::new(group::STATUS, channel);

        sink.update(st(id::LOCK), State::text(to_title_case(status.door_lock_state.as_deref().unwrap_or(UNKNOWN))));
        sink.update(st(id::DOORS), State::text(to_title_case(status.door_state().as_str())));
        sink.update(st(id::WINDOWS), State::text(to_title_case(status.window_state().as_str())));
        sink.update(st(id::SERVICE_DATE), State::DateTime(format_date_time(status.next_service_date())));
        let next_mileage = status.next_service_mileage().map_or(-1.0, |m| m as f64);
        sink.update(st(id::SERVICE_MILEAGE), State::quantity(round(next_mileage), length));
        sink.update(st(id::CHECK_CONTROL), State::text(status.check_control()));
        sink.update(st(id::LAST_UPDATE), State::DateTime(self.local_time(status.update_time())));

        if self.caps.is_electric {
            if let Some(charging) = status.charging_status.as_deref() {
                let shown = if charging.eq_ignore_ascii_case(INVALID) {
                    status.last_charging_end_reason.as_deref().unwrap_or(UNKNOWN)
                } else {
                    charging
                };
                sink.update(st(id::CHARGING_STATUS), State::text(to_title_case(shown)));
            }
        }

        for (channel, field) in [
            (id::DOOR_DRIVER_FRONT, &status.door_driver_front),
            (id::DOOR_DRIVER_REAR, &status.door_driver_rear),
            (id::DOOR_PASSENGER_FRONT, &status.door_passenger_front),
            (id::DOOR_PASSENGER_REAR, &status.door_passenger_rear),
            (id::TRUNK, &status.trunk),
            (id::HOOD, &status.hood),
            (id::WINDOW_DRIVER_FRONT, &status.window_driver_front),
            (id::WINDOW_DRIVER_REAR, &status.window_driver_rear),
            (id::WINDOW_PASSENGER_FRONT, &status.window_passenger_front),
            (id::WINDOW_PASSENGER_REAR, &status.window_passenger_rear),
            (id::WINDOW_REAR, &status.rear_window),
            (id::SUNROOF, &status.sunroof),
        ] {
            let value = field.as_deref().unwrap_or(INVALID);
            sink.update(ChannelUid::new(group::DOORS, channel), State::text(value));
        }

        self.update_range(status, sink);

        if let Some(pos) = &status.position {
            let lat = pos.lat.unwrap_or(-1.0);
            let lon = pos.lon.unwrap_or(-1.0);
            let loc = |channel: &'static str| ChannelUid::new(group::LOCATION, channel);
            sink.update(loc(id::LATITUDE), State::Decimal(lat));
            sink.update(loc(id::LONGITUDE), State::Decimal(lon));
            sink.update(loc(id::LATLONG), State::Point { lat, lon });
            sink.update(loc(id::HEADING), State::quantity(pos.heading.unwrap_or(-1.0), Unit::Degree));
        }

        self.services.replace(status.services().to_vec());
        self.publish_service(sink);
        self.check_controls.replace(status.check_controls().to_vec());
        self.publish_check_control(sink);
    }

    fn update_range(&self, status: &VehicleStatus, sink: &mut dyn StateSink) {
        let length = self.length_unit();
        let imperial = self.imperial;
        let range = |channel: &'static str| ChannelUid::new(group::RANGE, channel);

        let mileage = status.mileage.unwrap_or(0) as f64;
        sink.update(range(id::MILEAGE), State::quantity(mileage, length));

        let mut total = 0.0;
        if self.caps.is_electric {
            let electric = to_display_unit(
                status.remaining_range_electric.unwrap_or(0.0),
                status.remaining_range_electric_mls.unwrap_or(0.0),
                imperial,
            );
            total += electric;
            sink.update(range(id::RANGE_ELECTRIC), State::quantity(electric, length));
            sink.update(range(id::RADIUS_ELECTRIC), State::quantity(round(estimate_range_radius(electric)), length));
            sink.update(range(id::SOC), State::quantity(status.charging_level_hv.unwrap_or(0.0), Unit::Percent));
        }
        if self.caps.has_fuel {
            let fuel = to_display_unit(
                status.remaining_range_fuel.unwrap_or(0.0),
                status.remaining_range_fuel_mls.unwrap_or(0.0),
                imperial,
            );
            total += fuel;
            sink.update(range(id::RANGE_FUEL), State::quantity(fuel, length));
            sink.update(range(id::RADIUS_FUEL), State::quantity(round(estimate_range_radius(fuel)), length));
            sink.update(range(id::REMAINING_FUEL), State::quantity(status.remaining_fuel.unwrap_or(0.0), Unit::Litre));
        }
        if self.caps.is_hybrid {
            sink.update(range(id::RANGE_HYBRID), State::quantity(round(total), length));
            sink.update(range(id::RADIUS_HYBRID), State::quantity(round(estimate_range_radius(total)), length));
        }
    }

    pub fn update_last_trip(&mut self, trip: &LastTrip, sink: &mut dyn StateSink) {
        let lt = |channel: &'static str| ChannelUid::new(group::LAST_TRIP, channel);
        let date = trip.date.as_deref().map(local_date_time_without_offset);
        sink.update(lt(id::DATE), State::DateTime(date.unwrap_or_else(|| format_date_time(None))));
        sink.update(lt(id::DURATION), State::quantity(trip.duration.unwrap_or(-1.0), Unit::Minute));
        sink.update(lt(id::DISTANCE), State::quantity(round(trip.total_distance.unwrap_or(-1.0)), Unit::Kilometre));
        sink.update(
            lt(id::AVG_CONSUMPTION),
            State::quantity(round(trip.avg_electric_consumption.unwrap_or(-1.0)), Unit::KilowattHour),
        );
        sink.update(
            lt(id::AVG_COMBINED_CONSUMPTION),
            State::quantity(trip.avg_combined_consumption.unwrap_or(-1.0), Unit::Litre),
        );
        sink.update(
            lt(id::AVG_RECUPERATION),
            State::quantity(round(trip.avg_recuperation.unwrap_or(-1.0)), Unit::KilowattHour),
        );
    }

    pub fn update_all_trips(&mut self, trips: &AllTrips, sink: &mut dyn StateSink) {
        let lifetime = |channel: &'static str| ChannelUid::new(group::LIFETIME, channel);
        let user_average = |entry: &Option<CommunityEntry>| {
            entry.as_ref().and_then(|e| e.user_average).unwrap_or(-1.0)
        };
        let charge_cycle = trips.chargecycle_range.as_ref();

        sink.update(
            lifetime(id::CUMULATED_DRIVEN_DISTANCE),
            State::quantity(
                round(trips.total_electric_distance.as_ref().and_then(|d| d.user_total).unwrap_or(-1.0)),
                Unit::Kilometre,
            ),
        );
        sink.update(
            lifetime(id::SINGLE_LONGEST_DISTANCE),
            State::quantity(round(charge_cycle.and_then(|c| c.user_high).unwrap_or(-1.0)), Unit::Kilometre),
        );
        sink.update(
            lifetime(id::AVG_CONSUMPTION),
            State::quantity(round(user_average(&trips.avg_electric_consumption)), Unit::KilowattHour),
        );
        sink.update(
            lifetime(id::AVG_COMBINED_CONSUMPTION),
            State::quantity(user_average(&trips.avg_combined_consumption), Unit::Litre),
        );
        sink.update(
            lifetime(id::AVG_RECUPERATION),
            State::quantity(round(user_average(&trips.avg_recuperation)), Unit::KilowattHour),
        );
        sink.update(
            ChannelUid::new(group::LAST_TRIP, id::DISTANCE_SINCE_CHARGING),
            State::quantity(
                round(charge_cycle.and_then(|c| c.user_current_charge_cycle).unwrap_or(-1.0)),
                Unit::Kilometre,
            ),
        );
    }

    pub fn update_destinations(&mut self, destinations: Vec<Destination>, sink: &mut dyn StateSink) {
        self.destinations.replace(destinations);
        self.publish_destination(sink);
    }

    /// Replace the edit copy with the profile the vehicle reported.
    pub fn update_charge_profile(&mut self, profile: ChargeProfileWrapper, sink: &mut dyn StateSink) {
        self.charge_profile = Some(profile);
        self.publish_charge_profile(sink);
    }

    // ---------------------
    // Browsable lists
    // ---------------------

    pub fn next_service(&mut self, sink: &mut dyn StateSink) {
        self.services.advance();
        self.publish_service(sink);
    }

    pub fn next_check_control(&mut self, sink: &mut dyn StateSink) {
        self.check_controls.advance();
        self.publish_check_control(sink);
    }

    pub fn next_destination(&mut self, sink: &mut dyn StateSink) {
        self.destinations.advance();
        self.publish_destination(sink);
    }

    fn publish_service(&mut self, sink: &mut dyn StateSink) {
        let length = self.length_unit();
        let size = self.services.items.len() as f64;
        let ch = |channel: &'static str| ChannelUid::new(group::SERVICE, channel);
        let (name, date, mileage, index) = match self.services.selected() {
            Some((index, entry)) => (
                to_title_case(entry.cbs_type.as_deref().unwrap_or(UNKNOWN)),
                format_date_time(entry.cbs_due_date.as_deref().and_then(service_due_date)),
                entry.cbs_remaining_mileage.map_or(-1.0, |m| m as f64),
                index as f64,
            ),
            None => (INVALID.to_string(), format_date_time(None), -1.0, -1.0),
        };
        sink.update(ch(id::NAME), State::Text(name));
        sink.update(ch(id::DATE), State::DateTime(date));
        sink.update(ch(id::MILEAGE), State::quantity(round(mileage), length));
        sink.update(ch(id::SIZE), State::Decimal(size));
        sink.update(ch(id::INDEX), State::Decimal(index));
    }

    fn publish_check_control(&mut self, sink: &mut dyn StateSink) {
        let length = self.length_unit();
        let size = self.check_controls.items.len() as f64;
        let ch = |channel: &'static str| ChannelUid::new(group::CHECK_CONTROL, channel);
        let (name, mileage, index) = match self.check_controls.selected() {
            Some((index, entry)) => (
                entry.ccm_description_short.clone().unwrap_or_else(|| INVALID.to_string()),
                entry.ccm_mileage.map_or(-1.0, |m| m as f64),
                index as f64,
            ),
            None => (INVALID.to_string(), -1.0, -1.0),
        };
        sink.update(ch(id::NAME), State::Text(name));
        sink.update(ch(id::MILEAGE), State::quantity(round(mileage), length));
        sink.update(ch(id::SIZE), State::Decimal(size));
        sink.update(ch(id::INDEX), State::Decimal(index));
    }

    fn publish_destination(&mut self, sink: &mut dyn StateSink) {
        let size = self.destinations.items.len() as f64;
        let ch = |channel: &'static str| ChannelUid::new(group::DESTINATION, channel);
        let (name, lat, lon, index) = match self.destinations.selected() {
            Some((index, entry)) => (
                entry.address(),
                entry.lat.unwrap_or(-1.0),
                entry.lon.unwrap_or(-1.0),
                index as f64,
            ),
            None => (INVALID.to_string(), -1.0, -1.0, -1.0),
        };
        sink.update(ch(id::NAME), State::Text(name));
        sink.update(ch(id::LATITUDE), State::Decimal(lat));
        sink.update(ch(id::LONGITUDE), State::Decimal(lon));
        sink.update(ch(id::SIZE), State::Decimal(size));
        sink.update(ch(id::INDEX), State::Decimal(index));
    }

    // ---------------------
    // Charge profile
    // ---------------------

    /// JSON of the edit copy, ready to send to the vehicle.
    pub fn charge_profile_payload(&self) -> Result<String, String> {
        let profile = self
            .charge_profile
            .as_ref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| "no charge profile loaded".to_string())?;
        profile
            .to_json()
            .map_err(|e| format!("charge profile serialization failed: {}", e))
    }

    fn publish_charge_profile(&self, sink: &mut dyn StateSink) {
        let Some(cpw) = self.charge_profile.as_ref().filter(|p| !p.is_empty()) else {
            debug!("No charge profile to publish");
            return;
        };
        let ch = |channel: &str| ChannelUid::new(group::CHARGE, channel);
        let hour = |field: TimeField| State::quantity(f64::from(cpw.get_time(field)), Unit::Hour);
        let minute = |field: TimeField| State::quantity(f64::from(cpw.get_time(field)), Unit::Minute);

        sink.update(ch(id::PROFILE_CLIMATE), State::OnOff(cpw.is_climate_enabled()));
        sink.update(ch(id::PROFILE_MODE), State::text(to_title_case(cpw.mode().unwrap_or(UNKNOWN))));
        sink.update(ch(id::PROFILE_PREFS), State::text(to_title_case(cpw.preference().unwrap_or(UNKNOWN))));
        sink.update(ch(id::WINDOW_START_HOUR), hour(TimeField::ChargeWindowStartHour));
        sink.update(ch(id::WINDOW_START_MINUTE), minute(TimeField::ChargeWindowStartMinute));
        sink.update(ch(id::WINDOW_END_HOUR), hour(TimeField::ChargeWindowEndHour));
        sink.update(ch(id::WINDOW_END_MINUTE), minute(TimeField::ChargeWindowEndMinute));

        for timer in [TimerId::Timer1, TimerId::Timer2, TimerId::Timer3, TimerId::Override] {
            let prefix = timer_prefix(timer);
            sink.update(
                ch(&format!("{}-departure-hour", prefix)),
                hour(TimeField::departure(timer, TimePart::Hour)),
            );
            sink.update(
                ch(&format!("{}-departure-minute", prefix)),
                minute(TimeField::departure(timer, TimePart::Minute)),
            );
            sink.update(ch(&format!("{}-enabled", prefix)), State::OnOff(cpw.is_timer_enabled(timer)));
            if WEEKDAY_TIMERS.contains(&timer) {
                for (weekday, short) in WEEKDAYS {
                    sink.update(
                        ch(&format!("{}-day-{}", prefix, short)),
                        State::OnOff(cpw.is_day_selected(timer, weekday)),
                    );
                }
            }
        }
    }

    fn handle_charge_command(
        &mut self,
        channel: ChargeChannel,
        command: &Command,
        sink: &mut dyn StateSink,
    ) -> Result<CommandOutcome, String> {
        if channel == ChargeChannel::Send {
            return match command {
                Command::OnOff(true) => self.charge_profile_payload().map(CommandOutcome::SendChargeProfile),
                _ => Ok(CommandOutcome::Applied),
            };
        }

        let cpw = self
            .charge_profile
            .as_mut()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| "no charge profile loaded".to_string())?;
        match (channel, command) {
            (ChargeChannel::Climate, Command::OnOff(on)) => cpw.set_climate_enabled(*on),
            (ChargeChannel::Mode, Command::Text(mode)) => cpw.set_mode(mode),
            (ChargeChannel::Preference, Command::Text(pref)) => cpw.set_preference(pref),
            (ChargeChannel::Enabled(timer), Command::OnOff(on)) => cpw.enable_disable_timer(timer, *on),
            (ChargeChannel::Day(timer, day), Command::OnOff(on)) => cpw.day_selection(timer, day, *on),
            (ChargeChannel::Time(field), Command::Number(n)) => {
                let limit = match field.part() {
                    TimePart::Hour => 23.0,
                    TimePart::Minute => 59.0,
                };
                if n.fract() != 0.0 || *n < 0.0 || *n > limit {
                    return Err(format!("{:?} must be a whole number between 0 and {}", field, limit));
                }
                cpw.set_time(field, *n as u32);
            }
            (channel, command) => return Err(format!("{:?} does not accept {:?}", channel, command)),
        }
        self.publish_charge_profile(sink);
        Ok(CommandOutcome::Applied)
    }

    // ---------------------
    // Commands
    // ---------------------

    pub fn handle_command(
        &mut self,
        channel: &ChannelUid,
        command: &Command,
        sink: &mut dyn StateSink,
    ) -> Result<CommandOutcome, String> {
        match (channel.group, channel.id.as_str()) {
            (group::SERVICE, id::NEXT) => self.next_service(sink),
            (group::CHECK_CONTROL, id::NEXT) => self.next_check_control(sink),
            (group::DESTINATION, id::NEXT) => self.next_destination(sink),
            (group::TROUBLESHOOT, id::VEHICLE_FINGERPRINT) => {
                if *command == Command::OnOff(true) {
                    for line in self.fingerprint().lines() {
                        warn!("{}", line);
                    }
                }
                // Switch back to off immediately
                sink.update(channel.clone(), State::OnOff(false));
            }
            (group::CHARGE, channel_id) => {
                let charge = ChargeChannel::parse(channel_id)
                    .ok_or_else(|| format!("{} does not accept commands", channel))?;
                return self.handle_charge_command(charge, command, sink);
            }
            _ => return Err(format!("{} does not accept commands", channel)),
        }
        Ok(CommandOutcome::Applied)
    }

    // ---------------------
    // Troubleshooting
    // ---------------------

    fn anonymize_text(&self, raw: &str) -> String {
        if self.vin.is_empty() {
            return raw.to_string();
        }
        raw.replace(&self.vin, ANONYMOUS)
    }

    fn anonymize_status(&self, raw: &str) -> String {
        let Ok(mut container) = parse_json::<VehicleStatusContainer>(raw) else {
            return self.anonymize_text(raw);
        };
        if let Some(status) = container.vehicle_status.as_mut() {
            status.vin = Some(ANONYMOUS.to_string());
            if let Some(pos) = status.position.as_mut() {
                pos.lat = Some(-1.0);
                pos.lon = Some(-1.0);
                pos.heading = Some(-1.0);
            }
        }
        serde_json::to_string(&container).unwrap_or_else(|_| self.anonymize_text(raw))
    }

    fn anonymize_destinations(&self, raw: &str) -> String {
        let Ok(mut container) = parse_json::<DestinationContainer>(raw) else {
            return self.anonymize_text(raw);
        };
        for entry in container.destinations.iter_mut().flatten() {
            entry.lat = Some(0.0);
            entry.lon = Some(0.0);
            entry.city = Some(ANONYMOUS.to_string());
            entry.street = Some(ANONYMOUS.to_string());
            entry.street_number = Some(ANONYMOUS.to_string());
            entry.country = Some(ANONYMOUS.to_string());
        }
        serde_json::to_string(&container).unwrap_or_else(|_| self.anonymize_text(raw))
    }

    /// Anonymized dump of every cached response, one section per endpoint.
    pub fn fingerprint(&self) -> String {
        let mut out = vec!["###### ConnectedDrive Vehicle Troubleshoot Fingerprint Data - BEGIN ######".to_string()];
        let mut section = |title: &str, body: Option<String>| match body {
            Some(body) => {
                out.push(format!("### {} ###", title));
                out.push(body);
            }
            None => out.push(format!("### {} Empty ###", title)),
        };

        section("Vehicle Status", self.cache.status.as_deref().map(|raw| self.anonymize_status(raw)));
        section("Last Trip", self.cache.last_trip.as_deref().map(|raw| self.anonymize_text(raw)));
        section("All Trips", self.cache.all_trips.as_deref().map(|raw| self.anonymize_text(raw)));
        if self.caps.is_electric {
            section(
                "Charge Profile",
                self.cache.charge_profile.as_deref().map(|raw| self.anonymize_text(raw)),
            );
        }
        section(
            "Destinations",
            self.cache.destinations.as_deref().map(|raw| self.anonymize_destinations(raw)),
        );
        out.push("###### ConnectedDrive Vehicle Troubleshoot Fingerprint Data - END ######".to_string());
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelUpdate;
    use crate::config::VehicleType;

    const VIN: &str = "WBY1Z21000V000000";

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/data/{}", name)).expect("fixture present")
    }

    fn handler(units: Units, vehicle_type: VehicleType) -> VehicleChannelHandler {
        let cest = FixedOffset::east_opt(2 * 3600).expect("offset");
        VehicleChannelHandler::new(units, vehicle_type.capabilities(), VIN).with_zone(cest)
    }

    fn status_fixture() -> VehicleStatus {
        let container: VehicleStatusContainer = parse_json(&fixture("vehicle-status.json")).expect("status");
        container.vehicle_status.expect("vehicleStatus")
    }

    /// Last state published on `group#id`.
    fn state<'a>(sink: &'a [ChannelUpdate], group: &str, channel: &str) -> Option<&'a State> {
        sink.iter()
            .rev()
            .find(|u| u.channel.group == group && u.channel.id == channel)
            .map(|u| &u.state)
    }

    fn quantity(sink: &[ChannelUpdate], group: &str, channel: &str) -> (f64, Unit) {
        match state(sink, group, channel) {
            Some(State::Quantity { value, unit }) => (*value, *unit),
            other => panic!("{group}#{channel} is not a quantity: {other:?}"),
        }
    }

    fn text(sink: &[ChannelUpdate], group: &str, channel: &str) -> String {
        match state(sink, group, channel) {
            Some(State::Text(s)) | Some(State::DateTime(s)) => s.clone(),
            other => panic!("{group}#{channel} is not text: {other:?}"),
        }
    }

    fn cmd(h: &mut VehicleChannelHandler, sink: &mut Vec<ChannelUpdate>, channel: &str, value: &str) -> Result<CommandOutcome, String> {
        let uid: ChannelUid = channel.parse().expect("channel");
        let command: Command = value.parse().expect("command");
        h.handle_command(&uid, &command, sink)
    }

    #[test]
    fn publishes_status_groups() {
        let mut h = handler(Units::Autodetect, VehicleType::ElectricRex);
        let mut sink = Vec::new();
        h.update_vehicle_status(&status_fixture(), &mut sink);

        assert_eq!(text(&sink, group::STATUS, id::LOCK), "Secured");
        assert_eq!(text(&sink, group::STATUS, id::DOORS), "Closed");
        assert_eq!(text(&sink, group::STATUS, id::WINDOWS), "Closed");
        assert_eq!(text(&sink, group::STATUS, id::SERVICE_DATE), "2021-11-01T00:00:00");
        assert_eq!(quantity(&sink, group::STATUS, id::SERVICE_MILEAGE), (24000.0, Unit::Kilometre));
        assert_eq!(text(&sink, group::STATUS, id::CHECK_CONTROL), "OK");
        assert_eq!(text(&sink, group::STATUS, id::LAST_UPDATE), "2020-08-24T17:55:32");
        assert_eq!(text(&sink, group::STATUS, id::CHARGING_STATUS), "Charging Goal Reached");
        assert_eq!(text(&sink, group::DOORS, id::WINDOW_REAR), "INVALID");
        assert_eq!(text(&sink, group::DOORS, id::HOOD), "CLOSED");
        assert_eq!(
            state(&sink, group::LOCATION, id::LATLONG),
            Some(&State::Point { lat: 50.556049, lon: 8.495669 })
        );
        assert_eq!(quantity(&sink, group::LOCATION, id::HEADING), (219.0, Unit::Degree));
    }

    #[test]
    fn publishes_range_for_range_extender() {
        let mut h = handler(Units::Metric, VehicleType::ElectricRex);
        let mut sink = Vec::new();
        h.update_vehicle_status(&status_fixture(), &mut sink);

        assert_eq!(quantity(&sink, group::RANGE, id::MILEAGE), (17273.0, Unit::Kilometre));
        assert_eq!(quantity(&sink, group::RANGE, id::RANGE_ELECTRIC), (148.0, Unit::Kilometre));
        assert_eq!(quantity(&sink, group::RANGE, id::RANGE_FUEL), (70.0, Unit::Kilometre));
        assert_eq!(quantity(&sink, group::RANGE, id::RANGE_HYBRID), (218.0, Unit::Kilometre));
        let (radius, _) = quantity(&sink, group::RANGE, id::RADIUS_HYBRID);
        assert!((radius - 174.4).abs() < 1e-9, "{radius}");
        assert_eq!(quantity(&sink, group::RANGE, id::SOC), (71.0, Unit::Percent));
        assert_eq!(quantity(&sink, group::RANGE, id::REMAINING_FUEL), (4.0, Unit::Litre));
    }

    #[test]
    fn autodetect_switches_to_vendor_miles() {
        let mut status = status_fixture();
        status.vehicle_country = Some("US".to_string());
        let mut h = handler(Units::Autodetect, VehicleType::ElectricRex);
        let mut sink = Vec::new();
        h.update_vehicle_status(&status, &mut sink);

        assert!(h.imperial());
        assert_eq!(quantity(&sink, group::RANGE, id::RANGE_ELECTRIC), (91.0, Unit::Mile));
        assert_eq!(quantity(&sink, group::RANGE, id::RANGE_HYBRID), (134.0, Unit::Mile));
        assert_eq!(quantity(&sink, group::RANGE, id::MILEAGE), (17273.0, Unit::Mile));
    }

    #[test]
    fn conventional_vehicle_skips_electric_channels() {
        let mut h = handler(Units::Metric, VehicleType::Conventional);
        let mut sink = Vec::new();
        h.update_vehicle_status(&status_fixture(), &mut sink);

        assert!(state(&sink, group::RANGE, id::RANGE_ELECTRIC).is_none());
        assert!(state(&sink, group::RANGE, id::SOC).is_none());
        assert!(state(&sink, group::RANGE, id::RANGE_HYBRID).is_none());
        assert!(state(&sink, group::STATUS, id::CHARGING_STATUS).is_none());
        assert_eq!(quantity(&sink, group::RANGE, id::RANGE_FUEL), (70.0, Unit::Kilometre));
    }

    #[test]
    fn service_cursor_wraps_around() {
        let mut h = handler(Units::Metric, VehicleType::Electric);
        let mut sink = Vec::new();
        h.update_vehicle_status(&status_fixture(), &mut sink);
        assert_eq!(text(&sink, group::SERVICE, id::NAME), "Brake Fluid");
        assert_eq!(state(&sink, group::SERVICE, id::SIZE), Some(&State::Decimal(4.0)));
        assert_eq!(state(&sink, group::SERVICE, id::INDEX), Some(&State::Decimal(0.0)));

        let mut names = Vec::new();
        for _ in 0..4 {
            h.next_service(&mut sink);
            names.push(text(&sink, group::SERVICE, id::NAME));
        }
        assert_eq!(names, ["Vehicle Check", "Oil", "Vehicle Tuv", "Brake Fluid"]);
        assert_eq!(quantity(&sink, group::SERVICE, id::MILEAGE), (-1.0, Unit::Kilometre));

        h.next_service(&mut sink);
        assert_eq!(text(&sink, group::SERVICE, id::DATE), "2022-11-01T00:00:00");
        assert_eq!(quantity(&sink, group::SERVICE, id::MILEAGE), (46000.0, Unit::Kilometre));
    }

    #[test]
    fn empty_lists_publish_placeholders() {
        let mut h = handler(Units::Metric, VehicleType::Electric);
        let mut sink = Vec::new();
        h.update_vehicle_status(&status_fixture(), &mut sink);
        assert_eq!(text(&sink, group::CHECK_CONTROL, id::NAME), INVALID);
        assert_eq!(state(&sink, group::CHECK_CONTROL, id::INDEX), Some(&State::Decimal(-1.0)));
        assert_eq!(quantity(&sink, group::CHECK_CONTROL, id::MILEAGE), (-1.0, Unit::Kilometre));

        h.update_destinations(Vec::new(), &mut sink);
        assert_eq!(text(&sink, group::DESTINATION, id::NAME), INVALID);
        assert_eq!(state(&sink, group::DESTINATION, id::LATITUDE), Some(&State::Decimal(-1.0)));
        assert_eq!(state(&sink, group::DESTINATION, id::SIZE), Some(&State::Decimal(0.0)));
    }

    #[test]
    fn destination_cursor_follows_commands() {
        let mut h = handler(Units::Metric, VehicleType::Electric);
        let mut sink = Vec::new();
        let body = r#"{"destinations": [
            {"lat": 48.17, "lon": 11.55, "street": "Petuelring", "streetNumber": "130", "city": "Munich", "country": "DE"},
            {"lat": 52.52, "lon": 13.40, "city": "Berlin", "country": "DE"}
        ]}"#;
        h.on_response(Endpoint::Destinations, body, &mut sink).expect("destinations");
        assert_eq!(text(&sink, group::DESTINATION, id::NAME), "Petuelring 130, Munich, DE");

        cmd(&mut h, &mut sink, "destination#next", "ON").expect("next");
        assert_eq!(text(&sink, group::DESTINATION, id::NAME), "Berlin, DE");
        assert_eq!(state(&sink, group::DESTINATION, id::INDEX), Some(&State::Decimal(1.0)));

        cmd(&mut h, &mut sink, "destination#next", "ON").expect("next");
        assert_eq!(state(&sink, group::DESTINATION, id::INDEX), Some(&State::Decimal(0.0)));
    }

    #[test]
    fn publishes_trip_statistics() {
        let mut h = handler(Units::Metric, VehicleType::Electric);
        let mut sink = Vec::new();
        let last_trip = r#"{"lastTrip": {"totalDistance": 12.34, "avgElectricConsumption": 16.66,
            "avgRecuperation": 1.04, "avgCombinedConsumption": 0, "date": "2020-08-24T17:55:00", "duration": 23}}"#;
        let all_trips = r#"{"allTrips": {
            "avgElectricConsumption": {"userAverage": 17.04},
            "avgRecuperation": {"userAverage": 2.5},
            "avgCombinedConsumption": {"userAverage": 0.8},
            "chargecycleRange": {"userHigh": 213.2, "userCurrentChargeCycle": 48.72},
            "totalElectricDistance": {"userTotal": 14023.6}}}"#;
        h.on_response(Endpoint::LastTrip, last_trip, &mut sink).expect("last trip");
        h.on_response(Endpoint::AllTrips, all_trips, &mut sink).expect("all trips");

        assert_eq!(text(&sink, group::LAST_TRIP, id::DATE), "2020-08-24T17:55:00");
        assert_eq!(quantity(&sink, group::LAST_TRIP, id::DURATION), (23.0, Unit::Minute));
        assert_eq!(quantity(&sink, group::LAST_TRIP, id::DISTANCE), (12.3, Unit::Kilometre));
        assert_eq!(quantity(&sink, group::LAST_TRIP, id::AVG_CONSUMPTION), (16.7, Unit::KilowattHour));
        assert_eq!(quantity(&sink, group::LAST_TRIP, id::DISTANCE_SINCE_CHARGING), (48.7, Unit::Kilometre));
        assert_eq!(quantity(&sink, group::LIFETIME, id::SINGLE_LONGEST_DISTANCE), (213.2, Unit::Kilometre));
        assert_eq!(quantity(&sink, group::LIFETIME, id::CUMULATED_DRIVEN_DISTANCE), (14023.6, Unit::Kilometre));
        assert_eq!(quantity(&sink, group::LIFETIME, id::AVG_COMBINED_CONSUMPTION), (0.8, Unit::Litre));
    }

    #[test]
    fn charge_group_follows_profile() {
        let mut h = handler(Units::Metric, VehicleType::Electric);
        let mut sink = Vec::new();
        h.on_response(Endpoint::ChargeProfile, &fixture("charging-profile.json"), &mut sink)
            .expect("profile");

        assert_eq!(state(&sink, group::CHARGE, id::PROFILE_CLIMATE), Some(&State::OnOff(true)));
        assert_eq!(text(&sink, group::CHARGE, id::PROFILE_MODE), "Immediate Charging");
        assert_eq!(text(&sink, group::CHARGE, id::PROFILE_PREFS), "Charging Window");
        assert_eq!(quantity(&sink, group::CHARGE, "timer1-departure-hour"), (5.0, Unit::Hour));
        assert_eq!(quantity(&sink, group::CHARGE, "timer1-departure-minute"), (6.0, Unit::Minute));
        assert_eq!(state(&sink, group::CHARGE, "timer1-day-mon"), Some(&State::OnOff(true)));
        assert_eq!(state(&sink, group::CHARGE, "timer1-day-sun"), Some(&State::OnOff(false)));
        assert_eq!(quantity(&sink, group::CHARGE, "override-departure-minute"), (30.0, Unit::Minute));
        assert!(state(&sink, group::CHARGE, "override-day-sun").is_none());

        let before = sink.len();
        h.update_charge_profile(ChargeProfileWrapper::default(), &mut sink);
        assert_eq!(sink.len(), before, "empty profile publishes nothing");
    }

    #[test]
    fn charge_commands_edit_and_send() {
        let mut h = handler(Units::Metric, VehicleType::Electric);
        let mut sink = Vec::new();
        h.on_response(Endpoint::ChargeProfile, &fixture("charging-profile.json"), &mut sink)
            .expect("profile");

        cmd(&mut h, &mut sink, "charge#timer1-departure-hour", "9").expect("hour");
        assert_eq!(quantity(&sink, group::CHARGE, "timer1-departure-hour"), (9.0, Unit::Hour));
        cmd(&mut h, &mut sink, "charge#timer1-departure-minute", "30").expect("minute");
        cmd(&mut h, &mut sink, "charge#timer2-day-sun", "ON").expect("day");
        cmd(&mut h, &mut sink, "charge#timer3-enabled", "ON").expect("enable");
        cmd(&mut h, &mut sink, "charge#profile-mode", "DELAYED_CHARGING").expect("mode");
        cmd(&mut h, &mut sink, "charge#profile-climate", "OFF").expect("climate");
        assert_eq!(text(&sink, group::CHARGE, id::PROFILE_MODE), "Delayed Charging");

        assert!(cmd(&mut h, &mut sink, "charge#window-end-hour", "24").is_err());
        assert!(cmd(&mut h, &mut sink, "charge#timer1-departure-minute", "7.5").is_err());
        assert!(cmd(&mut h, &mut sink, "charge#timer1-enabled", "7").is_err());
        assert!(cmd(&mut h, &mut sink, "charge#override-day-mon", "ON").is_err());

        let outcome = cmd(&mut h, &mut sink, "charge#profile-send", "ON").expect("send");
        let CommandOutcome::SendChargeProfile(payload) = outcome else {
            panic!("expected a payload, got {outcome:?}");
        };
        let v: serde_json::Value = serde_json::from_str(&payload).expect("payload is json");
        let planner = &v["weeklyPlanner"];
        assert_eq!(planner["timer1"]["departureTime"], "09:30");
        assert_eq!(planner["timer2"]["weekdays"], json!(["SATURDAY", "SUNDAY"]));
        assert_eq!(planner["timer3"]["timerEnabled"], true);
        assert_eq!(planner["chargingMode"], "DELAYED_CHARGING");
        assert_eq!(planner["climatizationEnabled"], false);
        assert_eq!(planner["preferredChargingWindow"]["enabled"], true);
    }

    #[test]
    fn charge_commands_need_a_profile() {
        let mut h = handler(Units::Metric, VehicleType::Electric);
        let mut sink = Vec::new();
        assert!(cmd(&mut h, &mut sink, "charge#timer1-enabled", "ON").is_err());
        assert!(cmd(&mut h, &mut sink, "charge#profile-send", "ON").is_err());
        assert_eq!(cmd(&mut h, &mut sink, "charge#profile-send", "OFF"), Ok(CommandOutcome::Applied));
        assert!(cmd(&mut h, &mut sink, "status#lock", "ON").is_err());
    }

    #[test]
    fn fingerprint_hides_vin_and_position() {
        let mut h = handler(Units::Metric, VehicleType::ElectricRex);
        let mut sink = Vec::new();
        let status = fixture("vehicle-status.json").replace("ANONYMOUS", VIN);
        h.on_response(Endpoint::Status, &status, &mut sink).expect("status");
        let trip = format!(r#"{{"lastTrip": {{"totalDistance": 5, "vin": "{}"}}}}"#, VIN);
        h.on_response(Endpoint::LastTrip, &trip, &mut sink).expect("trip");
        h.on_error(Endpoint::ChargeProfile, &ClientError::Http { status: 500, message: "boom".into() });
        let destinations = r#"{"destinations": [{"lat": 48.17, "lon": 11.55, "city": "Munich", "street": "Petuelring"}]}"#;
        h.on_response(Endpoint::Destinations, destinations, &mut sink).expect("destinations");

        sink.clear();
        cmd(&mut h, &mut sink, "troubleshoot#vehicle-fingerprint", "ON").expect("fingerprint");
        assert_eq!(state(&sink, group::TROUBLESHOOT, id::VEHICLE_FINGERPRINT), Some(&State::OnOff(false)));

        let report = h.fingerprint();
        assert!(!report.contains(VIN), "{report}");
        assert!(!report.contains("50.556049"));
        assert!(!report.contains("Munich"));
        assert!(!report.contains("Petuelring"));
        assert!(report.contains(r#""vin":"anonymous""#));
        assert!(report.contains("### All Trips Empty ###"));
        assert!(report.contains("http 500: boom"));
    }

    #[test]
    fn malformed_body_is_cached_and_reported() {
        let mut h = handler(Units::Metric, VehicleType::Electric);
        let mut sink = Vec::new();
        assert!(!h.has_response(Endpoint::Status));
        let err = h
            .on_response(Endpoint::Status, r#"{"vehicleStatus": {"mileage": "far"}}"#, &mut sink)
            .expect_err("bad mileage");
        assert!(err.to_string().contains("vehicleStatus.mileage"), "{err}");
        assert!(h.has_response(Endpoint::Status));
        assert!(sink.is_empty());
    }

    #[test]
    fn parses_charge_channel_ids() {
        assert_eq!(ChargeChannel::parse("profile-send"), Some(ChargeChannel::Send));
        assert_eq!(
            ChargeChannel::parse("timer2-day-wed"),
            Some(ChargeChannel::Day(TimerId::Timer2, Weekday::Wed))
        );
        assert_eq!(
            ChargeChannel::parse("override-departure-hour"),
            Some(ChargeChannel::Time(TimeField::OverrideDepartureHour))
        );
        assert_eq!(ChargeChannel::parse("timer4-enabled"), None);
        assert_eq!(ChargeChannel::parse("timer1-day-xyz"), None);
        assert_eq!(ChargeChannel::parse("override-day-mon"), None);
    }
}
