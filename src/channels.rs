//! Channel identifiers, semantic states and the sink they are published to.

use std::fmt;
use std::str::FromStr;

use log::info;

pub mod group {
    pub const STATUS: &str = "status";
    pub const RANGE: &str = "range";
    pub const LOCATION: &str = "location";
    pub const SERVICE: &str = "service";
    pub const CHECK_CONTROL: &str = "check";
    pub const DOORS: &str = "doors";
    pub const CHARGE: &str = "charge";
    pub const LAST_TRIP: &str = "last-trip";
    pub const LIFETIME: &str = "lifetime";
    pub const DESTINATION: &str = "destination";
    pub const TROUBLESHOOT: &str = "troubleshoot";

    pub const ALL: [&str; 11] = [
        STATUS,
        RANGE,
        LOCATION,
        SERVICE,
        CHECK_CONTROL,
        DOORS,
        CHARGE,
        LAST_TRIP,
        LIFETIME,
        DESTINATION,
        TROUBLESHOOT,
    ];
}

pub mod id {
    // status
    pub const DOORS: &str = "doors";
    pub const WINDOWS: &str = "windows";
    pub const LOCK: &str = "lock";
    pub const SERVICE_DATE: &str = "service-date";
    pub const SERVICE_MILEAGE: &str = "service-mileage";
    pub const CHECK_CONTROL: &str = "check-control";
    pub const CHARGING_STATUS: &str = "charge";
    pub const LAST_UPDATE: &str = "last-update";

    // range
    pub const MILEAGE: &str = "mileage";
    pub const RANGE_ELECTRIC: &str = "electric";
    pub const RANGE_FUEL: &str = "fuel";
    pub const RANGE_HYBRID: &str = "hybrid";
    pub const RADIUS_ELECTRIC: &str = "radius-electric";
    pub const RADIUS_FUEL: &str = "radius-fuel";
    pub const RADIUS_HYBRID: &str = "radius-hybrid";
    pub const SOC: &str = "soc";
    pub const REMAINING_FUEL: &str = "remaining-fuel";

    // location
    pub const LATITUDE: &str = "latitude";
    pub const LONGITUDE: &str = "longitude";
    pub const LATLONG: &str = "latlong";
    pub const HEADING: &str = "heading";

    // browsable lists
    pub const NAME: &str = "name";
    pub const DATE: &str = "date";
    pub const SIZE: &str = "size";
    pub const INDEX: &str = "index";
    pub const NEXT: &str = "next";

    // doors group
    pub const DOOR_DRIVER_FRONT: &str = "driver-front";
    pub const DOOR_DRIVER_REAR: &str = "driver-rear";
    pub const DOOR_PASSENGER_FRONT: &str = "passenger-front";
    pub const DOOR_PASSENGER_REAR: &str = "passenger-rear";
    pub const TRUNK: &str = "trunk";
    pub const HOOD: &str = "hood";
    pub const WINDOW_DRIVER_FRONT: &str = "win-driver-front";
    pub const WINDOW_DRIVER_REAR: &str = "win-driver-rear";
    pub const WINDOW_PASSENGER_FRONT: &str = "win-passenger-front";
    pub const WINDOW_PASSENGER_REAR: &str = "win-passenger-rear";
    pub const WINDOW_REAR: &str = "win-rear";
    pub const SUNROOF: &str = "sunroof";

    // statistics
    pub const DURATION: &str = "duration";
    pub const DISTANCE: &str = "distance";
    pub const DISTANCE_SINCE_CHARGING: &str = "distance-since-charging";
    pub const AVG_CONSUMPTION: &str = "average-consumption";
    pub const AVG_COMBINED_CONSUMPTION: &str = "average-combined-consumption";
    pub const AVG_RECUPERATION: &str = "average-recuperation";
    pub const CUMULATED_DRIVEN_DISTANCE: &str = "cumulated-driven-distance";
    pub const SINGLE_LONGEST_DISTANCE: &str = "single-longest-distance";

    // charge profile
    pub const PROFILE_CLIMATE: &str = "profile-climate";
    pub const PROFILE_MODE: &str = "profile-mode";
    pub const PROFILE_PREFS: &str = "profile-prefs";
    pub const PROFILE_SEND: &str = "profile-send";
    pub const WINDOW_START_HOUR: &str = "window-start-hour";
    pub const WINDOW_START_MINUTE: &str = "window-start-minute";
    pub const WINDOW_END_HOUR: &str = "window-end-hour";
    pub const WINDOW_END_MINUTE: &str = "window-end-minute";

    pub const VEHICLE_FINGERPRINT: &str = "vehicle-fingerprint";
}

/// `group#id`, e.g. `range#electric`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelUid {
    pub group: &'static str,
    pub id: String,
}

impl ChannelUid {
    pub fn new(group: &'static str, id: impl Into<String>) -> Self {
        Self { group, id: id.into() }
    }
}

impl fmt::Display for ChannelUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.group, self.id)
    }
}

impl FromStr for ChannelUid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, id) = s
            .split_once('#')
            .ok_or_else(|| format!("channel {:?} is not of the form group#id", s))?;
        let group = group::ALL
            .into_iter()
            .find(|g| *g == group)
            .ok_or_else(|| format!("unknown channel group {:?}", group))?;
        if id.is_empty() {
            return Err(format!("channel {:?} has an empty id", s));
        }
        Ok(ChannelUid::new(group, id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Kilometre,
    Mile,
    Litre,
    Percent,
    KilowattHour,
    Hour,
    Minute,
    Degree,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Kilometre => "km",
            Unit::Mile => "mi",
            Unit::Litre => "l",
            Unit::Percent => "%",
            Unit::KilowattHour => "kWh",
            Unit::Hour => "h",
            Unit::Minute => "min",
            Unit::Degree => "°",
        }
    }

    pub fn length(imperial: bool) -> Unit {
        if imperial { Unit::Mile } else { Unit::Kilometre }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Text(String),
    Quantity { value: f64, unit: Unit },
    /// Local `YYYY-MM-DDTHH:MM:SS`.
    DateTime(String),
    OnOff(bool),
    Decimal(f64),
    Point { lat: f64, lon: f64 },
}

impl State {
    pub fn text(value: impl Into<String>) -> Self {
        State::Text(value.into())
    }

    pub fn quantity(value: f64, unit: Unit) -> Self {
        State::Quantity { value, unit }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Text(s) | State::DateTime(s) => f.write_str(s),
            State::Quantity { value, unit } => write!(f, "{} {}", value, unit.symbol()),
            State::OnOff(true) => f.write_str("ON"),
            State::OnOff(false) => f.write_str("OFF"),
            State::Decimal(v) => write!(f, "{}", v),
            State::Point { lat, lon } => write!(f, "{},{}", lat, lon),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUpdate {
    pub channel: ChannelUid,
    pub state: State,
}

/// Receives every state the handler publishes.
pub trait StateSink {
    fn update(&mut self, channel: ChannelUid, state: State);
}

impl StateSink for Vec<ChannelUpdate> {
    fn update(&mut self, channel: ChannelUid, state: State) {
        self.push(ChannelUpdate { channel, state });
    }
}

/// Writes updates to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl StateSink for LogSink {
    fn update(&mut self, channel: ChannelUid, state: State) {
        info!("{} = {}", channel, state);
    }
}

/// Value written to a channel from outside.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    OnOff(bool),
    Number(f64),
    Text(String),
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("empty command value".to_string());
        }
        Ok(match trimmed {
            v if v.eq_ignore_ascii_case("ON") => Command::OnOff(true),
            v if v.eq_ignore_ascii_case("OFF") => Command::OnOff(false),
            v => match v.parse::<f64>() {
                Ok(n) => Command::Number(n),
                Err(_) => Command::Text(v.to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_channel_uids() {
        let uid: ChannelUid = "charge#timer1-enabled".parse().expect("uid");
        assert_eq!(uid, ChannelUid::new(group::CHARGE, "timer1-enabled"));
        assert_eq!(uid.to_string(), "charge#timer1-enabled");
        assert!("charge".parse::<ChannelUid>().is_err());
        assert!("remote#horn".parse::<ChannelUid>().is_err());
        assert!("status#".parse::<ChannelUid>().is_err());
    }

    #[test]
    fn parses_commands() {
        assert_eq!("on".parse::<Command>(), Ok(Command::OnOff(true)));
        assert_eq!("OFF".parse::<Command>(), Ok(Command::OnOff(false)));
        assert_eq!(" 7 ".parse::<Command>(), Ok(Command::Number(7.0)));
        assert_eq!(
            "DELAYED_CHARGING".parse::<Command>(),
            Ok(Command::Text("DELAYED_CHARGING".to_string()))
        );
        assert!("  ".parse::<Command>().is_err());
    }

    #[test]
    fn renders_states() {
        assert_eq!(State::quantity(148.0, Unit::Kilometre).to_string(), "148 km");
        assert_eq!(State::quantity(17.5, Unit::Percent).to_string(), "17.5 %");
        assert_eq!(State::OnOff(true).to_string(), "ON");
        assert_eq!(State::Point { lat: 50.5, lon: 8.4 }.to_string(), "50.5,8.4");
        assert_eq!(Unit::length(true), Unit::Mile);
    }

    #[test]
    fn vec_sink_collects_in_order() {
        let mut sink: Vec<ChannelUpdate> = Vec::new();
        sink.update(ChannelUid::new(group::STATUS, id::LOCK), State::text("Secured"));
        sink.update(ChannelUid::new(group::RANGE, id::SOC), State::quantity(80.0, Unit::Percent));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0].channel.to_string(), "status#lock");
    }
}
