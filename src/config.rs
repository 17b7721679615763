//! Runtime configuration read from the process environment.
//! Defaults target a rest-of-world account polled every five minutes.

use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_REFRESH_MINUTES: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Countries whose vehicles report in miles.
pub const MILE_COUNTRIES: [&str; 2] = ["US", "GB"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    RestOfWorld,
    NorthAmerica,
    China,
}

impl Region {
    /// API host, including the port where the region needs one.
    pub fn server(self) -> &'static str {
        match self {
            Region::RestOfWorld => "b2vapi.bmwgroup.com",
            Region::NorthAmerica => "b2vapi.bmwgroup.us",
            Region::China => "b2vapi.bmwgroup.cn:8592",
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ROW" => Ok(Region::RestOfWorld),
            "NORTH_AMERICA" => Ok(Region::NorthAmerica),
            "CHINA" => Ok(Region::China),
            other => Err(format!("unknown region {:?}; expected ROW, NORTH_AMERICA or CHINA", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Autodetect,
    Imperial,
    Metric,
}

impl Units {
    /// Whether to report imperial figures. Autodetect decides per status response.
    pub fn imperial_for(self, vehicle_country: Option<&str>) -> bool {
        match self {
            Units::Imperial => true,
            Units::Metric => false,
            Units::Autodetect => vehicle_country.is_some_and(|c| MILE_COUNTRIES.contains(&c.trim())),
        }
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTODETECT" => Ok(Units::Autodetect),
            "IMPERIAL" => Ok(Units::Imperial),
            "METRIC" => Ok(Units::Metric),
            other => Err(format!("unknown units {:?}; expected AUTODETECT, IMPERIAL or METRIC", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleType {
    Conventional,
    PluginHybrid,
    ElectricRex,
    Electric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VehicleCapabilities {
    pub has_fuel: bool,
    pub is_electric: bool,
    pub is_hybrid: bool,
}

impl VehicleType {
    pub fn capabilities(self) -> VehicleCapabilities {
        let has_fuel = matches!(self, VehicleType::Conventional | VehicleType::PluginHybrid | VehicleType::ElectricRex);
        let is_electric = matches!(self, VehicleType::PluginHybrid | VehicleType::ElectricRex | VehicleType::Electric);
        VehicleCapabilities {
            has_fuel,
            is_electric,
            is_hybrid: has_fuel && is_electric,
        }
    }
}

impl FromStr for VehicleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONV" => Ok(VehicleType::Conventional),
            "PHEV" => Ok(VehicleType::PluginHybrid),
            "BEV_REX" => Ok(VehicleType::ElectricRex),
            "BEV" => Ok(VehicleType::Electric),
            other => Err(format!("unknown vehicle type {:?}; expected CONV, PHEV, BEV_REX or BEV", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    /// HTTP Basic credential of the OAuth client, sent verbatim.
    pub client_auth: String,
    pub region: Region,
    pub vin: String,
    pub vehicle_type: VehicleType,
    pub units: Units,
    /// Polling cadence; never below one minute.
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| var(key).ok_or_else(|| format!("Missing required setting {}", key));

        let region = match var("CONNECTED_DRIVE_REGION") {
            Some(s) => s.parse::<Region>()?,
            None => Region::RestOfWorld,
        };
        let units = match var("UNITS") {
            Some(s) => s.parse::<Units>()?,
            None => Units::Autodetect,
        };
        let vehicle_type = required("VEHICLE_TYPE")?.parse::<VehicleType>()?;

        let refresh_minutes = match var("REFRESH_INTERVAL_MINUTES") {
            Some(s) => s
                .parse::<u64>()
                .map_err(|_| "REFRESH_INTERVAL_MINUTES must be a whole number of minutes".to_string())?,
            None => DEFAULT_REFRESH_MINUTES,
        };
        let timeout_secs = match var("REQUEST_TIMEOUT_SECS") {
            Some(s) => s
                .parse::<u64>()
                .map_err(|_| "REQUEST_TIMEOUT_SECS must be a whole number of seconds".to_string())?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Config {
            username: required("CONNECTED_DRIVE_USERNAME")?,
            password: required("CONNECTED_DRIVE_PASSWORD")?,
            client_auth: required("CONNECTED_DRIVE_CLIENT_AUTH")?,
            region,
            vin: required("CONNECTED_DRIVE_VIN")?,
            vehicle_type,
            units,
            refresh_interval: Duration::from_secs(refresh_minutes.max(1) * 60),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
