//! Models for the ConnectedDrive `webapi/v1` JSON documents.
//!
//! Scope: types only. Derived values live in `crate::status` and
//! `crate::charge_profile`.
//!
//! Notes
//! - Every field is optional; the vendor omits whatever does not apply to a vehicle.
//! - Timestamps and due dates stay strings here. The vendor mixes several formats
//!   (`2020-08-24T15:55:32`, `2020-08-24T15:55:32+0000`, `2021-11`) and parsing is
//!   done where the value is used.
//! - Charge-profile documents keep unknown keys in `extra` so a profile can be
//!   sent back to the vehicle without losing anything we do not model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =====================
// Vehicle status
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStatusContainer {
    pub vehicle_status: Option<VehicleStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStatus {
    pub mileage: Option<i64>,
    pub remaining_fuel: Option<f64>,
    pub remaining_range_electric: Option<f64>,
    pub remaining_range_electric_mls: Option<f64>,
    pub remaining_range_fuel: Option<f64>,
    pub remaining_range_fuel_mls: Option<f64>,
    pub max_range_electric: Option<f64>,
    pub max_range_electric_mls: Option<f64>,
    pub max_fuel: Option<f64>,
    pub charging_level_hv: Option<f64>,
    pub vin: Option<String>,
    pub update_reason: Option<String>,
    /// Vendor timestamp with offset, e.g. `2020-08-24T15:55:32+0000`.
    pub update_time: Option<String>,

    // Doors
    pub door_driver_front: Option<String>,
    pub door_driver_rear: Option<String>,
    pub door_passenger_front: Option<String>,
    pub door_passenger_rear: Option<String>,
    pub trunk: Option<String>,
    pub hood: Option<String>,

    // Windows
    pub window_driver_front: Option<String>,
    pub window_driver_rear: Option<String>,
    pub window_passenger_front: Option<String>,
    pub window_passenger_rear: Option<String>,
    pub rear_window: Option<String>,
    pub sunroof: Option<String>,

    pub door_lock_state: Option<String>,
    pub parking_light: Option<String>,
    pub position_light: Option<String>,
    pub connection_status: Option<String>,
    pub charging_status: Option<String>,
    pub last_charging_end_reason: Option<String>,
    pub last_charging_end_result: Option<String>,
    pub position: Option<Position>,
    /// UTC timestamp without offset, e.g. `2020-08-24T15:55:32`.
    #[serde(rename = "internalDataTimeUTC")]
    pub internal_data_time_utc: Option<String>,
    pub single_immediate_charging: Option<bool>,
    pub charging_connection_type: Option<String>,
    pub charging_inductive_positioning: Option<String>,
    pub vehicle_country: Option<String>,
    #[serde(rename = "DCS_CCH_Activation")]
    pub dcs_cch_activation: Option<String>,
    #[serde(rename = "DCS_CCH_Ongoing")]
    pub dcs_cch_ongoing: Option<bool>,
    pub check_control_messages: Option<Vec<CcmMessage>>,
    pub cbs_data: Option<Vec<CbsMessage>>,
}

/// Condition based service entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CbsMessage {
    pub cbs_type: Option<String>,
    pub cbs_state: Option<String>,
    /// Year-month granularity, e.g. `2021-11`.
    pub cbs_due_date: Option<String>,
    pub cbs_description: Option<String>,
    /// `0` means the service has no mileage based due condition.
    pub cbs_remaining_mileage: Option<i64>,
}

/// Check-control message raised by the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CcmMessage {
    pub ccm_description_short: Option<String>,
    pub ccm_description_long: Option<String>,
    pub ccm_id: Option<i64>,
    pub ccm_mileage: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// `-1` when the vehicle could not determine its heading.
    pub heading: Option<f64>,
    pub status: Option<String>,
}

// =====================
// Statistics
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LastTripContainer {
    pub last_trip: Option<LastTrip>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LastTrip {
    pub efficiency_value: Option<f64>,
    pub total_distance: Option<f64>,
    pub electric_distance: Option<f64>,
    pub avg_electric_consumption: Option<f64>,
    pub avg_recuperation: Option<f64>,
    pub driving_mode_value: Option<f64>,
    pub acceleration_value: Option<f64>,
    pub anticipation_value: Option<f64>,
    pub total_consumption_value: Option<f64>,
    pub auxiliary_consumption_value: Option<f64>,
    pub avg_combined_consumption: Option<f64>,
    pub electric_distance_ratio: Option<f64>,
    pub saved_fuel: Option<f64>,
    /// Local date time without offset, e.g. `2020-08-24T17:55:00`.
    pub date: Option<String>,
    /// Minutes.
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllTripsContainer {
    pub all_trips: Option<AllTrips>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllTrips {
    pub avg_electric_consumption: Option<CommunityEntry>,
    pub avg_recuperation: Option<CommunityEntry>,
    pub chargecycle_range: Option<CommunityChargeCycleEntry>,
    pub total_electric_distance: Option<CommunityEletricDistanceEntry>,
    pub avg_combined_consumption: Option<CommunityEntry>,
    pub saving_cumulated_electric_driven_distance: Option<f64>,
    pub reset_date: Option<String>,
    pub battery_size_max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommunityEntry {
    pub community_low: Option<f64>,
    pub community_average: Option<f64>,
    pub community_high: Option<f64>,
    pub user_average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommunityChargeCycleEntry {
    pub community_average: Option<f64>,
    pub community_high: Option<f64>,
    pub user_average: Option<f64>,
    pub user_high: Option<f64>,
    pub user_current_charge_cycle: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommunityEletricDistanceEntry {
    pub community_low: Option<f64>,
    pub community_average: Option<f64>,
    pub community_high: Option<f64>,
    pub user_total: Option<f64>,
}

// =====================
// Destinations
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DestinationContainer {
    pub destinations: Option<Vec<Destination>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    #[serde(rename = "type")]
    pub r#type: Option<String>,
    pub created_at: Option<String>,
}

impl Destination {
    /// Single-line address, skipping missing parts.
    pub fn address(&self) -> String {
        let street = match (self.street.as_deref(), self.street_number.as_deref()) {
            (Some(s), Some(n)) if !n.is_empty() => Some(format!("{} {}", s, n)),
            (Some(s), _) => Some(s.to_string()),
            _ => None,
        };
        [street, self.city.clone(), self.country.clone()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// =====================
// Charge profile
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPlanner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub climatization_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging_preferences: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer1: Option<Timer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer2: Option<Timer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer3: Option<Timer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_timer: Option<Timer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_charging_window: Option<ChargingWindow>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Legacy planner: two timers, no weekday selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TwoTimesTimer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer1: Option<Timer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer2: Option<Timer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_charging_window: Option<ChargingWindow>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    /// `HH:MM`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_enabled: Option<bool>,
    /// Upper-case English day names, e.g. `MONDAY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekdays: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChargingWindow {
    /// `HH:MM`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// `HH:MM`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
