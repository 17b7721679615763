//! Derived values computed from one vehicle status response.

use crate::models::connected_drive::{CbsMessage, CcmMessage, VehicleStatus};
use crate::units::{service_due_date, to_title_case, NULL_DATE};
use chrono::{Months, NaiveDateTime, Utc};
use core::fmt;
use log::debug;

/// Door/window/lock value for "not fitted to this vehicle".
pub const INVALID: &str = "INVALID";
pub const OPEN: &str = "OPEN";
pub const INTERMEDIATE: &str = "INTERMEDIATE";
pub const CLOSED: &str = "CLOSED";
pub const UNKNOWN: &str = "UNKNOWN";
/// Check-control summary when no message is active.
pub const OK: &str = "OK";

/// Horizon for the "earliest due date" scans.
const SERVICE_HORIZON: Months = Months::new(100 * 12);

/// Aggregate of a group of doors or windows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OverallState {
    Open,
    Intermediate,
    Closed,
    Unknown,
}

impl OverallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallState::Open => OPEN,
            OverallState::Intermediate => INTERMEDIATE,
            OverallState::Closed => CLOSED,
            OverallState::Unknown => UNKNOWN,
        }
    }
}

impl fmt::Display for OverallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named door or window field as reported by the vehicle.
pub type StateField<'a> = (&'static str, Option<&'a str>);

/// Aggregate open/closed state over a group of fields.
///
/// The first `OPEN` wins and ends the scan. `INTERMEDIATE` beats `CLOSED`, and
/// `CLOSED` needs at least one field that actually reported it. `INVALID`,
/// missing and unrecognised values never change the result.
pub fn check_closed<'a, I>(fields: I) -> OverallState
where
    I: IntoIterator<Item = StateField<'a>>,
{
    let mut overall = OverallState::Unknown;
    for (name, value) in fields {
        let Some(state) = value else { continue };
        if state.eq_ignore_ascii_case(INVALID) {
            continue;
        }
        if state.eq_ignore_ascii_case(OPEN) {
            overall = OverallState::Open;
            break;
        } else if state.eq_ignore_ascii_case(INTERMEDIATE) {
            if overall != OverallState::Open {
                overall = OverallState::Intermediate;
            }
        } else if state.eq_ignore_ascii_case(CLOSED) {
            if overall == OverallState::Unknown {
                overall = OverallState::Closed;
            }
        } else {
            debug!("Unknown status {} for field {}", state, name);
        }
    }
    overall
}

fn remaining_mileage(entry: &CbsMessage) -> Option<i64> {
    entry.cbs_remaining_mileage.filter(|m| *m != 0)
}

fn due_date(entry: &CbsMessage) -> Option<NaiveDateTime> {
    entry.cbs_due_date.as_deref().and_then(service_due_date)
}

fn horizon(now: NaiveDateTime) -> NaiveDateTime {
    now.checked_add_months(SERVICE_HORIZON).unwrap_or(NaiveDateTime::MAX)
}

/// Pick the service shown as "next".
///
/// Entries with both a mileage and a date replace the current pick when they
/// improve on either axis, and then both trackers take that entry's values.
/// The result therefore depends on list order when the mileage-best and the
/// date-best entries differ. Returns a default message when nothing qualifies.
pub fn select_next_service(services: &[CbsMessage], now: NaiveDateTime) -> CbsMessage {
    let mut best_mileage = i64::MAX;
    let mut best_date = horizon(now);
    let mut selected: Option<&CbsMessage> = None;

    for entry in services {
        match (remaining_mileage(entry), due_date(entry)) {
            (Some(mileage), Some(date)) => {
                if mileage < best_mileage || date < best_date {
                    best_mileage = mileage;
                    best_date = date;
                    selected = Some(entry);
                }
            }
            (Some(mileage), None) => {
                if mileage < best_mileage {
                    best_mileage = mileage;
                    selected = Some(entry);
                }
            }
            (None, Some(date)) => {
                if date < best_date {
                    best_date = date;
                    selected = Some(entry);
                }
            }
            (None, None) => {}
        }
    }
    selected.cloned().unwrap_or_default()
}

/// Earliest due date over all services, independent of [`select_next_service`].
pub fn select_next_service_date(services: &[CbsMessage], now: NaiveDateTime) -> Option<NaiveDateTime> {
    let limit = horizon(now);
    services.iter().filter_map(due_date).filter(|d| *d < limit).min()
}

/// Lowest remaining mileage over all services, independent of [`select_next_service`].
pub fn select_next_service_mileage(services: &[CbsMessage]) -> Option<i64> {
    services.iter().filter_map(remaining_mileage).min()
}

/// `OK` when no message is active, else the first message's title-cased short description.
pub fn check_control_summary(messages: Option<&[CcmMessage]>) -> String {
    match messages {
        None => to_title_case(UNKNOWN),
        Some([]) => OK.to_string(),
        Some([first, ..]) => to_title_case(first.ccm_description_short.as_deref().unwrap_or(UNKNOWN)),
    }
}

impl VehicleStatus {
    pub fn doors(&self) -> [StateField<'_>; 6] {
        [
            ("doorDriverFront", self.door_driver_front.as_deref()),
            ("doorDriverRear", self.door_driver_rear.as_deref()),
            ("doorPassengerFront", self.door_passenger_front.as_deref()),
            ("doorPassengerRear", self.door_passenger_rear.as_deref()),
            ("trunk", self.trunk.as_deref()),
            ("hood", self.hood.as_deref()),
        ]
    }

    pub fn windows(&self) -> [StateField<'_>; 6] {
        [
            ("windowDriverFront", self.window_driver_front.as_deref()),
            ("windowDriverRear", self.window_driver_rear.as_deref()),
            ("windowPassengerFront", self.window_passenger_front.as_deref()),
            ("windowPassengerRear", self.window_passenger_rear.as_deref()),
            ("rearWindow", self.rear_window.as_deref()),
            ("sunroof", self.sunroof.as_deref()),
        ]
    }

    pub fn door_state(&self) -> OverallState {
        check_closed(self.doors())
    }

    pub fn window_state(&self) -> OverallState {
        check_closed(self.windows())
    }

    pub fn services(&self) -> &[CbsMessage] {
        self.cbs_data.as_deref().unwrap_or(&[])
    }

    pub fn check_controls(&self) -> &[CcmMessage] {
        self.check_control_messages.as_deref().unwrap_or(&[])
    }

    pub fn next_service(&self) -> CbsMessage {
        select_next_service(self.services(), Utc::now().naive_utc())
    }

    pub fn next_service_date(&self) -> Option<NaiveDateTime> {
        select_next_service_date(self.services(), Utc::now().naive_utc())
    }

    pub fn next_service_mileage(&self) -> Option<i64> {
        select_next_service_mileage(self.services())
    }

    pub fn check_control(&self) -> String {
        check_control_summary(self.check_control_messages.as_deref())
    }

    /// Vehicle-side UTC timestamp, else the server's update time, else [`NULL_DATE`].
    pub fn update_time(&self) -> &str {
        self.internal_data_time_utc
            .as_deref()
            .or(self.update_time.as_deref())
            .unwrap_or(NULL_DATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::connected_drive::VehicleStatusContainer;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 8, 24).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn cbs(kind: &str, due: Option<&str>, mileage: Option<i64>) -> CbsMessage {
        CbsMessage {
            cbs_type: Some(kind.to_string()),
            cbs_due_date: due.map(str::to_string),
            cbs_remaining_mileage: mileage,
            ..Default::default()
        }
    }

    fn load_status_fixture() -> VehicleStatus {
        let json = std::fs::read_to_string("tests/data/vehicle-status.json").expect("fixture present");
        let container: VehicleStatusContainer = serde_json::from_str(&json).expect("parse vehicle status");
        container.vehicle_status.expect("fixture has vehicleStatus")
    }

    #[test]
    fn all_invalid_or_unrecognised_is_unknown() {
        let fields = [("a", Some("INVALID")), ("b", Some("invalid")), ("c", Some("AJAR")), ("d", None)];
        assert_eq!(check_closed(fields), OverallState::Unknown);
        assert_eq!(check_closed(Vec::<StateField<'_>>::new()), OverallState::Unknown);
    }

    #[test]
    fn any_open_wins() {
        let fields = [("a", Some("CLOSED")), ("b", Some("INTERMEDIATE")), ("c", Some("open")), ("d", Some("OPEN"))];
        assert_eq!(check_closed(fields), OverallState::Open);
        let first = [("a", Some("OPEN")), ("b", Some("CLOSED"))];
        assert_eq!(check_closed(first), OverallState::Open);
    }

    #[test]
    fn intermediate_beats_closed_in_any_order() {
        let before = [("a", Some("INTERMEDIATE")), ("b", Some("CLOSED")), ("c", Some("INVALID"))];
        let after = [("a", Some("CLOSED")), ("b", Some("Intermediate")), ("c", Some("CLOSED"))];
        assert_eq!(check_closed(before), OverallState::Intermediate);
        assert_eq!(check_closed(after), OverallState::Intermediate);
    }

    #[test]
    fn closed_needs_one_closed_field() {
        let fields = [("a", Some("INVALID")), ("b", Some("closed")), ("c", Some("SOMETHING"))];
        assert_eq!(check_closed(fields), OverallState::Closed);
    }

    #[test]
    fn fixture_doors_and_windows_closed() {
        let status = load_status_fixture();
        assert_eq!(status.door_state(), OverallState::Closed);
        // rearWindow is INVALID and must not matter
        assert_eq!(status.window_state(), OverallState::Closed);
    }

    #[test]
    fn empty_service_list_yields_default_message() {
        let next = select_next_service(&[], now());
        assert_eq!(next, CbsMessage::default());
        assert!(next.cbs_type.is_none());
        assert_eq!(select_next_service_date(&[], now()), None);
        assert_eq!(select_next_service_mileage(&[]), None);
    }

    #[test]
    fn lower_mileage_wins_without_dates() {
        let services = [cbs("A", None, Some(100)), cbs("B", None, Some(50))];
        assert_eq!(select_next_service(&services, now()).cbs_type.as_deref(), Some("B"));
    }

    #[test]
    fn zero_mileage_is_not_due() {
        let services = [cbs("A", None, Some(0)), cbs("B", None, Some(5000))];
        assert_eq!(select_next_service(&services, now()).cbs_type.as_deref(), Some("B"));
        assert_eq!(select_next_service_mileage(&services), Some(5000));
    }

    #[test]
    fn earlier_date_wins_without_mileage() {
        let services = [cbs("A", Some("2022-11"), None), cbs("B", Some("2021-11"), None)];
        assert_eq!(select_next_service(&services, now()).cbs_type.as_deref(), Some("B"));
    }

    #[test]
    fn combined_entries_win_on_either_axis_so_order_matters() {
        let near_km = cbs("NEAR_KM", Some("2023-01"), Some(1000));
        let near_date = cbs("NEAR_DATE", Some("2021-01"), Some(20000));

        let forward = [near_km.clone(), near_date.clone()];
        assert_eq!(select_next_service(&forward, now()).cbs_type.as_deref(), Some("NEAR_DATE"));

        let backward = [near_date, near_km];
        assert_eq!(select_next_service(&backward, now()).cbs_type.as_deref(), Some("NEAR_KM"));
    }

    #[test]
    fn independent_scans_can_point_elsewhere() {
        let services = [cbs("NEAR_DATE", Some("2021-01"), Some(20000)), cbs("NEAR_KM", Some("2023-01"), Some(1000))];
        assert_eq!(select_next_service(&services, now()).cbs_type.as_deref(), Some("NEAR_KM"));
        assert_eq!(
            select_next_service_date(&services, now()),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(select_next_service_mileage(&services), Some(1000));
    }

    #[test]
    fn malformed_due_date_is_not_set() {
        let services = [cbs("BROKEN", Some("soon"), None), cbs("OK", Some("2022-02"), None)];
        assert_eq!(select_next_service(&services, now()).cbs_type.as_deref(), Some("OK"));
    }

    #[test]
    fn fixture_service_selection() {
        let status = load_status_fixture();
        let services = status.services();
        // BRAKE_FLUID has the earliest date but OIL improves the mileage axis afterwards
        assert_eq!(select_next_service(services, now()).cbs_type.as_deref(), Some("OIL"));
        assert_eq!(
            select_next_service_date(services, now()),
            NaiveDate::from_ymd_opt(2021, 11, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(select_next_service_mileage(services), Some(24000));
    }

    #[test]
    fn check_control_summary_uses_first_message() {
        assert_eq!(check_control_summary(Some(&[][..])), "OK");
        assert_eq!(check_control_summary(None), "Unknown");
        let messages = [
            CcmMessage {
                ccm_description_short: Some("ENGINE_OIL".into()),
                ..Default::default()
            },
            CcmMessage {
                ccm_description_short: Some("AAA_FIRST_ALPHABETICALLY".into()),
                ..Default::default()
            },
        ];
        assert_eq!(check_control_summary(Some(&messages[..])), "Engine Oil");
    }

    #[test]
    fn update_time_prefers_internal_utc() {
        let mut status = load_status_fixture();
        assert_eq!(status.update_time(), "2020-08-24T15:55:32");
        status.internal_data_time_utc = None;
        assert_eq!(status.update_time(), "2020-08-24T15:55:32+0000");
        status.update_time = None;
        assert_eq!(status.update_time(), NULL_DATE);
    }
}
