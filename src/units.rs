//! Display-unit selection and formatting helpers.
//!
//! The vendor ships range values in both kilometres and miles, so choosing a
//! display unit is a selection between two supplied numbers, never a conversion.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::debug;

/// Share of the remaining range assumed reachable as a straight line.
/// Firmware updates have changed the vendor's own estimate; keep it in one place.
pub const RANGE_RADIUS_FACTOR: f64 = 0.8;

/// Rendered in place of a date the vendor did not supply.
pub const NULL_DATE: &str = "1900-01-01T00:00:00";

pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Pick the figure matching the configured unit system.
pub fn to_display_unit(metric: f64, imperial_precomputed: f64, imperial: bool) -> f64 {
    if imperial { imperial_precomputed } else { metric }
}

/// Conservative reachable radius for a remaining range, in the range's unit.
pub fn estimate_range_radius(range: f64) -> f64 {
    range.max(0.0) * RANGE_RADIUS_FACTOR
}

/// One decimal place.
pub fn round(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `CHARGING_GOAL_REACHED` -> `Charging Goal Reached`
pub fn to_title_case(input: &str) -> String {
    input
        .split(['_', ' '])
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a vendor timestamp. Offset-less values are UTC.
///
/// Accepts `2020-08-24T15:55:32`, `2020-08-24T15:55:32+0000` and the
/// `2020-08-24 T15:55:32+0000` variant some firmware sends.
pub fn parse_vendor_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = raw.trim().replace(" T", "T");
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(&normalized, DATE_TIME_FORMAT) {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            debug!("Unparsable vendor timestamp {:?}: {}", raw, e);
            None
        }
    }
}

/// Render a vendor UTC timestamp in the given zone, or [`NULL_DATE`].
pub fn to_local_date_time<Tz: TimeZone>(raw: &str, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match parse_vendor_timestamp(raw) {
        Some(utc) => utc.with_timezone(tz).format(DATE_TIME_FORMAT).to_string(),
        None => NULL_DATE.to_string(),
    }
}

/// Offset-less local timestamps (trip dates) pass through, normalized to [`DATE_TIME_FORMAT`].
pub fn local_date_time_without_offset(raw: &str) -> String {
    let normalized = raw.trim().replace(" T", "T");
    NaiveDateTime::parse_from_str(&normalized, DATE_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M"))
        .map(|v| v.format(DATE_TIME_FORMAT).to_string())
        .unwrap_or_else(|_| NULL_DATE.to_string())
}

/// Service due dates come as `YYYY-MM`; the due moment is the first of that month.
pub fn service_due_date(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    let date = NaiveDate::parse_from_str(&format!("{}-01", trimmed), "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"));
    match date {
        Ok(d) => d.and_hms_opt(0, 0, 0),
        Err(e) => {
            debug!("Unparsable service due date {:?}: {}", raw, e);
            None
        }
    }
}

pub fn format_date_time(value: Option<NaiveDateTime>) -> String {
    value
        .map(|v| v.format(DATE_TIME_FORMAT).to_string())
        .unwrap_or_else(|| NULL_DATE.to_string())
}
