//! Stable ids for sources that do not provide one.
//!
//! FIRMS detections, AirNow observations and EIA outage rows carry no native
//! identifier, so the id is built from a location key plus the observation
//! time. Re-ingesting the same physical reading always yields the same id.

/// Decimal places kept for FIRMS pixel coordinates
pub const FIRMS_COORD_PRECISION: usize = 4;

/// Decimal places kept for AirNow station coordinates
pub const AIRNOW_COORD_PRECISION: usize = 2;

/// `{lat}_{lon}` rounded to `precision` decimal places.
pub fn location_key(lat: f64, lon: f64, precision: usize) -> String {
    format!("{}_{}", fixed(lat, precision), fixed(lon, precision))
}

/// Fixed-point text with negative zero folded into zero, so `-0.00001`
/// and `0.00001` land on the same key.
fn fixed(value: f64, precision: usize) -> String {
    let text = format!("{:.*}", precision, value);
    match text.strip_prefix('-') {
        Some(digits) if digits.bytes().all(|b| b == b'0' || b == b'.') => digits.to_string(),
        _ => text,
    }
}

pub fn firms_event_id(lat: f64, lon: f64, timestamp_ms: i64) -> String {
    format!(
        "nasa_firms_{}_{}",
        location_key(lat, lon, FIRMS_COORD_PRECISION),
        timestamp_ms
    )
}

pub fn airnow_event_id(lat: f64, lon: f64, timestamp_ms: i64) -> String {
    format!(
        "airnow_{}_{}",
        location_key(lat, lon, AIRNOW_COORD_PRECISION),
        timestamp_ms
    )
}

/// One row per state and reporting period
pub fn eia_outage_event_id(state: &str, timestamp_ms: i64) -> String {
    format!("eia_outage_{}_{}", state.to_ascii_uppercase(), timestamp_ms)
}
