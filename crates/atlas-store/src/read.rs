//! Read-side mappers from stored canonical events to presentation shapes.
//!
//! Each service call queries one category and reshapes the rows. A store
//! failure never propagates: the response carries empty `data` and an
//! `error` message instead.

use atlas_events::scoring::aqi_label;
use atlas_events::{CanonicalEvent, Category, Confidence};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::client::EventStoreClient;
use crate::store::TimeWindow;

const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

const EARTHQUAKE_HOURS: i64 = 24;
const EARTHQUAKE_LIMIT: usize = 20;
const WILDFIRE_HOURS: i64 = 24;
const WILDFIRE_LIMIT: usize = 100;
const AIR_QUALITY_HOURS: i64 = 24;
const AIR_QUALITY_LIMIT: usize = 50;
pub const SEVERE_WEATHER_HOURS: i64 = 72;
const POWER_OUTAGE_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataServiceResponse<T> {
    pub data: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the response was assembled, epoch milliseconds
    pub timestamp: i64,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Earthquake {
    pub id: String,
    /// `[lat, lon]`
    pub coords: [f64; 2],
    pub magnitude: f64,
    /// Kilometres, rounded
    pub depth: f64,
    pub location: String,
    pub time: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Satellite {
    #[serde(rename = "MODIS")]
    Modis,
    #[serde(rename = "VIIRS")]
    Viirs,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wildfire {
    pub id: String,
    pub coords: [f64; 2],
    pub brightness: f64,
    /// 0-100
    pub confidence: u8,
    pub scan: f64,
    pub location: String,
    pub time: String,
    pub timestamp: i64,
    pub satellite: Satellite,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirQuality {
    pub id: String,
    pub coords: [f64; 2],
    /// Only present for PM2.5 readings
    pub pm25: Option<f64>,
    pub aqi: f64,
    pub quality: &'static str,
    pub location: String,
    pub time: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SevereWeather {
    pub id: String,
    pub coords: [f64; 2],
    pub event: String,
    pub severity: String,
    pub urgency: String,
    pub certainty: Option<String>,
    pub headline: String,
    pub description: Option<String>,
    pub instruction: Option<String>,
    pub area_desc: Option<String>,
    pub location: String,
    pub time: String,
    pub timestamp: i64,
    /// RFC 3339
    pub expires: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerOutage {
    pub id: String,
    pub coords: [f64; 2],
    pub customers_out: u64,
    pub percentage_out: f64,
    pub state: String,
    pub location: String,
    pub time: String,
    pub timestamp: i64,
    pub severity: String,
}

/// "Just now", "N minute(s) ago", "N hour(s) ago" or "N day(s) ago".
pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms - timestamp_ms;
    let minutes = diff.div_euclid(MS_PER_MINUTE);
    let hours = diff.div_euclid(MS_PER_HOUR);
    let days = diff.div_euclid(MS_PER_DAY);

    fn plural(n: i64, unit: &str) -> String {
        if n == 1 {
            format!("1 {unit} ago")
        } else {
            format!("{n} {unit}s ago")
        }
    }

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        plural(minutes, "minute")
    } else if hours < 24 {
        plural(hours, "hour")
    } else {
        plural(days, "day")
    }
}

fn coords(event: &CanonicalEvent) -> [f64; 2] {
    [event.location.lat, event.location.lon]
}

fn coord_label(event: &CanonicalEvent) -> String {
    format!("{:.2}, {:.2}", event.location.lat, event.location.lon)
}

fn meta_string(event: &CanonicalEvent, key: &str) -> Option<String> {
    event
        .meta_str(key)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn earthquake_from_event(event: &CanonicalEvent, now_ms: i64) -> Earthquake {
    Earthquake {
        id: event.id.clone(),
        coords: coords(event),
        magnitude: round_to(event.primary_value, 1),
        depth: event.secondary_value.unwrap_or(0.0).round(),
        location: meta_string(event, "place").unwrap_or_else(|| coord_label(event)),
        time: format_relative_time(event.timestamp, now_ms),
        timestamp: event.timestamp,
    }
}

pub fn wildfire_from_event(event: &CanonicalEvent, now_ms: i64) -> Wildfire {
    let confidence = match event.confidence {
        Confidence::High => 100,
        Confidence::Medium => 50,
        Confidence::Low => 0,
    };
    let satellite = match event.meta_str("instrument").map(str::to_ascii_uppercase) {
        Some(i) if i.contains("MODIS") => Satellite::Modis,
        Some(i) if i.contains("VIIRS") => Satellite::Viirs,
        _ => Satellite::Unknown,
    };
    Wildfire {
        id: event.id.clone(),
        coords: coords(event),
        brightness: event.meta_f64("brightness").unwrap_or(0.0),
        confidence,
        scan: event.meta_f64("scan").unwrap_or(0.0),
        location: coord_label(event),
        time: format_relative_time(event.timestamp, now_ms),
        timestamp: event.timestamp,
        satellite,
    }
}

pub fn air_quality_from_event(event: &CanonicalEvent, now_ms: i64) -> AirQuality {
    let location = match (meta_string(event, "city"), meta_string(event, "state")) {
        (Some(city), Some(state)) => format!("{city}, {state}"),
        (Some(city), None) => city,
        _ => coord_label(event),
    };
    AirQuality {
        id: event.id.clone(),
        coords: coords(event),
        pm25: event.secondary_value.map(|v| round_to(v, 1)),
        aqi: event.primary_value,
        quality: aqi_label(event.primary_value),
        location,
        time: format_relative_time(event.timestamp, now_ms),
        timestamp: event.timestamp,
    }
}

pub fn severe_weather_from_event(event: &CanonicalEvent, now_ms: i64) -> SevereWeather {
    let name = meta_string(event, "event").unwrap_or_else(|| "Weather Alert".to_string());
    let area_desc = meta_string(event, "areaDesc");
    let expires = meta_string(event, "expires").unwrap_or_else(|| {
        DateTime::<Utc>::from_timestamp_millis(event.timestamp + MS_PER_HOUR)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    });

    SevereWeather {
        id: event.id.clone(),
        coords: coords(event),
        headline: meta_string(event, "headline").unwrap_or_else(|| name.clone()),
        event: name,
        severity: meta_string(event, "severity").unwrap_or_else(|| "Unknown".to_string()),
        urgency: meta_string(event, "urgency").unwrap_or_else(|| "Unknown".to_string()),
        certainty: meta_string(event, "certainty"),
        description: meta_string(event, "description"),
        instruction: meta_string(event, "instruction"),
        location: area_desc.clone().unwrap_or_else(|| coord_label(event)),
        area_desc,
        time: format_relative_time(event.timestamp, now_ms),
        timestamp: event.timestamp,
        expires,
    }
}

pub fn power_outage_from_event(event: &CanonicalEvent, now_ms: i64) -> PowerOutage {
    let state = meta_string(event, "state");
    PowerOutage {
        id: event.id.clone(),
        coords: coords(event),
        customers_out: event.primary_value.max(0.0).round() as u64,
        percentage_out: round_to(event.secondary_value.unwrap_or(0.0), 2),
        location: state.clone().unwrap_or_else(|| coord_label(event)),
        state: state.unwrap_or_else(|| "Unknown".to_string()),
        time: format_relative_time(event.timestamp, now_ms),
        timestamp: event.timestamp,
        severity: meta_string(event, "severity").unwrap_or_else(|| "Minor".to_string()),
    }
}

/// Per-domain reads over the event store.
#[derive(Clone)]
pub struct ReadService {
    client: EventStoreClient,
    fixed_now: Option<DateTime<Utc>>,
}

impl ReadService {
    pub fn new(client: EventStoreClient) -> Self {
        Self {
            client,
            fixed_now: None,
        }
    }

    /// Pin "now" for relative times and windows.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.fixed_now = Some(now);
        self
    }

    fn now_ms(&self) -> i64 {
        self.fixed_now.unwrap_or_else(Utc::now).timestamp_millis()
    }

    async fn read<T>(
        &self,
        category: Category,
        hours_back: Option<i64>,
        limit: Option<usize>,
        map: fn(&CanonicalEvent, i64) -> T,
    ) -> DataServiceResponse<T> {
        let now_ms = self.now_ms();
        let window = match hours_back {
            Some(hours) => TimeWindow::After(now_ms - hours * MS_PER_HOUR),
            None => TimeWindow::After(i64::MIN),
        };

        match self.client.query_by_category_and_window(category, window).await {
            Ok(events) => {
                let data: Vec<T> = events
                    .iter()
                    .take(limit.unwrap_or(usize::MAX))
                    .map(|e| map(e, now_ms))
                    .collect();
                info!(%category, count = data.len(), "Read events");
                DataServiceResponse {
                    data,
                    error: None,
                    timestamp: now_ms,
                    cached: false,
                }
            }
            Err(e) => {
                warn!(%category, error = %e, "Event store read failed");
                DataServiceResponse {
                    data: Vec::new(),
                    error: Some(e.to_string()),
                    timestamp: now_ms,
                    cached: false,
                }
            }
        }
    }

    pub async fn earthquakes(&self) -> DataServiceResponse<Earthquake> {
        self.read(
            Category::Seismic,
            Some(EARTHQUAKE_HOURS),
            Some(EARTHQUAKE_LIMIT),
            earthquake_from_event,
        )
        .await
    }

    pub async fn wildfires(&self) -> DataServiceResponse<Wildfire> {
        self.read(
            Category::Fire,
            Some(WILDFIRE_HOURS),
            Some(WILDFIRE_LIMIT),
            wildfire_from_event,
        )
        .await
    }

    pub async fn air_quality(&self) -> DataServiceResponse<AirQuality> {
        self.read(
            Category::AirQuality,
            Some(AIR_QUALITY_HOURS),
            Some(AIR_QUALITY_LIMIT),
            air_quality_from_event,
        )
        .await
    }

    pub async fn severe_weather(&self) -> DataServiceResponse<SevereWeather> {
        self.read(
            Category::SevereWeather,
            Some(SEVERE_WEATHER_HOURS),
            None,
            severe_weather_from_event,
        )
        .await
    }

    pub async fn power_outages(&self) -> DataServiceResponse<PowerOutage> {
        self.read(
            Category::PowerOutage,
            None,
            Some(POWER_OUTAGE_LIMIT),
            power_outage_from_event,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use atlas_events::{GeoPoint, Metadata};
    use serde_json::json;

    const NOW: i64 = 1_717_243_200_000;

    fn event(category: Category, primary: f64, secondary: Option<f64>, metadata: serde_json::Value) -> CanonicalEvent {
        let metadata: Metadata = serde_json::from_value(metadata).unwrap();
        CanonicalEvent {
            id: "evt".to_string(),
            timestamp: NOW - 2 * MS_PER_HOUR,
            category,
            primary_value: primary,
            secondary_value: secondary,
            location: GeoPoint::new(35.123, -118.456),
            confidence: Confidence::Medium,
            source: "test".to_string(),
            color: "#FFFFFF".to_string(),
            metadata,
        }
    }

    #[test]
    fn test_format_relative_time() {
        assert_eq!(format_relative_time(NOW, NOW), "Just now");
        assert_eq!(format_relative_time(NOW + 5_000, NOW), "Just now");
        assert_eq!(format_relative_time(NOW - 59_999, NOW), "Just now");
        assert_eq!(format_relative_time(NOW - MS_PER_MINUTE, NOW), "1 minute ago");
        assert_eq!(format_relative_time(NOW - 45 * MS_PER_MINUTE, NOW), "45 minutes ago");
        assert_eq!(format_relative_time(NOW - MS_PER_HOUR, NOW), "1 hour ago");
        assert_eq!(format_relative_time(NOW - 23 * MS_PER_HOUR, NOW), "23 hours ago");
        assert_eq!(format_relative_time(NOW - MS_PER_DAY, NOW), "1 day ago");
        assert_eq!(format_relative_time(NOW - 3 * MS_PER_DAY, NOW), "3 days ago");
    }

    #[test]
    fn test_earthquake_shape() {
        let e = event(Category::Seismic, 4.26, Some(8.6), json!({"place": "Ridgecrest, CA"}));
        let quake = earthquake_from_event(&e, NOW);
        assert_eq!(quake.coords, [35.123, -118.456]);
        assert_eq!(quake.magnitude, 4.3);
        assert_eq!(quake.depth, 9.0);
        assert_eq!(quake.location, "Ridgecrest, CA");
        assert_eq!(quake.time, "2 hours ago");
    }

    #[test]
    fn test_wildfire_shape() {
        let e = event(
            Category::Fire,
            3.0,
            Some(150.0),
            json!({"brightness": 340.5, "scan": 0.4, "instrument": "VIIRS"}),
        );
        let fire = wildfire_from_event(&e, NOW);
        assert_eq!(fire.confidence, 50);
        assert_eq!(fire.satellite, Satellite::Viirs);
        assert_eq!(fire.brightness, 340.5);
        assert_eq!(fire.location, "35.12, -118.46");

        let unknown = wildfire_from_event(&event(Category::Fire, 1.0, None, json!({})), NOW);
        assert_eq!(unknown.satellite, Satellite::Unknown);
        assert_eq!(unknown.brightness, 0.0);
    }

    #[test]
    fn test_air_quality_shape() {
        let e = event(
            Category::AirQuality,
            120.0,
            Some(43.37),
            json!({"city": "Los Angeles", "state": "CA"}),
        );
        let aq = air_quality_from_event(&e, NOW);
        assert_eq!(aq.quality, "Unhealthy for Sensitive Groups");
        assert_eq!(aq.pm25, Some(43.4));
        assert_eq!(aq.location, "Los Angeles, CA");
    }

    #[test]
    fn test_severe_weather_defaults() {
        let e = event(Category::SevereWeather, 60.0, Some(0.0), json!({}));
        let alert = severe_weather_from_event(&e, NOW);
        assert_eq!(alert.event, "Weather Alert");
        assert_eq!(alert.headline, "Weather Alert");
        assert_eq!(alert.severity, "Unknown");
        assert_eq!(alert.location, "35.12, -118.46");
        let expires = DateTime::parse_from_rfc3339(&alert.expires).unwrap();
        assert_eq!(expires.timestamp_millis(), e.timestamp + MS_PER_HOUR);
    }

    #[test]
    fn test_power_outage_shape() {
        let e = event(Category::PowerOutage, 12_345.6, Some(3.14159), json!({"state": "TX"}));
        let outage = power_outage_from_event(&e, NOW);
        assert_eq!(outage.customers_out, 12_346);
        assert_eq!(outage.percentage_out, 3.14);
        assert_eq!(outage.location, "TX");
        assert_eq!(outage.severity, "Minor");
    }
}
