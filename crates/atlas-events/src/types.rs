use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::scoring::{color_for_category, confidence_from_source_flag};

/// Category-specific extras carried alongside an event
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Which kind of hazard an event describes; decides how
/// `primary_value` and `secondary_value` are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Seismic,
    Fire,
    AirQuality,
    PowerOutage,
    SevereWeather,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Seismic,
        Category::Fire,
        Category::AirQuality,
        Category::PowerOutage,
        Category::SevereWeather,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seismic => "seismic",
            Self::Fire => "fire",
            Self::AirQuality => "air_quality",
            Self::PowerOutage => "power_outage",
            Self::SevereWeather => "severe_weather",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "category",
                value: s.to_string(),
            })
    }
}

/// Three-level quality scale every source flag is mapped onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(ParseEnumError {
                kind: "confidence",
                value: other.to_string(),
            }),
        }
    }
}

/// WGS84 point in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A normalized hazard observation.
///
/// `confidence` and `color` are derived from the other fields when the event
/// is built through [`CanonicalEvent::normalize`]; adapters never set them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub id: String,
    /// Milliseconds since the Unix epoch, UTC
    pub timestamp: i64,
    pub category: Category,
    pub primary_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_value: Option<f64>,
    pub location: GeoPoint,
    pub confidence: Confidence,
    pub source: String,
    pub color: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// What an adapter knows about a record before derivation
#[derive(Debug, Clone)]
pub struct Observation {
    pub id: String,
    pub timestamp: i64,
    pub category: Category,
    pub primary_value: f64,
    pub secondary_value: Option<f64>,
    pub location: GeoPoint,
    /// The source's own quality vocabulary (USGS status, FIRMS letter, ...)
    pub quality_flag: String,
    pub source: String,
    pub metadata: Metadata,
}

impl CanonicalEvent {
    /// Build an event from an observation, deriving confidence and color.
    pub fn normalize(obs: Observation) -> Self {
        let confidence = confidence_from_source_flag(obs.category, &obs.quality_flag);
        let color = color_for_category(obs.category, obs.primary_value).to_string();

        Self {
            id: obs.id,
            timestamp: obs.timestamp,
            category: obs.category,
            primary_value: obs.primary_value,
            secondary_value: obs.secondary_value,
            location: obs.location,
            confidence,
            source: obs.source,
            color,
            metadata: obs.metadata,
        }
    }

    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Look up a string metadata field
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Look up a numeric metadata field
    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.as_f64())
    }
}
