//! USGS earthquake summary feeds (GeoJSON).

use std::fmt;
use std::str::FromStr;

use atlas_events::{CanonicalEvent, Category, GeoPoint, Metadata, Observation};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::adapter::events_or_empty;
use crate::error::SourceError;
use crate::http::{within_deadline, HttpFetcher};

pub const USGS_BASE_URL: &str = "https://earthquake.usgs.gov";
pub const SOURCE_NAME: &str = "USGS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Hour,
    Day,
    Week,
    Month,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

impl FromStr for Timeframe {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(SourceError::InvalidParameter(format!(
                "unknown USGS timeframe '{other}'"
            ))),
        }
    }
}

/// Minimum-magnitude cut of the summary feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagnitudeFeed {
    Significant,
    All,
    M4_5,
    M2_5,
    M1_0,
}

impl MagnitudeFeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Significant => "significant",
            Self::All => "all",
            Self::M4_5 => "4.5",
            Self::M2_5 => "2.5",
            Self::M1_0 => "1.0",
        }
    }
}

impl FromStr for MagnitudeFeed {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "significant" => Ok(Self::Significant),
            "all" => Ok(Self::All),
            "4.5" => Ok(Self::M4_5),
            "2.5" => Ok(Self::M2_5),
            "1.0" => Ok(Self::M1_0),
            other => Err(SourceError::InvalidParameter(format!(
                "unknown USGS magnitude feed '{other}'"
            ))),
        }
    }
}

impl fmt::Display for MagnitudeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeismicParams {
    pub timeframe: Timeframe,
    pub magnitude: MagnitudeFeed,
}

impl Default for SeismicParams {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::Day,
            magnitude: MagnitudeFeed::All,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct UsgsFeature {
    id: String,
    properties: UsgsProperties,
    geometry: Option<PointGeometry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsgsProperties {
    mag: Option<f64>,
    place: Option<String>,
    time: i64,
    url: Option<String>,
    felt: Option<i64>,
    alert: Option<String>,
    status: Option<String>,
    tsunami: Option<i64>,
    sig: Option<i64>,
    mag_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PointGeometry {
    coordinates: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct SeismicAdapter {
    fetcher: HttpFetcher,
    base_url: String,
    params: SeismicParams,
}

impl SeismicAdapter {
    pub fn new(fetcher: HttpFetcher, params: SeismicParams) -> Self {
        Self::with_base_url(fetcher, USGS_BASE_URL, params)
    }

    pub fn with_base_url(fetcher: HttpFetcher, base_url: &str, params: SeismicParams) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            params,
        }
    }

    pub fn feed_url(&self) -> String {
        format!(
            "{}/earthquakes/feed/v1.0/summary/{}_{}.geojson",
            self.base_url,
            self.params.magnitude.as_str(),
            self.params.timeframe.as_str()
        )
    }

    /// Fetch the configured feed and normalize it. Never fails; errors are
    /// logged and yield an empty list.
    pub async fn fetch_and_normalize(&self, deadline: Option<Instant>) -> Vec<CanonicalEvent> {
        events_or_empty(SOURCE_NAME, self.fetch(deadline).await)
    }

    #[instrument(skip(self), fields(feed = %self.params.magnitude))]
    pub async fn fetch(&self, deadline: Option<Instant>) -> Result<Vec<CanonicalEvent>, SourceError> {
        let url = self.feed_url();
        let feed = within_deadline(
            deadline,
            self.fetcher.get_parsed(SOURCE_NAME, &url, None, deadline, parse_feed),
        )
        .await??;
        debug!(count = feed.data.len(), stale = feed.is_stale, "Parsed USGS feed");
        Ok(feed.data)
    }
}

/// Parse a USGS GeoJSON document. Features that cannot be read are skipped.
pub fn parse_feed(body: &str) -> Result<Vec<CanonicalEvent>, SourceError> {
    let collection: FeatureCollection = serde_json::from_str(body)?;

    Ok(collection
        .features
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<UsgsFeature>(raw) {
            Ok(feature) => feature_to_event(feature),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable USGS feature");
                None
            }
        })
        .collect())
}

fn feature_to_event(feature: UsgsFeature) -> Option<CanonicalEvent> {
    let Some(coords) = feature.geometry.map(|g| g.coordinates) else {
        debug!(id = %feature.id, "Skipping USGS feature without geometry");
        return None;
    };
    let (lon, lat) = match coords.as_slice() {
        [lon, lat, ..] => (*lon, *lat),
        _ => {
            debug!(id = %feature.id, "Skipping USGS feature with short coordinates");
            return None;
        }
    };
    let Some(magnitude) = feature.properties.mag else {
        debug!(id = %feature.id, "Skipping USGS feature without magnitude");
        return None;
    };
    let location = GeoPoint::new(lat, lon);
    if !location.is_valid() {
        debug!(id = %feature.id, lat, lon, "Skipping USGS feature outside WGS84 range");
        return None;
    }

    let props = feature.properties;
    let status = props.status.unwrap_or_default();

    let mut metadata = Metadata::new();
    metadata.insert("place".into(), json!(props.place));
    metadata.insert("url".into(), json!(props.url));
    metadata.insert("tsunami".into(), json!(props.tsunami == Some(1)));
    metadata.insert("felt".into(), json!(props.felt));
    metadata.insert("significance".into(), json!(props.sig));
    metadata.insert("magType".into(), json!(props.mag_type));
    metadata.insert("alert".into(), json!(props.alert));
    metadata.insert("status".into(), json!(status));

    Some(CanonicalEvent::normalize(Observation {
        id: feature.id,
        timestamp: props.time,
        category: Category::Seismic,
        primary_value: magnitude,
        secondary_value: coords.get(2).copied(),
        location,
        quality_flag: status,
        source: SOURCE_NAME.to_string(),
        metadata,
    }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use atlas_events::Confidence;

    const FEED: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "id": "us7000abcd",
                "properties": {
                    "mag": 4.2, "place": "10 km SW of Ridgecrest, CA", "time": 1717243200000,
                    "url": "https://earthquake.usgs.gov/earthquakes/eventpage/us7000abcd",
                    "felt": 12, "alert": null, "status": "reviewed", "tsunami": 0,
                    "sig": 271, "magType": "ml"
                },
                "geometry": { "type": "Point", "coordinates": [-117.6, 35.7, 8.2] }
            },
            {
                "type": "Feature",
                "id": "ak0249xyz",
                "properties": {
                    "mag": 7.1, "place": "Alaska Peninsula", "time": 1717246800000,
                    "status": "automatic", "tsunami": 1, "sig": 776, "magType": "mww"
                },
                "geometry": { "type": "Point", "coordinates": [-158.5, 55.1, 35.0] }
            },
            {
                "type": "Feature",
                "id": "nogeom",
                "properties": { "mag": 2.0, "time": 1717246800000, "status": "reviewed" },
                "geometry": null
            },
            { "type": "Feature", "id": "broken", "properties": { "mag": "n/a" } }
        ]
    }"#;

    #[test]
    fn test_parse_feed_maps_fields() {
        let events = parse_feed(FEED).unwrap();
        assert_eq!(events.len(), 2);

        let first = &events[0];
        assert_eq!(first.id, "us7000abcd");
        assert_eq!(first.category, Category::Seismic);
        assert_eq!(first.primary_value, 4.2);
        assert_eq!(first.secondary_value, Some(8.2));
        assert_eq!(first.location, GeoPoint::new(35.7, -117.6));
        assert_eq!(first.confidence, Confidence::High);
        assert_eq!(first.color, "#FF6B6B");
        assert_eq!(first.source, "USGS");
        assert_eq!(first.meta_str("place"), Some("10 km SW of Ridgecrest, CA"));
        assert_eq!(first.metadata["tsunami"], json!(false));

        let second = &events[1];
        assert_eq!(second.confidence, Confidence::Medium);
        assert_eq!(second.color, "#8B0000");
        assert_eq!(second.metadata["tsunami"], json!(true));
    }

    #[test]
    fn test_unknown_status_is_low_confidence() {
        let feed = r#"{"features":[{"id":"x","properties":{"mag":1.0,"time":0,"status":"deleted"},
            "geometry":{"coordinates":[0.0,0.0]}}]}"#;
        let events = parse_feed(feed).unwrap();
        assert_eq!(events[0].confidence, Confidence::Low);
        assert_eq!(events[0].secondary_value, None);
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(matches!(parse_feed("<html>"), Err(SourceError::Parse(_))));
    }

    #[test]
    fn test_params_parse() {
        assert_eq!("week".parse::<Timeframe>().unwrap(), Timeframe::Week);
        assert_eq!("4.5".parse::<MagnitudeFeed>().unwrap(), MagnitudeFeed::M4_5);
        assert!("year".parse::<Timeframe>().is_err());
        assert!("3.0".parse::<MagnitudeFeed>().is_err());
    }
}
