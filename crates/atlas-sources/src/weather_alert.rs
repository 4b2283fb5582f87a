//! NOAA NWS active alerts (CAP over GeoJSON).

use atlas_events::scoring::weather_hazard_label;
use atlas_events::{severity_score, CanonicalEvent, Category, GeoPoint, Metadata, Observation};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::adapter::events_or_empty;
use crate::error::SourceError;
use crate::http::{within_deadline, HttpFetcher};

pub const NWS_BASE_URL: &str = "https://api.weather.gov";
pub const SOURCE_NAME: &str = "NOAA NWS";

/// Geographic center of the contiguous US, used when an alert has no usable
/// geometry (zone-based alerts often ship `geometry: null`).
pub const CONTINENTAL_US_CENTER: GeoPoint = GeoPoint {
    lat: 39.8283,
    lon: -98.5795,
};

const KEPT_SEVERITIES: [&str; 3] = ["Severe", "Extreme", "Moderate"];

#[derive(Debug, Deserialize)]
struct AlertCollection {
    #[serde(default)]
    features: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AlertFeature {
    id: String,
    #[serde(default)]
    geometry: Option<Value>,
    properties: AlertProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AlertProperties {
    area_desc: Option<String>,
    sent: Option<String>,
    effective: Option<String>,
    expires: Option<String>,
    status: Option<String>,
    message_type: Option<String>,
    severity: Option<String>,
    certainty: Option<String>,
    urgency: Option<String>,
    event: Option<String>,
    sender_name: Option<String>,
    headline: Option<String>,
    description: Option<String>,
    instruction: Option<String>,
}

impl AlertProperties {
    fn is_actionable(&self) -> bool {
        self.status.as_deref() == Some("Actual")
            && self.message_type.as_deref() != Some("Cancel")
            && self
                .severity
                .as_deref()
                .is_some_and(|s| KEPT_SEVERITIES.contains(&s))
    }
}

#[derive(Debug, Clone)]
pub struct WeatherAlertAdapter {
    fetcher: HttpFetcher,
    base_url: String,
}

impl WeatherAlertAdapter {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self::with_base_url(fetcher, NWS_BASE_URL)
    }

    pub fn with_base_url(fetcher: HttpFetcher, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch_and_normalize(&self, deadline: Option<Instant>) -> Vec<CanonicalEvent> {
        events_or_empty(SOURCE_NAME, self.fetch(deadline).await)
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self, deadline: Option<Instant>) -> Result<Vec<CanonicalEvent>, SourceError> {
        let url = format!("{}/alerts/active", self.base_url);
        let alerts = within_deadline(
            deadline,
            self.fetcher.get_parsed(SOURCE_NAME, &url, None, deadline, parse_alerts),
        )
        .await??;
        debug!(count = alerts.data.len(), stale = alerts.is_stale, "Parsed NWS alerts");
        Ok(alerts.data)
    }
}

/// Parse an active-alerts document, keeping actual, non-cancelled alerts of
/// Moderate severity or worse.
pub fn parse_alerts(body: &str) -> Result<Vec<CanonicalEvent>, SourceError> {
    let collection: AlertCollection = serde_json::from_str(body)?;

    Ok(collection
        .features
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<AlertFeature>(raw) {
            Ok(feature) => Some(feature),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable alert");
                None
            }
        })
        .filter(|feature| feature.properties.is_actionable())
        .filter_map(alert_to_event)
        .collect())
}

fn alert_to_event(feature: AlertFeature) -> Option<CanonicalEvent> {
    let props = feature.properties;
    let timestamp = props
        .sent
        .as_deref()
        .or(props.effective.as_deref())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis());
    let Some(timestamp) = timestamp else {
        debug!(id = %feature.id, "Skipping alert without a valid sent time");
        return None;
    };

    let severity = props.severity.clone().unwrap_or_default();
    let urgency = props.urgency.clone().unwrap_or_default();
    let event_name = props.event.clone().unwrap_or_default();

    let mut metadata = Metadata::new();
    metadata.insert("event".into(), json!(props.event));
    metadata.insert("headline".into(), json!(props.headline));
    metadata.insert("description".into(), json!(props.description));
    metadata.insert("instruction".into(), json!(props.instruction));
    metadata.insert("severity".into(), json!(props.severity));
    metadata.insert("urgency".into(), json!(props.urgency));
    metadata.insert("certainty".into(), json!(props.certainty));
    metadata.insert("areaDesc".into(), json!(props.area_desc));
    metadata.insert("expires".into(), json!(props.expires));
    metadata.insert("senderName".into(), json!(props.sender_name));
    metadata.insert("hazardLabel".into(), json!(weather_hazard_label(&event_name)));

    Some(CanonicalEvent::normalize(Observation {
        id: feature.id,
        timestamp,
        category: Category::SevereWeather,
        primary_value: severity_score(&severity, &urgency),
        secondary_value: Some(if urgency == "Immediate" { 1.0 } else { 0.0 }),
        location: centroid_or_default(feature.geometry.as_ref()),
        quality_flag: props.certainty.unwrap_or_default(),
        source: SOURCE_NAME.to_string(),
        metadata,
    }))
}

/// Representative point for an alert geometry.
///
/// Polygons reduce to the arithmetic mean of their first ring's vertices.
/// Anything missing or unreadable falls back to [`CONTINENTAL_US_CENTER`].
pub fn centroid_or_default(geometry: Option<&Value>) -> GeoPoint {
    geometry
        .and_then(representative_point)
        .filter(GeoPoint::is_valid)
        .unwrap_or(CONTINENTAL_US_CENTER)
}

fn representative_point(geometry: &Value) -> Option<GeoPoint> {
    let coordinates = geometry.get("coordinates")?;
    match geometry.get("type")?.as_str()? {
        "Point" => position(coordinates),
        "Polygon" => ring_centroid(coordinates.get(0)?),
        "MultiPolygon" => ring_centroid(coordinates.get(0)?.get(0)?),
        _ => None,
    }
}

/// GeoJSON position `[lon, lat, ...]`
fn position(value: &Value) -> Option<GeoPoint> {
    let pair = value.as_array()?;
    let lon = pair.first()?.as_f64()?;
    let lat = pair.get(1)?.as_f64()?;
    Some(GeoPoint::new(lat, lon))
}

fn ring_centroid(ring: &Value) -> Option<GeoPoint> {
    let vertices: Vec<GeoPoint> = ring.as_array()?.iter().filter_map(position).collect();
    if vertices.is_empty() {
        return None;
    }
    let n = vertices.len() as f64;
    let lat = vertices.iter().map(|p| p.lat).sum::<f64>() / n;
    let lon = vertices.iter().map(|p| p.lon).sum::<f64>() / n;
    Some(GeoPoint::new(lat, lon))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use atlas_events::Confidence;

    fn alert(id: &str, status: &str, message_type: &str, severity: &str, geometry: Value) -> Value {
        json!({
            "id": id,
            "type": "Feature",
            "geometry": geometry,
            "properties": {
                "areaDesc": "Oklahoma County",
                "sent": "2024-05-06T19:35:00-05:00",
                "expires": "2024-05-06T20:30:00-05:00",
                "status": status,
                "messageType": message_type,
                "severity": severity,
                "certainty": "Observed",
                "urgency": "Immediate",
                "event": "Tornado Warning",
                "senderName": "NWS Norman OK",
                "headline": "Tornado Warning issued",
                "description": "A confirmed tornado was located near Moore.",
                "instruction": "TAKE COVER NOW!"
            }
        })
    }

    fn square() -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[-98.0, 35.0], [-97.0, 35.0], [-97.0, 36.0], [-98.0, 36.0]]]
        })
    }

    #[test]
    fn test_null_geometry_falls_back_to_center() {
        assert_eq!(centroid_or_default(None), CONTINENTAL_US_CENTER);
        assert_eq!(centroid_or_default(Some(&Value::Null)), CONTINENTAL_US_CENTER);
        let empty = json!({"type": "Polygon", "coordinates": [[]]});
        assert_eq!(centroid_or_default(Some(&empty)), CONTINENTAL_US_CENTER);
        let line = json!({"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]});
        assert_eq!(centroid_or_default(Some(&line)), CONTINENTAL_US_CENTER);
    }

    #[test]
    fn test_polygon_centroid() {
        let point = centroid_or_default(Some(&square()));
        assert_eq!(point, GeoPoint::new(35.5, -97.5));
    }

    #[test]
    fn test_point_and_multipolygon() {
        let point = json!({"type": "Point", "coordinates": [-90.0, 30.0]});
        assert_eq!(centroid_or_default(Some(&point)), GeoPoint::new(30.0, -90.0));

        let multi = json!({
            "type": "MultiPolygon",
            "coordinates": [[[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]]], [[[50.0, 50.0]]]]
        });
        assert_eq!(centroid_or_default(Some(&multi)), GeoPoint::new(1.0, 1.0));
    }

    #[test]
    fn test_filters_non_actionable_alerts() {
        let doc = json!({
            "features": [
                alert("keep", "Actual", "Alert", "Extreme", square()),
                alert("test", "Test", "Alert", "Extreme", square()),
                alert("cancel", "Actual", "Cancel", "Severe", square()),
                alert("minor", "Actual", "Update", "Minor", Value::Null),
                alert("moderate", "Actual", "Update", "Moderate", Value::Null),
            ]
        });
        let events = parse_alerts(&doc.to_string()).unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["keep", "moderate"]);
    }

    #[test]
    fn test_alert_fields() {
        let doc = json!({ "features": [alert("a1", "Actual", "Alert", "Extreme", square())] });
        let events = parse_alerts(&doc.to_string()).unwrap();
        let event = &events[0];

        assert_eq!(event.category, Category::SevereWeather);
        assert_eq!(event.primary_value, 150.0);
        assert_eq!(event.secondary_value, Some(1.0));
        assert_eq!(event.timestamp, 1_715_042_100_000);
        assert_eq!(event.confidence, Confidence::High);
        assert_eq!(event.color, "#8B0000");
        assert_eq!(event.source, "NOAA NWS");
        assert_eq!(event.meta_str("areaDesc"), Some("Oklahoma County"));
        assert_eq!(event.meta_str("hazardLabel"), Some("Tornado"));
    }

    #[test]
    fn test_unparseable_sent_time_is_skipped() {
        let mut bad = alert("bad", "Actual", "Alert", "Severe", Value::Null);
        bad["properties"]["sent"] = json!("yesterday");
        let doc = json!({ "features": [bad] });
        assert!(parse_alerts(&doc.to_string()).unwrap().is_empty());
    }
}
