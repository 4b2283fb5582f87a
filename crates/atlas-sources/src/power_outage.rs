//! EIA electricity outage data, reduced to one event per affected state.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use atlas_events::scoring::outage_severity_label;
use atlas_events::{eia_outage_event_id, CanonicalEvent, Category, GeoPoint, Metadata, Observation};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::adapter::events_or_empty;
use crate::error::SourceError;
use crate::http::{within_deadline, HttpFetcher};
use crate::weather_alert::CONTINENTAL_US_CENTER;

pub const EIA_BASE_URL: &str = "https://api.eia.gov/v2";
pub const SOURCE_NAME: &str = "EIA";

/// States at or below this many customers out are not reported
pub const MIN_CUSTOMERS_OUT: f64 = 1000.0;

/// EIA does not publish customer totals alongside outages
const ESTIMATED_CUSTOMERS_PER_STATE: f64 = 1_000_000.0;

const STATE_CENTERS: [(&str, f64, f64); 18] = [
    ("CA", 36.7783, -119.4179),
    ("TX", 31.9686, -99.9018),
    ("FL", 27.9944, -81.7603),
    ("NY", 43.0, -75.0),
    ("PA", 41.2033, -77.1945),
    ("IL", 40.0, -89.0),
    ("OH", 40.2, -82.7),
    ("GA", 32.6, -83.4),
    ("NC", 35.7, -79.0),
    ("MI", 44.3, -85.6),
    ("WA", 47.7511, -120.7401),
    ("AZ", 34.0489, -111.0937),
    ("MA", 42.4072, -71.3824),
    ("TN", 35.5175, -86.5804),
    ("IN", 40.2672, -86.1349),
    ("MO", 37.9643, -91.8318),
    ("MD", 39.0458, -76.6413),
    ("WI", 43.7844, -88.7879),
];

#[derive(Debug, Deserialize)]
struct OutageDocument {
    response: OutageResponse,
}

#[derive(Debug, Default, Deserialize)]
struct OutageResponse {
    #[serde(default)]
    data: Vec<OutageRow>,
}

#[derive(Debug, Deserialize)]
struct OutageRow {
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    stateid: Option<String>,
    #[serde(default)]
    statename: Option<String>,
    /// A number, a numeric string, or null depending on the series
    #[serde(default)]
    value: Value,
}

/// Worst row seen for one state
#[derive(Debug, Clone, PartialEq)]
pub struct StateOutage {
    pub state: String,
    pub state_name: String,
    pub customers_out: f64,
    pub period: String,
}

#[derive(Debug, Clone)]
pub struct PowerOutageAdapter {
    fetcher: HttpFetcher,
    base_url: String,
    api_key: Option<String>,
}

impl PowerOutageAdapter {
    pub fn new(fetcher: HttpFetcher, api_key: Option<String>) -> Self {
        Self::with_base_url(fetcher, EIA_BASE_URL, api_key)
    }

    pub fn with_base_url(fetcher: HttpFetcher, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    fn outage_url(&self, api_key: &str) -> String {
        format!(
            "{}/electricity/electric-power-operational-data/data/?api_key={}&frequency=daily&data[0]=customers&facets[type][]=outage&sort[0][column]=period&sort[0][direction]=desc&length=100",
            self.base_url, api_key
        )
    }

    pub async fn fetch_and_normalize(&self, deadline: Option<Instant>) -> Vec<CanonicalEvent> {
        events_or_empty(SOURCE_NAME, self.fetch(deadline).await)
    }

    /// Without an API key no request is made and `MissingApiKey` is returned.
    #[instrument(skip(self))]
    pub async fn fetch(&self, deadline: Option<Instant>) -> Result<Vec<CanonicalEvent>, SourceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(SourceError::MissingApiKey(SOURCE_NAME))?;

        let url = self.outage_url(api_key);
        let outages = within_deadline(
            deadline,
            self.fetcher.get_parsed(SOURCE_NAME, &url, None, deadline, parse_outages),
        )
        .await??;
        debug!(count = outages.data.len(), stale = outages.is_stale, "Parsed EIA outages");
        Ok(outages.data)
    }
}

/// Parse an EIA outage document into one event per state with more than
/// [`MIN_CUSTOMERS_OUT`] customers affected.
pub fn parse_outages(body: &str) -> Result<Vec<CanonicalEvent>, SourceError> {
    let document: OutageDocument = serde_json::from_str(body)?;
    Ok(worst_by_state(document.response.data)
        .into_iter()
        .filter(|outage| outage.customers_out > MIN_CUSTOMERS_OUT)
        .filter_map(to_event)
        .collect())
}

/// Group rows by state, keeping the row with the most customers out. Rows
/// without a state are dropped.
fn worst_by_state(rows: Vec<OutageRow>) -> Vec<StateOutage> {
    let mut by_state: BTreeMap<String, StateOutage> = BTreeMap::new();
    for row in rows {
        let Some(state) = row.stateid.filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        let customers_out = customers(&row.value);
        let outage = StateOutage {
            state_name: row.statename.unwrap_or_else(|| state.clone()),
            state: state.clone(),
            customers_out,
            period: row.period.unwrap_or_default(),
        };
        match by_state.entry(state) {
            Entry::Vacant(slot) => {
                slot.insert(outage);
            }
            Entry::Occupied(mut slot) => {
                if customers_out > slot.get().customers_out {
                    slot.insert(outage);
                }
            }
        }
    }
    by_state.into_values().collect()
}

fn customers(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// `YYYY-MM-DD` (daily) or `YYYY-MM-DDTHH` (hourly) period start, UTC ms
fn period_timestamp(period: &str) -> Option<i64> {
    let date = period.get(..10)?;
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let hour = match period.get(11..) {
        Some(h) if !h.is_empty() => h.parse().ok()?,
        _ => 0,
    };
    Some(day.and_hms_opt(hour, 0, 0)?.and_utc().timestamp_millis())
}

pub fn state_center(state: &str) -> GeoPoint {
    STATE_CENTERS
        .iter()
        .find(|(code, _, _)| code.eq_ignore_ascii_case(state))
        .map(|&(_, lat, lon)| GeoPoint::new(lat, lon))
        .unwrap_or(CONTINENTAL_US_CENTER)
}

fn to_event(outage: StateOutage) -> Option<CanonicalEvent> {
    let Some(timestamp) = period_timestamp(&outage.period) else {
        debug!(state = %outage.state, period = %outage.period, "Skipping outage with unreadable period");
        return None;
    };

    let percentage_out =
        (outage.customers_out / ESTIMATED_CUSTOMERS_PER_STATE * 100.0 * 100.0).round() / 100.0;
    let severity = outage_severity_label(percentage_out, outage.customers_out);

    let mut metadata = Metadata::new();
    metadata.insert("state".into(), json!(outage.state));
    metadata.insert("stateName".into(), json!(outage.state_name));
    metadata.insert("customersOut".into(), json!(outage.customers_out));
    metadata.insert("percentageOut".into(), json!(percentage_out));
    metadata.insert("severity".into(), json!(severity));

    Some(CanonicalEvent::normalize(Observation {
        id: eia_outage_event_id(&outage.state, timestamp),
        timestamp,
        category: Category::PowerOutage,
        primary_value: outage.customers_out,
        secondary_value: Some(percentage_out),
        location: state_center(&outage.state),
        quality_flag: String::new(),
        source: SOURCE_NAME.to_string(),
        metadata,
    }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use atlas_events::Confidence;

    fn doc(rows: Value) -> String {
        json!({ "response": { "data": rows } }).to_string()
    }

    #[test]
    fn test_keeps_worst_row_per_state() {
        let body = doc(json!([
            {"period": "2024-05-06", "stateid": "TX", "statename": "Texas", "value": 12000},
            {"period": "2024-05-05", "stateid": "TX", "statename": "Texas", "value": 60000},
            {"period": "2024-05-06", "stateid": "CA", "statename": "California", "value": "2500"},
        ]));
        let events = parse_outages(&body).unwrap();
        let states: Vec<(&str, f64)> = events
            .iter()
            .map(|e| (e.meta_str("state").unwrap(), e.primary_value))
            .collect();
        assert_eq!(states, vec![("CA", 2500.0), ("TX", 60000.0)]);

        let texas = &events[1];
        assert_eq!(texas.id, "eia_outage_TX_1714867200000");
        assert_eq!(texas.timestamp, 1_714_867_200_000);
    }

    #[test]
    fn test_small_outages_and_stateless_rows_are_dropped() {
        let body = doc(json!([
            {"period": "2024-05-06", "stateid": "OH", "value": 1000},
            {"period": "2024-05-06", "stateid": "", "value": 90000},
            {"period": "2024-05-06", "value": 90000},
            {"period": "2024-05-06", "stateid": "MI", "value": null},
        ]));
        assert!(parse_outages(&body).unwrap().is_empty());
    }

    #[test]
    fn test_outage_fields() {
        let body = doc(json!([
            {"period": "2024-05-06", "stateid": "FL", "statename": "Florida", "value": 30000}
        ]));
        let event = parse_outages(&body).unwrap().remove(0);

        assert_eq!(event.category, Category::PowerOutage);
        assert_eq!(event.secondary_value, Some(3.0));
        assert_eq!(event.location, GeoPoint::new(27.9944, -81.7603));
        assert_eq!(event.confidence, Confidence::High);
        assert_eq!(event.color, "#FF6B6B");
        assert_eq!(event.source, "EIA");
        assert_eq!(event.meta_str("stateName"), Some("Florida"));
        assert_eq!(event.meta_str("severity"), Some("Major"));
        assert_eq!(event.meta_f64("percentageOut"), Some(3.0));
    }

    #[test]
    fn test_unknown_state_uses_us_center() {
        assert_eq!(state_center("ND"), CONTINENTAL_US_CENTER);
        assert_eq!(state_center("ny"), GeoPoint::new(43.0, -75.0));
    }

    #[test]
    fn test_period_timestamp() {
        assert_eq!(period_timestamp("2024-05-06"), Some(1_714_953_600_000));
        assert_eq!(period_timestamp("2024-05-06T05"), Some(1_714_971_600_000));
        assert_eq!(period_timestamp("May 2024"), None);
    }

    #[test]
    fn test_missing_response_is_parse_error() {
        assert!(matches!(parse_outages("{}"), Err(SourceError::Parse(_))));
    }
}
