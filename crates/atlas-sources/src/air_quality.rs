//! EPA AirNow current observations, queried around a fixed list of cities.
//!
//! Neighbouring cities share monitoring stations, so the same station can
//! come back from several queries. Observations are collapsed by rounded
//! coordinates, keeping the worst (highest) AQI per location.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Duration;

use atlas_events::identity::AIRNOW_COORD_PRECISION;
use atlas_events::{
    airnow_event_id, location_key, pm25_from_aqi, CanonicalEvent, Category, GeoPoint, Metadata,
    Observation,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::adapter::events_or_empty;
use crate::error::SourceError;
use crate::http::HttpFetcher;

pub const AIRNOW_BASE_URL: &str = "https://www.airnowapi.org";
pub const SOURCE_NAME: &str = "AirNow";

/// AirNow refreshes hourly
const OBSERVATION_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq)]
pub struct City {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl City {
    pub fn new(name: &str, lat: f64, lon: f64) -> Self {
        Self {
            name: name.to_string(),
            lat,
            lon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AirNowObservation {
    pub date_observed: String,
    pub hour_observed: u32,
    #[serde(default)]
    pub local_time_zone: String,
    #[serde(default)]
    pub reporting_area: String,
    #[serde(default)]
    pub state_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub parameter_name: String,
    #[serde(rename = "AQI")]
    pub aqi: f64,
    #[serde(default)]
    pub category: Option<AqiCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AqiCategory {
    pub number: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AirQualityAdapter {
    fetcher: HttpFetcher,
    base_url: String,
    api_key: Option<String>,
    cities: Vec<City>,
    distance_miles: u32,
}

impl AirQualityAdapter {
    pub fn new(
        fetcher: HttpFetcher,
        api_key: Option<String>,
        cities: Vec<City>,
        distance_miles: u32,
    ) -> Self {
        Self::with_base_url(fetcher, AIRNOW_BASE_URL, api_key, cities, distance_miles)
    }

    pub fn with_base_url(
        fetcher: HttpFetcher,
        base_url: &str,
        api_key: Option<String>,
        cities: Vec<City>,
        distance_miles: u32,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            cities,
            distance_miles,
        }
    }

    fn city_url(&self, city: &City, api_key: &str) -> String {
        format!(
            "{}/aq/observation/latLong/current/?format=application/json&latitude={}&longitude={}&distance={}&API_KEY={}",
            self.base_url, city.lat, city.lon, self.distance_miles, api_key
        )
    }

    pub async fn fetch_and_normalize(&self, deadline: Option<Instant>) -> Vec<CanonicalEvent> {
        events_or_empty(SOURCE_NAME, self.fetch(deadline).await)
    }

    /// Query every city concurrently and normalize the collapsed result.
    ///
    /// A failing city contributes nothing. If `deadline` passes, cities that
    /// have not answered yet are abandoned and the rest are still returned.
    /// It is an error only when no city answered at all.
    #[instrument(skip(self), fields(cities = self.cities.len()))]
    pub async fn fetch(&self, deadline: Option<Instant>) -> Result<Vec<CanonicalEvent>, SourceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(SourceError::MissingApiKey(SOURCE_NAME))?;

        let observations = self.fetch_all_cities(api_key, deadline).await?;
        let collapsed = collapse_by_location(observations);
        let events: Vec<CanonicalEvent> = collapsed.into_iter().filter_map(to_event).collect();
        debug!(count = events.len(), "Normalized AirNow observations");
        Ok(events)
    }

    async fn fetch_all_cities(
        &self,
        api_key: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<AirNowObservation>, SourceError> {
        let mut tasks = JoinSet::new();
        for (idx, city) in self.cities.iter().enumerate() {
            let fetcher = self.fetcher.clone();
            let url = self.city_url(city, api_key);
            let name = city.name.clone();
            tasks.spawn(async move {
                let result = fetch_city(&fetcher, &url, deadline).await;
                (idx, name, result)
            });
        }

        let mut per_city: Vec<(usize, Vec<AirNowObservation>)> = Vec::new();
        let mut first_error = None;
        loop {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!(pending = tasks.len(), "Deadline passed, keeping partial AirNow results");
                        tasks.abort_all();
                        first_error.get_or_insert(SourceError::DeadlineExceeded);
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match joined {
                None => break,
                Some(Ok((idx, _, Ok(observations)))) => per_city.push((idx, observations)),
                Some(Ok((_, city, Err(e)))) => {
                    warn!(%city, error = %e, "AirNow city fetch failed");
                    first_error.get_or_insert(e);
                }
                Some(Err(e)) => warn!(error = %e, "AirNow city task failed"),
            }
        }

        if per_city.is_empty() {
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        // Completion order is arbitrary; restore city order so ties collapse the same way every run
        per_city.sort_by_key(|(idx, _)| *idx);
        Ok(per_city.into_iter().flat_map(|(_, obs)| obs).collect())
    }
}

async fn fetch_city(
    fetcher: &HttpFetcher,
    url: &str,
    deadline: Option<Instant>,
) -> Result<Vec<AirNowObservation>, SourceError> {
    let observations = fetcher
        .get_parsed(SOURCE_NAME, url, Some(OBSERVATION_TTL), deadline, parse_observations)
        .await?;
    Ok(observations.data)
}

/// Parse one city's response. Rows that do not deserialize, or that carry
/// AirNow's `-1` missing-value AQI, are skipped.
pub fn parse_observations(body: &str) -> Result<Vec<AirNowObservation>, SourceError> {
    let rows: Vec<Value> = serde_json::from_str(body)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<AirNowObservation>(row) {
            Ok(obs) if obs.aqi >= 0.0 => Some(obs),
            Ok(obs) => {
                debug!(area = %obs.reporting_area, aqi = obs.aqi, "Skipping missing AQI");
                None
            }
            Err(e) => {
                debug!(error = %e, "Skipping unreadable AirNow row");
                None
            }
        })
        .collect())
}

/// One observation per `{lat:.2}_{lon:.2}` cell, keeping the highest AQI.
/// Ties keep the first observation seen.
pub fn collapse_by_location(observations: Vec<AirNowObservation>) -> Vec<AirNowObservation> {
    let mut best: BTreeMap<String, AirNowObservation> = BTreeMap::new();
    for obs in observations {
        let key = location_key(obs.latitude, obs.longitude, AIRNOW_COORD_PRECISION);
        match best.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(obs);
            }
            Entry::Occupied(mut slot) => {
                if obs.aqi > slot.get().aqi {
                    slot.insert(obs);
                }
            }
        }
    }
    best.into_values().collect()
}

/// Hours east of UTC for the zone abbreviations AirNow reports
fn utc_offset_hours(zone: &str) -> Option<i64> {
    let offset = match zone.trim().to_ascii_uppercase().as_str() {
        "UTC" | "GMT" => 0,
        "EST" => -5,
        "EDT" => -4,
        "CST" => -6,
        "CDT" => -5,
        "MST" => -7,
        "MDT" => -6,
        "PST" => -8,
        "PDT" => -7,
        "AKST" => -9,
        "AKDT" => -8,
        "HST" => -10,
        _ => return None,
    };
    Some(offset)
}

/// Local `DateObserved` + `HourObserved` as UTC epoch milliseconds.
/// Unknown zones are read as UTC.
pub fn observation_timestamp(date: &str, hour: u32, zone: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let local = date.and_hms_opt(hour, 0, 0)?;
    let offset = utc_offset_hours(zone).unwrap_or_else(|| {
        debug!(zone, "Unknown AirNow time zone, reading as UTC");
        0
    });
    Some(local.and_utc().timestamp_millis() - offset * 3_600_000)
}

fn to_event(obs: AirNowObservation) -> Option<CanonicalEvent> {
    let location = GeoPoint::new(obs.latitude, obs.longitude);
    if !location.is_valid() {
        debug!(area = %obs.reporting_area, "Skipping AirNow row outside WGS84 range");
        return None;
    }
    let Some(timestamp) =
        observation_timestamp(&obs.date_observed, obs.hour_observed, &obs.local_time_zone)
    else {
        debug!(area = %obs.reporting_area, date = %obs.date_observed, "Skipping AirNow row with bad date");
        return None;
    };

    let parameter = obs.parameter_name.trim().to_string();
    let pm25 = (parameter == "PM2.5").then(|| pm25_from_aqi(obs.aqi));

    let mut metadata = Metadata::new();
    metadata.insert("city".into(), json!(obs.reporting_area));
    metadata.insert("state".into(), json!(obs.state_code));
    metadata.insert("parameter".into(), json!(parameter));
    metadata.insert("category".into(), json!(obs.category.as_ref().map(|c| &c.name)));
    metadata.insert("categoryNumber".into(), json!(obs.category.as_ref().map(|c| c.number)));

    Some(CanonicalEvent::normalize(Observation {
        id: airnow_event_id(obs.latitude, obs.longitude, timestamp),
        timestamp,
        category: Category::AirQuality,
        primary_value: obs.aqi,
        secondary_value: pm25,
        location,
        quality_flag: parameter,
        source: SOURCE_NAME.to_string(),
        metadata,
    }))
}
