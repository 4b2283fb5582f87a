//! NASA FIRMS active-fire detections (CSV).

use std::collections::HashMap;
use std::str::FromStr;

use atlas_events::scoring::fire_intensity_label;
use atlas_events::{
    firms_event_id, fire_intensity_from_frp, CanonicalEvent, Category, GeoPoint, Metadata,
    Observation,
};
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::adapter::events_or_empty;
use crate::error::{truncate_body, SourceError};
use crate::http::{within_deadline, HttpFetcher};

pub const FIRMS_BASE_URL: &str = "https://firms.modaps.eosdis.nasa.gov";
pub const SOURCE_NAME: &str = "NASA FIRMS";

/// Satellite product to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmsSource {
    ViirsSnppNrt,
    ViirsNoaa20Nrt,
    ModisNrt,
}

impl FirmsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViirsSnppNrt => "VIIRS_SNPP_NRT",
            Self::ViirsNoaa20Nrt => "VIIRS_NOAA20_NRT",
            Self::ModisNrt => "MODIS_NRT",
        }
    }
}

impl FromStr for FirmsSource {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIIRS_SNPP_NRT" => Ok(Self::ViirsSnppNrt),
            "VIIRS_NOAA20_NRT" => Ok(Self::ViirsNoaa20Nrt),
            "MODIS_NRT" => Ok(Self::ModisNrt),
            other => Err(SourceError::InvalidParameter(format!(
                "unknown FIRMS source '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireParams {
    pub source: FirmsSource,
    /// `WORLD`, a country code, or a `west,south,east,north` box
    pub area: String,
    pub day_range: u32,
}

impl Default for FireParams {
    fn default() -> Self {
        Self {
            source: FirmsSource::ViirsSnppNrt,
            area: "WORLD".to_string(),
            day_range: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FireAdapter {
    fetcher: HttpFetcher,
    base_url: String,
    api_key: Option<String>,
    params: FireParams,
}

impl FireAdapter {
    pub fn new(fetcher: HttpFetcher, api_key: Option<String>, params: FireParams) -> Self {
        Self::with_base_url(fetcher, FIRMS_BASE_URL, api_key, params)
    }

    pub fn with_base_url(
        fetcher: HttpFetcher,
        base_url: &str,
        api_key: Option<String>,
        params: FireParams,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            params,
        }
    }

    fn area_url(&self, api_key: &str) -> String {
        format!(
            "{}/api/area/csv/{}/{}/{}/{}",
            self.base_url,
            api_key,
            self.params.source.as_str(),
            self.params.area,
            self.params.day_range
        )
    }

    pub async fn fetch_and_normalize(&self, deadline: Option<Instant>) -> Vec<CanonicalEvent> {
        events_or_empty(SOURCE_NAME, self.fetch(deadline).await)
    }

    /// Without an API key no request is made and `MissingApiKey` is returned.
    #[instrument(skip(self), fields(source = self.params.source.as_str()))]
    pub async fn fetch(&self, deadline: Option<Instant>) -> Result<Vec<CanonicalEvent>, SourceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(SourceError::MissingApiKey(SOURCE_NAME))?;

        let url = self.area_url(api_key);
        let feed = within_deadline(
            deadline,
            self.fetcher.get_parsed(SOURCE_NAME, &url, None, deadline, parse_csv_feed),
        )
        .await??;
        debug!(count = feed.data.len(), stale = feed.is_stale, "Parsed FIRMS feed");
        Ok(feed.data)
    }
}

/// Split CSV text into header-keyed records.
///
/// Fields are comma separated without quoting, which is what FIRMS emits.
/// Rows whose column count differs from the header are dropped.
pub fn parse_csv(text: &str) -> Vec<HashMap<String, String>> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(header_line) = lines.next() else {
        return Vec::new();
    };
    let headers: Vec<&str> = header_line.split(',').map(str::trim).collect();

    lines
        .enumerate()
        .filter_map(|(idx, line)| {
            let values: Vec<&str> = line.split(',').map(str::trim).collect();
            if values.len() != headers.len() {
                debug!(
                    row = idx + 1,
                    expected = headers.len(),
                    found = values.len(),
                    "Skipping CSV row with wrong column count"
                );
                return None;
            }
            Some(
                headers
                    .iter()
                    .zip(values)
                    .map(|(h, v)| (h.to_string(), v.to_string()))
                    .collect(),
            )
        })
        .collect()
}

/// Parse a FIRMS CSV document into fire events, skipping unusable rows.
///
/// FIRMS answers a bad key or area with a 200 and a one-line message, so a
/// document whose header lacks the coordinate columns is a parse error.
/// An empty document is an empty feed.
pub fn parse_csv_feed(text: &str) -> Result<Vec<CanonicalEvent>, SourceError> {
    if let Some(header) = text.lines().map(str::trim).find(|l| !l.is_empty()) {
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        if !columns.contains(&"latitude") || !columns.contains(&"longitude") {
            return Err(SourceError::Parse(format!(
                "FIRMS response is not a detection CSV: {}",
                truncate_body(header)
            )));
        }
    }

    Ok(parse_csv(text)
        .iter()
        .filter_map(|record| match record_to_event(record) {
            Ok(event) => Some(event),
            Err(reason) => {
                debug!(%reason, "Skipping FIRMS row");
                None
            }
        })
        .collect())
}

/// `acq_date` (YYYY-MM-DD) plus `acq_time` (HHMM, leading zeros optional) as
/// UTC epoch milliseconds.
pub fn acquisition_timestamp(acq_date: &str, acq_time: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(acq_date.trim(), "%Y-%m-%d").ok()?;
    let raw = acq_time.trim();
    if raw.is_empty() || raw.len() > 4 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let padded = format!("{raw:0>4}");
    let hour: u32 = padded[..2].parse().ok()?;
    let minute: u32 = padded[2..].parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(date.and_time(time).and_utc().timestamp_millis())
}

fn field<'a>(record: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    record.get(name).map(String::as_str).filter(|v| !v.is_empty())
}

fn number(record: &HashMap<String, String>, name: &str) -> Option<f64> {
    field(record, name)?.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn record_to_event(record: &HashMap<String, String>) -> Result<CanonicalEvent, String> {
    let lat = number(record, "latitude").ok_or("missing latitude")?;
    let lon = number(record, "longitude").ok_or("missing longitude")?;
    let location = GeoPoint::new(lat, lon);
    if !location.is_valid() {
        return Err(format!("coordinates out of range: {lat},{lon}"));
    }
    let frp = number(record, "frp").ok_or("missing frp")?;
    let timestamp = acquisition_timestamp(
        field(record, "acq_date").unwrap_or_default(),
        field(record, "acq_time").unwrap_or_default(),
    )
    .ok_or("bad acquisition date/time")?;

    // VIIRS reports bright_ti4, MODIS reports brightness
    let brightness = number(record, "bright_ti4").or_else(|| number(record, "brightness"));
    let intensity = fire_intensity_from_frp(frp);

    let mut metadata = Metadata::new();
    metadata.insert("brightness".into(), json!(brightness));
    metadata.insert("frp".into(), json!(frp));
    metadata.insert("satellite".into(), json!(field(record, "satellite")));
    metadata.insert("instrument".into(), json!(field(record, "instrument")));
    metadata.insert("daynight".into(), json!(field(record, "daynight")));
    metadata.insert("scan".into(), json!(number(record, "scan")));
    metadata.insert("track".into(), json!(number(record, "track")));
    metadata.insert("intensityLabel".into(), json!(fire_intensity_label(intensity)));

    Ok(CanonicalEvent::normalize(Observation {
        id: firms_event_id(lat, lon, timestamp),
        timestamp,
        category: Category::Fire,
        primary_value: intensity,
        secondary_value: Some(frp),
        location,
        quality_flag: field(record, "confidence").unwrap_or_default().to_string(),
        source: SOURCE_NAME.to_string(),
        metadata,
    }))
}
