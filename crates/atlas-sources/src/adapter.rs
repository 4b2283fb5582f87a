//! Uniform dispatch over the source adapters.

use atlas_core::Config;
use atlas_events::{CanonicalEvent, Category};
use tokio::time::Instant;
use tracing::warn;

use crate::air_quality::{AirQualityAdapter, City};
use crate::error::SourceError;
use crate::fire::{FireAdapter, FireParams};
use crate::http::HttpFetcher;
use crate::power_outage::PowerOutageAdapter;
use crate::seismic::{SeismicAdapter, SeismicParams};
use crate::weather_alert::WeatherAlertAdapter;

#[derive(Debug, Clone)]
pub enum Adapter {
    Seismic(SeismicAdapter),
    Fire(FireAdapter),
    WeatherAlert(WeatherAlertAdapter),
    AirQuality(AirQualityAdapter),
    PowerOutage(PowerOutageAdapter),
}

impl Adapter {
    /// Build every adapter from configuration, sharing one fetcher (and so one
    /// cache) between them.
    pub fn all_from_config(config: &Config, fetcher: &HttpFetcher) -> Result<Vec<Adapter>, SourceError> {
        let sources = &config.sources;

        let seismic = SeismicParams {
            timeframe: sources.usgs.timeframe.parse()?,
            magnitude: sources.usgs.magnitude.parse()?,
        };
        let fire = FireParams {
            source: sources.firms.source.parse()?,
            area: sources.firms.area.clone(),
            day_range: sources.firms.day_range,
        };
        let cities = sources
            .airnow
            .cities
            .iter()
            .map(|c| City::new(&c.name, c.lat, c.lon))
            .collect();

        Ok(vec![
            Adapter::Seismic(SeismicAdapter::with_base_url(
                fetcher.clone(),
                &sources.usgs.base_url,
                seismic,
            )),
            Adapter::Fire(FireAdapter::with_base_url(
                fetcher.clone(),
                &sources.firms.base_url,
                sources.firms.api_key.clone(),
                fire,
            )),
            Adapter::WeatherAlert(WeatherAlertAdapter::with_base_url(
                fetcher.clone(),
                &sources.nws.base_url,
            )),
            Adapter::AirQuality(AirQualityAdapter::with_base_url(
                fetcher.clone(),
                &sources.airnow.base_url,
                sources.airnow.api_key.clone(),
                cities,
                sources.airnow.distance_miles,
            )),
            Adapter::PowerOutage(PowerOutageAdapter::with_base_url(
                fetcher.clone(),
                &sources.eia.base_url,
                sources.eia.api_key.clone(),
            )),
        ])
    }

    /// Provider name as stored in `CanonicalEvent::source`
    pub fn name(&self) -> &'static str {
        match self {
            Adapter::Seismic(_) => crate::seismic::SOURCE_NAME,
            Adapter::Fire(_) => crate::fire::SOURCE_NAME,
            Adapter::WeatherAlert(_) => crate::weather_alert::SOURCE_NAME,
            Adapter::AirQuality(_) => crate::air_quality::SOURCE_NAME,
            Adapter::PowerOutage(_) => crate::power_outage::SOURCE_NAME,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Adapter::Seismic(_) => Category::Seismic,
            Adapter::Fire(_) => Category::Fire,
            Adapter::WeatherAlert(_) => Category::SevereWeather,
            Adapter::AirQuality(_) => Category::AirQuality,
            Adapter::PowerOutage(_) => Category::PowerOutage,
        }
    }

    pub async fn fetch_and_normalize(&self, deadline: Option<Instant>) -> Vec<CanonicalEvent> {
        events_or_empty(self.name(), self.fetch(deadline).await)
    }

    /// Like [`Adapter::fetch_and_normalize`] but reports why a feed yielded
    /// nothing, for callers that record ingestion outcomes.
    pub async fn fetch(&self, deadline: Option<Instant>) -> Result<Vec<CanonicalEvent>, SourceError> {
        match self {
            Adapter::Seismic(a) => a.fetch(deadline).await,
            Adapter::Fire(a) => a.fetch(deadline).await,
            Adapter::WeatherAlert(a) => a.fetch(deadline).await,
            Adapter::AirQuality(a) => a.fetch(deadline).await,
            Adapter::PowerOutage(a) => a.fetch(deadline).await,
        }
    }
}

/// Fail-soft boundary: a feed error is logged and becomes an empty list.
pub(crate) fn events_or_empty(
    source: &str,
    result: Result<Vec<CanonicalEvent>, SourceError>,
) -> Vec<CanonicalEvent> {
    match result {
        Ok(events) => events,
        Err(e) => {
            warn!(source, error = %e, hint = e.user_message(), "Feed fetch failed, returning no events");
            Vec::new()
        }
    }
}
