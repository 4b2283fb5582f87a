//! One normalization pass: run every adapter, then persist what came back.
//!
//! Every adapter gets an `ingestion_runs` row per pass, opened before its
//! fetch starts and closed with the outcome once its batch is written.

use std::sync::Arc;
use std::time::Duration;

use atlas_core::{AppError, Config, DatabaseError};
use atlas_events::{CanonicalEvent, Category};
use atlas_sources::{Adapter, HttpFetcher, SourceError, TtlCache};
use atlas_store::{EventStoreClient, RunOutcome, StoreError};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source: &'static str,
    pub category: Category,
    pub fetched: usize,
    pub stored: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub sources: Vec<SourceSummary>,
}

impl IngestSummary {
    pub fn total_stored(&self) -> usize {
        self.sources.iter().map(|s| s.stored).sum()
    }
}

fn source_error(e: SourceError) -> AppError {
    AppError::Source(e.to_string())
}

fn store_error(e: StoreError) -> AppError {
    match e {
        StoreError::Database(db) => {
            use atlas_core::error::RusqliteErrorExt;
            AppError::Database(db.into_database_error())
        }
        other => AppError::Database(DatabaseError::QueryFailed(other.to_string())),
    }
}

pub struct Pipeline {
    adapters: Vec<Adapter>,
    store: EventStoreClient,
    deadline: Option<Duration>,
}

impl Pipeline {
    /// Build adapters and open the store named by `config`.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        if let Some(parent) = config.store_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = EventStoreClient::open(config.store_path()).map_err(store_error)?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: &Config, store: EventStoreClient) -> Result<Self, AppError> {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(config.cache.ttl_secs)));
        let fetcher = HttpFetcher::from_config(config, cache).map_err(source_error)?;
        let adapters = Adapter::all_from_config(config, &fetcher).map_err(source_error)?;
        let deadline =
            (config.ingest.deadline_secs > 0).then(|| Duration::from_secs(config.ingest.deadline_secs));

        Ok(Self {
            adapters,
            store,
            deadline,
        })
    }

    pub fn store(&self) -> &EventStoreClient {
        &self.store
    }

    /// Run all adapters concurrently and upsert each batch.
    ///
    /// A failing adapter or a failed write only affects that source's row in
    /// the summary and its run record.
    #[instrument(skip(self), fields(adapters = self.adapters.len()))]
    pub async fn run_once(&self) -> IngestSummary {
        let deadline = self.deadline.map(|d| Instant::now() + d);

        let mut run_ids = Vec::with_capacity(self.adapters.len());
        let mut tasks = JoinSet::new();
        for (idx, adapter) in self.adapters.iter().cloned().enumerate() {
            run_ids.push(self.start_run(adapter.name()).await);
            tasks.spawn(async move { (idx, adapter.fetch(deadline).await) });
        }

        let mut results: Vec<Option<Result<Vec<_>, SourceError>>> =
            (0..self.adapters.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => warn!(error = %e, "Adapter task failed"),
            }
        }

        let mut summary = IngestSummary::default();
        for ((adapter, result), run_id) in self.adapters.iter().zip(results).zip(run_ids) {
            let source = adapter.name();
            let outcome = match result {
                Some(Ok(events)) => self.store_batch(source, events).await,
                Some(Err(e)) => {
                    warn!(source, error = %e, hint = e.user_message(), "Feed fetch failed");
                    RunOutcome::failure(0, e.to_string())
                }
                None => RunOutcome::failure(0, "adapter task did not complete"),
            };

            info!(
                source,
                fetched = outcome.events_fetched,
                stored = outcome.events_stored,
                status = %outcome.status,
                "Ingested feed"
            );
            summary.sources.push(SourceSummary {
                source,
                category: adapter.category(),
                fetched: outcome.events_fetched,
                stored: outcome.events_stored,
                error: outcome.error.clone(),
            });
            if let Some(run_id) = run_id {
                if let Err(e) = self.store.finish_run(run_id, outcome).await {
                    warn!(source, run_id, error = %e, hint = e.user_message(), "Could not record run outcome");
                }
            }
        }
        summary
    }

    async fn start_run(&self, source: &'static str) -> Option<i64> {
        match self.store.start_run(source).await {
            Ok(run_id) => Some(run_id),
            Err(e) => {
                warn!(source, error = %e, hint = e.user_message(), "Could not record run start");
                None
            }
        }
    }

    async fn store_batch(&self, source: &'static str, events: Vec<CanonicalEvent>) -> RunOutcome {
        let fetched = events.len();
        match self.store.upsert(events).await {
            Ok(written) => RunOutcome::success(fetched, written.len()),
            Err(e) => {
                warn!(source, error = %e, hint = e.user_message(), "Failed to store events");
                RunOutcome::failure(fetched, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use atlas_core::CityConfig;
    use atlas_store::RunStatus;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_upstreams() -> MockServer {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/earthquakes/feed/v1.0/summary/all_day.geojson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "features": [
                    {"id": "us1", "properties": {"mag": 4.2, "time": 1717243200000_i64, "status": "reviewed"},
                     "geometry": {"coordinates": [-117.6, 35.7, 8.2]}},
                    {"id": "us2", "properties": {"mag": 7.1, "time": 1717246800000_i64, "status": "automatic"},
                     "geometry": {"coordinates": [-158.5, 55.1, 35.0]}}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/area/csv/firms-key/VIIRS_SNPP_NRT/WORLD/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "latitude,longitude,bright_ti4,acq_date,acq_time,confidence,frp\n\
                 34.1,-118.6,350.0,2024-06-01,0134,h,120.0\n",
            ))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/alerts/active"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/aq/observation/latLong/current/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "DateObserved": "2024-06-01 ", "HourObserved": 9, "LocalTimeZone": "PDT",
                "ReportingArea": "Los Angeles", "StateCode": "CA",
                "Latitude": 34.05, "Longitude": -118.24,
                "ParameterName": "PM2.5", "AQI": 72,
                "Category": {"Number": 2, "Name": "Moderate"}
            }])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/electricity/electric-power-operational-data/data/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {"data": [
                    {"period": "2024-06-01", "stateid": "TX", "statename": "Texas", "value": 5400},
                    {"period": "2024-06-01", "stateid": "OH", "statename": "Ohio", "value": 300}
                ]}
            })))
            .mount(&server)
            .await;

        server
    }

    fn config_for(server: &MockServer) -> Config {
        let mut config = Config::default();
        config.sources.usgs.base_url = server.uri();
        config.sources.firms.base_url = server.uri();
        config.sources.firms.api_key = Some("firms-key".to_string());
        config.sources.nws.base_url = server.uri();
        config.sources.airnow.base_url = server.uri();
        config.sources.airnow.api_key = Some("airnow-key".to_string());
        config.sources.airnow.cities = vec![CityConfig {
            name: "Los Angeles".to_string(),
            lat: 34.0522,
            lon: -118.2437,
        }];
        config.sources.eia.base_url = server.uri();
        config.sources.eia.api_key = Some("eia-key".to_string());
        config.ingest.deadline_secs = 20;
        config
    }

    #[tokio::test]
    async fn test_run_once_ingests_every_source() {
        let server = mock_upstreams().await;
        let store = EventStoreClient::in_memory().unwrap();
        let pipeline = Pipeline::with_store(&config_for(&server), store).unwrap();

        let summary = pipeline.run_once().await;
        let stored: Vec<(&str, usize)> = summary.sources.iter().map(|s| (s.source, s.stored)).collect();
        assert_eq!(
            stored,
            vec![
                ("USGS", 2),
                ("NASA FIRMS", 1),
                ("NOAA NWS", 0),
                ("AirNow", 1),
                ("EIA", 1)
            ]
        );
        assert_eq!(summary.total_stored(), 5);
        assert_eq!(
            summary.sources[2].error.as_deref(),
            Some("Upstream returned 500: ")
        );
        assert!(summary.sources[0].error.is_none());

        let quake = pipeline.store().get("us2").await.unwrap().unwrap();
        assert_eq!(quake.color, "#8B0000");
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let server = mock_upstreams().await;
        let store = EventStoreClient::in_memory().unwrap();
        let pipeline = Pipeline::with_store(&config_for(&server), store).unwrap();

        pipeline.run_once().await;
        pipeline.run_once().await;

        let store = pipeline.store();
        assert_eq!(store.count(Category::Seismic).await.unwrap(), 2);
        assert_eq!(store.count(Category::Fire).await.unwrap(), 1);
        assert_eq!(store.count(Category::AirQuality).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_once_records_runs() {
        let server = mock_upstreams().await;
        let mut config = config_for(&server);
        config.sources.firms.api_key = None;
        let pipeline = Pipeline::with_store(&config, EventStoreClient::in_memory().unwrap()).unwrap();

        pipeline.run_once().await;

        let store = pipeline.store();
        let runs = store.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 5);
        assert!(runs.iter().all(|r| r.finished_at.is_some()));

        let usgs = store.latest_run("USGS").await.unwrap().unwrap();
        assert_eq!(usgs.status, RunStatus::Success);
        assert_eq!((usgs.events_fetched, usgs.events_stored), (2, 2));

        let firms = store.latest_run("NASA FIRMS").await.unwrap().unwrap();
        assert_eq!(firms.status, RunStatus::Failure);
        assert_eq!(firms.error.as_deref(), Some("No API key configured for NASA FIRMS"));

        let statuses = atlas_store::feed_status(store, chrono::Utc::now()).await;
        let nws = statuses.iter().find(|s| s.source == "NOAA NWS").unwrap();
        assert_eq!(nws.last_error.as_deref(), Some("Upstream returned 500: "));
    }

    #[test]
    fn test_from_config_creates_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.path = Some(dir.path().join("nested").join("events.db"));

        let pipeline = Pipeline::from_config(&config);
        assert!(pipeline.is_ok());
        assert!(dir.path().join("nested").join("events.db").exists());
    }
}
