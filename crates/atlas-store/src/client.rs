//! Async access to the event store.
//!
//! SQLite calls block, so every operation runs on tokio's blocking pool with
//! the store behind a shared mutex.

use std::path::Path;
use std::sync::Arc;

use atlas_events::{CanonicalEvent, Category};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::store::{CategoryStats, EventStore, IngestionRun, RunOutcome, TimeWindow};

#[derive(Clone)]
pub struct EventStoreClient {
    store: Arc<Mutex<EventStore>>,
}

impl EventStoreClient {
    pub fn new(store: EventStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self::new(EventStore::new(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(EventStore::in_memory()?))
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut EventStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&mut *store.lock())).await?
    }

    /// Batch upsert keyed on id; see [`EventStore::upsert`].
    pub async fn upsert(&self, events: Vec<CanonicalEvent>) -> Result<Vec<CanonicalEvent>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        self.run(move |store| store.upsert(&events)).await
    }

    pub async fn query_by_category_and_window(
        &self,
        category: Category,
        window: TimeWindow,
    ) -> Result<Vec<CanonicalEvent>, StoreError> {
        self.run(move |store| store.query_by_category_and_window(category, window))
            .await
    }

    pub async fn query_by_time_range(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<CanonicalEvent>, StoreError> {
        self.run(move |store| store.query_by_time_range(start, end)).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<CanonicalEvent>, StoreError> {
        let id = id.to_string();
        self.run(move |store| store.get(&id)).await
    }

    pub async fn count(&self, category: Category) -> Result<usize, StoreError> {
        self.run(move |store| store.count(category)).await
    }

    pub async fn latest_timestamp(&self, category: Category) -> Result<Option<i64>, StoreError> {
        self.run(move |store| store.latest_timestamp(category)).await
    }

    /// Event stats for `category` and the last finished run of `source`,
    /// read under one lock.
    pub async fn feed_snapshot(
        &self,
        category: Category,
        source: &str,
    ) -> Result<(CategoryStats, Option<IngestionRun>), StoreError> {
        let source = source.to_string();
        self.run(move |store| Ok((store.category_stats(category)?, store.latest_run(&source)?)))
            .await
    }

    pub async fn start_run(&self, source: &str) -> Result<i64, StoreError> {
        let source = source.to_string();
        self.run(move |store| store.start_run(&source)).await
    }

    pub async fn finish_run(&self, run_id: i64, outcome: RunOutcome) -> Result<(), StoreError> {
        self.run(move |store| store.finish_run(run_id, &outcome)).await
    }

    pub async fn latest_run(&self, source: &str) -> Result<Option<IngestionRun>, StoreError> {
        let source = source.to_string();
        self.run(move |store| store.latest_run(&source)).await
    }

    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<IngestionRun>, StoreError> {
        self.run(move |store| store.recent_runs(limit)).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use atlas_events::{Confidence, GeoPoint, Metadata};

    fn event(id: &str, primary: f64) -> CanonicalEvent {
        CanonicalEvent {
            id: id.to_string(),
            timestamp: 1_717_243_200_000,
            category: Category::Seismic,
            primary_value: primary,
            secondary_value: None,
            location: GeoPoint::new(35.7, -117.6),
            confidence: Confidence::Medium,
            source: "USGS".to_string(),
            color: "#FF8C42".to_string(),
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn test_double_upsert_keeps_second_value() {
        let client = EventStoreClient::in_memory().unwrap();
        client.upsert(vec![event("us1", 3.1)]).await.unwrap();
        client.upsert(vec![event("us1", 3.9)]).await.unwrap();

        assert_eq!(client.count(Category::Seismic).await.unwrap(), 1);
        let stored = client.get("us1").await.unwrap().unwrap();
        assert_eq!(stored.primary_value, 3.9);
    }

    #[tokio::test]
    async fn test_clones_share_one_store() {
        let client = EventStoreClient::in_memory().unwrap();
        let other = client.clone();
        client.upsert(vec![event("a", 1.0), event("b", 2.0)]).await.unwrap();

        let events = other
            .query_by_category_and_window(Category::Seismic, TimeWindow::After(0))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            other.latest_timestamp(Category::Seismic).await.unwrap(),
            Some(1_717_243_200_000)
        );
    }

    #[tokio::test]
    async fn test_store_file_persists_across_clients() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        EventStoreClient::open(&path)
            .unwrap()
            .upsert(vec![event("persisted", 4.4)])
            .await
            .unwrap();

        let reopened = EventStoreClient::open(&path).unwrap();
        let stored = reopened.get("persisted").await.unwrap().unwrap();
        assert_eq!(stored.primary_value, 4.4);
        assert_eq!(
            reopened.query_by_time_range(0, i64::MAX).await.unwrap().len(),
            1
        );
    }
}
