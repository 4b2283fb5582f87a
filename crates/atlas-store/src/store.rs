//! SQLite-backed canonical event table.
//!
//! Rows are keyed on the event id. Writes are full overwrites: a conflicting
//! id replaces every column, it is never merged field by field.
//!
//! `ingestion_runs` keeps one row per source per pipeline pass.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use atlas_events::{CanonicalEvent, Category, Confidence, GeoPoint, Metadata};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::StoreError;

const MS_PER_HOUR: i64 = 3_600_000;

const SELECT_COLUMNS: &str = "SELECT id, timestamp, category, primary_value, secondary_value,
        lat, lon, confidence, source, color, metadata
     FROM canonical_events";

/// Lower bound for a category query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    /// Events at or after this epoch-millisecond timestamp
    After(i64),
    /// Events from the last N hours
    HoursBack(u32),
}

impl TimeWindow {
    /// Inclusive cutoff in epoch milliseconds, relative to `now_ms`
    pub fn cutoff(&self, now_ms: i64) -> i64 {
        match self {
            TimeWindow::After(ts) => *ts,
            TimeWindow::HoursBack(hours) => now_ms - i64::from(*hours) * MS_PER_HOUR,
        }
    }
}

/// Row count and newest timestamp of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryStats {
    pub count: usize,
    pub latest: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub events_fetched: usize,
    pub events_stored: usize,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn success(events_fetched: usize, events_stored: usize) -> Self {
        Self {
            status: RunStatus::Success,
            events_fetched,
            events_stored,
            error: None,
        }
    }

    pub fn failure(events_fetched: usize, error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failure,
            events_fetched,
            events_stored: 0,
            error: Some(error.into()),
        }
    }
}

/// One source's part of one pipeline pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionRun {
    pub id: i64,
    pub source: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: RunStatus,
    pub events_fetched: usize,
    pub events_stored: usize,
    pub error: Option<String>,
}

const RUN_COLUMNS: &str = "SELECT id, source, started_at, finished_at, status,
        events_fetched, events_stored, error
     FROM ingestion_runs";

pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open (or create) the store at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS canonical_events (
                id TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                category TEXT NOT NULL,
                primary_value REAL NOT NULL,
                secondary_value REAL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                confidence TEXT NOT NULL,
                source TEXT NOT NULL,
                color TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                ingested_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_category_time
                ON canonical_events(category, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_events_time
                ON canonical_events(timestamp DESC);

            CREATE TABLE IF NOT EXISTS ingestion_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                status TEXT NOT NULL,
                events_fetched INTEGER NOT NULL DEFAULT 0,
                events_stored INTEGER NOT NULL DEFAULT 0,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_source
                ON ingestion_runs(source, id DESC);
            "#,
        )?;
        Ok(())
    }

    /// Insert or fully replace `events` in one transaction.
    ///
    /// Returns the rows as written, one per id. Within one batch a repeated id
    /// keeps the later entry at the position of the first.
    pub fn upsert(&mut self, events: &[CanonicalEvent]) -> Result<Vec<CanonicalEvent>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(events.len());
        let mut unique: Vec<&CanonicalEvent> = Vec::with_capacity(events.len());
        for event in events {
            match positions.entry(event.id.as_str()) {
                Entry::Occupied(slot) => unique[*slot.get()] = event,
                Entry::Vacant(slot) => {
                    slot.insert(unique.len());
                    unique.push(event);
                }
            }
        }

        let ingested_at = Utc::now().timestamp_millis();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO canonical_events
                    (id, timestamp, category, primary_value, secondary_value,
                     lat, lon, confidence, source, color, metadata, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    category = excluded.category,
                    primary_value = excluded.primary_value,
                    secondary_value = excluded.secondary_value,
                    lat = excluded.lat,
                    lon = excluded.lon,
                    confidence = excluded.confidence,
                    source = excluded.source,
                    color = excluded.color,
                    metadata = excluded.metadata,
                    ingested_at = excluded.ingested_at",
            )?;

            for event in &unique {
                let metadata = serde_json::to_string(&event.metadata)?;
                stmt.execute(params![
                    event.id,
                    event.timestamp,
                    event.category.as_str(),
                    event.primary_value,
                    event.secondary_value,
                    event.location.lat,
                    event.location.lon,
                    event.confidence.as_str(),
                    event.source,
                    event.color,
                    metadata,
                    ingested_at,
                ])?;
            }
        }
        tx.commit()?;

        debug!(count = unique.len(), duplicates = events.len() - unique.len(), "Upserted events");
        Ok(unique.into_iter().cloned().collect())
    }

    /// Events of one category inside `window`, newest first.
    pub fn query_by_category_and_window(
        &self,
        category: Category,
        window: TimeWindow,
    ) -> Result<Vec<CanonicalEvent>, StoreError> {
        let cutoff = window.cutoff(Utc::now().timestamp_millis());
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE category = ?1 AND timestamp >= ?2
             ORDER BY timestamp DESC, id ASC"
        ))?;
        let rows = stmt.query_map(params![category.as_str(), cutoff], Self::row_to_event)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Events of every category with `start <= timestamp <= end`, newest first.
    pub fn query_by_time_range(&self, start: i64, end: i64) -> Result<Vec<CanonicalEvent>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE timestamp >= ?1 AND timestamp <= ?2
             ORDER BY timestamp DESC, id ASC"
        ))?;
        let rows = stmt.query_map(params![start, end], Self::row_to_event)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get(&self, id: &str) -> Result<Option<CanonicalEvent>, StoreError> {
        let event = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                Self::row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    pub fn count(&self, category: Category) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM canonical_events WHERE category = ?1",
            params![category.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Timestamp of the newest event in `category`, if any
    pub fn latest_timestamp(&self, category: Category) -> Result<Option<i64>, StoreError> {
        let latest: Option<i64> = self.conn.query_row(
            "SELECT MAX(timestamp) FROM canonical_events WHERE category = ?1",
            params![category.as_str()],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    /// Count and newest timestamp in one read
    pub fn category_stats(&self, category: Category) -> Result<CategoryStats, StoreError> {
        let (count, latest): (i64, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), MAX(timestamp) FROM canonical_events WHERE category = ?1",
            params![category.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(CategoryStats {
            count: count as usize,
            latest,
        })
    }

    /// Record that `source` has started; returns the run id.
    pub fn start_run(&mut self, source: &str) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO ingestion_runs (source, started_at, status) VALUES (?1, ?2, ?3)",
            params![source, Utc::now().timestamp_millis(), RunStatus::Running.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_run(&mut self, run_id: i64, outcome: &RunOutcome) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE ingestion_runs
             SET finished_at = ?2, status = ?3, events_fetched = ?4, events_stored = ?5, error = ?6
             WHERE id = ?1",
            params![
                run_id,
                Utc::now().timestamp_millis(),
                outcome.status.as_str(),
                outcome.events_fetched as i64,
                outcome.events_stored as i64,
                outcome.error,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::Database(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    /// Most recent finished run of `source`
    pub fn latest_run(&self, source: &str) -> Result<Option<IngestionRun>, StoreError> {
        let run = self
            .conn
            .query_row(
                &format!("{RUN_COLUMNS} WHERE source = ?1 AND status != ?2 ORDER BY id DESC LIMIT 1"),
                params![source, RunStatus::Running.as_str()],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    /// Newest runs of every source first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<IngestionRun>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{RUN_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_run)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<IngestionRun> {
        let status: String = row.get(4)?;
        let status = RunStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown run status '{status}'").into(),
            )
        })?;
        let fetched: i64 = row.get(5)?;
        let stored: i64 = row.get(6)?;

        Ok(IngestionRun {
            id: row.get(0)?,
            source: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            status,
            events_fetched: fetched as usize,
            events_stored: stored as usize,
            error: row.get(7)?,
        })
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<CanonicalEvent> {
        let category: String = row.get(2)?;
        let confidence: String = row.get(7)?;
        let metadata: String = row.get(10)?;

        let category = category
            .parse::<Category>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
        let confidence = confidence
            .parse::<Confidence>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
        let metadata: Metadata = serde_json::from_str(&metadata)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

        Ok(CanonicalEvent {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            category,
            primary_value: row.get(3)?,
            secondary_value: row.get(4)?,
            location: GeoPoint::new(row.get(5)?, row.get(6)?),
            confidence,
            source: row.get(8)?,
            color: row.get(9)?,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::json;

    fn event(id: &str, category: Category, timestamp: i64, primary: f64) -> CanonicalEvent {
        let mut metadata = Metadata::new();
        metadata.insert("place".into(), json!("somewhere"));
        CanonicalEvent {
            id: id.to_string(),
            timestamp,
            category,
            primary_value: primary,
            secondary_value: Some(10.0),
            location: GeoPoint::new(35.0, -118.0),
            confidence: Confidence::High,
            source: "USGS".to_string(),
            color: "#FF6B6B".to_string(),
            metadata,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let mut store = EventStore::in_memory().unwrap();
        let written = store
            .upsert(&[event("a", Category::Seismic, 1_000, 4.2)])
            .unwrap();
        assert_eq!(written.len(), 1);

        let fetched = store.get("a").unwrap().unwrap();
        assert_eq!(fetched, written[0]);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_overwrites_whole_row() {
        let mut store = EventStore::in_memory().unwrap();
        store.upsert(&[event("a", Category::Seismic, 1_000, 4.2)]).unwrap();

        let mut replacement = event("a", Category::Seismic, 1_000, 5.5);
        replacement.secondary_value = None;
        replacement.metadata = Metadata::new();
        store.upsert(&[replacement.clone()]).unwrap();

        assert_eq!(store.count(Category::Seismic).unwrap(), 1);
        assert_eq!(store.get("a").unwrap().unwrap(), replacement);
    }

    #[test]
    fn test_duplicate_ids_in_one_batch_keep_last() {
        let mut store = EventStore::in_memory().unwrap();
        store
            .upsert(&[
                event("dup", Category::Fire, 1_000, 1.0),
                event("dup", Category::Fire, 1_000, 2.0),
            ])
            .unwrap();
        assert_eq!(store.count(Category::Fire).unwrap(), 1);
        assert_eq!(store.get("dup").unwrap().unwrap().primary_value, 2.0);
    }

    #[test]
    fn test_upsert_returns_one_row_per_id() {
        let mut store = EventStore::in_memory().unwrap();
        let written = store
            .upsert(&[
                event("a", Category::Fire, 1_000, 1.0),
                event("dup", Category::Fire, 1_000, 1.0),
                event("b", Category::Fire, 1_000, 1.0),
                event("dup", Category::Fire, 1_000, 3.0),
            ])
            .unwrap();

        let ids: Vec<&str> = written.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "dup", "b"]);
        assert_eq!(written[1].primary_value, 3.0);
        assert_eq!(store.get("dup").unwrap().unwrap(), written[1]);
    }

    #[test]
    fn test_category_stats() {
        let mut store = EventStore::in_memory().unwrap();
        assert_eq!(store.category_stats(Category::Fire).unwrap(), CategoryStats::default());

        store
            .upsert(&[
                event("f1", Category::Fire, 4_000, 1.0),
                event("f2", Category::Fire, 8_000, 1.0),
                event("eq", Category::Seismic, 9_000, 1.0),
            ])
            .unwrap();
        assert_eq!(
            store.category_stats(Category::Fire).unwrap(),
            CategoryStats {
                count: 2,
                latest: Some(8_000)
            }
        );
    }

    #[test]
    fn test_finishing_unknown_run_fails() {
        let mut store = EventStore::in_memory().unwrap();
        assert!(store.finish_run(99, &RunOutcome::success(0, 0)).is_err());
    }

    #[test]
    fn test_empty_upsert_is_noop() {
        let mut store = EventStore::in_memory().unwrap();
        assert!(store.upsert(&[]).unwrap().is_empty());
        assert_eq!(store.count(Category::Seismic).unwrap(), 0);
    }

    #[test]
    fn test_query_filters_category_and_sorts_descending() {
        let mut store = EventStore::in_memory().unwrap();
        store
            .upsert(&[
                event("old", Category::Seismic, 1_000, 3.0),
                event("new", Category::Seismic, 3_000, 3.0),
                event("mid", Category::Seismic, 2_000, 3.0),
                event("fire", Category::Fire, 2_500, 3.0),
            ])
            .unwrap();

        let events = store
            .query_by_category_and_window(Category::Seismic, TimeWindow::After(1_500))
            .unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }

    #[test]
    fn test_hours_back_window() {
        let now = Utc::now().timestamp_millis();
        let mut store = EventStore::in_memory().unwrap();
        store
            .upsert(&[
                event("recent", Category::SevereWeather, now - MS_PER_HOUR, 100.0),
                event("ancient", Category::SevereWeather, now - 100 * MS_PER_HOUR, 100.0),
            ])
            .unwrap();

        let events = store
            .query_by_category_and_window(Category::SevereWeather, TimeWindow::HoursBack(72))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "recent");
    }

    #[test]
    fn test_time_window_cutoff() {
        assert_eq!(TimeWindow::After(42).cutoff(1_000_000), 42);
        assert_eq!(TimeWindow::HoursBack(2).cutoff(10 * MS_PER_HOUR), 8 * MS_PER_HOUR);
    }

    #[test]
    fn test_latest_timestamp_and_range() {
        let mut store = EventStore::in_memory().unwrap();
        assert_eq!(store.latest_timestamp(Category::AirQuality).unwrap(), None);

        store
            .upsert(&[
                event("aq1", Category::AirQuality, 5_000, 40.0),
                event("aq2", Category::AirQuality, 9_000, 60.0),
                event("eq1", Category::Seismic, 7_000, 2.0),
            ])
            .unwrap();
        assert_eq!(store.latest_timestamp(Category::AirQuality).unwrap(), Some(9_000));

        let range = store.query_by_time_range(6_000, 9_000).unwrap();
        let ids: Vec<&str> = range.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["aq2", "eq1"]);
    }
}
