//! Freshness check per upstream feed.
//!
//! Each feed has an expected cadence. The age of its newest stored event
//! decides whether the feed is ok, delayed, or down. The error of the feed's
//! last failed ingestion run, if that was its most recent run, rides along.

use atlas_events::Category;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::client::EventStoreClient;
use crate::store::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedHealth {
    Down,
    Delayed,
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCadence {
    pub source: &'static str,
    pub category: Category,
    /// Newest event at most this old: ok
    pub ok_minutes: i64,
    /// Newest event at most this old: delayed. Older: down.
    pub warn_minutes: i64,
}

pub const FEEDS: [FeedCadence; 5] = [
    FeedCadence {
        source: "NASA FIRMS",
        category: Category::Fire,
        ok_minutes: 180,
        warn_minutes: 360,
    },
    FeedCadence {
        source: "AirNow",
        category: Category::AirQuality,
        ok_minutes: 120,
        warn_minutes: 240,
    },
    FeedCadence {
        source: "USGS",
        category: Category::Seismic,
        ok_minutes: 5,
        warn_minutes: 15,
    },
    FeedCadence {
        source: "NOAA NWS",
        category: Category::SevereWeather,
        ok_minutes: 60,
        warn_minutes: 120,
    },
    FeedCadence {
        source: "EIA",
        category: Category::PowerOutage,
        ok_minutes: 180,
        warn_minutes: 360,
    },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedStatus {
    pub source: &'static str,
    pub status: FeedHealth,
    pub last_update: Option<DateTime<Utc>>,
    pub age_min: Option<f64>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub fn classify(age_min: f64, cadence: &FeedCadence) -> FeedHealth {
    if age_min <= cadence.ok_minutes as f64 {
        FeedHealth::Ok
    } else if age_min <= cadence.warn_minutes as f64 {
        FeedHealth::Delayed
    } else {
        FeedHealth::Down
    }
}

async fn check_feed(client: &EventStoreClient, cadence: &FeedCadence, now: DateTime<Utc>) -> FeedStatus {
    let (stats, last_run) = match client.feed_snapshot(cadence.category, cadence.source).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(source = cadence.source, error = %e, hint = e.user_message(), "Feed status check failed");
            return FeedStatus {
                source: cadence.source,
                status: FeedHealth::Down,
                last_update: None,
                age_min: None,
                count: 0,
                msg: Some(format!("Error fetching: {e}")),
                last_error: None,
            };
        }
    };
    let last_error = last_run
        .filter(|run| run.status == RunStatus::Failure)
        .and_then(|run| run.error);

    let Some(latest) = stats.latest else {
        return FeedStatus {
            source: cadence.source,
            status: FeedHealth::Down,
            last_update: None,
            age_min: None,
            count: 0,
            msg: Some("No data".to_string()),
            last_error,
        };
    };
    let age_min = (now.timestamp_millis() - latest) as f64 / 60_000.0;

    FeedStatus {
        source: cadence.source,
        status: classify(age_min, cadence),
        last_update: DateTime::from_timestamp_millis(latest),
        age_min: Some(age_min),
        count: stats.count,
        msg: None,
        last_error,
    }
}

/// Status of every known feed, worst first (down, then delayed, then ok).
pub async fn feed_status(client: &EventStoreClient, now: DateTime<Utc>) -> Vec<FeedStatus> {
    let mut statuses = Vec::with_capacity(FEEDS.len());
    for cadence in &FEEDS {
        statuses.push(check_feed(client, cadence, now).await);
    }
    statuses.sort_by_key(|s| s.status);
    statuses
}
