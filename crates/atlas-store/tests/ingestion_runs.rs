#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use atlas_events::{CanonicalEvent, Category, Confidence, GeoPoint, Metadata};
use atlas_store::{feed_status, EventStoreClient, FeedHealth, RunOutcome, RunStatus};
use chrono::{DateTime, Utc};

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_717_243_200_000).unwrap()
}

fn quake(id: &str, age_ms: i64) -> CanonicalEvent {
    CanonicalEvent {
        id: id.to_string(),
        timestamp: now().timestamp_millis() - age_ms,
        category: Category::Seismic,
        primary_value: 4.0,
        secondary_value: None,
        location: GeoPoint::new(35.7, -117.6),
        confidence: Confidence::High,
        source: "USGS".to_string(),
        color: "#FF8C42".to_string(),
        metadata: Metadata::new(),
    }
}

#[tokio::test]
async fn test_runs_record_each_outcome() {
    let client = EventStoreClient::in_memory().unwrap();

    let usgs = client.start_run("USGS").await.unwrap();
    let eia = client.start_run("EIA").await.unwrap();

    // Unfinished runs are not reported as the latest
    assert!(client.latest_run("USGS").await.unwrap().is_none());
    let running = client.recent_runs(10).await.unwrap();
    assert_eq!(running.len(), 2);
    assert!(running.iter().all(|r| r.status == RunStatus::Running && r.finished_at.is_none()));

    client.finish_run(usgs, RunOutcome::success(12, 10)).await.unwrap();
    client
        .finish_run(eia, RunOutcome::failure(0, "No API key configured for EIA"))
        .await
        .unwrap();

    let usgs_run = client.latest_run("USGS").await.unwrap().unwrap();
    assert_eq!(usgs_run.status, RunStatus::Success);
    assert_eq!((usgs_run.events_fetched, usgs_run.events_stored), (12, 10));
    assert!(usgs_run.finished_at.is_some());
    assert_eq!(usgs_run.error, None);

    let eia_run = client.latest_run("EIA").await.unwrap().unwrap();
    assert_eq!(eia_run.status, RunStatus::Failure);
    assert_eq!(eia_run.events_stored, 0);
    assert_eq!(eia_run.error.as_deref(), Some("No API key configured for EIA"));

    let sources: Vec<String> = client
        .recent_runs(1)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.source)
        .collect();
    assert_eq!(sources, vec!["EIA"]);
}

#[tokio::test]
async fn test_feed_status_carries_last_run_error() {
    let client = EventStoreClient::in_memory().unwrap();
    client.upsert(vec![quake("eq-1", 60_000)]).await.unwrap();

    let run = client.start_run("USGS").await.unwrap();
    client
        .finish_run(run, RunOutcome::failure(0, "Upstream returned 503: "))
        .await
        .unwrap();
    let run = client.start_run("EIA").await.unwrap();
    client
        .finish_run(run, RunOutcome::failure(0, "No API key configured for EIA"))
        .await
        .unwrap();

    let statuses = feed_status(&client, now()).await;
    let usgs = statuses.iter().find(|s| s.source == "USGS").unwrap();
    assert_eq!(usgs.status, FeedHealth::Ok);
    assert_eq!(usgs.last_error.as_deref(), Some("Upstream returned 503: "));

    let eia = statuses.iter().find(|s| s.source == "EIA").unwrap();
    assert_eq!(eia.status, FeedHealth::Down);
    assert_eq!(eia.msg.as_deref(), Some("No data"));
    assert_eq!(eia.last_error.as_deref(), Some("No API key configured for EIA"));

    // A later success clears the error
    let run = client.start_run("USGS").await.unwrap();
    client.finish_run(run, RunOutcome::success(1, 1)).await.unwrap();
    let statuses = feed_status(&client, now()).await;
    let usgs = statuses.iter().find(|s| s.source == "USGS").unwrap();
    assert_eq!(usgs.last_error, None);
}

#[tokio::test]
async fn test_unreadable_store_marks_feeds_down() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let client = EventStoreClient::open(&path).unwrap();
    client.upsert(vec![quake("eq-1", 60_000)]).await.unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch("DROP TABLE canonical_events;").unwrap();
    drop(conn);

    let statuses = feed_status(&client, now()).await;
    assert_eq!(statuses.len(), 5);
    for status in &statuses {
        assert_eq!(status.status, FeedHealth::Down);
        assert_eq!(status.count, 0);
        let msg = status.msg.as_deref().unwrap();
        assert!(msg.starts_with("Error fetching:"), "unexpected msg: {msg}");
        assert!(msg.contains("canonical_events"), "unexpected msg: {msg}");
    }
}
