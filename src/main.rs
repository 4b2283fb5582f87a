use anyhow::{Context, Result};
use atlas_core::{AppError, Config};
use atlas_store::{feed_status, FeedHealth};

mod ingest;

use ingest::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    atlas_core::init()?;

    let (config, _validation) = Config::load_validated()
        .map_err(|e| report(e.into()))
        .context("Failed to load configuration")?;
    tracing::info!("Event store: {}", config.store_path().display());

    let pipeline = Pipeline::from_config(&config)
        .map_err(report)
        .context("Failed to set up ingestion")?;
    let summary = pipeline.run_once().await;
    tracing::info!(
        "Ingestion pass complete: {} events stored across {} feeds",
        summary.total_stored(),
        summary.sources.len()
    );

    for status in feed_status(pipeline.store(), chrono::Utc::now()).await {
        match status.status {
            FeedHealth::Ok => tracing::info!(source = status.source, count = status.count, "Feed ok"),
            FeedHealth::Delayed => {
                tracing::warn!(source = status.source, age_min = ?status.age_min, "Feed delayed")
            }
            FeedHealth::Down => tracing::warn!(
                source = status.source,
                msg = ?status.msg,
                last_error = ?status.last_error,
                "Feed down"
            ),
        }
    }

    Ok(())
}

/// Log the operator-facing hint before the full chain goes to anyhow
fn report(err: AppError) -> anyhow::Error {
    tracing::error!(error = %err, hint = err.user_message(), "Startup failed");
    err.into()
}
