//! Persistence and read side for canonical events.
//!
//! `EventStore` is a synchronous SQLite table keyed on event id, plus a log
//! of ingestion runs.
//! `EventStoreClient` exposes it to async code, and the `read` and `status`
//! modules turn stored rows back into presentation shapes.

pub mod client;
pub mod error;
pub mod read;
pub mod status;
pub mod store;

pub use client::EventStoreClient;
pub use error::StoreError;
pub use read::{DataServiceResponse, ReadService};
pub use status::{feed_status, FeedHealth, FeedStatus};
pub use store::{CategoryStats, EventStore, IngestionRun, RunOutcome, RunStatus, TimeWindow};
