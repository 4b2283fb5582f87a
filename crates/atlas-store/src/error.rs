use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub fn user_message(&self) -> &'static str {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::CannotOpen =>
            {
                "Unable to open the event store."
            }
            StoreError::Database(_) => "An event store operation failed.",
            StoreError::Serialization(_) => "An event could not be encoded for storage.",
            StoreError::TaskJoin(_) => "An event store task was interrupted.",
        }
    }
}
