use thiserror::Error;

/// Failure while fetching or decoding an upstream feed.
///
/// Adapters log these and return an empty list; they never reach callers of
/// `fetch_and_normalize`.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("No API key configured for {0}")]
    MissingApiKey(&'static str),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(err.to_string())
    }
}

impl SourceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            SourceError::Network(e) if e.is_timeout() => "The upstream feed timed out.",
            SourceError::Network(_) => "Unable to reach the upstream feed.",
            SourceError::Status { status, .. } if *status >= 500 => {
                "The upstream feed is experiencing issues."
            }
            SourceError::Status { status: 401 | 403, .. } => "The upstream feed rejected the API key.",
            SourceError::Status { .. } => "The upstream feed rejected the request.",
            SourceError::Parse(_) => "The upstream feed returned unexpected data.",
            SourceError::MissingApiKey(_) => "An API key is required for this feed.",
            SourceError::InvalidParameter(_) => "The feed is misconfigured.",
            SourceError::DeadlineExceeded => "The feed did not answer in time.",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Network(e) => e.is_timeout() || e.is_connect(),
            SourceError::Status { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            _ => false,
        }
    }
}

/// Keep upstream error bodies short enough for a log line.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
