//! Cached, retrying HTTP GET shared by all adapters.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use atlas_core::Config;
use reqwest::Client;
use tokio::time::Instant;
use tracing::instrument;

use crate::cache::{Cached, TtlCache};
use crate::error::{truncate_body, SourceError};
use crate::retry::{with_retry, RetryConfig};

/// Raw response bodies keyed by request URL
pub type ResponseCache = TtlCache<String>;

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    cache: Arc<ResponseCache>,
    retry: RetryConfig,
}

impl HttpFetcher {
    pub fn new(
        timeout: Duration,
        user_agent: &str,
        cache: Arc<ResponseCache>,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            cache,
            retry: RetryConfig::default(),
        })
    }

    pub fn from_config(config: &Config, cache: Arc<ResponseCache>) -> Result<Self, SourceError> {
        Self::new(
            Duration::from_secs(config.http.timeout_secs),
            &config.http.user_agent,
            cache,
        )
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// GET `url` through the cache and decode it with `parse`.
    ///
    /// A fresh body is run through `parse` before it is stored, so a
    /// malformed upstream response is treated as a failed fetch: it never
    /// displaces the last good body and never gets served as stale data.
    ///
    /// `feed` only labels log lines; the URL is kept out of spans because
    /// FIRMS, AirNow and EIA embed the API key in it.
    #[instrument(skip(self, url, deadline, parse), level = "debug")]
    pub async fn get_parsed<T, P>(
        &self,
        feed: &str,
        url: &str,
        ttl: Option<Duration>,
        deadline: Option<Instant>,
        parse: P,
    ) -> Result<Cached<T>, SourceError>
    where
        P: Fn(&str) -> Result<T, SourceError>,
    {
        let parse = &parse;
        let cached = self
            .cache
            .get_or_fetch(url, ttl, move || async move {
                let body = self.fetch_uncached(url, deadline).await?;
                parse(&body)?;
                Ok::<_, SourceError>(body)
            })
            .await?;

        if cached.is_stale {
            tracing::warn!(feed, fetched_at = %cached.fetched_at, "Serving stale response");
        }
        Ok(Cached {
            data: parse(&cached.data)?,
            is_stale: cached.is_stale,
            fetched_at: cached.fetched_at,
        })
    }

    async fn fetch_uncached(&self, url: &str, deadline: Option<Instant>) -> Result<String, SourceError> {
        with_retry(&self.retry, deadline, || self.fetch_once(url)).await
    }

    async fn fetch_once(&self, url: &str) -> Result<String, SourceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        Ok(response.text().await?)
    }
}

/// Run `fut` unless `deadline` passes first.
pub async fn within_deadline<F: Future>(
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output, SourceError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| SourceError::DeadlineExceeded),
        None => Ok(fut.await),
    }
}
