//! In-process TTL cache for upstream responses.
//!
//! Fresh entries are served without touching the network. When a refresh
//! fails, the last good value is served with `is_stale = true` so one flaky
//! upstream never blanks a feed that has data.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Source of "now" for TTL decisions
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Lets TTL expiry be tested without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::milliseconds(by.as_millis() as i64);
        let mut now = self.now.lock();
        *now += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A value handed back by the cache
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub data: T,
    /// Set when the refresh failed and an expired value was served instead
    pub is_stale: bool,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    fetched_at: DateTime<Utc>,
}

impl<T: Clone> CacheEntry<T> {
    fn to_cached(&self, is_stale: bool) -> Cached<T> {
        Cached {
            data: self.data.clone(),
            is_stale,
            fetched_at: self.fetched_at,
        }
    }
}

/// Keyed TTL cache, safe to share between tasks.
///
/// Two concurrent misses on the same key may both hit the upstream; when
/// they write back, the entry with the later `fetched_at` is kept.
#[derive(Debug)]
pub struct TtlCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            clock,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return the cached value for `key` if it is still fresh, otherwise
    /// run `fetch` and store its result.
    ///
    /// If `fetch` fails and any value exists for `key`, that value is returned
    /// marked stale. The error only surfaces when there is nothing to serve.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Cached<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let ttl = ttl.unwrap_or(self.default_ttl);

        if let Some(hit) = self.get_fresh(key, ttl) {
            debug!(key, "Cache hit");
            return Ok(hit);
        }

        match fetch().await {
            Ok(data) => {
                let fetched_at = self.clock.now();
                Ok(self.insert(key, data, fetched_at))
            }
            Err(e) => {
                let entry = self.entries.lock().get(key).cloned();
                match entry {
                    // Another task refreshed it while this fetch was in flight
                    Some(entry) if self.is_fresh(&entry, ttl) => Ok(entry.to_cached(false)),
                    Some(entry) => {
                        warn!(key, error = %e, fetched_at = %entry.fetched_at, "Fetch failed, serving stale data");
                        Ok(entry.to_cached(true))
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Fresh value for `key` under the default TTL, if any
    pub fn get(&self, key: &str) -> Option<Cached<T>> {
        self.get_fresh(key, self.default_ttl)
    }

    /// Drop one key, or everything when `key` is `None`
    pub fn invalidate(&self, key: Option<&str>) {
        let mut entries = self.entries.lock();
        match key {
            Some(key) => {
                entries.remove(key);
            }
            None => entries.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn get_fresh(&self, key: &str, ttl: Duration) -> Option<Cached<T>> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| self.is_fresh(entry, ttl))
            .map(|entry| entry.to_cached(false))
    }

    fn is_fresh(&self, entry: &CacheEntry<T>, ttl: Duration) -> bool {
        let age_ms = (self.clock.now() - entry.fetched_at).num_milliseconds();
        age_ms < ttl.as_millis() as i64
    }

    fn insert(&self, key: &str, data: T, fetched_at: DateTime<Utc>) -> Cached<T> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key) {
            if existing.fetched_at > fetched_at {
                return existing.to_cached(false);
            }
        }
        let entry = CacheEntry { data, fetched_at };
        let cached = entry.to_cached(false);
        entries.insert(key.to_string(), entry);
        cached
    }
}
