//! Source adapters for the Atlas hazard feeds.
//!
//! Each adapter fetches one upstream API (USGS, NASA FIRMS, NOAA NWS, AirNow,
//! EIA), parses its native format and maps records onto `CanonicalEvent`.
//! `fetch_and_normalize` fails soft and returns a possibly-empty list;
//! `fetch` returns the same events or the reason there are none.

pub mod adapter;
pub mod air_quality;
pub mod cache;
pub mod error;
pub mod fire;
pub mod http;
pub mod power_outage;
pub mod retry;
pub mod seismic;
pub mod weather_alert;

pub use adapter::Adapter;
pub use air_quality::{AirNowObservation, AirQualityAdapter, City};
pub use cache::{Cached, Clock, ManualClock, SystemClock, TtlCache};
pub use error::SourceError;
pub use fire::{FireAdapter, FireParams, FirmsSource};
pub use http::HttpFetcher;
pub use power_outage::PowerOutageAdapter;
pub use retry::RetryConfig;
pub use seismic::{MagnitudeFeed, SeismicAdapter, SeismicParams, Timeframe};
pub use weather_alert::{WeatherAlertAdapter, CONTINENTAL_US_CENTER};
