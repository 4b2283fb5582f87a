//! Canonical hazard event model for Atlas
//!
//! Every source adapter maps its native records onto `CanonicalEvent`, using
//! the shared scoring rules so unrelated feeds become comparable.

pub mod identity;
pub mod scoring;
pub mod types;

pub use identity::{airnow_event_id, eia_outage_event_id, firms_event_id, location_key};
pub use scoring::{
    aqi_from_pm25, color_for_category, confidence_from_source_flag, fire_intensity_from_frp,
    pm25_from_aqi, severity_score,
};
pub use types::*;
