use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

pub const FIRMS_API_KEY_ENV: &str = "NASA_FIRMS_API_KEY";
pub const AIRNOW_API_KEY_ENV: &str = "AIRNOW_API_KEY";
pub const EIA_API_KEY_ENV: &str = "EIA_API_KEY";

const USGS_TIMEFRAMES: &[&str] = &["hour", "day", "week", "month"];
const USGS_MAGNITUDES: &[&str] = &["significant", "all", "4.5", "2.5", "1.0"];
const FIRMS_SOURCES: &[&str] = &["VIIRS_SNPP_NRT", "VIIRS_NOAA20_NRT", "MODIS_NRT"];

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a single-line summary of all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the event store and other local state
    pub data_dir: PathBuf,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Freshness window for cached upstream responses
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,

    /// Sent on every request; api.weather.gov rejects requests without one
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "DataflowAtlas/1.0 (contact@dataflowatlas.org)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Event store file; defaults to `<data_dir>/events.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Per-adapter deadline for one ingestion pass (0 disables it)
    pub deadline_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { deadline_secs: 60 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub usgs: UsgsConfig,
    #[serde(default)]
    pub firms: FirmsConfig,
    #[serde(default)]
    pub nws: NwsConfig,
    #[serde(default)]
    pub airnow: AirNowConfig,
    #[serde(default)]
    pub eia: EiaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsgsConfig {
    pub base_url: String,
    /// hour | day | week | month
    pub timeframe: String,
    /// significant | all | 4.5 | 2.5 | 1.0
    pub magnitude: String,
}

impl Default for UsgsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://earthquake.usgs.gov".to_string(),
            timeframe: "day".to_string(),
            magnitude: "all".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmsConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub source: String,
    pub area: String,
    pub day_range: u32,
}

impl Default for FirmsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://firms.modaps.eosdis.nasa.gov".to_string(),
            api_key: None,
            source: "VIIRS_SNPP_NRT".to_string(),
            area: "WORLD".to_string(),
            day_range: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NwsConfig {
    pub base_url: String,
}

impl Default for NwsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.weather.gov".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityConfig {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl CityConfig {
    fn new(name: &str, lat: f64, lon: f64) -> Self {
        Self {
            name: name.to_string(),
            lat,
            lon,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirNowConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Search radius around each city, in miles
    pub distance_miles: u32,
    #[serde(default = "default_airnow_cities")]
    pub cities: Vec<CityConfig>,
}

fn default_airnow_cities() -> Vec<CityConfig> {
    vec![
        CityConfig::new("New York", 40.7128, -74.0060),
        CityConfig::new("Los Angeles", 34.0522, -118.2437),
        CityConfig::new("Chicago", 41.8781, -87.6298),
        CityConfig::new("Houston", 29.7604, -95.3698),
        CityConfig::new("Phoenix", 33.4484, -112.0740),
        CityConfig::new("Denver", 39.7392, -104.9903),
        CityConfig::new("Seattle", 47.6062, -122.3321),
        CityConfig::new("San Francisco", 37.7749, -122.4194),
        CityConfig::new("Miami", 25.7617, -80.1918),
        CityConfig::new("Boston", 42.3601, -71.0589),
    ]
}

impl Default for AirNowConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.airnowapi.org".to_string(),
            api_key: None,
            distance_miles: 100,
            cities: default_airnow_cities(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EiaConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for EiaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.eia.gov/v2".to_string(),
            api_key: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("atlas");

        Self {
            data_dir,
            cache: CacheConfig::default(),
            http: HttpConfig::default(),
            store: StoreConfig::default(),
            ingest: IngestConfig::default(),
            sources: SourcesConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the user config dir, creating a default file if missing
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, creating a default file if missing
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            let mut config = Self::default();
            config.save_to(config_path)?;
            config.apply_env();
            return Ok(config);
        }

        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| ConfigError::io(config_path, e))?;

        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();

        Ok(config)
    }

    /// Load configuration and fail on validation errors
    pub fn load_validated() -> Result<(Self, ValidationResult), ConfigError> {
        Self::load()?.validated()
    }

    /// Validate, logging warnings and turning errors into `ConfigError::Invalid`
    pub fn validated(self) -> Result<(Self, ValidationResult), ConfigError> {
        let validation = self.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()));
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((self, validation))
    }

    /// Environment API keys fill in whatever the file leaves unset
    fn apply_env(&mut self) {
        if self.sources.firms.api_key.is_none() {
            self.sources.firms.api_key = std::env::var(FIRMS_API_KEY_ENV).ok();
        }
        if self.sources.airnow.api_key.is_none() {
            self.sources.airnow.api_key = std::env::var(AIRNOW_API_KEY_ENV).ok();
        }
        if self.sources.eia.api_key.is_none() {
            self.sources.eia.api_key = std::env::var(EIA_API_KEY_ENV).ok();
        }
    }

    /// Effective path of the event store file
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("events.db"))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.sources.usgs.base_url, "sources.usgs.base_url", &mut result);
        self.validate_url(&self.sources.firms.base_url, "sources.firms.base_url", &mut result);
        self.validate_url(&self.sources.nws.base_url, "sources.nws.base_url", &mut result);
        self.validate_url(&self.sources.airnow.base_url, "sources.airnow.base_url", &mut result);
        self.validate_url(&self.sources.eia.base_url, "sources.eia.base_url", &mut result);

        if self.cache.ttl_secs == 0 {
            result.add_error("cache.ttl_secs", "Cache TTL must be greater than 0");
        }

        if self.http.timeout_secs == 0 {
            result.add_error("http.timeout_secs", "HTTP timeout must be greater than 0");
        }
        if self.http.user_agent.trim().is_empty() {
            result.add_error("http.user_agent", "User-Agent is required by api.weather.gov");
        }

        if self.ingest.deadline_secs == 0 {
            result.add_warning("ingest.deadline_secs", "Adapter deadline disabled (0 seconds)");
        }

        let usgs = &self.sources.usgs;
        if !USGS_TIMEFRAMES.contains(&usgs.timeframe.as_str()) {
            result.add_error(
                "sources.usgs.timeframe",
                format!("Unknown timeframe: {}", usgs.timeframe),
            );
        }
        if !USGS_MAGNITUDES.contains(&usgs.magnitude.as_str()) {
            result.add_error(
                "sources.usgs.magnitude",
                format!("Unknown magnitude feed: {}", usgs.magnitude),
            );
        }

        let firms = &self.sources.firms;
        if !FIRMS_SOURCES.contains(&firms.source.as_str()) {
            result.add_error(
                "sources.firms.source",
                format!("Unknown satellite source: {}", firms.source),
            );
        }
        if !(1..=10).contains(&firms.day_range) {
            result.add_error("sources.firms.day_range", "Day range must be between 1 and 10");
        }
        if firms.api_key.as_deref().map_or(true, str::is_empty) {
            result.add_warning(
                "sources.firms.api_key",
                format!("Not configured (set {}); fire ingestion will be skipped", FIRMS_API_KEY_ENV),
            );
        }

        let airnow = &self.sources.airnow;
        if airnow.distance_miles == 0 {
            result.add_error("sources.airnow.distance_miles", "Search radius must be greater than 0");
        }
        if airnow.cities.is_empty() {
            result.add_warning("sources.airnow.cities", "No cities configured");
        }
        for (i, city) in airnow.cities.iter().enumerate() {
            if !(-90.0..=90.0).contains(&city.lat) || !(-180.0..=180.0).contains(&city.lon) {
                result.add_error(
                    format!("sources.airnow.cities[{}]", i),
                    format!("Coordinates out of range for {}", city.name),
                );
            }
        }
        if airnow.api_key.as_deref().map_or(true, str::is_empty) {
            result.add_warning(
                "sources.airnow.api_key",
                format!("Not configured (set {}); air quality ingestion will be skipped", AIRNOW_API_KEY_ENV),
            );
        }
        if self.sources.eia.api_key.as_deref().map_or(true, str::is_empty) {
            result.add_warning(
                "sources.eia.api_key",
                format!("Not configured (set {}); power outage ingestion will be skipped", EIA_API_KEY_ENV),
            );
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }
                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(config_path, contents).map_err(|e| ConfigError::io(config_path, e))?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("atlas");

        Ok(config_dir.join("config.toml"))
    }
}
