//! Unit conversions and scoring rules shared by every source adapter.
//!
//! All functions here are pure and total: unknown inputs map to documented
//! defaults instead of failing.

use crate::types::{Category, Confidence};

/// EPA PM2.5 breakpoints: (conc_lo, conc_hi, aqi_lo, aqi_hi)
const PM25_BANDS: [(f64, f64, f64, f64); 6] = [
    (0.0, 12.0, 0.0, 50.0),
    (12.0, 35.4, 50.0, 100.0),
    (35.4, 55.4, 100.0, 150.0),
    (55.4, 150.4, 150.0, 200.0),
    (150.4, 250.4, 200.0, 300.0),
    (250.4, 500.4, 300.0, 500.0),
];

const PM25_MAX: f64 = 500.4;
const AQI_MAX: f64 = 500.0;

/// FRP (MW) that maps to one intensity point
const FRP_PER_INTENSITY: f64 = 50.0;
const MAX_FIRE_INTENSITY: f64 = 10.0;

/// Convert a PM2.5 concentration (µg/m³) to an AQI value.
///
/// Piecewise-linear over the EPA bands. Inputs are clamped to `[0, 500.4]`.
pub fn aqi_from_pm25(pm25: f64) -> f64 {
    if pm25.is_nan() || pm25 <= 0.0 {
        return 0.0;
    }
    let c = pm25.min(PM25_MAX);
    for (c_lo, c_hi, i_lo, i_hi) in PM25_BANDS {
        if c <= c_hi {
            return i_lo + (c - c_lo) * (i_hi - i_lo) / (c_hi - c_lo);
        }
    }
    AQI_MAX
}

/// Convert an AQI value back to an approximate PM2.5 concentration (µg/m³).
///
/// Exact inverse of [`aqi_from_pm25`] on `[0, 500]`.
pub fn pm25_from_aqi(aqi: f64) -> f64 {
    if aqi.is_nan() || aqi <= 0.0 {
        return 0.0;
    }
    let a = aqi.min(AQI_MAX);
    for (c_lo, c_hi, i_lo, i_hi) in PM25_BANDS {
        if a <= i_hi {
            return c_lo + (a - i_lo) * (c_hi - c_lo) / (i_hi - i_lo);
        }
    }
    PM25_MAX
}

/// Scale fire radiative power (MW) to a 0-10 intensity.
pub fn fire_intensity_from_frp(frp: f64) -> f64 {
    if frp.is_nan() || frp <= 0.0 {
        return 0.0;
    }
    (frp / FRP_PER_INTENSITY).min(MAX_FIRE_INTENSITY)
}

/// Numeric score for a CAP alert: severity tier plus urgency bonus.
pub fn severity_score(severity: &str, urgency: &str) -> f64 {
    let base = match severity {
        "Extreme" => 100.0,
        "Severe" => 75.0,
        "Moderate" => 50.0,
        "Minor" => 25.0,
        _ => 10.0,
    };
    let bonus = match urgency {
        "Immediate" => 50.0,
        "Expected" => 25.0,
        "Future" => 10.0,
        _ => 0.0,
    };
    base + bonus
}

/// Display color for a value within its category.
pub fn color_for_category(category: Category, value: f64) -> &'static str {
    match category {
        Category::Seismic => {
            if value >= 7.0 {
                "#8B0000"
            } else if value >= 6.0 {
                "#B22222"
            } else if value >= 5.0 {
                "#DC143C"
            } else if value >= 4.0 {
                "#FF6B6B"
            } else if value >= 3.0 {
                "#FF8C42"
            } else {
                "#FFD93D"
            }
        }
        Category::Fire => {
            if value >= 8.0 {
                "#8B0000"
            } else if value >= 6.0 {
                "#DC143C"
            } else if value >= 4.0 {
                "#FF6B6B"
            } else if value >= 2.0 {
                "#FF8C42"
            } else {
                "#FFD93D"
            }
        }
        Category::AirQuality => {
            if value > 300.0 {
                "#7E0023"
            } else if value > 200.0 {
                "#99004C"
            } else if value > 150.0 {
                "#FF0000"
            } else if value > 100.0 {
                "#FF7E00"
            } else if value > 50.0 {
                "#FFFF00"
            } else {
                "#00E400"
            }
        }
        Category::SevereWeather => {
            if value >= 150.0 {
                "#8B0000"
            } else if value >= 100.0 {
                "#DC143C"
            } else if value >= 50.0 {
                "#FF8C42"
            } else if value >= 25.0 {
                "#FFD93D"
            } else {
                "#8F9BB0"
            }
        }
        Category::PowerOutage => {
            if value > 100_000.0 {
                "#8B0000"
            } else if value > 50_000.0 {
                "#DC143C"
            } else if value > 25_000.0 {
                "#FF6B6B"
            } else if value > 10_000.0 {
                "#FF8C42"
            } else {
                "#FFD93D"
            }
        }
    }
}

/// Map a source's own quality vocabulary onto the shared three-level scale.
///
/// USGS `status` values other than reviewed/automatic are low. For every
/// other category an unrecognized flag is medium.
pub fn confidence_from_source_flag(category: Category, raw_flag: &str) -> Confidence {
    let flag = raw_flag.trim();
    match category {
        Category::Seismic => match flag.to_ascii_lowercase().as_str() {
            "reviewed" => Confidence::High,
            "automatic" => Confidence::Medium,
            _ => Confidence::Low,
        },
        Category::Fire => match flag.to_ascii_lowercase().as_str() {
            "h" | "high" => Confidence::High,
            "n" | "nominal" => Confidence::Medium,
            "l" | "low" => Confidence::Low,
            // MODIS reports a 0-100 percentage instead of a letter
            other => match other.parse::<f64>() {
                Ok(pct) if pct >= 80.0 => Confidence::High,
                Ok(pct) if pct >= 30.0 => Confidence::Medium,
                Ok(pct) if pct >= 0.0 => Confidence::Low,
                _ => Confidence::Medium,
            },
        },
        Category::SevereWeather => match flag.to_ascii_lowercase().as_str() {
            "observed" | "likely" => Confidence::High,
            "possible" => Confidence::Medium,
            "unlikely" | "unknown" => Confidence::Low,
            _ => Confidence::Medium,
        },
        Category::AirQuality => match flag.to_ascii_uppercase().as_str() {
            "PM2.5" => Confidence::High,
            "O3" | "OZONE" => Confidence::Medium,
            "PM10" => Confidence::Low,
            _ => Confidence::Medium,
        },
        Category::PowerOutage => Confidence::High,
    }
}

pub fn magnitude_label(magnitude: f64) -> &'static str {
    if magnitude >= 8.0 {
        "Great"
    } else if magnitude >= 7.0 {
        "Major"
    } else if magnitude >= 6.0 {
        "Strong"
    } else if magnitude >= 5.0 {
        "Moderate"
    } else if magnitude >= 4.0 {
        "Light"
    } else if magnitude >= 3.0 {
        "Minor"
    } else {
        "Micro"
    }
}

pub fn fire_intensity_label(intensity: f64) -> &'static str {
    if intensity >= 8.0 {
        "Extreme"
    } else if intensity >= 6.0 {
        "Very High"
    } else if intensity >= 4.0 {
        "High"
    } else if intensity >= 2.0 {
        "Moderate"
    } else {
        "Low"
    }
}

pub fn aqi_label(aqi: f64) -> &'static str {
    if aqi > 300.0 {
        "Hazardous"
    } else if aqi > 200.0 {
        "Very Unhealthy"
    } else if aqi > 150.0 {
        "Unhealthy"
    } else if aqi > 100.0 {
        "Unhealthy for Sensitive Groups"
    } else if aqi > 50.0 {
        "Moderate"
    } else {
        "Good"
    }
}

/// Outage severity from the share of customers affected or the raw count,
/// whichever is worse.
pub fn outage_severity_label(percentage_out: f64, customers_out: f64) -> &'static str {
    if percentage_out >= 5.0 || customers_out > 100_000.0 {
        "Severe"
    } else if percentage_out >= 2.0 || customers_out > 50_000.0 {
        "Major"
    } else if percentage_out >= 1.0 || customers_out > 25_000.0 {
        "Significant"
    } else if percentage_out >= 0.5 || customers_out > 10_000.0 {
        "Moderate"
    } else {
        "Minor"
    }
}

/// Coarse hazard family for a CAP event name (e.g. "Tornado Warning").
pub fn weather_hazard_label(event: &str) -> &'static str {
    let lower = event.to_lowercase();
    if lower.contains("tornado") {
        "Tornado"
    } else if lower.contains("hurricane") || lower.contains("typhoon") {
        "Hurricane"
    } else if lower.contains("flood") {
        "Flood"
    } else if lower.contains("fire") {
        "Fire Weather"
    } else if lower.contains("snow") || lower.contains("blizzard") {
        "Winter Storm"
    } else if lower.contains("thunderstorm") || lower.contains("severe") {
        "Severe Thunderstorm"
    } else if lower.contains("heat") {
        "Excessive Heat"
    } else if lower.contains("wind") {
        "High Wind"
    } else {
        "Weather Alert"
    }
}
