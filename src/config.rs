//! Configuration Module
//!
//! Environment-driven settings, with optional `.env` loading for development.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::camera::CaptureFormat;
use crate::location::PositionOptions;
use crate::map::TileLayer;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_LOCATION_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAP_ZOOM: u8 = 13;

/// Application settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub auth_url: String,
    pub auth_api_key: String,
    pub poll_interval: Duration,
    pub position: PositionOptions,
    /// Endpoint used to resolve the device position; `None` disables geolocation.
    pub geolocation_url: Option<String>,
    pub tiles: TileLayer,
    pub map_zoom: u8,
    pub capture_format: CaptureFormat,
}

impl AppConfig {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment overrides from {:?}", path);
        }
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with("GEOTRACK_"))
            .collect();
        Self::from_vars(&vars)
    }

    /// Build settings from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            vars.get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        let auth_url = get("GEOTRACK_AUTH_URL")
            .ok_or(ConfigError::Missing("GEOTRACK_AUTH_URL"))?
            .trim_end_matches('/')
            .to_string();
        let auth_api_key = get("GEOTRACK_AUTH_KEY").unwrap_or_default().to_string();

        let poll_secs = parse_or(
            get("GEOTRACK_POLL_INTERVAL_SECS"),
            "GEOTRACK_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
        )?;
        if poll_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "GEOTRACK_POLL_INTERVAL_SECS",
                value: "0".into(),
            });
        }

        let position = PositionOptions {
            enable_high_accuracy: parse_bool_or(
                get("GEOTRACK_HIGH_ACCURACY"),
                "GEOTRACK_HIGH_ACCURACY",
                true,
            )?,
            timeout: Duration::from_millis(parse_or(
                get("GEOTRACK_LOCATION_TIMEOUT_MS"),
                "GEOTRACK_LOCATION_TIMEOUT_MS",
                DEFAULT_LOCATION_TIMEOUT_MS,
            )?),
            maximum_age: Duration::from_millis(parse_or(
                get("GEOTRACK_LOCATION_MAX_AGE_MS"),
                "GEOTRACK_LOCATION_MAX_AGE_MS",
                0,
            )?),
        };

        let mut tiles = TileLayer::default();
        if let Some(template) = get("GEOTRACK_TILE_URL") {
            tiles.url_template = template.to_string();
        }
        if let Some(subdomains) = get("GEOTRACK_TILE_SUBDOMAINS") {
            tiles.subdomains = subdomains
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        let map_zoom = parse_or(get("GEOTRACK_MAP_ZOOM"), "GEOTRACK_MAP_ZOOM", DEFAULT_MAP_ZOOM)?;
        if map_zoom > TileLayer::MAX_ZOOM {
            return Err(ConfigError::Invalid {
                key: "GEOTRACK_MAP_ZOOM",
                value: map_zoom.to_string(),
            });
        }

        let capture_format = match get("GEOTRACK_CAPTURE_FORMAT") {
            Some(mime) => CaptureFormat::from_mime(mime).ok_or_else(|| ConfigError::Invalid {
                key: "GEOTRACK_CAPTURE_FORMAT",
                value: mime.to_string(),
            })?,
            None => CaptureFormat::default(),
        };

        Ok(Self {
            auth_url,
            auth_api_key,
            poll_interval: Duration::from_secs(poll_secs),
            position,
            geolocation_url: get("GEOTRACK_GEOLOCATION_URL").map(str::to_string),
            tiles,
            map_zoom,
            capture_format,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<&str>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool_or(raw: Option<&str>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match raw.map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::Invalid { key, value: v }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
