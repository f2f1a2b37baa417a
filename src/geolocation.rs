//! Geolocation Module
//!
//! Resolves the device position through an HTTP geolocation service.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::location::{Coordinate, GeolocationProvider, LocationError, PositionOptions};

/// HTTP-backed position source
pub struct HttpGeolocation {
    endpoint: Option<String>,
    client: reqwest::Client,
    last_fix: Mutex<Option<(Instant, Coordinate)>>,
}

impl HttpGeolocation {
    /// `None` means the device has no geolocation capability.
    pub fn new(endpoint: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            endpoint,
            client,
            last_fix: Mutex::new(None),
        })
    }

    fn cached(&self, options: &PositionOptions) -> Option<Coordinate> {
        if options.maximum_age.is_zero() {
            return None;
        }
        let guard = self.last_fix.lock().ok()?;
        match *guard {
            Some((at, coord)) if at.elapsed() <= options.maximum_age => Some(coord),
            _ => None,
        }
    }
}

#[async_trait]
impl GeolocationProvider for HttpGeolocation {
    fn is_supported(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<Coordinate, LocationError> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(LocationError::Unsupported);
        };

        if let Some(coord) = self.cached(options) {
            debug!("Serving cached position");
            return Ok(coord);
        }

        debug!(high_accuracy = options.enable_high_accuracy, "Requesting position");
        let response = self
            .client
            .get(endpoint)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LocationError::PermissionDenied);
        }
        if !status.is_success() {
            debug!("Geolocation service answered {}", status);
            return Err(LocationError::Unavailable);
        }

        let body = response.text().await.map_err(classify_transport)?;
        let coord = parse_position(&body)?;

        if let Ok(mut guard) = self.last_fix.lock() {
            *guard = Some((Instant::now(), coord));
        }
        Ok(coord)
    }
}

fn classify_transport(err: reqwest::Error) -> LocationError {
    if err.is_timeout() {
        LocationError::Timeout
    } else {
        debug!("Geolocation request failed: {}", err);
        LocationError::Unavailable
    }
}

#[derive(Deserialize)]
struct PositionBody {
    #[serde(alias = "latitude")]
    lat: Option<f64>,
    #[serde(alias = "lon", alias = "longitude")]
    lng: Option<f64>,
}

/// Accepts `lat`/`lng`, `lat`/`lon` and `latitude`/`longitude` payloads.
fn parse_position(body: &str) -> Result<Coordinate, LocationError> {
    let parsed: PositionBody = serde_json::from_str(body).map_err(|_| LocationError::Unavailable)?;
    match (parsed.lat, parsed.lng) {
        (Some(lat), Some(lng))
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) =>
        {
            Ok(Coordinate { lat, lng })
        }
        _ => Err(LocationError::Unavailable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_payload_shapes() {
        let expected = Coordinate { lat: 37.77, lng: -122.41 };
        assert_eq!(
            parse_position(r#"{"lat":37.77,"lon":-122.41,"status":"success"}"#),
            Ok(expected)
        );
        assert_eq!(parse_position(r#"{"latitude":37.77,"longitude":-122.41}"#), Ok(expected));
        assert_eq!(parse_position(r#"{"lat":37.77,"lng":-122.41}"#), Ok(expected));
    }

    #[test]
    fn rejects_missing_or_out_of_range_values() {
        assert_eq!(parse_position(r#"{"status":"fail"}"#), Err(LocationError::Unavailable));
        assert_eq!(parse_position(r#"{"lat":123.0,"lon":0.0}"#), Err(LocationError::Unavailable));
        assert_eq!(parse_position("not json"), Err(LocationError::Unavailable));
    }

    #[test]
    fn no_endpoint_means_unsupported() {
        let provider = HttpGeolocation::new(None).unwrap();
        assert!(!provider.is_supported());
    }

    #[tokio::test]
    async fn cached_fix_served_within_maximum_age() {
        let provider = HttpGeolocation::new(Some("http://127.0.0.1:9/unused".into())).unwrap();
        let fix = Coordinate { lat: 1.0, lng: 2.0 };
        *provider.last_fix.lock().unwrap() = Some((Instant::now(), fix));

        let options = PositionOptions {
            maximum_age: std::time::Duration::from_secs(60),
            ..PositionOptions::default()
        };
        assert_eq!(provider.current_position(&options).await, Ok(fix));
    }
}
