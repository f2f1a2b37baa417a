//! Location Module
//!
//! Coordinate model, the geolocation port, and the fixed-cadence poller that
//! feeds the dashboard map.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Latitude/longitude in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

/// Why a position could not be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum LocationError {
    #[error("Location access denied")]
    PermissionDenied,

    #[error("Location unavailable")]
    Unavailable,

    #[error("Location request timed out")]
    Timeout,

    #[error("Geolocation is not supported on this device")]
    Unsupported,
}

/// Options for a single position request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    /// Upper bound on a single request.
    pub timeout: Duration,
    /// Oldest cached fix a provider may answer with.
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::ZERO,
        }
    }
}

/// Platform capability that resolves the device position once
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    /// Whether the device can provide a position at all.
    fn is_supported(&self) -> bool;

    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<Coordinate, LocationError>;
}

/// What the dashboard shows right now
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationReading {
    Fix(Coordinate),
    Failed(LocationError),
}

/// Latest poll outcome plus the last good fix
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationState {
    /// Last successful fix; kept after a failure so the map can stay up.
    pub coordinate: Option<Coordinate>,
    pub error: Option<LocationError>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl LocationState {
    /// Fold one request outcome into the state.
    pub fn record(&mut self, result: Result<Coordinate, LocationError>) {
        match result {
            Ok(coord) => {
                self.coordinate = Some(coord);
                self.error = None;
            }
            Err(err) => self.error = Some(err),
        }
        self.updated_at = Some(chrono::Utc::now());
    }

    /// Exactly one of error or fix, error first.
    pub fn current(&self) -> Option<LocationReading> {
        match (self.error, self.coordinate) {
            (Some(err), _) => Some(LocationReading::Failed(err)),
            (None, Some(coord)) => Some(LocationReading::Fix(coord)),
            (None, None) => None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.map(|err| err.to_string())
    }
}

/// Callback invoked after every recorded outcome
pub type LocationListener = Arc<dyn Fn(&LocationState) + Send + Sync>;

/// Polls a [`GeolocationProvider`] on a fixed period
pub struct LocationPoller {
    provider: Arc<dyn GeolocationProvider>,
    options: PositionOptions,
    period: Duration,
}

impl LocationPoller {
    pub fn new(
        provider: Arc<dyn GeolocationProvider>,
        options: PositionOptions,
        period: Duration,
    ) -> Self {
        Self {
            provider,
            options,
            period,
        }
    }

    /// Start polling. The first request is issued immediately.
    ///
    /// Must be called from within a Tokio runtime. The listener runs while the
    /// poller's state is locked, so it must not call back into the handle.
    pub fn start(&self, listener: LocationListener) -> PollerHandle {
        let shared = Arc::new(Mutex::new(PollShared {
            state: LocationState::default(),
            stopped: false,
            in_flight: Vec::new(),
            listener,
        }));

        if !self.provider.is_supported() {
            warn!("Geolocation unsupported, poller not started");
            deliver(&shared, Err(LocationError::Unsupported));
            if let Ok(mut guard) = shared.lock() {
                guard.stopped = true;
            }
            return PollerHandle { shared, ticker: None };
        }

        info!("Starting location poller every {:?}", self.period);

        let provider = Arc::clone(&self.provider);
        let options = self.options;
        let period = self.period;
        let loop_shared = Arc::clone(&shared);

        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                debug!("Location tick");

                let provider = Arc::clone(&provider);
                let request_shared = Arc::clone(&loop_shared);
                // Requests are not awaited here; a slow one can overlap the next tick.
                let request = tokio::spawn(async move {
                    let lookup = provider.current_position(&options);
                    let result = match tokio::time::timeout(options.timeout, lookup).await {
                        Ok(result) => result,
                        Err(_) => Err(LocationError::Timeout),
                    };
                    deliver(&request_shared, result);
                });

                let Ok(mut guard) = loop_shared.lock() else {
                    break;
                };
                if guard.stopped {
                    request.abort();
                    break;
                }
                guard.in_flight.retain(|handle| !handle.is_finished());
                guard.in_flight.push(request.abort_handle());
            }
        });

        PollerHandle {
            shared,
            ticker: Some(ticker),
        }
    }
}

struct PollShared {
    state: LocationState,
    stopped: bool,
    in_flight: Vec<AbortHandle>,
    listener: LocationListener,
}

fn deliver(shared: &Mutex<PollShared>, result: Result<Coordinate, LocationError>) {
    let Ok(mut guard) = shared.lock() else {
        return;
    };
    if guard.stopped {
        return;
    }

    match &result {
        Ok(coord) => debug!("Location fix: {:.5}, {:.5}", coord.lat, coord.lng),
        Err(err) => warn!("Location read failed: {}", err),
    }

    guard.state.record(result);
    (guard.listener)(&guard.state);
}

/// Disposer for a running poller; stops on drop
pub struct PollerHandle {
    shared: Arc<Mutex<PollShared>>,
    ticker: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Cancel the timer and any in-flight request. Idempotent.
    ///
    /// Once this returns, the listener is never invoked again.
    pub fn stop(&mut self) {
        if let Ok(mut guard) = self.shared.lock() {
            if !guard.stopped {
                guard.stopped = true;
                for request in guard.in_flight.drain(..) {
                    request.abort();
                }
                info!("Location poller stopped");
            }
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().map(|guard| !guard.stopped).unwrap_or(false)
    }

    /// Snapshot of the latest state.
    pub fn state(&self) -> LocationState {
        self.shared
            .lock()
            .map(|guard| guard.state.clone())
            .unwrap_or_default()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
