//! View Shell Module
//!
//! Composes routing, the session display, the location panel and the camera
//! toggle. Dashboard resources (poller, camera) live exactly as long as the
//! dashboard view is rendered and the shell is mounted.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::{AuthBackend, Session, SessionStore, Subscription, UserProfile};
use crate::camera::{CameraDevice, CameraStream, CaptureFormat, CaptureSettings};
use crate::config::AppConfig;
use crate::events::{EventSink, ShellEvent};
use crate::location::{
    GeolocationProvider, LocationPoller, LocationState, PollerHandle, PositionOptions,
};
use crate::map::{MapView, TileLayer};
use crate::route::{Navigator, ViewChange, ViewId, HOME_PATH};

const LOADING_LOCATION: &str = "Loading location...";

/// Name and avatar shown in the header
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCard {
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

impl From<&UserProfile> for UserCard {
    fn from(user: &UserProfile) -> Self {
        Self {
            display_name: user.display_name(),
            avatar_url: user.avatar_url.clone(),
            email: user.email.clone(),
        }
    }
}

/// Location section of the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPanel {
    pub error: Option<String>,
    pub map: Option<MapView>,
    /// Shown while no fix has arrived yet.
    pub placeholder: Option<String>,
}

impl LocationPanel {
    fn from_state(state: &LocationState, zoom: u8, tiles: &TileLayer) -> Self {
        let map = state.coordinate.map(|coord| MapView::centered_on(coord, zoom, tiles));
        Self {
            error: state.error_message(),
            placeholder: map.is_none().then(|| LOADING_LOCATION.to_string()),
            map,
        }
    }
}

/// Capture section of the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePanel {
    pub enabled: bool,
    pub toggle_label: String,
    pub format: String,
    pub error: Option<String>,
}

/// Collaborators injected into the shell
#[derive(Clone)]
pub struct ShellDeps {
    pub store: Arc<SessionStore>,
    pub backend: Arc<dyn AuthBackend>,
    pub geolocation: Arc<dyn GeolocationProvider>,
    pub camera: Arc<dyn CameraDevice>,
    pub events: Arc<dyn EventSink>,
}

/// Tunables for the dashboard
#[derive(Debug, Clone)]
pub struct ShellSettings {
    pub poll_interval: Duration,
    pub position: PositionOptions,
    pub tiles: TileLayer,
    pub map_zoom: u8,
    pub capture_format: CaptureFormat,
}

impl From<&AppConfig> for ShellSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            position: config.position,
            tiles: config.tiles.clone(),
            map_zoom: config.map_zoom,
            capture_format: config.capture_format,
        }
    }
}

#[derive(Default)]
struct Dashboard {
    poller: Option<PollerHandle>,
    camera: Option<Box<dyn CameraStream>>,
    capture_error: Option<String>,
}

#[derive(Default)]
struct Lifecycle {
    mounted: bool,
    session_sub: Option<Subscription>,
}

/// The app's single screen
pub struct ViewShell {
    deps: ShellDeps,
    settings: ShellSettings,
    navigator: Navigator,
    lifecycle: Mutex<Lifecycle>,
    dashboard: Mutex<Dashboard>,
    user: Mutex<Option<UserCard>>,
    weak_self: Weak<ViewShell>,
}

impl ViewShell {
    pub fn new(deps: ShellDeps, settings: ShellSettings) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            deps,
            settings,
            navigator: Navigator::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
            dashboard: Mutex::new(Dashboard::default()),
            user: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    /// Mount at `path`: follow session changes, load the user card, and
    /// render the first view. Must run inside a Tokio runtime.
    pub async fn mount(&self, path: &str) {
        {
            let Ok(mut lifecycle) = self.lifecycle.lock() else {
                return;
            };
            if lifecycle.mounted {
                debug!("Shell already mounted");
                return;
            }
            lifecycle.mounted = true;
        }
        info!("Mounting shell at {}", path);

        // Subscribe before the card fetch so transitions during it are seen.
        let weak = self.weak_self.clone();
        let subscription = self.deps.store.subscribe(move |session: Option<&Session>| {
            if let Some(shell) = weak.upgrade() {
                shell.on_session_changed(session);
            }
        });
        match self.lifecycle.lock() {
            Ok(mut lifecycle) if lifecycle.mounted => lifecycle.session_sub = Some(subscription),
            _ => return,
        }

        self.refresh_user_card().await;

        if self.is_mounted() {
            self.navigate(path);
        }
    }

    /// Tear down: drop the session subscription, stop polling and release the
    /// camera. Idempotent; also runs on drop.
    pub fn unmount(&self) {
        let subscription = match self.lifecycle.lock() {
            Ok(mut lifecycle) => {
                if !lifecycle.mounted {
                    return;
                }
                lifecycle.mounted = false;
                lifecycle.session_sub.take()
            }
            Err(_) => None,
        };
        if let Some(mut subscription) = subscription {
            subscription.dispose();
        }

        self.deactivate_dashboard();
        info!("Shell unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.lifecycle.lock().map(|l| l.mounted).unwrap_or(false)
    }

    /// Navigate to `path` and return the view that now renders.
    pub fn navigate(&self, path: &str) -> ViewId {
        // Guard and side effects commit with delivery held, so a concurrent
        // sign-out is ordered entirely before or after this navigation.
        self.deps.store.with_current(|session| {
            if let Some(change) = self.navigator.navigate(path, session) {
                self.apply_view_change(change);
            }
        });
        self.navigator.current_view()
    }

    pub fn current_view(&self) -> ViewId {
        self.navigator.current_view()
    }

    pub fn current_path(&self) -> String {
        self.navigator.current_path()
    }

    /// Sign out, then return to the login view.
    ///
    /// The store is cleared before navigating even if the backend call
    /// fails, so nothing renders with the old session.
    pub async fn logout(&self) -> ViewId {
        info!("Logging out");
        self.deps.store.sign_out(self.deps.backend.as_ref()).await;
        self.navigate(HOME_PATH)
    }

    pub fn user_card(&self) -> Option<UserCard> {
        self.user.lock().ok().and_then(|user| user.clone())
    }

    /// Fetch the user record for display, falling back to the session's copy.
    ///
    /// Returns `None` without touching the header if the session changed
    /// to another user (or none) while the fetch was in flight.
    pub async fn refresh_user_card(&self) -> Option<UserCard> {
        let session = self.deps.store.current()?;

        let card = match self.deps.backend.get_user(&session.access_token).await {
            Ok(user) => UserCard::from(&user),
            Err(e) => {
                warn!("User lookup failed, using session copy: {}", e);
                UserCard::from(&session.user)
            }
        };

        self.deps.store.with_current(|current| {
            if current.map(|s| s.user.user_id.as_str()) != Some(session.user.user_id.as_str()) {
                debug!("Session changed during user lookup, dropping card");
                return None;
            }
            if let Ok(mut user) = self.user.lock() {
                *user = Some(card.clone());
            }
            Some(card)
        })
    }

    pub fn location_panel(&self) -> LocationPanel {
        let state = self
            .dashboard
            .lock()
            .ok()
            .and_then(|dashboard| dashboard.poller.as_ref().map(PollerHandle::state))
            .unwrap_or_default();
        LocationPanel::from_state(&state, self.settings.map_zoom, &self.settings.tiles)
    }

    pub fn capture_panel(&self) -> CapturePanel {
        let (enabled, error) = self
            .dashboard
            .lock()
            .map(|dashboard| (dashboard.camera.is_some(), dashboard.capture_error.clone()))
            .unwrap_or((false, None));
        self.build_capture_panel(enabled, error)
    }

    /// Flip the camera panel. Only meaningful on the dashboard.
    pub fn toggle_capture(&self) -> CapturePanel {
        if self.current_view() != ViewId::Dashboard {
            debug!("Capture toggle ignored outside the dashboard");
            return self.capture_panel();
        }

        let Ok(mut dashboard) = self.dashboard.lock() else {
            return self.build_capture_panel(false, None);
        };

        match dashboard.camera.take() {
            Some(stream) => {
                info!("Disabling camera");
                stream.release();
                dashboard.capture_error = None;
            }
            None => {
                let settings = CaptureSettings {
                    format: self.settings.capture_format,
                    audio: false,
                };
                match self.deps.camera.acquire(settings) {
                    Ok(stream) => {
                        info!("Camera enabled");
                        dashboard.camera = Some(stream);
                        dashboard.capture_error = None;
                    }
                    Err(e) => {
                        warn!("Camera unavailable: {}", e);
                        dashboard.capture_error = Some(e.to_string());
                    }
                }
            }
        }

        let panel =
            self.build_capture_panel(dashboard.camera.is_some(), dashboard.capture_error.clone());
        drop(dashboard);
        self.deps.events.emit(ShellEvent::CaptureChanged(panel.clone()));
        panel
    }

    /// Front end reports the camera failed after it was requested.
    pub fn capture_failed(&self, reason: &str) -> CapturePanel {
        let panel = match self.dashboard.lock() {
            Ok(mut dashboard) => {
                if let Some(stream) = dashboard.camera.take() {
                    stream.release();
                }
                dashboard.capture_error = Some(format!("Camera unavailable: {}", reason));
                self.build_capture_panel(false, dashboard.capture_error.clone())
            }
            Err(_) => self.build_capture_panel(false, None),
        };
        self.deps.events.emit(ShellEvent::CaptureChanged(panel.clone()));
        panel
    }

    fn build_capture_panel(&self, enabled: bool, error: Option<String>) -> CapturePanel {
        CapturePanel {
            enabled,
            toggle_label: if enabled { "Disable Camera" } else { "Enable Camera" }.to_string(),
            format: self.settings.capture_format.mime().to_string(),
            error,
        }
    }

    fn on_session_changed(&self, session: Option<&Session>) {
        let card = session.map(|s| UserCard::from(&s.user));
        if let Ok(mut user) = self.user.lock() {
            *user = card.clone();
        }
        self.deps.events.emit(ShellEvent::SessionChanged { user: card });

        if let Some(change) = self.navigator.reevaluate(session) {
            self.apply_view_change(change);
        }
    }

    fn apply_view_change(&self, change: ViewChange) {
        info!("View {:?} -> {:?} at {}", change.from, change.to, change.path);

        if change.from == ViewId::Dashboard {
            self.deactivate_dashboard();
        }
        if change.to == ViewId::Dashboard && self.is_mounted() {
            self.activate_dashboard();
        }

        self.deps.events.emit(ShellEvent::ViewChanged {
            path: change.path,
            view: change.to,
        });
    }

    fn activate_dashboard(&self) {
        let Ok(mut dashboard) = self.dashboard.lock() else {
            return;
        };
        if dashboard.poller.is_some() {
            return;
        }

        let events = Arc::clone(&self.deps.events);
        let zoom = self.settings.map_zoom;
        let tiles = self.settings.tiles.clone();
        let poller = LocationPoller::new(
            Arc::clone(&self.deps.geolocation),
            self.settings.position,
            self.settings.poll_interval,
        );
        dashboard.poller = Some(poller.start(Arc::new(move |state: &LocationState| {
            events.emit(ShellEvent::LocationUpdate(LocationPanel::from_state(state, zoom, &tiles)));
        })));
    }

    fn deactivate_dashboard(&self) {
        let (poller, camera) = match self.dashboard.lock() {
            Ok(mut dashboard) => {
                dashboard.capture_error = None;
                (dashboard.poller.take(), dashboard.camera.take())
            }
            Err(_) => return,
        };

        if let Some(mut poller) = poller {
            poller.stop();
        }
        if let Some(stream) = camera {
            info!("Releasing camera on teardown");
            stream.release();
        }
    }
}

impl Drop for ViewShell {
    fn drop(&mut self) {
        self.unmount();
    }
}
