//! Tauri Commands Module
//!
//! IPC commands exposed to the frontend, and the event bridge back to it.

use serde::Serialize;
use tauri::{command, AppHandle, Emitter, State};
use tracing::{debug, error, info};

use crate::auth::AuthChange;
use crate::events::{EventSink, ShellEvent};
use crate::route::{ViewId, DASHBOARD_PATH};
use crate::shell::{CapturePanel, LocationPanel, UserCard};
use crate::AppState;

/// Forwards shell events to every web view
pub struct TauriEvents {
    app: AppHandle,
}

impl TauriEvents {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl EventSink for TauriEvents {
    fn emit(&self, event: ShellEvent) {
        if let Err(e) = self.app.emit(event.name(), &event) {
            error!("Failed to emit {}: {}", event.name(), e);
        }
    }
}

// Response types for frontend

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    pub path: String,
    pub view: ViewId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResult {
    pub success: bool,
    pub user: Option<UserCard>,
    pub view: ViewId,
    pub error: Option<String>,
}

// Commands

/// Current session's user card, if signed in
#[command]
pub fn get_session(state: State<'_, AppState>) -> Option<UserCard> {
    debug!("Getting session");
    state.store.current().map(|session| UserCard::from(&session.user))
}

/// Sign in with email and password, then open the dashboard
#[command]
pub async fn sign_in(
    email: String,
    password: String,
    state: State<'_, AppState>,
) -> Result<SignInResult, String> {
    info!("Sign-in requested");

    match state.backend.sign_in_with_password(&email, &password).await {
        Ok(session) => {
            let user = UserCard::from(&session.user);
            state.store.apply(AuthChange::SignedIn(session));
            let view = state.shell.navigate(DASHBOARD_PATH);
            Ok(SignInResult {
                success: true,
                user: Some(user),
                view,
                error: None,
            })
        }
        Err(e) => {
            error!("Sign-in failed: {}", e);
            Ok(SignInResult {
                success: false,
                user: None,
                view: state.shell.current_view(),
                error: Some(e.to_string()),
            })
        }
    }
}

/// Logout and return to the login view
#[command]
pub async fn logout(state: State<'_, AppState>) -> Result<ViewId, String> {
    Ok(state.shell.logout().await)
}

/// Must run on the async runtime: rendering the dashboard starts the poller
#[command]
pub async fn navigate(path: String, state: State<'_, AppState>) -> Result<RouteResponse, String> {
    let view = state.shell.navigate(&path);
    Ok(RouteResponse { path, view })
}

#[command]
pub fn current_view(state: State<'_, AppState>) -> RouteResponse {
    RouteResponse {
        path: state.shell.current_path(),
        view: state.shell.current_view(),
    }
}

/// Re-fetch the user record for the header
#[command]
pub async fn user_card(state: State<'_, AppState>) -> Result<Option<UserCard>, String> {
    Ok(state.shell.refresh_user_card().await)
}

#[command]
pub fn location_panel(state: State<'_, AppState>) -> LocationPanel {
    state.shell.location_panel()
}

#[command]
pub fn toggle_capture(state: State<'_, AppState>) -> CapturePanel {
    state.shell.toggle_capture()
}

#[command]
pub fn capture_panel(state: State<'_, AppState>) -> CapturePanel {
    state.shell.capture_panel()
}

/// The web view could not open the camera it was asked for
#[command]
pub fn report_capture_error(reason: String, state: State<'_, AppState>) -> CapturePanel {
    state.shell.capture_failed(&reason)
}
