//! GeoTrack Desktop Library
//!
//! Session-gated dashboard that tracks the device location on a map and
//! offers a camera panel. The web view renders; everything else lives here.

pub mod auth;
pub mod camera;
pub mod client;
pub mod config;
pub mod events;
pub mod geolocation;
pub mod location;
pub mod logging;
pub mod map;
pub mod route;
pub mod shell;
pub mod storage;

#[cfg(feature = "desktop")]
pub mod commands;

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::info;

use auth::{sync_with_backend, AuthBackend, SessionStore, SyncHandle};
use camera::WebviewCamera;
use client::AuthClient;
use config::AppConfig;
use events::EventSink;
use geolocation::HttpGeolocation;
use shell::{ShellDeps, ShellSettings, ViewShell};
use storage::SessionVault;

/// Application state shared across commands
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<SessionStore>,
    pub backend: Arc<dyn AuthBackend>,
    pub shell: Arc<ViewShell>,
    sync: Mutex<Option<SyncHandle>>,
}

impl AppState {
    /// Wire the production collaborators.
    pub fn new(config: AppConfig, events: Arc<dyn EventSink>) -> anyhow::Result<Self> {
        let backend: Arc<dyn AuthBackend> = Arc::new(
            AuthClient::new(&config.auth_url, &config.auth_api_key, SessionVault::in_app_data())
                .context("building auth client")?,
        );
        let geolocation = Arc::new(
            HttpGeolocation::new(config.geolocation_url.clone())
                .context("building geolocation client")?,
        );
        let camera = Arc::new(WebviewCamera::new(Arc::clone(&events)));

        Ok(Self::with_deps(
            config,
            ShellDeps {
                store: Arc::new(SessionStore::new()),
                backend,
                geolocation,
                camera,
                events,
            },
        ))
    }

    /// Assemble around explicitly provided collaborators.
    pub fn with_deps(config: AppConfig, deps: ShellDeps) -> Self {
        let shell = ViewShell::new(deps.clone(), ShellSettings::from(&config));
        Self {
            config,
            store: deps.store,
            backend: deps.backend,
            shell,
            sync: Mutex::new(None),
        }
    }

    /// Load the session, start following auth changes, then mount the shell.
    pub async fn start(&self, initial_path: &str) {
        let handle = sync_with_backend(Arc::clone(&self.store), Arc::clone(&self.backend)).await;
        if let Ok(mut sync) = self.sync.lock() {
            *sync = Some(handle);
        }
        self.shell.mount(initial_path).await;
        info!("Application started at {}", initial_path);
    }

    /// Release every timer, subscription and device. Idempotent.
    pub fn shutdown(&self) {
        self.shell.unmount();
        let handle = self.sync.lock().ok().and_then(|mut sync| sync.take());
        if let Some(mut handle) = handle {
            handle.dispose();
        }
        info!("Application shut down");
    }
}
