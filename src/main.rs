//! GeoTrack Desktop - Main Entry Point
//!
//! Desktop shell for the live location dashboard.

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::sync::Arc;

use anyhow::Context;
use tauri::Manager;
use tracing::{error, info};

use geotrack_lib::{commands, config::AppConfig, logging, route::DASHBOARD_PATH, AppState};

fn main() -> anyhow::Result<()> {
    let _log_guard = logging::init();
    info!("GeoTrack Desktop starting...");

    let config = AppConfig::from_env().context("loading configuration")?;

    tauri::Builder::default()
        .setup(move |app| {
            let events = Arc::new(commands::TauriEvents::new(app.handle().clone()));
            let state = AppState::new(config, events)?;
            app.manage(state);

            let handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                let state = handle.state::<AppState>();
                state.start(DASHBOARD_PATH).await;
            });

            info!("Application setup complete");
            Ok(())
        })
        .on_window_event(|window, event| {
            if let tauri::WindowEvent::Destroyed = event {
                if let Some(state) = window.app_handle().try_state::<AppState>() {
                    state.shutdown();
                }
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::get_session,
            commands::sign_in,
            commands::logout,
            commands::navigate,
            commands::current_view,
            commands::user_card,
            commands::location_panel,
            commands::toggle_capture,
            commands::capture_panel,
            commands::report_capture_error,
        ])
        .run(tauri::generate_context!())
        .map_err(|e| {
            error!("Tauri runtime failed: {}", e);
            anyhow::anyhow!(e)
        })
}
