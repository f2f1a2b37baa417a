//! Logging Module
//!
//! Structured logging to a daily-rotated file, plus the console in debug builds.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::storage::app_data_dir;

const LOG_FILE_PREFIX: &str = "geotrack.log";

#[cfg(debug_assertions)]
const DEFAULT_FILTER: &str = "debug,hyper=warn,reqwest=warn,tao=warn,wry=warn";
#[cfg(not(debug_assertions))]
const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn,tao=warn,wry=warn";

/// Install the global subscriber. Keep the returned guard alive for the life
/// of the process so buffered lines are flushed on exit.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = log_directory();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Cannot create log directory {:?}: {}", log_dir, e);
    }

    let (file_writer, guard) = tracing_appender::non_blocking(RollingFileAppender::new(
        Rotation::DAILY,
        &log_dir,
        LOG_FILE_PREFIX,
    ));

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer);

    #[cfg(debug_assertions)]
    let console_layer = Some(fmt::layer().with_target(true).pretty());
    #[cfg(not(debug_assertions))]
    let console_layer: Option<fmt::Layer<_>> = None;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .is_ok();

    installed.then_some(guard)
}

/// Directory holding the rotated log files
pub fn log_directory() -> PathBuf {
    app_data_dir().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_live_under_app_data() {
        let dir = log_directory();
        assert!(dir.ends_with(PathBuf::from("GeoTrack").join("logs")));
    }
}
