//! Camera Module
//!
//! Camera port for the capture panel. Frames never leave the web view and
//! snapshots are not persisted; the Rust side only owns the device handle.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::{EventSink, ShellEvent};

/// Still-image encoding requested from the capture widget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl CaptureFormat {
    pub fn mime(self) -> &'static str {
        match self {
            CaptureFormat::Jpeg => "image/jpeg",
            CaptureFormat::Png => "image/png",
            CaptureFormat::Webp => "image/webp",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(CaptureFormat::Jpeg),
            "image/png" => Some(CaptureFormat::Png),
            "image/webp" => Some(CaptureFormat::Webp),
            _ => None,
        }
    }
}

/// Settings for one capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub format: CaptureFormat,
    pub audio: bool,
}

/// A camera that can be acquired for the capture panel
pub trait CameraDevice: Send + Sync {
    fn acquire(&self, settings: CaptureSettings) -> Result<Box<dyn CameraStream>, CaptureError>;
}

/// An acquired camera; consuming `release` hands the device back.
pub trait CameraStream: Send {
    fn release(self: Box<Self>);
}

/// Camera errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera access denied")]
    PermissionDenied,

    #[error("No camera found")]
    NoDevice,

    #[error("Camera unavailable: {0}")]
    Unavailable(String),
}

/// Camera owned by the web view; acquisition and release are requests the
/// front end carries out with the platform media APIs.
pub struct WebviewCamera {
    events: Arc<dyn EventSink>,
}

impl WebviewCamera {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }
}

impl CameraDevice for WebviewCamera {
    fn acquire(&self, settings: CaptureSettings) -> Result<Box<dyn CameraStream>, CaptureError> {
        info!("Requesting camera ({})", settings.format.mime());
        self.events.emit(ShellEvent::CameraOpen {
            format: settings.format.mime().to_string(),
            audio: settings.audio,
        });
        Ok(Box::new(WebviewStream {
            events: Arc::clone(&self.events),
        }))
    }
}

struct WebviewStream {
    events: Arc<dyn EventSink>,
}

impl CameraStream for WebviewStream {
    fn release(self: Box<Self>) {
        debug!("Releasing camera");
        self.events.emit(ShellEvent::CameraRelease);
    }
}
