//! Events Module
//!
//! Notifications pushed from the Rust side to the web view.

use serde::Serialize;

use crate::route::ViewId;
use crate::shell::{CapturePanel, LocationPanel, UserCard};

/// Everything the front end is told about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShellEvent {
    SessionChanged { user: Option<UserCard> },
    ViewChanged { path: String, view: ViewId },
    LocationUpdate(LocationPanel),
    CaptureChanged(CapturePanel),
    CameraOpen { format: String, audio: bool },
    CameraRelease,
}

impl ShellEvent {
    /// Event channel name on the IPC bridge
    pub fn name(&self) -> &'static str {
        match self {
            ShellEvent::SessionChanged { .. } => "session_changed",
            ShellEvent::ViewChanged { .. } => "view_changed",
            ShellEvent::LocationUpdate(_) => "location_update",
            ShellEvent::CaptureChanged(_) => "capture_changed",
            ShellEvent::CameraOpen { .. } => "camera_open",
            ShellEvent::CameraRelease => "camera_release",
        }
    }
}

/// Destination for shell events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ShellEvent);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        events: Mutex<Vec<ShellEvent>>,
    }

    impl RecordingSink {
        pub(crate) fn events(&self) -> Vec<ShellEvent> {
            self.events.lock().unwrap().clone()
        }

        pub(crate) fn named(&self, name: &str) -> Vec<ShellEvent> {
            self.events()
                .into_iter()
                .filter(|event| event.name() == name)
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: ShellEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ShellEvent::ViewChanged {
            path: "/dashboard".into(),
            view: ViewId::Dashboard,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(event.name(), "view_changed");
        assert_eq!(
            json,
            serde_json::json!({ "type": "view_changed", "path": "/dashboard", "view": "dashboard" })
        );
    }
}
