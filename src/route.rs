//! Route Module
//!
//! Session-gated routing: which view a path renders, and the navigator that
//! re-runs that decision on navigation and on session changes.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::Session;

pub const HOME_PATH: &str = "/";
pub const DASHBOARD_PATH: &str = "/dashboard";
pub const PROFILE_PATH: &str = "/profile";

/// Screens the app can show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewId {
    Login,
    Dashboard,
    Profile,
}

/// Known paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Dashboard,
    Profile,
}

impl Route {
    /// Match a path, ignoring query, fragment and a trailing slash.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');
        match trimmed {
            "" => Some(Route::Home),
            DASHBOARD_PATH => Some(Route::Dashboard),
            PROFILE_PATH => Some(Route::Profile),
            _ => None,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Route::Home => HOME_PATH,
            Route::Dashboard => DASHBOARD_PATH,
            Route::Profile => PROFILE_PATH,
        }
    }

    /// View rendered when the route's requirements are met.
    fn target(self) -> ViewId {
        match self {
            Route::Home => ViewId::Login,
            Route::Dashboard => ViewId::Dashboard,
            Route::Profile => ViewId::Profile,
        }
    }

    pub fn is_protected(self) -> bool {
        !matches!(self, Route::Home)
    }
}

/// Decide which view `path` renders for the given session.
pub fn render(path: &str, session: Option<&Session>) -> ViewId {
    match Route::from_path(path) {
        Some(route) if route.is_protected() && session.is_none() => ViewId::Login,
        Some(route) => route.target(),
        None => ViewId::Login,
    }
}

/// A rendered view that differs from the previous one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewChange {
    pub path: String,
    pub from: ViewId,
    pub to: ViewId,
}

struct NavState {
    path: String,
    view: ViewId,
}

/// Current location plus the view it last rendered
pub struct Navigator {
    state: Mutex<NavState>,
}

impl Navigator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NavState {
                path: HOME_PATH.to_string(),
                view: ViewId::Login,
            }),
        }
    }

    /// Move to `path`; returns the change if the rendered view differs.
    pub fn navigate(&self, path: &str, session: Option<&Session>) -> Option<ViewChange> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        debug!("Navigating to {}", path);
        state.path = path.to_string();
        Self::rerender(&mut state, session)
    }

    /// Re-run the guard for the current path after a session change.
    pub fn reevaluate(&self, session: Option<&Session>) -> Option<ViewChange> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        Self::rerender(&mut state, session)
    }

    fn rerender(state: &mut NavState, session: Option<&Session>) -> Option<ViewChange> {
        let view = render(&state.path, session);
        if view == state.view {
            return None;
        }
        let change = ViewChange {
            path: state.path.clone(),
            from: state.view,
            to: view,
        };
        state.view = view;
        Some(change)
    }

    pub fn current_view(&self) -> ViewId {
        self.state.lock().map(|s| s.view).unwrap_or(ViewId::Login)
    }

    pub fn current_path(&self) -> String {
        self.state
            .lock()
            .map(|s| s.path.clone())
            .unwrap_or_else(|_| HOME_PATH.to_string())
    }
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::session;

    const PROTECTED: [(&str, ViewId); 2] =
        [(DASHBOARD_PATH, ViewId::Dashboard), (PROFILE_PATH, ViewId::Profile)];

    #[test]
    fn home_always_renders_login() {
        let s = session("u1");
        assert_eq!(render(HOME_PATH, None), ViewId::Login);
        assert_eq!(render(HOME_PATH, Some(&s)), ViewId::Login);
    }

    #[test]
    fn protected_paths_need_a_session() {
        let s = session("u1");
        for (path, view) in PROTECTED {
            assert_eq!(render(path, None), ViewId::Login, "{path} without session");
            assert_eq!(render(path, Some(&s)), view, "{path} with session");
        }
    }

    #[test]
    fn paths_are_normalized() {
        let s = session("u1");
        assert_eq!(render("/dashboard/", Some(&s)), ViewId::Dashboard);
        assert_eq!(render("/profile?tab=info", Some(&s)), ViewId::Profile);
        assert_eq!(render("/dashboard#map", Some(&s)), ViewId::Dashboard);
        assert_eq!(render("", Some(&s)), ViewId::Login);
    }

    #[test]
    fn unknown_paths_render_login() {
        let s = session("u1");
        assert_eq!(render("/settings", Some(&s)), ViewId::Login);
        assert_eq!(render("/dashboard/extra", Some(&s)), ViewId::Login);
    }

    #[test]
    fn navigator_reports_only_real_changes() {
        let nav = Navigator::new();
        let s = session("u1");

        assert_eq!(nav.navigate(HOME_PATH, Some(&s)), None);
        let change = nav.navigate(DASHBOARD_PATH, Some(&s)).unwrap();
        assert_eq!((change.from, change.to), (ViewId::Login, ViewId::Dashboard));
        assert_eq!(nav.navigate("/dashboard/", Some(&s)), None);
        assert_eq!(nav.current_path(), "/dashboard/");
    }

    #[test]
    fn session_loss_on_protected_path_swaps_to_login() {
        let nav = Navigator::new();
        let s = session("u1");
        nav.navigate(PROFILE_PATH, Some(&s));

        let change = nav.reevaluate(None).unwrap();
        assert_eq!(change.to, ViewId::Login);
        assert_eq!(change.path, PROFILE_PATH);
        assert_eq!(nav.current_view(), ViewId::Login);

        // Signing back in restores the view without navigating.
        let change = nav.reevaluate(Some(&s)).unwrap();
        assert_eq!(change.to, ViewId::Profile);
    }
}
