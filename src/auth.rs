//! Authentication Module
//!
//! Session model, the auth backend port, and the session store that fans
//! auth transitions out to the rest of the app.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Signed-in user as reported by the auth provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// Full name when the provider has one, otherwise the email.
    pub fn display_name(&self) -> String {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.email.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

/// Session data issued by the auth provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: UserProfile,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl Session {
    /// Check if the session is expired
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now() >= self.expires_at
    }
}

/// One auth state transition
#[derive(Debug, Clone, PartialEq)]
pub enum AuthChange {
    SignedIn(Session),
    TokenRefreshed(Session),
    UserUpdated(Session),
    SignedOut,
}

impl AuthChange {
    pub fn into_session(self) -> Option<Session> {
        match self {
            AuthChange::SignedIn(session)
            | AuthChange::TokenRefreshed(session)
            | AuthChange::UserUpdated(session) => Some(session),
            AuthChange::SignedOut => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AuthChange::SignedIn(_) => "signed_in",
            AuthChange::TokenRefreshed(_) => "token_refreshed",
            AuthChange::UserUpdated(_) => "user_updated",
            AuthChange::SignedOut => "signed_out",
        }
    }
}

/// Hosted auth provider
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// One-shot query for the current session.
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Fresh user record for the given access token.
    async fn get_user(&self, access_token: &str) -> Result<UserProfile, AuthError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Stream of transitions from the moment of the call onward.
    fn auth_changes(&self) -> broadcast::Receiver<AuthChange>;
}

/// Auth errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Not signed in")]
    NotSignedIn,
}

type SessionListener = Arc<dyn Fn(Option<&Session>) + Send + Sync>;

struct StoreInner {
    session: Option<Session>,
    listeners: BTreeMap<u64, SessionListener>,
    next_id: u64,
}

/// Owner of the current session
///
/// Listeners are invoked synchronously, in registration order, once per
/// actual change. A listener must not apply changes to the store it is
/// registered on.
pub struct SessionStore {
    inner: Arc<Mutex<StoreInner>>,
    delivery: Mutex<()>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                session: None,
                listeners: BTreeMap::new(),
                next_id: 0,
            })),
            delivery: Mutex::new(()),
        }
    }

    /// Current session, if any
    pub fn current(&self) -> Option<Session> {
        self.inner.lock().ok().and_then(|inner| inner.session.clone())
    }

    /// Run `f` against the current session with delivery held, so no
    /// transition can land between the read and whatever `f` commits.
    /// `f` must not call back into [`SessionStore::replace`].
    pub fn with_current<R>(&self, f: impl FnOnce(Option<&Session>) -> R) -> R {
        let _delivery = self.delivery.lock();
        let session = self.current();
        f(session.as_ref())
    }

    pub fn is_signed_in(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.session.is_some())
            .unwrap_or(false)
    }

    /// Register a listener; it stays active until the returned handle is
    /// disposed or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Option<&Session>) + Send + Sync + 'static,
    {
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.listeners.insert(id, Arc::new(listener));
                id
            }
            Err(_) => u64::MAX,
        };
        debug!("Session listener {} registered", id);

        Subscription {
            id,
            inner: Some(Arc::downgrade(&self.inner)),
        }
    }

    /// Apply one auth transition.
    pub fn apply(&self, change: AuthChange) -> bool {
        info!("Auth transition: {}", change.label());
        self.replace(change.into_session())
    }

    /// Replace the session and notify listeners. Returns whether anything changed.
    pub fn replace(&self, session: Option<Session>) -> bool {
        let _delivery = self.delivery.lock();

        let (snapshot, ids) = {
            let Ok(mut inner) = self.inner.lock() else {
                return false;
            };
            if inner.session == session {
                return false;
            }
            inner.session = session;
            let ids: Vec<u64> = inner.listeners.keys().copied().collect();
            (inner.session.clone(), ids)
        };

        for id in ids {
            // Re-check so a listener disposed mid-delivery is skipped.
            let listener = self
                .inner
                .lock()
                .ok()
                .and_then(|inner| inner.listeners.get(&id).cloned());
            if let Some(listener) = listener {
                listener(snapshot.as_ref());
            }
        }
        true
    }

    /// End the session with the backend, then clear it locally.
    ///
    /// The local clear happens even if the backend call fails.
    pub async fn sign_out(&self, backend: &dyn AuthBackend) {
        if let Err(e) = backend.sign_out().await {
            warn!("Backend sign-out failed: {}", e);
        }
        self.apply(AuthChange::SignedOut);
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.listeners.len()).unwrap_or(0)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer for a [`SessionStore`] listener
pub struct Subscription {
    id: u64,
    inner: Option<Weak<Mutex<StoreInner>>>,
}

impl Subscription {
    /// Deregister the listener. Idempotent.
    pub fn dispose(&mut self) {
        let Some(weak) = self.inner.take() else {
            return;
        };
        if let Some(inner) = weak.upgrade() {
            if let Ok(mut inner) = inner.lock() {
                inner.listeners.remove(&self.id);
            }
            debug!("Session listener {} disposed", self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Disposer for the backend-to-store forwarding task
pub struct SyncHandle {
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Auth sync stopped");
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Load the initial session and keep the store in step with the backend.
///
/// The backend stream is opened before the initial query, so transitions
/// that land while the query is in flight are applied right after it.
/// A failed query leaves the session absent.
pub async fn sync_with_backend(
    store: Arc<SessionStore>,
    backend: Arc<dyn AuthBackend>,
) -> SyncHandle {
    let mut changes = backend.auth_changes();

    let initial = match backend.get_session().await {
        Ok(session) => session,
        Err(e) => {
            warn!("Initial session query failed, treating as signed out: {}", e);
            None
        }
    };
    info!("Initial session: {}", if initial.is_some() { "present" } else { "absent" });
    store.replace(initial);

    let task = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    store.apply(change);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {} auth transitions, re-reading session", missed);
                    let session = backend.get_session().await.unwrap_or_else(|e| {
                        warn!("Session re-read failed: {}", e);
                        None
                    });
                    store.replace(session);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Auth change stream closed");
                    break;
                }
            }
        }
    });

    SyncHandle { task: Some(task) }
}
