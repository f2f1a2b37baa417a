// End-to-end flows through AppState with in-memory collaborators.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use geotrack_lib::auth::{AuthBackend, AuthChange, AuthError, Session, SessionStore, UserProfile};
use geotrack_lib::camera::{CameraDevice, CameraStream, CaptureError, CaptureSettings};
use geotrack_lib::config::AppConfig;
use geotrack_lib::events::{EventSink, ShellEvent};
use geotrack_lib::location::{Coordinate, GeolocationProvider, LocationError, PositionOptions};
use geotrack_lib::route::{ViewId, DASHBOARD_PATH, HOME_PATH};
use geotrack_lib::shell::ShellDeps;
use geotrack_lib::AppState;

fn session() -> Session {
    Session {
        access_token: "token".into(),
        refresh_token: None,
        user: UserProfile {
            user_id: "u1".into(),
            email: Some("ada@example.com".into()),
            full_name: None,
            avatar_url: None,
        },
        expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
    }
}

struct MemoryBackend {
    session: Mutex<Option<Session>>,
    changes: broadcast::Sender<AuthChange>,
    query_delay: Duration,
}

impl MemoryBackend {
    fn new(session: Option<Session>, query_delay: Duration) -> Self {
        let (changes, _) = broadcast::channel(8);
        Self {
            session: Mutex::new(session),
            changes,
            query_delay,
        }
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        tokio::time::sleep(self.query_delay).await;
        Ok(self.session.lock().unwrap().clone())
    }

    async fn get_user(&self, _access_token: &str) -> Result<UserProfile, AuthError> {
        Err(AuthError::Network("offline".into()))
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Session, AuthError> {
        Err(AuthError::InvalidCredentials)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.session.lock().unwrap() = None;
        let _ = self.changes.send(AuthChange::SignedOut);
        Ok(())
    }

    fn auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }
}

struct FixedProvider(Result<Coordinate, LocationError>);

#[async_trait]
impl GeolocationProvider for FixedProvider {
    fn is_supported(&self) -> bool {
        true
    }

    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Coordinate, LocationError> {
        self.0
    }
}

#[derive(Default)]
struct Camera {
    released: Arc<Mutex<u32>>,
}

struct Stream(Arc<Mutex<u32>>);

impl CameraStream for Stream {
    fn release(self: Box<Self>) {
        *self.0.lock().unwrap() += 1;
    }
}

impl CameraDevice for Camera {
    fn acquire(&self, _settings: CaptureSettings) -> Result<Box<dyn CameraStream>, CaptureError> {
        Ok(Box::new(Stream(Arc::clone(&self.released))))
    }
}

#[derive(Default)]
struct Events(Mutex<Vec<ShellEvent>>);

impl EventSink for Events {
    fn emit(&self, event: ShellEvent) {
        self.0.lock().unwrap().push(event);
    }
}

fn config() -> AppConfig {
    let vars: HashMap<String, String> = [(
        "GEOTRACK_AUTH_URL".to_string(),
        "https://auth.example.com".to_string(),
    )]
    .into_iter()
    .collect();
    AppConfig::from_vars(&vars).unwrap()
}

fn app(backend: Arc<MemoryBackend>, camera: Arc<Camera>, events: Arc<Events>) -> AppState {
    AppState::with_deps(
        config(),
        ShellDeps {
            store: Arc::new(SessionStore::new()),
            backend,
            geolocation: Arc::new(FixedProvider(Ok(Coordinate { lat: 37.77, lng: -122.41 }))),
            camera,
            events,
        },
    )
}

#[tokio::test(start_paused = true)]
async fn restored_session_reaches_dashboard_and_logout_returns_to_login() {
    let backend = Arc::new(MemoryBackend::new(Some(session()), Duration::ZERO));
    let camera = Arc::new(Camera::default());
    let events = Arc::new(Events::default());
    let app = app(backend, Arc::clone(&camera), Arc::clone(&events));

    app.start(DASHBOARD_PATH).await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(app.shell.current_view(), ViewId::Dashboard);
    assert_eq!(app.shell.user_card().unwrap().display_name, "ada@example.com");
    assert!(app.shell.location_panel().map.is_some());

    app.shell.toggle_capture();
    assert_eq!(app.shell.logout().await, ViewId::Login);
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(app.store.current().is_none());
    assert_eq!(*camera.released.lock().unwrap(), 1);
    assert_eq!(app.shell.current_path(), HOME_PATH);
}

#[tokio::test(start_paused = true)]
async fn sign_out_during_startup_query_is_honoured() {
    let backend = Arc::new(MemoryBackend::new(Some(session()), Duration::from_secs(1)));
    let events = Arc::new(Events::default());
    let app = Arc::new(app(Arc::clone(&backend), Arc::new(Camera::default()), events));

    let starter = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.start(DASHBOARD_PATH).await })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    let _ = backend.changes.send(AuthChange::SignedOut);

    starter.await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(app.store.current().is_none());
    assert_eq!(app.shell.current_view(), ViewId::Login);
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_everything() {
    let backend = Arc::new(MemoryBackend::new(Some(session()), Duration::ZERO));
    let camera = Arc::new(Camera::default());
    let events = Arc::new(Events::default());
    let app = app(Arc::clone(&backend), Arc::clone(&camera), Arc::clone(&events));

    app.start(DASHBOARD_PATH).await;
    app.shell.toggle_capture();
    app.shutdown();
    app.shutdown();

    let emitted = events.0.lock().unwrap().len();
    tokio::time::sleep(Duration::from_secs(300)).await;
    let _ = backend.changes.send(AuthChange::SignedOut);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(*camera.released.lock().unwrap(), 1);
    assert_eq!(app.store.listener_count(), 0);
    assert_eq!(events.0.lock().unwrap().len(), emitted);
    assert!(app.store.current().is_some());
}

#[tokio::test(start_paused = true)]
async fn start_on_dashboard_without_stored_session_shows_login() {
    let backend = Arc::new(MemoryBackend::new(None, Duration::ZERO));
    let camera = Arc::new(Camera::default());
    let app = app(backend, Arc::clone(&camera), Arc::new(Events::default()));

    app.start(DASHBOARD_PATH).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(app.shell.current_view(), ViewId::Login);
    assert_eq!(app.shell.current_path(), DASHBOARD_PATH);
    assert!(app.shell.location_panel().map.is_none());
}
