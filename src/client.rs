//! Auth Client Module
//!
//! HTTP client for the hosted auth provider (GoTrue-style REST API).

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthBackend, AuthChange, AuthError, Session, UserProfile};
use crate::storage::SessionVault;

const CHANGE_BUFFER: usize = 32;

/// Auth provider client holding the locally known session
pub struct AuthClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    vault: SessionVault,
    session: Mutex<Option<Session>>,
    changes: broadcast::Sender<AuthChange>,
}

impl AuthClient {
    pub fn new(base_url: &str, api_key: &str, vault: SessionVault) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Network(e.to_string()))?;
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            vault,
            session: Mutex::new(None),
            changes,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn cached_session(&self) -> Option<Session> {
        self.session.lock().ok().and_then(|guard| guard.clone())
    }

    fn store_session(&self, session: Option<Session>) {
        match &session {
            Some(session) => {
                if let Err(e) = self.vault.save(session) {
                    error!("Failed to persist session: {}", e);
                }
            }
            None => {
                if let Err(e) = self.vault.clear() {
                    error!("Failed to clear stored session: {}", e);
                }
            }
        }
        if let Ok(mut guard) = self.session.lock() {
            *guard = session;
        }
    }

    fn publish(&self, change: AuthChange) {
        debug!("Publishing auth change: {}", change.label());
        // No receivers is fine; nobody is listening yet.
        let _ = self.changes.send(change);
    }

    async fn request_token(
        &self,
        grant_type: &str,
        body: &TokenRequest<'_>,
    ) -> Result<Session, AuthError> {
        let url = format!("{}?grant_type={}", self.endpoint("token"), grant_type);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let body = response.text().await.unwrap_or_default();
            debug!("Token grant rejected: {}", error_message(&body, status));
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Server(error_message(&body, status)));
        }

        let body = response.text().await.map_err(|e| AuthError::Network(e.to_string()))?;
        parse_token_response(&body)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        info!("Refreshing access token");
        let session = self
            .request_token(
                "refresh_token",
                &TokenRequest {
                    refresh_token: Some(refresh_token),
                    ..TokenRequest::default()
                },
            )
            .await?;

        self.store_session(Some(session.clone()));
        self.publish(AuthChange::TokenRefreshed(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl AuthBackend for AuthClient {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let session = match self.cached_session() {
            Some(session) => Some(session),
            None => match self.vault.load() {
                Ok(stored) => stored,
                Err(e) => {
                    warn!("Stored session unreadable: {}", e);
                    None
                }
            },
        };

        let Some(session) = session else {
            debug!("No session available");
            return Ok(None);
        };

        if !session.is_expired() {
            if let Ok(mut guard) = self.session.lock() {
                *guard = Some(session.clone());
            }
            return Ok(Some(session));
        }

        match session.refresh_token.as_deref() {
            Some(token) => match self.refresh(token).await {
                Ok(refreshed) => Ok(Some(refreshed)),
                Err(AuthError::InvalidCredentials) => {
                    info!("Refresh token rejected, signing out locally");
                    self.store_session(None);
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            None => {
                info!("Stored session is expired");
                self.store_session(None);
                Ok(None)
            }
        }
    }

    async fn get_user(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let response = self
            .client
            .get(self.endpoint("user"))
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::NotSignedIn);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Server(error_message(&body, status)));
        }

        let record = response
            .json::<UserRecord>()
            .await
            .map_err(|e| AuthError::Parse(e.to_string()))?;
        Ok(record.into_profile())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        info!("Signing in with password");
        let session = self
            .request_token(
                "password",
                &TokenRequest {
                    email: Some(email),
                    password: Some(password),
                    ..TokenRequest::default()
                },
            )
            .await?;

        self.store_session(Some(session.clone()));
        info!("Signed in as user: {}", session.user.user_id);
        self.publish(AuthChange::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        info!("Signing out");
        let token = self.cached_session().map(|s| s.access_token);

        // Revoke server-side on a best-effort basis; the local sign-out always happens.
        if let Some(token) = token {
            let result = self
                .client
                .post(self.endpoint("logout"))
                .header("apikey", &self.api_key)
                .bearer_auth(&token)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => debug!("Session revoked"),
                Ok(response) => warn!("Logout answered {}", response.status()),
                Err(e) => warn!("Logout request failed: {}", e),
            }
        }

        self.store_session(None);
        self.publish(AuthChange::SignedOut);
        Ok(())
    }

    fn auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }
}

// Request/Response types

#[derive(Default, Serialize)]
struct TokenRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: UserRecord,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    full_name: Option<String>,
    avatar_url: Option<String>,
}

impl UserRecord {
    fn into_profile(self) -> UserProfile {
        UserProfile {
            user_id: self.id,
            email: self.email,
            full_name: self.user_metadata.full_name,
            avatar_url: self.user_metadata.avatar_url,
        }
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

fn parse_token_response(body: &str) -> Result<Session, AuthError> {
    let token: TokenResponse =
        serde_json::from_str(body).map_err(|e| AuthError::Parse(e.to_string()))?;

    let expires_at = token
        .expires_at
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(|| {
            chrono::Utc::now() + chrono::Duration::seconds(token.expires_in.unwrap_or(3600))
        });

    Ok(Session {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        user: token.user.into_profile(),
        expires_at,
    })
}

fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.error_description.or(e.msg).or(e.message).or(e.error))
        .unwrap_or_else(|| format!("Status: {}", status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::session;

    fn scratch_client() -> (AuthClient, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("geotrack-client-{}", uuid::Uuid::new_v4()));
        // Port 9 (discard) keeps any accidental request from reaching a real service.
        let client =
            AuthClient::new("http://127.0.0.1:9/", "anon-key", SessionVault::new(&dir)).unwrap();
        (client, dir)
    }

    #[test]
    fn token_response_becomes_session() {
        let body = r#"{
            "access_token": "jwt",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1900000000,
            "refresh_token": "r1",
            "user": {
                "id": "8d1c",
                "email": "ada@example.com",
                "user_metadata": {
                    "full_name": "Ada Lovelace",
                    "avatar_url": "https://cdn.example.com/ada.png"
                }
            }
        }"#;

        let session = parse_token_response(body).unwrap();
        assert_eq!(session.access_token, "jwt");
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
        assert_eq!(session.user.user_id, "8d1c");
        assert_eq!(session.user.display_name(), "Ada Lovelace");
        assert_eq!(session.expires_at.timestamp(), 1_900_000_000);
    }

    #[test]
    fn missing_metadata_falls_back_to_email() {
        let body =
            r#"{"access_token":"jwt","expires_in":60,"user":{"id":"u","email":"u@example.com"}}"#;
        let session = parse_token_response(body).unwrap();
        assert_eq!(session.user.display_name(), "u@example.com");
        assert!(session.user.avatar_url.is_none());
        assert!(!session.is_expired());
    }

    #[test]
    fn error_message_prefers_description() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        let rejected = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        assert_eq!(error_message(rejected, status), "Invalid login credentials");
        assert_eq!(error_message(r#"{"msg":"Token expired"}"#, status), "Token expired");
        assert_eq!(error_message("<html>", status), "Status: 400 Bad Request");
    }

    #[test]
    fn endpoint_joins_base_url() {
        let (client, dir) = scratch_client();
        assert_eq!(client.endpoint("user"), "http://127.0.0.1:9/auth/v1/user");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn stored_session_is_restored() {
        let (client, dir) = scratch_client();
        let stored = session("u1");
        SessionVault::new(&dir).save(&stored).unwrap();

        assert_eq!(client.get_session().await.unwrap(), Some(stored));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn expired_session_without_refresh_token_is_dropped() {
        let (client, dir) = scratch_client();
        let mut stored = session("u1");
        stored.refresh_token = None;
        stored.expires_at = chrono::Utc::now() - chrono::Duration::minutes(5);
        SessionVault::new(&dir).save(&stored).unwrap();

        assert_eq!(client.get_session().await.unwrap(), None);
        assert!(SessionVault::new(&dir).load().unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn sign_out_without_session_clears_and_publishes() {
        let (client, dir) = scratch_client();
        let mut changes = client.auth_changes();

        client.sign_out().await.unwrap();

        assert_eq!(changes.recv().await.unwrap(), AuthChange::SignedOut);
        assert_eq!(client.get_session().await.unwrap(), None);
        let _ = std::fs::remove_dir_all(dir);
    }
}
