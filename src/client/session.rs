//! Session operations: login, logout, refresh and session checks

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{envelope, CallOptions, RequestClient};
use crate::auth::{token, AuthStatus};
use crate::types::{ClientError, ErrorKind, Result};

/// Email/password credentials for the login endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Session established by a successful login or refresh
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// User record returned alongside the token, if any
    pub user: Option<Value>,
}

impl AuthSession {
    fn from_payload(token: String, payload: &Value) -> Self {
        let expires_at = token::expiry_of(&token)
            .and_then(|exp| Utc.timestamp_opt(exp as i64, 0).single());
        Self {
            token,
            expires_at,
            user: payload.get("user").cloned(),
        }
    }
}

/// Token field in a login/refresh payload
fn extract_token(payload: &Value) -> Option<String> {
    ["token", "access_token", "accessToken"]
        .iter()
        .find_map(|field| payload.get(*field).and_then(Value::as_str))
        .map(str::to_string)
}

impl RequestClient {
    /// Authenticate and install the returned credential
    pub async fn login<C>(&self, credentials: &C) -> Result<AuthSession>
    where
        C: Serialize + ?Sized,
    {
        let body = serde_json::to_value(credentials)?;
        let prepared =
            self.prepare(Method::POST, &self.config.login_path, Vec::new(), Some(body))?;
        let payload = envelope::unwrap(self.execute(&prepared, CallOptions::LOGIN).await?);

        let token = extract_token(&payload).ok_or_else(|| {
            ClientError::Decode("Login response did not include a token".into())
        })?;

        if !self.credentials.set(&token)? {
            return Err(ClientError::Authentication {
                status: None,
                message: "Server issued a malformed token".into(),
            });
        }

        info!("Logged in");
        Ok(AuthSession::from_payload(token, &payload))
    }

    /// Tell the server the session is over, then drop the credential locally.
    ///
    /// The server call is best-effort; the local purge always happens.
    pub async fn logout(&self) -> Result<()> {
        if self.credentials.has_credential() {
            match self.prepare(Method::POST, &self.config.logout_path, Vec::new(), None) {
                Ok(prepared) => {
                    if let Err(e) = self.execute(&prepared, CallOptions::SESSION).await {
                        debug!(error = %e, "Server-side logout failed");
                    }
                }
                Err(e) => debug!(error = %e, "Invalid logout path"),
            }
        }

        self.credentials.clear()?;
        info!("Logged out");
        Ok(())
    }

    /// Exchange the current credential for a fresh one
    pub async fn refresh(&self) -> Result<AuthSession> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_credential().await
    }

    /// Refresh without taking the single-flight lock
    pub(crate) async fn refresh_credential(&self) -> Result<AuthSession> {
        if self.credentials.get().is_none() {
            return Err(ClientError::Authentication {
                status: None,
                message: "No credential to refresh".into(),
            });
        }

        let prepared =
            self.prepare(Method::POST, &self.config.refresh_path, Vec::new(), None)?;
        let payload =
            envelope::unwrap(self.send_with_retry(&prepared, CallOptions::SESSION).await?);

        let token = extract_token(&payload).ok_or_else(|| {
            ClientError::Decode("Refresh response did not include a token".into())
        })?;

        if !self.credentials.set(&token)? {
            return Err(ClientError::Decode(
                "Refresh response carried a malformed token".into(),
            ));
        }

        debug!(expires_at = ?token::expiry_of(&token), "Credential refreshed");
        Ok(AuthSession::from_payload(token, &payload))
    }

    /// Resolve the authentication status against the server.
    ///
    /// Publishes `Checking` while the call is in flight. A rejected
    /// credential resolves to `Anonymous`; an unreachable server keeps the
    /// local credential and resolves to `Authenticated`.
    pub async fn check_session(&self) -> AuthStatus {
        if !self.credentials.has_credential() {
            self.credentials.publish(AuthStatus::Anonymous);
            return AuthStatus::Anonymous;
        }

        self.credentials.publish(AuthStatus::Checking);

        let result = match self.prepare(Method::GET, &self.config.session_path, Vec::new(), None) {
            Ok(prepared) => self.execute(&prepared, CallOptions::STANDARD).await,
            Err(e) => Err(e),
        };

        let status = match result {
            Ok(_) => AuthStatus::Authenticated,
            Err(e) if e.kind() == ErrorKind::Authentication => AuthStatus::Anonymous,
            Err(e) => {
                warn!(error = %e, "Session check failed, keeping local credential");
                if self.credentials.has_credential() {
                    AuthStatus::Authenticated
                } else {
                    AuthStatus::Anonymous
                }
            }
        };

        self.credentials.publish(status);
        status
    }

    /// Fetch the signed-in user's record
    pub async fn current_user<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let path = self.config.session_path.clone();
        self.get(&path).await
    }
}
