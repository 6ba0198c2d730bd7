//! Credential store
//!
//! Holds the current credential in memory and mirrors it across ranked
//! storage backends. Index 0 is the primary location; its failures are
//! surfaced, mirror failures are logged.
//!
//! ## Consistency
//!
//! `set` and `clear` hold the store lock across memory and every backend, so
//! no reader can observe memory and a mirror disagreeing once a write returns.
//! A mirror that fails to accept a new value is cleared rather than left
//! holding an older one.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::cookie::Jar;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;

use super::backend::{CookieBackend, CredentialBackend, FileBackend, SessionBackend};
use super::token;
use crate::types::Result;

/// Authentication lifecycle as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// Session check in flight (or not yet run)
    Checking,
    /// A credential is held and believed valid
    Authenticated,
    /// No usable credential
    Anonymous,
}

/// Credential store with redundant persistence
pub struct CredentialStore {
    cache: Mutex<Option<String>>,
    backends: Vec<Arc<dyn CredentialBackend>>,
    status_tx: watch::Sender<AuthStatus>,
}

impl CredentialStore {
    /// Create a store over `backends`, highest priority first
    pub fn new(backends: Vec<Arc<dyn CredentialBackend>>) -> Self {
        let (status_tx, _) = watch::channel(AuthStatus::Checking);
        Self {
            cache: Mutex::new(None),
            backends,
            status_tx,
        }
    }

    /// Durable file, session slot and cookie jar, in that order
    pub fn standard(
        file_path: impl Into<PathBuf>,
        session: SessionBackend,
        jar: Arc<Jar>,
        base_url: Url,
    ) -> Self {
        Self::new(vec![
            Arc::new(FileBackend::new(file_path)),
            Arc::new(session),
            Arc::new(CookieBackend::new(jar, base_url)),
        ])
    }

    /// Store backed only by a session slot
    pub fn in_memory() -> Self {
        Self::new(vec![Arc::new(SessionBackend::new())])
    }

    /// Install `token` as the current credential.
    ///
    /// Returns `Ok(false)` without touching any location when the token does
    /// not parse. Fails only when the primary location rejects the write.
    pub fn set(&self, token: &str) -> Result<bool> {
        let token = token.trim();
        if !token::is_well_formed(token) {
            warn!("Ignoring malformed credential");
            return Ok(false);
        }

        let mut cache = self.lock_cache();

        if let Some((primary, mirrors)) = self.backends.split_first() {
            if let Err(e) = primary.write(token) {
                error!(backend = primary.name(), error = %e, "Failed to persist credential");
                return Err(e);
            }

            for mirror in mirrors {
                if let Err(e) = mirror.write(token) {
                    warn!(backend = mirror.name(), error = %e, "Failed to mirror credential");
                    if let Err(e) = mirror.clear() {
                        warn!(backend = mirror.name(), error = %e, "Failed to clear stale mirror");
                    }
                }
            }
        }

        *cache = Some(token.to_string());
        drop(cache);

        debug!(expires_at = ?token::expiry_of(token), "Credential installed");
        self.publish(AuthStatus::Authenticated);
        Ok(true)
    }

    /// Current credential, consulting locations in priority order.
    ///
    /// A value found below the top priority is written back to every higher
    /// location. Stored values that do not parse as a credential are skipped
    /// and cleared from their location.
    pub fn get(&self) -> Option<String> {
        let mut cache = self.lock_cache();
        if let Some(ref current) = *cache {
            return Some(current.clone());
        }

        for (rank, backend) in self.backends.iter().enumerate() {
            match backend.read() {
                Ok(Some(found)) if !token::is_well_formed(&found) => {
                    if !found.trim().is_empty() {
                        warn!(backend = backend.name(), "Discarding malformed stored credential");
                        if let Err(e) = backend.clear() {
                            warn!(backend = backend.name(), error = %e, "Failed to clear malformed credential");
                        }
                    }
                }
                Ok(Some(found)) => {
                    let found = found.trim().to_string();
                    for higher in &self.backends[..rank] {
                        if let Err(e) = higher.write(&found) {
                            warn!(backend = higher.name(), error = %e, "Failed to restore credential");
                        }
                    }
                    if rank > 0 {
                        info!(source = backend.name(), "Restored credential from lower-priority location");
                    }
                    *cache = Some(found.clone());
                    return Some(found);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Failed to read credential");
                }
            }
        }

        None
    }

    /// Remove the credential from memory and every location
    pub fn clear(&self) -> Result<()> {
        let mut cache = self.lock_cache();
        *cache = None;

        let mut primary_error = None;
        for (rank, backend) in self.backends.iter().enumerate() {
            if let Err(e) = backend.clear() {
                warn!(backend = backend.name(), error = %e, "Failed to clear credential");
                if rank == 0 {
                    primary_error = Some(e);
                }
            }
        }
        drop(cache);

        debug!("Credential cleared");
        self.publish(AuthStatus::Anonymous);

        match primary_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether any location holds a credential
    pub fn has_credential(&self) -> bool {
        self.get().is_some()
    }

    /// Drop the in-memory copy so the next read goes to storage
    pub fn forget_cached(&self) {
        *self.lock_cache() = None;
    }

    /// Embedded expiry of `token`, `None` when malformed
    pub fn expiry_of(token: &str) -> Option<u64> {
        token::expiry_of(token)
    }

    /// Expiry of the current credential
    pub fn current_expiry(&self) -> Option<u64> {
        self.get().and_then(|t| token::expiry_of(&t))
    }

    /// Whether the current credential is missing or expired
    pub fn is_expired(&self) -> bool {
        match self.get() {
            Some(t) => token::is_expired(&t, token::now_secs()),
            None => true,
        }
    }

    /// Whether the current credential expires within `window`
    pub fn expires_within(&self, window: Duration) -> bool {
        match self.get() {
            Some(t) => token::expires_within(&t, window, token::now_secs()),
            None => false,
        }
    }

    /// Latest authentication status
    pub fn status(&self) -> AuthStatus {
        *self.status_tx.borrow()
    }

    /// Receiver notified whenever the authentication status changes
    pub fn watch_status(&self) -> watch::Receiver<AuthStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) fn publish(&self, status: AuthStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<String>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
