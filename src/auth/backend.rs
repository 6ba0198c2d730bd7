//! Storage locations for the credential
//!
//! Each location implements [`CredentialBackend`]; the store ranks them and
//! walks them in priority order.

use chrono::{DateTime, Utc};
use reqwest::cookie::{CookieStore, Jar};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::types::{ClientError, Result};

/// Default cookie name for the tertiary location
pub const DEFAULT_COOKIE_NAME: &str = "auth_token";

/// Cookie lifetime, independent of the token's own expiry
pub const COOKIE_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One persistence location for the credential
pub trait CredentialBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Read the stored credential, `Ok(None)` if absent
    fn read(&self) -> Result<Option<String>>;

    /// Overwrite the stored credential
    fn write(&self, token: &str) -> Result<()>;

    /// Remove the stored credential
    fn clear(&self) -> Result<()>;
}

/// On-disk record for [`FileBackend`]
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    token: String,
    saved_at: DateTime<Utc>,
}

/// Durable location: a small JSON file, replaced atomically on write
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn read(&self) -> Result<Option<String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredCredential = serde_json::from_str(&raw)
            .map_err(|e| ClientError::Storage(format!("Corrupt credential file: {}", e)))?;

        if stored.token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(stored.token))
        }
    }

    fn write(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let record = StoredCredential {
            token: token.to_string(),
            saved_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Session-scoped location: lives as long as the process session.
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct SessionBackend {
    slot: Arc<Mutex<Option<String>>>,
}

impl SessionBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialBackend for SessionBackend {
    fn name(&self) -> &'static str {
        "session"
    }

    fn read(&self) -> Result<Option<String>> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slot.clone())
    }

    fn write(&self, token: &str) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
        Ok(())
    }
}

/// Cookie location, shared with the HTTP client's cookie jar so every
/// request to the API origin carries the credential.
#[derive(Clone)]
pub struct CookieBackend {
    jar: Arc<Jar>,
    url: Url,
    name: String,
    max_age: Duration,
}

impl CookieBackend {
    pub fn new(jar: Arc<Jar>, url: Url) -> Self {
        Self {
            jar,
            url,
            name: DEFAULT_COOKIE_NAME.to_string(),
            max_age: COOKIE_MAX_AGE,
        }
    }

    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }
}

impl CredentialBackend for CookieBackend {
    fn name(&self) -> &'static str {
        "cookie"
    }

    fn read(&self) -> Result<Option<String>> {
        let Some(header) = self.jar.cookies(&self.url) else {
            return Ok(None);
        };
        let header = header
            .to_str()
            .map_err(|e| ClientError::Storage(format!("Unreadable cookie header: {}", e)))?;

        let token = header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty());

        Ok(token)
    }

    fn write(&self, token: &str) -> Result<()> {
        let cookie = format!(
            "{}={}; Max-Age={}; Path=/; SameSite=Lax",
            self.name,
            token,
            self.max_age.as_secs()
        );
        self.jar.add_cookie_str(&cookie, &self.url);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let cookie = format!(
            "{}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Path=/",
            self.name
        );
        self.jar.add_cookie_str(&cookie, &self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("credential.json"));

        assert_eq!(backend.read().unwrap(), None);
        backend.write("abc.def.ghi").unwrap();
        assert_eq!(backend.read().unwrap().as_deref(), Some("abc.def.ghi"));

        backend.clear().unwrap();
        assert_eq!(backend.read().unwrap(), None);
        // Clearing twice is fine
        backend.clear().unwrap();
    }

    #[test]
    fn test_file_backend_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = FileBackend::new(&path).read().unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }

    #[test]
    fn test_session_backend_clones_share_slot() {
        let a = SessionBackend::new();
        let b = a.clone();
        a.write("token").unwrap();
        assert_eq!(b.read().unwrap().as_deref(), Some("token"));
        b.clear().unwrap();
        assert_eq!(a.read().unwrap(), None);
    }

    #[test]
    fn test_cookie_backend_uses_jar() {
        let url = Url::parse("http://panel.local/api").unwrap();
        let jar = Arc::new(Jar::default());
        let backend = CookieBackend::new(Arc::clone(&jar), url.clone());

        assert_eq!(backend.read().unwrap(), None);
        backend.write("abc.def.ghi").unwrap();
        assert_eq!(backend.read().unwrap().as_deref(), Some("abc.def.ghi"));

        // Visible to any request against the same origin
        let header = jar.cookies(&url).unwrap();
        assert!(header.to_str().unwrap().contains("auth_token=abc.def.ghi"));

        backend.clear().unwrap();
        assert_eq!(backend.read().unwrap(), None);
    }
}
