//! File-backed session cache
//!
//! One JSON file per session under a cache directory. Expired sessions read
//! as absent and are removed on access.

use crate::credentials::{CredentialError, CredentialStore, SessionCredentials};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Cached session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCache {
    /// Session the tokens belong to
    pub session_id: String,
    /// Session credentials
    pub credentials: SessionCredentials,
    /// Timestamp when the tokens were generated
    pub generated_at: DateTime<Utc>,
    /// Timestamp when the tokens expire
    pub expires_at: DateTime<Utc>,
}

impl SessionCache {
    /// Cache entry valid for `ttl` from now
    pub fn new(session_id: impl Into<String>, credentials: SessionCredentials, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            credentials,
            generated_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if cache is still valid (not expired)
    #[must_use]
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }

    /// Get time until expiration in hours
    #[must_use]
    pub fn expires_in_hours(&self) -> f64 {
        let remaining = self.expires_at.signed_duration_since(Utc::now());
        let minutes = i32::try_from(remaining.num_minutes()).unwrap_or(i32::MAX);
        f64::from(minutes) / 60.0
    }
}

/// Session cache directory
pub struct FileSessionStore {
    cache_dir: PathBuf,
}

impl FileSessionStore {
    /// Store rooted at `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Cache directory
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_file_path(&self, session_id: &str) -> PathBuf {
        let file_name: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.cache_dir.join(format!("{file_name}.json"))
    }

    /// Persist a session
    pub fn save(&self, cache: &SessionCache) -> Result<(), CredentialError> {
        fs::create_dir_all(&self.cache_dir)?;

        let cache_path = self.cache_file_path(&cache.session_id);
        let content = serde_json::to_string_pretty(cache)?;
        fs::write(&cache_path, content)?;

        info!(
            session_id = %cache.session_id,
            expires_in_hours = cache.expires_in_hours(),
            "Session cached at: {}",
            cache_path.display()
        );
        Ok(())
    }

    /// Load a session that has not expired
    #[must_use]
    pub fn load(&self, session_id: &str) -> Option<SessionCache> {
        let cache_path = self.cache_file_path(session_id);
        if !cache_path.exists() {
            debug!("No session cache file found at: {}", cache_path.display());
            return None;
        }

        match fs::read_to_string(&cache_path) {
            Ok(content) => match serde_json::from_str::<SessionCache>(&content) {
                Ok(cache) if cache.is_valid() => return Some(cache),
                Ok(_) => info!(session_id = %session_id, "Cached session has expired"),
                Err(e) => warn!("Failed to parse cached session: {}", e),
            },
            Err(e) => {
                warn!("Failed to read cached session: {}", e);
                return None;
            }
        }

        if let Err(e) = self.remove(session_id) {
            warn!("Failed to remove stale session cache: {}", e);
        }
        None
    }

    /// Remove a cached session
    pub fn remove(&self, session_id: &str) -> Result<(), CredentialError> {
        let cache_path = self.cache_file_path(session_id);
        if cache_path.exists() {
            fs::remove_file(&cache_path)?;
            info!(session_id = %session_id, "Removed cached session");
        }
        Ok(())
    }
}

impl CredentialStore for FileSessionStore {
    fn auth_token(&self, session_id: &str) -> Option<String> {
        self.load(session_id).map(|cache| cache.credentials.auth_token)
    }

    fn feed_token(&self, session_id: &str) -> Option<String> {
        self.load(session_id).and_then(|cache| cache.credentials.feed_token)
    }

    fn api_key(&self, session_id: &str) -> Option<String> {
        self.load(session_id).and_then(|cache| cache.credentials.api_key)
    }

    fn client_code(&self, session_id: &str) -> Option<String> {
        self.load(session_id).and_then(|cache| cache.credentials.client_code)
    }

    fn credentials(&self, session_id: &str) -> Result<SessionCredentials, CredentialError> {
        let credentials = self
            .load(session_id)
            .map(|cache| cache.credentials)
            .unwrap_or_default();
        credentials.require(session_id, &[crate::CredentialField::AuthToken])?;
        Ok(credentials)
    }
}
