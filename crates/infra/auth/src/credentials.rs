//! Credential store contract and simple stores

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Credential errors
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A required value is absent or empty
    #[error("Missing {field} for session {session_id}")]
    Missing {
        /// Session that was queried
        session_id: String,
        /// Value that is missing
        field: CredentialField,
    },

    /// Session cache I/O failure
    #[error("Session cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session cache content is not valid JSON
    #[error("Session cache parse error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Individual credential values a broker may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialField {
    /// Session or access token
    AuthToken,
    /// Separate market data token
    FeedToken,
    /// Application key
    ApiKey,
    /// Broker client or user code
    ClientCode,
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AuthToken => "auth token",
            Self::FeedToken => "feed token",
            Self::ApiKey => "api key",
            Self::ClientCode => "client code",
        })
    }
}

/// Credentials of one user session
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub auth_token: String,
    #[serde(default)]
    pub feed_token: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub client_code: Option<String>,
}

impl SessionCredentials {
    /// Credentials holding only an auth token
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_feed_token(mut self, token: impl Into<String>) -> Self {
        self.feed_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_client_code(mut self, code: impl Into<String>) -> Self {
        self.client_code = Some(code.into());
        self
    }

    /// Value of `field`, `None` when absent or blank
    #[must_use]
    pub fn get(&self, field: CredentialField) -> Option<&str> {
        let value = match field {
            CredentialField::AuthToken => Some(self.auth_token.as_str()),
            CredentialField::FeedToken => self.feed_token.as_deref(),
            CredentialField::ApiKey => self.api_key.as_deref(),
            CredentialField::ClientCode => self.client_code.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    /// Check that every field in `required` is present
    pub fn require(&self, session_id: &str, required: &[CredentialField]) -> Result<(), CredentialError> {
        match required.iter().find(|field| self.get(**field).is_none()) {
            Some(field) => Err(CredentialError::Missing {
                session_id: session_id.to_string(),
                field: *field,
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("auth_token", &format!("<{} chars>", self.auth_token.len()))
            .field("feed_token", &self.feed_token.as_ref().map(|t| format!("<{} chars>", t.len())))
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("client_code", &self.client_code)
            .finish()
    }
}

/// Source of session tokens
pub trait CredentialStore: Send + Sync {
    /// Auth token of a session
    fn auth_token(&self, session_id: &str) -> Option<String>;

    /// Feed token of a session
    fn feed_token(&self, session_id: &str) -> Option<String>;

    /// Broker application key
    fn api_key(&self, _session_id: &str) -> Option<String> {
        None
    }

    /// Broker client code
    fn client_code(&self, _session_id: &str) -> Option<String> {
        None
    }

    /// Collect all credentials of a session
    ///
    /// Fails when the auth token is absent or empty.
    fn credentials(&self, session_id: &str) -> Result<SessionCredentials, CredentialError> {
        let auth_token = self
            .auth_token(session_id)
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| CredentialError::Missing {
                session_id: session_id.to_string(),
                field: CredentialField::AuthToken,
            })?;

        Ok(SessionCredentials {
            auth_token,
            feed_token: self.feed_token(session_id),
            api_key: self.api_key(session_id),
            client_code: self.client_code(session_id),
        })
    }
}

/// Process-local credential store
#[derive(Default)]
pub struct InMemoryCredentialStore {
    sessions: RwLock<FxHashMap<String, SessionCredentials>>,
}

impl InMemoryCredentialStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store credentials for a session
    pub fn insert(&self, session_id: impl Into<String>, credentials: SessionCredentials) {
        let session_id = session_id.into();
        debug!(session_id = %session_id, "Stored session credentials");
        self.sessions.write().insert(session_id, credentials);
    }

    /// Forget a session
    pub fn remove(&self, session_id: &str) -> Option<SessionCredentials> {
        self.sessions.write().remove(session_id)
    }

    fn field(&self, session_id: &str, field: CredentialField) -> Option<String> {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|credentials| credentials.get(field).map(str::to_string))
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn auth_token(&self, session_id: &str) -> Option<String> {
        self.field(session_id, CredentialField::AuthToken)
    }

    fn feed_token(&self, session_id: &str) -> Option<String> {
        self.field(session_id, CredentialField::FeedToken)
    }

    fn api_key(&self, session_id: &str) -> Option<String> {
        self.field(session_id, CredentialField::ApiKey)
    }

    fn client_code(&self, session_id: &str) -> Option<String> {
        self.field(session_id, CredentialField::ClientCode)
    }
}

/// Credentials taken from `{PREFIX}_AUTH_TOKEN`, `{PREFIX}_FEED_TOKEN`,
/// `{PREFIX}_API_KEY` and `{PREFIX}_CLIENT_CODE`
///
/// The environment (plus `.env`) is read once at construction. Every session
/// id resolves to the same credentials.
pub struct EnvCredentialStore {
    prefix: String,
    vars: FxHashMap<String, String>,
}

impl EnvCredentialStore {
    /// Snapshot the process environment for `prefix`
    pub fn from_env(prefix: &str) -> Self {
        if let Err(e) = dotenv::dotenv() {
            debug!("No .env file loaded: {}", e);
        }
        Self::from_vars(prefix, std::env::vars())
    }

    /// Build from explicit variables
    pub fn from_vars<I, K, V>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let prefix = prefix.to_uppercase();
        let wanted = format!("{prefix}_");
        let vars: FxHashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(&wanted))
            .collect();

        if vars.is_empty() {
            warn!(prefix = %prefix, "No credential variables found");
        }
        Self { prefix, vars }
    }

    fn var(&self, suffix: &str) -> Option<String> {
        self.vars
            .get(&format!("{}_{suffix}", self.prefix))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl CredentialStore for EnvCredentialStore {
    fn auth_token(&self, _session_id: &str) -> Option<String> {
        self.var("AUTH_TOKEN")
    }

    fn feed_token(&self, _session_id: &str) -> Option<String> {
        self.var("FEED_TOKEN")
    }

    fn api_key(&self, _session_id: &str) -> Option<String> {
        self.var("API_KEY")
    }

    fn client_code(&self, _session_id: &str) -> Option<String> {
        self.var("CLIENT_CODE")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    const SESSION: &str = "session-1";

    #[fixture]
    fn store() -> InMemoryCredentialStore {
        let store = InMemoryCredentialStore::new();
        store.insert(
            SESSION,
            SessionCredentials::new("jwt-token")
                .with_feed_token("feed-token")
                .with_api_key("key")
                .with_client_code("A123"),
        );
        store
    }

    #[rstest]
    fn test_in_memory_lookup(store: InMemoryCredentialStore) {
        let credentials = store.credentials(SESSION).unwrap();
        assert_eq!(credentials.auth_token, "jwt-token");
        assert_eq!(credentials.feed_token.as_deref(), Some("feed-token"));
        assert!(store.credentials("unknown").is_err());
    }

    #[rstest]
    fn test_blank_auth_token_is_missing() {
        let store = InMemoryCredentialStore::new();
        store.insert(SESSION, SessionCredentials::new("   "));
        assert!(matches!(
            store.credentials(SESSION),
            Err(CredentialError::Missing { field: CredentialField::AuthToken, .. })
        ));
    }

    #[rstest]
    fn test_require_reports_first_missing_field() {
        let credentials = SessionCredentials::new("token").with_api_key("key");
        assert!(credentials.require(SESSION, &[CredentialField::AuthToken, CredentialField::ApiKey]).is_ok());

        let err = credentials
            .require(SESSION, &[CredentialField::ApiKey, CredentialField::FeedToken])
            .unwrap_err();
        assert!(matches!(err, CredentialError::Missing { field: CredentialField::FeedToken, .. }));
    }

    #[rstest]
    fn test_env_store_reads_prefixed_vars() {
        let store = EnvCredentialStore::from_vars(
            "angel",
            [
                ("ANGEL_AUTH_TOKEN", "jwt"),
                ("ANGEL_FEED_TOKEN", "feed"),
                ("ANGEL_CLIENT_CODE", " C99 "),
                ("ZERODHA_AUTH_TOKEN", "other"),
            ],
        );
        let credentials = store.credentials("any").unwrap();
        assert_eq!(credentials.auth_token, "jwt");
        assert_eq!(credentials.client_code.as_deref(), Some("C99"));
        assert_eq!(credentials.api_key, None);
    }

    #[rstest]
    fn test_debug_masks_tokens(store: InMemoryCredentialStore) {
        let credentials = store.credentials(SESSION).unwrap();
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("jwt-token"));
        assert!(!rendered.contains("feed-token"));
    }
}
