//! Error taxonomy shared by the feed services
//!
//! Errors stay typed inside the crates and are flattened into
//! [`ErrorResult`] at the orchestration boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Feed error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// Credentials missing, empty or rejected by the broker
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Instrument master has no entry for the instrument
    #[error("Symbol not found: {symbol} on {exchange}")]
    SymbolNotFound {
        /// Requested trading symbol
        symbol: String,
        /// Requested exchange
        exchange: String,
    },

    /// Upstream connection or frame failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reconnect budget exhausted, adapter is stopped
    #[error("Max reconnect attempts exceeded after {attempts} attempts")]
    MaxReconnectAttemptsExceeded {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Broker cannot serve the exchange, mode or depth requested
    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// No logical subscription matches the request
    #[error("Not subscribed: {0}")]
    NotSubscribed(String),

    /// Malformed caller input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FeedError {
    /// Stable code for this error
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Auth(_) => ErrorCode::AuthError,
            Self::SymbolNotFound { .. } => ErrorCode::SymbolNotFound,
            Self::Transport(_) => ErrorCode::TransportError,
            Self::MaxReconnectAttemptsExceeded { .. } => ErrorCode::MaxReconnectAttemptsExceeded,
            Self::UnsupportedCapability(_) => ErrorCode::UnsupportedCapability,
            Self::NotSubscribed(_) => ErrorCode::NotSubscribed,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Config(_) => ErrorCode::ConfigError,
        }
    }

    /// Whether the adapter must stop without retrying
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Auth(_) | Self::MaxReconnectAttemptsExceeded { .. }
        )
    }

    /// Build a `SymbolNotFound` error
    pub fn symbol_not_found(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self::SymbolNotFound {
            symbol: symbol.into(),
            exchange: exchange.into(),
        }
    }
}

/// Wire-stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthError,
    SymbolNotFound,
    TransportError,
    MaxReconnectAttemptsExceeded,
    UnsupportedCapability,
    NotSubscribed,
    InvalidRequest,
    ConfigError,
}

impl ErrorCode {
    /// Code as it appears on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthError => "AUTH_ERROR",
            Self::SymbolNotFound => "SYMBOL_NOT_FOUND",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::MaxReconnectAttemptsExceeded => "MAX_RECONNECT_ATTEMPTS_EXCEEDED",
            Self::UnsupportedCapability => "UNSUPPORTED_CAPABILITY",
            Self::NotSubscribed => "NOT_SUBSCRIBED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ConfigError => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error returned across the API boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    /// Stable error code
    pub error_code: ErrorCode,
    /// Human readable message
    pub message: String,
}

impl From<FeedError> for ErrorResult {
    fn from(error: FeedError) -> Self {
        Self {
            error_code: error.code(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for ErrorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)
    }
}

/// Result type for boundary operations
pub type ApiResult<T> = Result<T, ErrorResult>;

/// Result type for internal feed operations
pub type FeedResult<T> = Result<T, FeedError>;
