//! Error types shared by the stores, provider adapters and the sync manager.

use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Auth,
    Network,
    RateLimited,
    Unknown,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Auth => f.write_str("auth"),
            ProviderErrorKind::Network => f.write_str("network"),
            ProviderErrorKind::RateLimited => f.write_str("rate limited"),
            ProviderErrorKind::Unknown => f.write_str("provider"),
        }
    }
}

/// A failure talking to an external provider. Adapters never swallow these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        let message = if snippet.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", snippet.trim())
        };
        let kind = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Auth,
            StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
            s if s.is_server_error() => ProviderErrorKind::Network,
            StatusCode::REQUEST_TIMEOUT => ProviderErrorKind::Network,
            _ => ProviderErrorKind::Unknown,
        };
        Self::new(kind, message)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ProviderError::from_status(status, "");
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ProviderError::network(err.to_string())
        } else if err.is_decode() {
            ProviderError::unknown(format!("Failed to decode response: {err}"))
        } else {
            ProviderError::unknown(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(u64),

    #[error("Store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or invalid credentials. Never retried until corrected.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Malformed work item {external_id:?}: {reason}")]
    Mapping { external_id: String, reason: String },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Integration {0} is already syncing")]
    AlreadySyncing(u64),
}
