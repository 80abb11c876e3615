//! Error types for Parallax.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallaxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-suggested delay before the next attempt.
        retry_after_ms: Option<u64>,
    },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Backend error{}: {message}", status_suffix(.status))]
    Backend { status: Option<u16>, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No usable input: {0}")]
    NoUsableInput(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ParallaxError>;

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" {s}")).unwrap_or_default()
}

/// Machine-checkable failure category carried in result records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    UnknownAgent,
    MissingCredential,
    Auth,
    RateLimited,
    Timeout,
    Backend,
    MalformedResponse,
    NoUsableInput,
    Cancelled,
    Io,
    Serialization,
}

impl ErrorKind {
    /// Kinds that abort a whole run instead of degrading a single call.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::Config
                | ErrorKind::UnknownAgent
                | ErrorKind::MissingCredential
                | ErrorKind::Auth
        )
    }
}

impl ParallaxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParallaxError::Config(_) => ErrorKind::Config,
            ParallaxError::UnknownAgent(_) => ErrorKind::UnknownAgent,
            ParallaxError::MissingCredential(_) => ErrorKind::MissingCredential,
            ParallaxError::Auth(_) => ErrorKind::Auth,
            ParallaxError::RateLimited { .. } => ErrorKind::RateLimited,
            ParallaxError::Timeout(_) => ErrorKind::Timeout,
            ParallaxError::Backend { .. } => ErrorKind::Backend,
            ParallaxError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            ParallaxError::NoUsableInput(_) => ErrorKind::NoUsableInput,
            ParallaxError::Cancelled(_) => ErrorKind::Cancelled,
            ParallaxError::Io(_) => ErrorKind::Io,
            ParallaxError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Transient backend failures: rate limits, timeouts and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            ParallaxError::RateLimited { .. } | ParallaxError::Timeout(_) => true,
            ParallaxError::Backend { status, .. } => status.is_some_and(|s| s >= 500),
            _ => false,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ParallaxError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(self.kind(), self.to_string())
    }
}

/// Serializable failure: a kind for programs and a message for people.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ParallaxError> for ErrorRecord {
    fn from(err: &ParallaxError) -> Self {
        err.to_record()
    }
}
