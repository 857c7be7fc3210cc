//! Error types for agent-thread.

use thiserror::Error;

/// Primary error type for all turn operations.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A thread turn settled as failed.
    #[error("{0}")]
    TurnFailed(String),

    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Create an API error without a retry hint.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Server-provided `Retry-After` hint in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Api { retry_after_ms, .. } | Self::RateLimited { retry_after_ms } => {
                *retry_after_ms
            }
            _ => None,
        }
    }

    /// Short type name used by retry classification.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Api { .. } => "ApiError",
            Self::Network(_) => "NetworkError",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
            Self::Authentication(_) => "AuthenticationError",
            Self::RateLimited { .. } => "RateLimitError",
            Self::Timeout(_) => "TimeoutError",
            Self::Stream(_) => "StreamError",
            Self::InvalidState(_) => "InvalidStateError",
            Self::TurnFailed(_) => "TurnFailedError",
            Self::Other(_) => "Error",
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AgentError>;
