//! Error types for a3s-shield

use crate::types::Context;
use thiserror::Error;

/// Errors that can occur in the shield
#[derive(Debug, Error)]
pub enum ShieldError {
    /// A forbidden key was found and the call was not dispatched.
    ///
    /// Carries the context and a short detail tag, never the offending value.
    #[error("Blocked by shield in {context}: {detail}")]
    Blocked { context: Context, detail: String },

    /// Invalid mode or malformed deny-list entry
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed URL or body during inspection
    #[error("Parse error: {0}")]
    Parse(String),

    /// Underlying transport unavailable or failed outside of HTTP
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP client error from the real transport
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShieldError {
    /// Whether this error is a policy block rather than a transport failure
    pub fn is_blocked(&self) -> bool {
        matches!(self, ShieldError::Blocked { .. })
    }
}

/// Result type alias for shield operations
pub type Result<T> = std::result::Result<T, ShieldError>;
