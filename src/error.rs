//! Error types for the Gatekeeper limiter.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
///
/// A rate-limit denial is never an error: it is an ordinary `false` from
/// [`Limiter::allow`](crate::ratelimit::Limiter::allow).
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rule with a zero rate or an empty window
    #[error("Invalid rate limit rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    /// Failures reported by the counter store
    #[error("Rate limit backend error: {0}")]
    Backend(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatekeeperError {
    /// HTTP status the request layer answers with when this error surfaces.
    pub fn status_code(&self) -> u16 {
        500
    }
}

impl From<config::ConfigError> for GatekeeperError {
    fn from(err: config::ConfigError) -> Self {
        GatekeeperError::Config(err.to_string())
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
