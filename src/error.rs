//! Error types for the Turnstile service.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Per-request evaluation never produces one of these; they surface only
/// from configuration, setup and I/O paths.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Invalid policy shape, or a mutation attempted on a protected table
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Address string that does not pass `validate_ip`
    #[error("Invalid IP address: {0}")]
    InvalidIp(String),

    /// Layered service settings failed to load
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
