//! Error types for ipban-platform
//!
//! This module defines the error types used throughout the library.
//! We use `thiserror` for ergonomic error definitions and `anyhow` for
//! error propagation in the binary.

use thiserror::Error;

/// Main error type for platform operations
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// External process failed to start or exited with a disallowed code
    #[error("Process error: {0}")]
    Process(String),

    /// External process exceeded its time budget and was killed
    #[error("Process timed out: {0}")]
    Timeout(String),

    /// Host probing errors (never escape the host module)
    #[error("Probe error: {0}")]
    Probe(String),

    /// Firewall backend selection errors, fatal at startup
    #[error("Backend selection error: {0}")]
    Selection(String),

    /// Firewall backend operation errors
    #[error("Firewall backend error: {0}")]
    Backend(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using PlatformError
pub type Result<T> = std::result::Result<T, PlatformError>;

impl From<toml::de::Error> for PlatformError {
    fn from(err: toml::de::Error) -> Self {
        PlatformError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlatformError::Selection("no backend for Mac".to_string());
        assert_eq!(err.to_string(), "Backend selection error: no backend for Mac");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PlatformError = io.into();
        assert!(matches!(err, PlatformError::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("= broken");
        let err: PlatformError = parse.unwrap_err().into();
        assert!(matches!(err, PlatformError::Config(_)));
    }
}
