//! Error types for the hosts-relay application.
//!
//! This module defines all error types used throughout the application,
//! providing structured error handling with context.

use thiserror::Error;

/// Main error type for the hosts-relay application.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration file could not be found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}")]
    ConfigValidation { message: String },

    /// The hosts override file could not be read.
    #[error("Failed to load hosts file {path}: {source}")]
    HostsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The client sent something that is not a usable HTTP request head.
    #[error("Malformed HTTP request: {message}")]
    MalformedRequest { message: String },

    /// Neither the request target nor a Host header names a destination.
    #[error("Request does not name a destination host")]
    MissingHost,

    /// Original-destination recovery is not available on this platform.
    #[error("{platform} does not support transparent proxy")]
    Unsupported { platform: &'static str },

    /// The kernel could not report the original destination of a connection.
    #[error("Failed to get original destination: {0}")]
    OriginalDst(#[source] std::io::Error),

    /// The resolved target could not be reached.
    #[error("Failed to connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Creates a new configuration parse error.
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
        }
    }

    /// Creates a new configuration validation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Creates a new malformed request error.
    pub fn malformed_request(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
        }
    }
}

/// Result type alias using ProxyError.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProxyError::ConfigNotFound {
            path: "/etc/config.yaml".to_string(),
        };
        assert!(err.to_string().contains("/etc/config.yaml"));

        let err = ProxyError::config_parse("invalid yaml");
        assert!(err.to_string().contains("invalid yaml"));

        let err = ProxyError::Unsupported { platform: "Windows" };
        assert_eq!(err.to_string(), "Windows does not support transparent proxy");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let proxy_err: ProxyError = io_err.into();
        assert!(matches!(proxy_err, ProxyError::Io(_)));
    }

    #[test]
    fn test_dial_error_names_target() {
        let err = ProxyError::Dial {
            target: "1.2.3.4:443".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        let msg = err.to_string();
        assert!(msg.contains("1.2.3.4:443"));
        assert!(msg.contains("refused"));
    }
}
