//! Error types and handling
//!
//! This module provides the error type used throughout the acquisition
//! pipeline. Every stage (registry, discovery, download, validation, load)
//! reports failures through [`AcquireError`], and the [`AcquireErrorExt`]
//! trait tells callers whether a failure is worth retrying.
//!
//! # Retry Policy
//!
//! Only transient transport failures ([`AcquireError::Network`]) are
//! retryable. Trust decisions (`Blocked`, `UntrustedSource`,
//! `ChecksumMismatch`, `SignatureInvalid`) are deterministic and retrying
//! them cannot change the outcome. `Timeout` is terminal for the stage that
//! exceeded it.
//!
//! # Fan-out
//!
//! `AcquireError` is `Clone` so that one failed transfer can be reported
//! identically to every caller that joined it. I/O errors are therefore
//! captured by message rather than by value.

use thiserror::Error;

/// Result alias used across the sdk and engine
pub type Result<T> = std::result::Result<T, AcquireError>;

/// Trait for acquisition error extensions
///
/// Provides a user-safe hint and the retry classification for an error.
pub trait AcquireErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint never contains credentials, local paths or URLs.
    fn user_hint(&self) -> &str;

    /// Returns whether the failed operation may be retried locally
    fn is_retryable(&self) -> bool;
}

/// Main acquisition error type
///
/// # Examples
///
/// ```
/// use warden_sdk::errors::{AcquireError, AcquireErrorExt};
///
/// let transient = AcquireError::Network { message: "connection reset".into(), retries: 0 };
/// assert!(transient.is_retryable());
///
/// let fatal = AcquireError::SignatureInvalid("unknown signer".into());
/// assert!(!fatal.is_retryable());
/// ```
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquireError {
    // Source errors
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Untrusted source: {0}")]
    UntrustedSource(String),

    #[error("Blocked: {0}")]
    Blocked(String),

    // Transport errors
    #[error("Network error after {retries} retries: {message}")]
    Network { message: String, retries: u32 },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),

    // Artifact errors
    #[error("Size exceeded: {size} bytes > {limit} bytes")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    // Lookup and lifecycle errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Plugin load failed: {0}")]
    LoadFailed(String),

    // Ambient errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl AcquireError {
    /// Shorthand for a first-attempt network failure
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retries: 0,
        }
    }

    /// Returns a copy of this error annotated with the number of retries spent.
    ///
    /// Only `Network` errors carry a retry count; other variants are returned
    /// unchanged.
    pub fn with_retries(self, count: u32) -> Self {
        match self {
            Self::Network { message, .. } => Self::Network {
                message,
                retries: count,
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for AcquireError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AcquireError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl AcquireErrorExt for AcquireError {
    fn user_hint(&self) -> &str {
        match self {
            // Source errors
            Self::InvalidSource(_) => "Check the source URL and its configured policy",
            Self::UntrustedSource(_) => "Source reputation or trust level is too low",
            Self::Blocked(_) => "This source is on the blocked list",

            // Transport errors
            Self::Network { .. } => "Network operation failed. Check your connection",
            Self::Timeout(_) => "The operation took too long. Try again later",
            Self::HttpStatus(_) => "The remote server rejected the request",

            // Artifact errors
            Self::SizeExceeded { .. } => "Plugin package is larger than allowed",
            Self::ChecksumMismatch { .. } => {
                "Security verification failed. File may be corrupted or tampered"
            }
            Self::SignatureInvalid(_) => "Security verification failed. Signature is not valid",

            // Lookup and lifecycle errors
            Self::NotFound(_) => "The requested item does not exist",
            Self::Cancelled => "The operation was cancelled",
            Self::NotSupported(_) => "This operation is not supported for the source",
            Self::InvalidArgument(_) => "The request contains an invalid value",
            Self::LoadFailed(_) => "The plugin could not be loaded",

            // Ambient errors
            Self::Config(_) => "Check your configuration for errors",
            Self::Serialization(_) => "Received data could not be decoded",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_is_retryable() {
        assert!(AcquireError::network("reset").is_retryable());

        let terminal = [
            AcquireError::Timeout("download".into()),
            AcquireError::Blocked("evil.example.com".into()),
            AcquireError::UntrustedSource("low reputation".into()),
            AcquireError::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into(),
            },
            AcquireError::SignatureInvalid("bad".into()),
            AcquireError::HttpStatus(403),
            AcquireError::Cancelled,
        ];
        for error in terminal {
            assert!(!error.is_retryable(), "{error} must not be retryable");
        }
    }

    #[test]
    fn test_with_retries_only_touches_network() {
        let e = AcquireError::network("reset").with_retries(3);
        assert_eq!(
            e,
            AcquireError::Network {
                message: "reset".into(),
                retries: 3
            }
        );
        assert_eq!(
            AcquireError::Cancelled.with_retries(3),
            AcquireError::Cancelled
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: AcquireError = io.into();
        assert!(matches!(e, AcquireError::Io(ref m) if m.contains("gone")));
        assert_eq!(e.user_hint(), "File system operation failed");
    }
}
