//! Error types for the configuration runtime.

use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while accessing card state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested module, component or attribute does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A two-wire bus device did not acknowledge a byte
    #[error("No acknowledge from bus device {0:#04x}")]
    NoAck(u8),

    /// A bounded polling loop ran out of attempts
    #[error("Retry budget of {attempts} exhausted: {what}")]
    RetryExhausted {
        /// What was being waited for
        what: String,
        /// Number of attempts made
        attempts: usize,
    },

    /// Write attempted through a read-only accessor
    #[error("Read-only: {0}")]
    ReadOnly(String),

    /// Value type does not match the attribute's declared type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Declared type name
        expected: &'static str,
        /// Supplied type name
        actual: &'static str,
    },

    /// Resource already in use
    #[error("Resource busy: {0}")]
    Busy(String),

    /// Value string could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Convert to an appropriate errno value for FFI
    #[inline]
    #[must_use]
    #[allow(clippy::wildcard_enum_match_arm)]
    pub fn to_errno(&self) -> i32 {
        match *self {
            Error::InvalidInput(_) | Error::TypeMismatch { .. } | Error::Parse(_) => libc::EINVAL,
            Error::NotFound(_) => libc::ENOENT,
            Error::NoAck(_) => libc::ENXIO,
            Error::RetryExhausted { .. } => libc::ETIMEDOUT,
            Error::ReadOnly(_) => libc::EPERM,
            Error::Busy(_) => libc::EBUSY,
            Error::Io(ref e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => libc::EIO,
        }
    }

    /// Returns `true` if the error means the feature is absent rather than broken.
    #[inline]
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(
            *self,
            Error::NotFound(_) | Error::NoAck(_) | Error::RetryExhausted { .. }
        )
    }
}

/// Snapshot of an error kept in a last-error slot.
///
/// [`Error`] owns an [`io::Error`] and cannot be cloned, so slots keep the
/// errno and the rendered message instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// errno value of the original error
    pub errno: i32,
    /// Rendered error message
    pub message: String,
}

impl From<&Error> for LastError {
    fn from(err: &Error) -> Self {
        Self {
            errno: err.to_errno(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for LastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (errno {})", self.message, self.errno)
    }
}
