//! Unified error system for Tandem
//!
//! A single error type shared by the engine, its records and every
//! collaborator interface. Expected adverse conditions (peer garbage, bad
//! signatures, replays) are not errors: protocols route them to a terminal
//! state. What remains here is the programming-error and storage class.

use serde::{Deserialize, Serialize};

/// Unified error type for all Tandem operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TandemError {
    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// Error message describing what was not found
        message: String,
    },

    /// A record with the same identity already exists
    #[error("Already exists: {message}")]
    AlreadyExists {
        /// Error message naming the duplicated record
        message: String,
    },

    /// A message targeted a protocol instance that does not exist
    #[error("Unknown protocol instance: {message}")]
    UnknownProtocolInstance {
        /// Error message naming the missing instance
        message: String,
    },

    /// Message arguments do not match the shape its kind expects
    #[error("Malformed message: {message}")]
    MalformedMessage {
        /// Error message describing the mismatch
        message: String,
    },

    /// Persisted protocol state could not be decoded
    #[error("Malformed state: {message}")]
    MalformedState {
        /// Error message describing the decoding failure
        message: String,
    },

    /// Cryptographic operation failed
    #[error("Crypto error: {message}")]
    Crypto {
        /// Error message describing the cryptographic failure
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Storage operation failed
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Optimistic concurrency conflict detected at commit
    #[error("Conflict: {message}")]
    Conflict {
        /// Error message naming the conflicting record
        message: String,
    },

    /// Internal consistency error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl TandemError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an already exists error
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            message: message.into(),
        }
    }

    /// Create an unknown protocol instance error
    pub fn unknown_protocol_instance(message: impl Into<String>) -> Self {
        Self::UnknownProtocolInstance {
            message: message.into(),
        }
    }

    /// Create a malformed message error
    pub fn malformed_message(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }

    /// Create a malformed state error
    pub fn malformed_state(message: impl Into<String>) -> Self {
        Self::MalformedState {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether re-running the operation in a fresh transaction may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Standard Result type for Tandem operations
pub type Result<T> = std::result::Result<T, TandemError>;

impl From<serde_cbor::Error> for TandemError {
    fn from(err: serde_cbor::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<bincode::Error> for TandemError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for TandemError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::storage(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TandemError::malformed_message("expected 2 arguments, got 1");
        assert!(matches!(err, TandemError::MalformedMessage { .. }));
        assert_eq!(
            err.to_string(),
            "Malformed message: expected 2 arguments, got 1"
        );
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(TandemError::conflict("protocol/instance/x").is_retryable());
        assert!(!TandemError::internal("boom").is_retryable());
        assert!(!TandemError::storage("disk").is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "config missing");
        let err = TandemError::from(io_err);
        assert!(matches!(err, TandemError::NotFound { .. }));
    }
}
