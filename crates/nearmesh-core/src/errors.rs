//! Error types for the NearMesh relay
//!
//! Benign races (events for endpoints that were already removed, duplicate or
//! malformed payloads) are not errors here; they surface as drop reasons in the
//! router's outcome. Errors are reserved for transport capability failures,
//! envelope encoding problems, closed channels, and invalid configuration.

use crate::channel::SetupOperation;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures reported by a transport adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{operation} failed: {reason}")]
    SetupFailed {
        operation: SetupOperation,
        reason: String,
    },
    #[error("Endpoint not found: {endpoint}")]
    EndpointNotFound { endpoint: String },
    #[error("Send to {endpoint} failed: {reason}")]
    SendFailed { endpoint: String, reason: String },
    #[error("Connection request to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },
}

/// Wire envelope encoding and decoding failures
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Envelope must be a JSON object")]
    NotAnObject,
    #[error("Envelope is not valid UTF-8")]
    InvalidUtf8,
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the NearMesh relay
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The runtime task on the other side of a channel has stopped
    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl MeshError {
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        MeshError::Channel {
            message: message.into(),
        }
    }

    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        MeshError::Configuration {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, MeshError>;
pub type MeshResult<T> = Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_failure_message_names_operation() {
        let err = MeshError::from(TransportError::SetupFailed {
            operation: SetupOperation::Discovery,
            reason: "permission denied".into(),
        });
        assert_eq!(
            err.to_string(),
            "Transport error: discovery failed: permission denied"
        );
    }

    #[test]
    fn test_constructors() {
        assert!(matches!(
            MeshError::channel_error("closed"),
            MeshError::Channel { message } if message == "closed"
        ));
        assert_eq!(
            MeshError::config_error("empty name").to_string(),
            "Configuration error: empty name"
        );
    }
}
