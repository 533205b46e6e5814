//! Error types and handling for EmProto
//!
//! This module defines the error taxonomy shared by the codec, the device
//! sessions and the communicator. Decode failures are recovered locally by
//! the receive loop, command failures are returned to the caller of that
//! command, and transport failures are fatal to the communicator.

use thiserror::Error;

/// Result type alias for EmProto operations
pub type Result<T> = std::result::Result<T, EvseError>;

/// Main error type for EmProto
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvseError {
    /// Buffer too short, bad framing or checksum
    #[error("Malformed datagram: {message}")]
    MalformedDatagram { message: String },

    /// Privileged command issued to a session that is not logged in
    #[error("Authentication required: {message}")]
    AuthRequired { message: String },

    /// Local validation failure, nothing was sent
    #[error("Invalid parameter: {field} - {message}")]
    InvalidParameter { field: String, message: String },

    /// No correlated response within the bound
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// The communicator stopped while the command was in flight
    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    /// Socket-level failure, fatal to the communicator
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// No live session for the requested serial
    #[error("Device not found: {serial}")]
    DeviceNotFound { serial: String },

    /// The device answered the login request with a password error
    #[error("Password rejected by {serial}")]
    PasswordRejected { serial: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl EvseError {
    /// Create a new malformed datagram error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        EvseError::MalformedDatagram {
            message: message.into(),
        }
    }

    /// Create a new auth-required error
    pub fn auth_required<S: Into<String>>(message: S) -> Self {
        EvseError::AuthRequired {
            message: message.into(),
        }
    }

    /// Create a new invalid parameter error
    pub fn invalid_parameter<S: Into<String>, M: Into<String>>(field: S, message: M) -> Self {
        EvseError::InvalidParameter {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        EvseError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new cancellation error
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        EvseError::Cancelled {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        EvseError::Transport {
            message: message.into(),
        }
    }

    /// Create a new device-not-found error
    pub fn device_not_found<S: Into<String>>(serial: S) -> Self {
        EvseError::DeviceNotFound {
            serial: serial.into(),
        }
    }

    /// Create a new password-rejected error
    pub fn password_rejected<S: Into<String>>(serial: S) -> Self {
        EvseError::PasswordRejected {
            serial: serial.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        EvseError::Config {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        EvseError::Io {
            message: message.into(),
        }
    }

    /// Whether this error ends the communicator rather than a single command
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvseError::Transport { .. })
    }
}

impl From<std::io::Error> for EvseError {
    fn from(err: std::io::Error) -> Self {
        EvseError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for EvseError {
    fn from(err: serde_yaml::Error) -> Self {
        EvseError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EvseError {
    fn from(err: serde_json::Error) -> Self {
        EvseError::Serialization {
            message: err.to_string(),
        }
    }
}
