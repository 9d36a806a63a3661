//! Error types for the CamGrid core

use thiserror::Error;

/// Result type alias for CamGrid core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the CamGrid core
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, recoverable by caller correction
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A device with this ID is already registered
    #[error("Device {device_id} is already registered")]
    DuplicateDevice {
        /// Device ID that collided
        device_id: String,
    },

    /// No registered device with this ID
    #[error("Device {device_id} not found")]
    DeviceNotFound {
        /// Device ID that was looked up
        device_id: String,
    },

    /// No active streaming session with this ID
    #[error("Streaming session {session_id} not found")]
    SessionNotFound {
        /// Session ID that was looked up
        session_id: String,
    },

    /// Device or network failure, retryable by the caller
    #[error("Connection to device {device_id} failed: {reason}")]
    Connection {
        /// Device the call was addressed to
        device_id: String,
        /// Failure detail
        reason: String,
    },

    /// Circuit breaker is open for this device (too many failures)
    #[error("Circuit breaker open for device {device_id}")]
    CircuitOpen {
        /// Device whose breaker tripped
        device_id: String,
    },

    /// Upstream stream or subprocess failure, terminal for the operation
    #[error("Upstream error: {reason}")]
    Upstream {
        /// Failure detail
        reason: String,
    },

    /// Segment name escaped the session directory - always a client error
    #[error("Invalid segment name: {name}")]
    InvalidPath {
        /// The rejected name
        name: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Connection error for a specific device
    pub fn connection(device_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Connection {
            device_id: device_id.into(),
            reason: reason.into(),
        }
    }

    /// Upstream stream/subprocess error
    pub fn upstream(reason: impl Into<String>) -> Self {
        Error::Upstream {
            reason: reason.into(),
        }
    }

    /// Device lookup miss
    pub fn device_not_found(device_id: impl Into<String>) -> Self {
        Error::DeviceNotFound {
            device_id: device_id.into(),
        }
    }

    /// Session lookup miss
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Error::SessionNotFound {
            session_id: session_id.into(),
        }
    }
}
