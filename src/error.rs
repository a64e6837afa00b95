//! Error types for the cluster transport.

use thiserror::Error;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors raised by the cluster transport.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// I/O errors from socket binding or send/recv.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration parameter.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// Socket-level errors not represented as plain I/O errors (bind
    /// exhaustion across the dynamic port range, missing interfaces, ...).
    #[error("socket error: {message}")]
    Socket {
        /// Description of the socket problem.
        message: String,
    },

    /// A datagram failed to parse as a well-formed frame.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Why the frame was rejected.
        reason: String,
    },

    /// Encoding or decoding a `ClusterMessage` payload failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization problem.
        message: String,
    },

    /// The transport has already been shut down.
    #[error("transport is shut down")]
    Shutdown,
}

impl ClusterError {
    /// Build a configuration error from any displayable message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Build a socket error from any displayable message.
    pub fn socket(message: impl Into<String>) -> Self {
        Self::Socket { message: message.into() }
    }

    /// Build an invalid-frame error from any displayable message.
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame { reason: reason.into() }
    }

    /// Build a serialization error from any displayable message.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Whether a worker loop should treat this as transient (log and
    /// continue) rather than fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::InvalidFrame { .. } | Self::Socket { .. })
    }
}
