//! Error types for the voicelink client.
//!
//! All asynchronous failures are funneled to the session observer's `on_error`
//! callback; only initialization-time misuse is returned synchronously so the
//! caller's control flow sees it immediately.

use thiserror::Error;

/// Errors that can occur during a live session.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Connection to the server failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The duplex channel was closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Malformed inbound message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Microphone or speaker acquisition failed
    #[error("Device error: {0}")]
    Device(String),

    /// API misuse, raised synchronously at the call site
    #[error("Misuse: {0}")]
    Misuse(String),

    /// Transport error after the attempt ceiling was reached
    #[error("{message} (max attempts reached after {attempts})")]
    MaxAttemptsReached {
        /// Number of consecutive failed attempts
        attempts: u32,
        /// Message of the error that tripped the ceiling
        message: String,
    },
}

impl LiveError {
    /// Returns true if the error is terminal for the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LiveError::MaxAttemptsReached { .. })
    }
}

/// Result type for live session operations.
pub type LiveResult<T> = Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LiveError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = LiveError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn test_max_attempts_annotation() {
        let err = LiveError::MaxAttemptsReached {
            attempts: 3,
            message: "handshake refused".to_string(),
        };
        assert!(err.is_terminal());
        assert!(err.to_string().contains("max attempts reached"));
        assert!(err.to_string().contains("handshake refused"));
    }

    #[test]
    fn test_transient_errors_are_not_terminal() {
        assert!(!LiveError::ConnectionFailed("x".into()).is_terminal());
        assert!(!LiveError::Protocol("x".into()).is_terminal());
        assert!(!LiveError::Device("x".into()).is_terminal());
    }
}
