//! Duplex channel abstraction.
//!
//! The session never talks to a transport directly; it consumes a stream of
//! [`ChannelEvent`]s and sends [`ClientMessage`]s through the
//! [`DuplexChannel`] trait. Connection and reconnection mechanics live behind
//! this seam: the session only observes connect/error/close signals and
//! performs its own attempt accounting on top of them.

mod websocket;

pub use websocket::WebSocketChannel;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LiveResult;
use crate::protocol::ClientMessage;

/// Events emitted by a duplex channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The channel is connected and ready.
    Connected,
    /// A raw inbound message (JSON text).
    Message(String),
    /// A transport-level error.
    Error(String),
    /// The channel closed.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// Live connection status, derived from the channel's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelStatus {
    /// Connected and ready.
    Connected,
    /// Not connected.
    #[default]
    Disconnected,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Connected => write!(f, "connected"),
            ChannelStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A reliable, message-oriented duplex channel.
#[async_trait]
pub trait DuplexChannel: Send + Sync {
    /// Connect the channel. Returns once the channel is ready; no-op when
    /// already connected.
    async fn connect(&self) -> LiveResult<()>;

    /// Disconnect the channel. Idempotent.
    async fn disconnect(&self) -> LiveResult<()>;

    /// Current status, read from the live connection state (never cached).
    fn status(&self) -> ChannelStatus;

    /// Send a message. Fire-and-forget; delivery is the transport's concern.
    async fn send(&self, message: ClientMessage) -> LiveResult<()>;

    /// Take the inbound event receiver. Yields `Some` exactly once; the
    /// single consumer owns the stream for the channel's lifetime.
    fn take_events(&self) -> Option<mpsc::Receiver<ChannelEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ChannelStatus::Connected.to_string(), "connected");
        assert_eq!(ChannelStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(ChannelStatus::default(), ChannelStatus::Disconnected);
    }
}
