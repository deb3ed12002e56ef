//! Client-side session manager for real-time, turn-based voice conversations.
//!
//! The crate interleaves four concerns over one duplex channel:
//!
//! - outbound microphone capture, chunked and base64-encoded ([`audio::capture`])
//! - inbound model audio, reassembled into gapless playback ([`audio::playback`])
//! - the turn protocol state machine driving continue/complete/interrupt
//!   signaling ([`protocol::turn`])
//! - low-latency volume metering for UI feedback ([`audio::meter`])
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voicelink::{LiveSession, NullObserver, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> voicelink::LiveResult<()> {
//!     let options = SessionOptions::new("wss://voice.example.com/live")
//!         .with_token("session-token");
//!     let session = LiveSession::new(options, Arc::new(NullObserver))?;
//!
//!     session.connect().await?;
//!     session.start_recording()?;
//!     // ... converse ...
//!     session.stop_recording().await;
//!     session.destroy().await;
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;

// Re-export commonly used items for convenience
pub use audio::{
    CaptureChunk, CapturePipeline, CaptureSource, PlaybackHandle, PlaybackState, VolumeHandle,
};
pub use channel::{ChannelEvent, ChannelStatus, DuplexChannel, WebSocketChannel};
pub use config::{SessionOptions, TranscriptResetPolicy};
pub use error::{LiveError, LiveResult};
pub use events::{CloseEvent, NullObserver, SessionObserver};
pub use protocol::{ClientMessage, ServerMessage, TurnEngine};
pub use session::LiveSession;
