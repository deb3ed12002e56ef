//! Session lifecycle events.
//!
//! Consumers observe a session by implementing [`SessionObserver`]. Every
//! method has a default no-op body, so an observer only overrides the events
//! it cares about. All callbacks are invoked from the session's single driver
//! task, in the order the underlying events occurred.

use bytes::Bytes;

use crate::error::LiveError;

/// Close information from the duplex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Channel close code.
    pub code: u16,
    /// Human-readable close reason, possibly empty.
    pub reason: String,
}

/// Observer for session lifecycle events.
///
/// One method per event; default implementations ignore the event.
#[allow(unused_variables)]
pub trait SessionObserver: Send + Sync {
    /// The server finished session setup.
    fn on_setup_complete(&self) {}

    /// A decoded PCM audio fragment was received and queued for playback.
    fn on_audio_received(&self, pcm: &Bytes) {}

    /// A text payload arrived inside a model turn.
    fn on_text(&self, text: &str) {}

    /// The server requested a tool invocation. Forwarded verbatim.
    fn on_tool_call(&self, call: &serde_json::Value) {}

    /// The in-flight model turn was abandoned (barge-in).
    fn on_interrupted(&self) {}

    /// The model turn completed.
    fn on_turn_complete(&self) {}

    /// An asynchronous failure occurred.
    fn on_error(&self, error: &LiveError) {}

    /// The duplex channel closed.
    fn on_close(&self, event: &CloseEvent) {}

    /// The cumulative transcription buffer changed.
    fn on_transcription_update(&self, transcript: &str) {}

    /// Microphone capture started.
    fn on_recording_started(&self) {}

    /// Microphone capture stopped.
    fn on_recording_stopped(&self) {}

    /// The capture mute gate was toggled.
    fn on_mute_toggled(&self, muted: bool) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl SessionObserver for NullObserver {}
