//! Turn protocol state machine.
//!
//! Consumes classified inbound messages, drives the playback jitter buffer,
//! forwards lifecycle events to the observer, and emits the outbound signals
//! the protocol requires, most importantly the continue signal: sent once per
//! audio-or-text fragment that arrives while the model turn is still open.
//! All methods run on the session's single driver task, so the mutable state
//! here needs no locking.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::audio::capture::CaptureChunk;
use crate::audio::playback::PlaybackHandle;
use crate::channel::{ChannelEvent, DuplexChannel};
use crate::config::TranscriptResetPolicy;
use crate::error::{LiveError, LiveResult};
use crate::events::{CloseEvent, SessionObserver};
use crate::protocol::messages::{ClientMessage, InboundMessage, ServerContent, ServerMessage};

/// Consecutive transport-failure counter with a terminal ceiling.
///
/// Reset only by setup completion, not by mere reconnection.
#[derive(Debug)]
pub struct AttemptCounter {
    attempts: u32,
    ceiling: u32,
}

impl AttemptCounter {
    /// Create a counter with the given ceiling.
    pub fn new(ceiling: u32) -> Self {
        Self {
            attempts: 0,
            ceiling,
        }
    }

    /// Record one failure. Returns true when the ceiling has been reached.
    pub fn record_failure(&mut self) -> bool {
        self.attempts += 1;
        self.attempts >= self.ceiling
    }

    /// Reset on successful setup.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive failures recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Cumulative transcription buffer.
///
/// Append-only by default; the reset policy is the explicit seam for bounding
/// growth at turn boundaries.
#[derive(Debug)]
pub struct TranscriptBuffer {
    text: String,
    policy: TranscriptResetPolicy,
}

impl TranscriptBuffer {
    /// Create an empty buffer with the given policy.
    pub fn new(policy: TranscriptResetPolicy) -> Self {
        Self {
            text: String::new(),
            policy,
        }
    }

    /// Append a fragment and return the cumulative transcript.
    pub fn append(&mut self, fragment: &str) -> &str {
        self.text.push_str(fragment);
        &self.text
    }

    /// Apply the reset policy at a turn boundary.
    pub fn handle_turn_complete(&mut self) {
        if self.policy == TranscriptResetPolicy::OnTurnComplete {
            self.text.clear();
        }
    }

    /// Current cumulative transcript.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Hook invoked before the first fragment of inbound audio is queued, giving
/// the session a chance to open the output device lazily.
pub type OutputReady = Arc<dyn Fn() -> LiveResult<()> + Send + Sync>;

/// The session-level protocol controller.
pub struct TurnEngine {
    playback: PlaybackHandle,
    observer: Arc<dyn SessionObserver>,
    attempts: AttemptCounter,
    transcript: TranscriptBuffer,
    turn_open: bool,
    ensure_output: Option<OutputReady>,
}

impl TurnEngine {
    /// Create an engine driving `playback` and reporting to `observer`.
    pub fn new(
        playback: PlaybackHandle,
        observer: Arc<dyn SessionObserver>,
        attempt_ceiling: u32,
        transcript_reset: TranscriptResetPolicy,
    ) -> Self {
        Self {
            playback,
            observer,
            attempts: AttemptCounter::new(attempt_ceiling),
            transcript: TranscriptBuffer::new(transcript_reset),
            turn_open: false,
            ensure_output: None,
        }
    }

    /// Register the lazy output-initialization hook.
    pub fn with_output_ready(mut self, hook: OutputReady) -> Self {
        self.ensure_output = Some(hook);
        self
    }

    /// Whether an inbound turn is currently open.
    pub fn turn_open(&self) -> bool {
        self.turn_open
    }

    /// Consecutive transport failures recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.attempts()
    }

    /// Current cumulative transcript.
    pub fn transcript(&self) -> &str {
        self.transcript.as_str()
    }

    /// Dispatch one channel event.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent, channel: &dyn DuplexChannel) {
        match event {
            ChannelEvent::Connected => debug!("channel connected"),
            ChannelEvent::Message(raw) => self.handle_raw(&raw, channel).await,
            ChannelEvent::Error(message) => self.record_transport_error(message),
            ChannelEvent::Closed { code, reason } => {
                debug!(code, %reason, "channel closed");
                self.observer.on_close(&CloseEvent { code, reason });
            }
        }
    }

    /// Parse and dispatch one raw inbound message. Malformed messages are
    /// reported through the error event and never terminate the session.
    pub async fn handle_raw(&mut self, raw: &str, channel: &dyn DuplexChannel) {
        let message: ServerMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                self.observer
                    .on_error(&LiveError::Protocol(format!("malformed message: {e}")));
                return;
            }
        };

        match message.classify() {
            Some(InboundMessage::SetupComplete) => {
                self.attempts.reset();
                self.observer.on_setup_complete();
            }
            Some(InboundMessage::ToolCall(call)) => {
                // No protocol-level transformation.
                self.observer.on_tool_call(&call);
            }
            Some(InboundMessage::Content(content)) => {
                self.handle_content(content, channel).await;
            }
            Some(InboundMessage::Transcription(fragment)) => {
                let cumulative = self.transcript.append(&fragment);
                self.observer.on_transcription_update(cumulative);
            }
            None => trace!("ignoring unclassified inbound message"),
        }
    }

    async fn handle_content(&mut self, content: ServerContent, channel: &dyn DuplexChannel) {
        if content.is_interrupted() {
            // Barge-in: cut playback instantly, discard the rest of the message.
            self.playback.stop();
            self.turn_open = false;
            self.observer.on_interrupted();
            return;
        }

        let turn_complete = content.is_turn_complete();

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    match inline.decode() {
                        Ok(pcm) => {
                            self.turn_open = true;
                            if let Some(ready) = &self.ensure_output
                                && let Err(e) = ready()
                            {
                                self.observer.on_error(&e);
                            }
                            self.playback.add_fragment(&pcm);
                            self.playback.resume();
                            self.observer.on_audio_received(&Bytes::from(pcm));
                            if !turn_complete {
                                self.send(channel, ClientMessage::continue_signal()).await;
                            }
                        }
                        Err(e) => {
                            self.observer
                                .on_error(&LiveError::Protocol(format!("bad audio payload: {e}")));
                        }
                    }
                }
                if let Some(text) = part.text {
                    self.turn_open = true;
                    self.observer.on_text(&text);
                    if !turn_complete {
                        self.send(channel, ClientMessage::continue_signal()).await;
                    }
                }
            }
        }

        if turn_complete {
            self.turn_open = false;
            self.transcript.handle_turn_complete();
            self.playback.complete();
            self.observer.on_turn_complete();
        }
    }

    fn record_transport_error(&mut self, message: String) {
        if self.attempts.record_failure() {
            self.observer.on_error(&LiveError::MaxAttemptsReached {
                attempts: self.attempts.attempts(),
                message,
            });
        } else {
            self.observer.on_error(&LiveError::ConnectionFailed(message));
        }
    }

    /// Forward an encoded capture chunk as a realtime media chunk.
    pub async fn send_audio_chunk(&self, chunk: CaptureChunk, channel: &dyn DuplexChannel) {
        self.send(channel, ClientMessage::audio_chunk(chunk.data)).await;
    }

    async fn send(&self, channel: &dyn DuplexChannel, message: ClientMessage) {
        // Fire-and-forget: the protocol tracks no acknowledgments.
        if let Err(e) = channel.send(message).await {
            warn!("outbound send failed: {e}");
        }
    }
}
