//! Session façade.
//!
//! [`LiveSession`] composes the duplex channel, the turn protocol engine, the
//! capture pipeline, and the playback path behind one event-driven API. A
//! single driver task owns the engine and multiplexes channel events with
//! capture chunks, so every protocol handler runs to completion without
//! preemption.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::audio::capture::{CaptureChunk, CapturePipeline, CaptureSource, ChunkSink};
use crate::audio::device::{MicSource, SpeakerSink};
use crate::audio::meter::{VolumeEstimator, VolumeHandle};
use crate::audio::playback::{PlaybackHandle, SampleClock};
use crate::channel::{ChannelStatus, DuplexChannel, WebSocketChannel};
use crate::config::SessionOptions;
use crate::error::{LiveError, LiveResult};
use crate::events::SessionObserver;
use crate::protocol::messages::ClientMessage;
use crate::protocol::turn::TurnEngine;

/// Capacity of the capture-chunk queue feeding the driver task.
const CHUNK_QUEUE_CAPACITY: usize = 64;

/// Factory producing a capture source for the session sample rate. The
/// default acquires the system microphone; embedders can substitute their own
/// source for headless operation.
pub type CaptureFactory = Box<dyn Fn(u32) -> Box<dyn CaptureSource> + Send + Sync>;

/// Playback-side device state: the speaker sink is opened lazily on the first
/// inbound audio fragment and owns the output device exclusively.
struct AudioOutput {
    sample_rate: u32,
    playback: PlaybackHandle,
    clock: Arc<SampleClock>,
    meter: Arc<Mutex<Option<VolumeEstimator>>>,
    sink: Mutex<Option<SpeakerSink>>,
}

impl AudioOutput {
    fn ensure_open(&self) -> LiveResult<()> {
        let mut sink = self.sink.lock();
        if sink.is_some() {
            return Ok(());
        }
        *sink = Some(SpeakerSink::open(
            self.playback.clone(),
            self.clock.clone(),
            self.meter.clone(),
            self.sample_rate,
        )?);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.sink.lock().is_some()
    }

    fn close(&self) {
        if let Some(mut sink) = self.sink.lock().take() {
            sink.close();
        }
    }
}

/// A live conversation session.
pub struct LiveSession {
    options: SessionOptions,
    channel: Arc<dyn DuplexChannel>,
    observer: Arc<dyn SessionObserver>,
    playback: PlaybackHandle,
    output: Arc<AudioOutput>,
    capture: Mutex<Option<CapturePipeline>>,
    capture_factory: CaptureFactory,
    chunk_tx: mpsc::Sender<CaptureChunk>,
    chunk_rx: Mutex<Option<mpsc::Receiver<CaptureChunk>>>,
    recording: AtomicBool,
    auto_output: bool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSession {
    /// Create a session over a WebSocket channel to `options.endpoint`.
    pub fn new(options: SessionOptions, observer: Arc<dyn SessionObserver>) -> LiveResult<Self> {
        options.validate()?;
        let channel = Arc::new(WebSocketChannel::new(&options));
        Self::with_channel(options, observer, channel)
    }

    /// Create a session over a caller-supplied duplex channel.
    pub fn with_channel(
        options: SessionOptions,
        observer: Arc<dyn SessionObserver>,
        channel: Arc<dyn DuplexChannel>,
    ) -> LiveResult<Self> {
        options.validate()?;
        let clock = Arc::new(SampleClock::new(options.sample_rate));
        let playback = PlaybackHandle::new(options.sample_rate, clock.clone());
        let output = Arc::new(AudioOutput {
            sample_rate: options.sample_rate,
            playback: playback.clone(),
            clock,
            meter: Arc::new(Mutex::new(None)),
            sink: Mutex::new(None),
        });
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
        Ok(Self {
            options,
            channel,
            observer,
            playback,
            output,
            capture: Mutex::new(None),
            capture_factory: Box::new(|sample_rate| Box::new(MicSource::new(sample_rate))),
            chunk_tx,
            chunk_rx: Mutex::new(Some(chunk_rx)),
            recording: AtomicBool::new(false),
            auto_output: true,
            driver: Mutex::new(None),
        })
    }

    /// Substitute the microphone with a custom capture source.
    pub fn with_capture_factory(mut self, factory: CaptureFactory) -> Self {
        self.capture_factory = factory;
        self
    }

    /// Do not open the speaker automatically on inbound audio. For headless
    /// embedders that pull rendered audio themselves.
    pub fn without_output_device(mut self) -> Self {
        self.auto_output = false;
        self
    }

    /// Connect the channel and start the driver task.
    pub async fn connect(&self) -> LiveResult<()> {
        self.channel.connect().await?;

        // The driver spawns once: the channel hands out its event stream a
        // single time.
        let Some(mut events) = self.channel.take_events() else {
            return Ok(());
        };
        let Some(mut chunks) = self.chunk_rx.lock().take() else {
            return Ok(());
        };

        let mut engine = TurnEngine::new(
            self.playback.clone(),
            self.observer.clone(),
            self.options.max_connection_attempts,
            self.options.transcript_reset,
        );
        if self.auto_output {
            let output = self.output.clone();
            engine = engine.with_output_ready(Arc::new(move || output.ensure_open()));
        }

        let channel = self.channel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => engine.handle_channel_event(event, channel.as_ref()).await,
                        None => break,
                    },
                    chunk = chunks.recv() => match chunk {
                        Some(chunk) => engine.send_audio_chunk(chunk, channel.as_ref()).await,
                        None => break,
                    },
                }
            }
            debug!("session driver ended");
        });
        *self.driver.lock() = Some(handle);
        Ok(())
    }

    /// Wait until the channel is connected, with the configured timeout.
    /// Rejects cleanly on timeout without leaving anything waiting.
    pub async fn ensure_connected(&self) -> LiveResult<()> {
        if self.channel.status() == ChannelStatus::Connected {
            return Ok(());
        }
        match timeout(self.options.connect_timeout, self.connect()).await {
            Ok(result) => result,
            Err(_) => Err(LiveError::Timeout("connection wait timed out".to_string())),
        }
    }

    /// Open the playback output device if it is not open yet.
    pub fn ensure_audio_initialized(&self) -> LiveResult<()> {
        self.output.ensure_open()
    }

    /// Acquire the microphone and start streaming chunks. No-op when already
    /// recording.
    pub fn start_recording(&self) -> LiveResult<()> {
        if self.recording.load(Ordering::SeqCst) {
            return Ok(());
        }

        let source = (self.capture_factory)(self.options.sample_rate);
        let mut pipeline = CapturePipeline::new(
            source,
            self.options.sample_rate,
            self.options.chunk_samples,
        );
        let tx = self.chunk_tx.clone();
        let on_chunk: ChunkSink = Arc::new(move |chunk| {
            // The capture thread never blocks: a full queue drops the chunk.
            if tx.try_send(chunk).is_err() {
                warn!("capture chunk queue full, dropping chunk");
            }
        });
        pipeline.start(on_chunk)?;

        *self.capture.lock() = Some(pipeline);
        self.recording.store(true, Ordering::SeqCst);
        self.observer.on_recording_started();
        Ok(())
    }

    /// Stop recording, release the microphone, and signal the end of the
    /// user's turn. No-op when not recording.
    pub async fn stop_recording(&self) {
        if !self.recording.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(mut pipeline) = self.capture.lock().take() {
            pipeline.stop();
        }
        if let Err(e) = self.channel.send(ClientMessage::end_of_turn()).await {
            debug!("end-of-turn send skipped: {e}");
        }
        self.observer.on_recording_stopped();
    }

    /// Toggle the capture mute gate. No-op unless recording.
    pub fn toggle_mute(&self) {
        if !self.recording.load(Ordering::SeqCst) {
            return;
        }
        let guard = self.capture.lock();
        let Some(pipeline) = guard.as_ref() else {
            return;
        };
        let muted = !pipeline.is_muted();
        if muted {
            pipeline.mute();
        } else {
            pipeline.unmute();
        }
        self.observer.on_mute_toggled(muted);
    }

    /// Whether the capture gate is currently muted.
    pub fn is_muted(&self) -> bool {
        self.capture.lock().as_ref().is_some_and(|p| p.is_muted())
    }

    /// Whether the session is recording.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Attach a volume meter to the microphone path.
    ///
    /// Misuse to call before recording has started.
    pub fn user_volume(&self) -> LiveResult<VolumeHandle> {
        let guard = self.capture.lock();
        let Some(pipeline) = guard.as_ref() else {
            return Err(LiveError::Misuse(
                "start recording before attaching a user volume meter".to_string(),
            ));
        };
        let handle = VolumeHandle::new();
        pipeline.attach_meter(handle.clone());
        Ok(handle)
    }

    /// Attach a volume meter to the playback path.
    ///
    /// Misuse to call before playback has been initialized.
    pub fn stream_volume(&self) -> LiveResult<VolumeHandle> {
        if !self.output.is_open() {
            return Err(LiveError::Misuse(
                "initialize audio playback before attaching a stream volume meter".to_string(),
            ));
        }
        let handle = VolumeHandle::new();
        *self.output.meter.lock() = Some(VolumeEstimator::new(handle.clone()));
        Ok(handle)
    }

    /// Send a completed user turn containing one text part.
    pub async fn send_text_message(&self, text: &str) -> LiveResult<()> {
        self.channel.send(ClientMessage::text_message(text)).await
    }

    /// Send function call results.
    pub async fn send_tool_response(&self, responses: serde_json::Value) -> LiveResult<()> {
        self.channel.send(ClientMessage::tool_response(responses)).await
    }

    /// Send one base64-encoded JPEG frame as a realtime media chunk.
    pub async fn send_frame(&self, base64_jpeg: &str) -> LiveResult<()> {
        self.channel.send(ClientMessage::video_frame(base64_jpeg)).await
    }

    /// Connection status derived from the channel's live state, never cached.
    pub fn connection_status(&self) -> ChannelStatus {
        self.channel.status()
    }

    /// Ordered teardown: stop recording, close the output device, close the
    /// channel, stop event dispatch. Idempotent.
    pub async fn destroy(&self) {
        self.stop_recording().await;
        self.output.close();
        if let Err(e) = self.channel.disconnect().await {
            debug!("channel disconnect during destroy: {e}");
        }
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }
}
