//! Microphone capture and encode pipeline.
//!
//! Raw device frames are cut into fixed-size windows, encoded once
//! (f32 → PCM16-LE → base64), and handed to the registered chunk callback.
//! The mute gate suppresses forwarding only: windows keep being cut at the
//! same cadence, so unmuting never renegotiates the device or shifts timing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use base64::prelude::*;
use parking_lot::Mutex;
use tracing::debug;

use super::f32_to_pcm16;
use super::meter::{VolumeEstimator, VolumeHandle};
use crate::error::LiveResult;

/// One encoded capture chunk, immutable after encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureChunk {
    /// Base64-encoded PCM16-LE window.
    pub data: String,
    /// Window length in samples.
    pub samples: usize,
}

/// Callback receiving encoded chunks; invoked on the capture thread.
pub type ChunkSink = Arc<dyn Fn(CaptureChunk) + Send + Sync>;

/// Callback receiving raw device frames.
pub type FrameSink = Box<dyn FnMut(&[f32]) + Send>;

/// Source of raw microphone frames at the session sample rate.
///
/// The cpal microphone implements this; tests feed frames directly.
pub trait CaptureSource: Send {
    /// Acquire the device and begin delivering frames to `on_frame`.
    /// Acquisition failure must surface here, never as a silent no-op.
    fn start(&mut self, on_frame: FrameSink) -> LiveResult<()>;

    /// Release the device. Idempotent.
    fn stop(&mut self);
}

/// Capture pipeline: source → fixed windows → encode → chunk callback.
pub struct CapturePipeline {
    source: Box<dyn CaptureSource>,
    sample_rate: u32,
    chunk_samples: usize,
    muted: Arc<AtomicBool>,
    suppressed: Arc<AtomicUsize>,
    meter: Arc<Mutex<Option<VolumeEstimator>>>,
    running: bool,
}

impl CapturePipeline {
    /// Create a pipeline over `source`.
    pub fn new(source: Box<dyn CaptureSource>, sample_rate: u32, chunk_samples: usize) -> Self {
        Self {
            source,
            sample_rate,
            chunk_samples,
            muted: Arc::new(AtomicBool::new(false)),
            suppressed: Arc::new(AtomicUsize::new(0)),
            meter: Arc::new(Mutex::new(None)),
            running: false,
        }
    }

    /// Acquire the microphone and start emitting chunks. No-op when already
    /// running; idempotency across the public API lives in the session.
    pub fn start(&mut self, on_chunk: ChunkSink) -> LiveResult<()> {
        if self.running {
            return Ok(());
        }

        let muted = self.muted.clone();
        let suppressed = self.suppressed.clone();
        let meter = self.meter.clone();
        let chunk_samples = self.chunk_samples;
        let rate = self.sample_rate as f64;
        let mut pending: Vec<f32> = Vec::with_capacity(chunk_samples * 2);
        let mut samples_seen: u64 = 0;

        let on_frame: FrameSink = Box::new(move |frame: &[f32]| {
            if let Some(estimator) = meter.lock().as_mut() {
                estimator.process(Some(frame), samples_seen as f64 / rate);
            }
            samples_seen += frame.len() as u64;

            pending.extend_from_slice(frame);
            while pending.len() >= chunk_samples {
                let window: Vec<f32> = pending.drain(..chunk_samples).collect();
                let chunk = CaptureChunk {
                    data: BASE64_STANDARD.encode(f32_to_pcm16(&window)),
                    samples: chunk_samples,
                };
                if muted.load(Ordering::Relaxed) {
                    suppressed.fetch_add(1, Ordering::Relaxed);
                } else {
                    on_chunk(chunk);
                }
            }
        });

        self.source.start(on_frame)?;
        self.running = true;
        debug!(chunk_samples, "capture pipeline started");
        Ok(())
    }

    /// Release the microphone and stop all chunk emission. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.source.stop();
        self.running = false;
        self.muted.store(false, Ordering::Relaxed);
        debug!("capture pipeline stopped");
    }

    /// Gate chunk forwarding without touching the device.
    pub fn mute(&self) {
        self.muted.store(true, Ordering::Relaxed);
    }

    /// Re-open the gate.
    pub fn unmute(&self) {
        self.muted.store(false, Ordering::Relaxed);
    }

    /// Whether the gate is closed.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Whether the pipeline is running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Chunks cut but withheld while muted.
    pub fn suppressed_chunks(&self) -> usize {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Attach a volume meter fed from raw capture frames.
    pub fn attach_meter(&self, handle: VolumeHandle) {
        *self.meter.lock() = Some(VolumeEstimator::new(handle));
    }

    /// Detach the volume meter, if any.
    pub fn detach_meter(&self) {
        *self.meter.lock() = None;
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm16_to_f32;
    use crate::error::LiveError;

    /// Source that lets the test drive frames by hand.
    struct ScriptedSource {
        sink: Arc<Mutex<Option<FrameSink>>>,
        fail_start: bool,
    }

    impl ScriptedSource {
        fn new() -> (Self, Arc<Mutex<Option<FrameSink>>>) {
            let sink = Arc::new(Mutex::new(None));
            (
                Self {
                    sink: sink.clone(),
                    fail_start: false,
                },
                sink,
            )
        }

        fn failing() -> Self {
            Self {
                sink: Arc::new(Mutex::new(None)),
                fail_start: true,
            }
        }
    }

    impl CaptureSource for ScriptedSource {
        fn start(&mut self, on_frame: FrameSink) -> LiveResult<()> {
            if self.fail_start {
                return Err(LiveError::Device("no default input device".to_string()));
            }
            *self.sink.lock() = Some(on_frame);
            Ok(())
        }

        fn stop(&mut self) {
            *self.sink.lock() = None;
        }
    }

    fn push(sink: &Arc<Mutex<Option<FrameSink>>>, frame: &[f32]) {
        let mut guard = sink.lock();
        guard.as_mut().expect("source not started")(frame);
    }

    fn collector() -> (ChunkSink, Arc<Mutex<Vec<CaptureChunk>>>) {
        let chunks: Arc<Mutex<Vec<CaptureChunk>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = chunks.clone();
        (
            Arc::new(move |chunk| sink.lock().push(chunk)),
            chunks,
        )
    }

    #[test]
    fn test_chunks_cut_at_fixed_size() {
        let (source, frames) = ScriptedSource::new();
        let mut pipeline = CapturePipeline::new(Box::new(source), 24_000, 1024);
        let (on_chunk, chunks) = collector();
        pipeline.start(on_chunk).unwrap();

        push(&frames, &vec![0.1; 1000]);
        assert_eq!(chunks.lock().len(), 0);
        push(&frames, &vec![0.1; 1000]);
        assert_eq!(chunks.lock().len(), 1);
        push(&frames, &vec![0.1; 1100]);
        assert_eq!(chunks.lock().len(), 3);
        assert!(chunks.lock().iter().all(|c| c.samples == 1024));
    }

    #[test]
    fn test_encoding_round_trips() {
        let (source, frames) = ScriptedSource::new();
        let mut pipeline = CapturePipeline::new(Box::new(source), 24_000, 8);
        let (on_chunk, chunks) = collector();
        pipeline.start(on_chunk).unwrap();

        let window = [0.0, 0.25, -0.25, 0.5, -0.5, 0.75, -0.75, 1.0];
        push(&frames, &window);

        let encoded = chunks.lock()[0].data.clone();
        let decoded = pcm16_to_f32(&BASE64_STANDARD.decode(&encoded).unwrap());
        for (orig, round) in window.iter().zip(&decoded) {
            assert!((orig - round).abs() < 2.0 / 32_768.0);
        }
    }

    #[test]
    fn test_mute_suppresses_forwarding_but_keeps_cadence() {
        let (source, frames) = ScriptedSource::new();
        let mut pipeline = CapturePipeline::new(Box::new(source), 24_000, 100);
        let (on_chunk, chunks) = collector();
        pipeline.start(on_chunk).unwrap();

        push(&frames, &vec![0.1; 100]);
        assert_eq!(chunks.lock().len(), 1);

        pipeline.mute();
        assert!(pipeline.is_muted());
        push(&frames, &vec![0.1; 100]);
        push(&frames, &vec![0.1; 100]);
        // Windows were still cut at the same cadence, just withheld.
        assert_eq!(chunks.lock().len(), 1);
        assert_eq!(pipeline.suppressed_chunks(), 2);

        pipeline.unmute();
        push(&frames, &vec![0.1; 100]);
        assert_eq!(chunks.lock().len(), 2);
    }

    #[test]
    fn test_stop_halts_emission_and_is_idempotent() {
        let (source, frames) = ScriptedSource::new();
        let mut pipeline = CapturePipeline::new(Box::new(source), 24_000, 100);
        let (on_chunk, chunks) = collector();
        pipeline.start(on_chunk).unwrap();
        push(&frames, &vec![0.1; 100]);
        assert_eq!(chunks.lock().len(), 1);

        pipeline.stop();
        assert!(!pipeline.is_running());
        assert!(frames.lock().is_none());
        pipeline.stop();
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_stop_resets_mute_gate() {
        let (source, _frames) = ScriptedSource::new();
        let mut pipeline = CapturePipeline::new(Box::new(source), 24_000, 100);
        pipeline.start(Arc::new(|_| {})).unwrap();
        pipeline.mute();
        pipeline.stop();
        assert!(!pipeline.is_muted());
    }

    #[test]
    fn test_device_failure_surfaces_from_start() {
        let mut pipeline = CapturePipeline::new(Box::new(ScriptedSource::failing()), 24_000, 100);
        let result = pipeline.start(Arc::new(|_| {}));
        assert!(matches!(result, Err(LiveError::Device(_))));
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_meter_sees_capture_frames() {
        let (source, frames) = ScriptedSource::new();
        let mut pipeline = CapturePipeline::new(Box::new(source), 24_000, 100);
        let handle = VolumeHandle::new();
        pipeline.attach_meter(handle.clone());
        pipeline.start(Arc::new(|_| {})).unwrap();

        push(&frames, &vec![0.5; 100]);
        assert!((handle.value() - 0.5).abs() < 1e-6);
    }
}
