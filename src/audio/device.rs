//! cpal device glue: microphone source and speaker sink.
//!
//! cpal streams are not `Send`, so each stream lives on a dedicated thread
//! that builds it, reports readiness back to the caller, and parks until the
//! stop flag flips. Device acquisition failures surface synchronously from
//! `start`/`open`, never as a silent no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

use crate::audio::playback::PlaybackClock;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::capture::{CaptureSource, FrameSink};
use super::meter::VolumeEstimator;
use super::playback::{PlaybackHandle, SampleClock};
use super::resample_linear;
use crate::error::{LiveError, LiveResult};

/// How long to wait for a device thread to report readiness.
const DEVICE_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval for the stop flag on device threads.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Average interleaved channels down to mono f32.
fn downmix_to_mono<T: Copy>(data: &[T], channels: usize, convert: impl Fn(T) -> f32) -> Vec<f32> {
    let channels = channels.max(1);
    let mut mono = Vec::with_capacity(data.len() / channels);
    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().map(|&s| convert(s)).sum();
        mono.push(sum / frame.len() as f32);
    }
    mono
}

// =============================================================================
// Microphone source
// =============================================================================

/// Default microphone as a [`CaptureSource`], normalized to mono f32 at the
/// session sample rate regardless of the device's native format.
pub struct MicSource {
    sample_rate: u32,
    running: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl MicSource {
    /// Create a source targeting the session sample rate. Does not touch the
    /// device until `start`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            running: None,
        }
    }
}

fn build_input_stream(target_rate: u32, mut on_frame: FrameSink) -> LiveResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| LiveError::Device("no default input device available".to_string()))?;
    let default_config = device
        .default_input_config()
        .map_err(|e| LiveError::Device(e.to_string()))?;
    let format = default_config.sample_format();
    let config: StreamConfig = default_config.into();
    let device_rate = config.sample_rate.0;
    let channels = usize::from(config.channels.max(1));
    debug!(?format, device_rate, channels, "opening input stream");

    let err_fn = |err| warn!("capture stream error: {err}");
    let mut deliver = move |mono: Vec<f32>| {
        if device_rate != target_rate {
            on_frame(&resample_linear(&mono, device_rate, target_rate));
        } else {
            on_frame(&mono);
        }
    };

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| deliver(downmix_to_mono(data, channels, |s| s)),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                deliver(downmix_to_mono(data, channels, |s| s as f32 / 32_768.0))
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _| {
                deliver(downmix_to_mono(data, channels, |s| {
                    (s as f32 - 32_768.0) / 32_768.0
                }))
            },
            err_fn,
            None,
        ),
        other => {
            return Err(LiveError::Device(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    };
    stream.map_err(|e| LiveError::Device(e.to_string()))
}

impl CaptureSource for MicSource {
    fn start(&mut self, on_frame: FrameSink) -> LiveResult<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let target_rate = self.sample_rate;
        let (ready_tx, ready_rx) = std_mpsc::channel::<LiveResult<()>>();

        let handle = std::thread::Builder::new()
            .name("voicelink-capture".to_string())
            .spawn(move || match build_input_stream(target_rate, on_frame) {
                Ok(stream) => {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(LiveError::Device(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));
                    while !stop_flag.load(Ordering::Relaxed) {
                        std::thread::sleep(STOP_POLL_INTERVAL);
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| LiveError::Device(e.to_string()))?;

        match ready_rx.recv_timeout(DEVICE_START_TIMEOUT) {
            Ok(Ok(())) => {
                self.running = Some((stop, handle));
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                Err(LiveError::Timeout(
                    "microphone acquisition timed out".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some((stop, handle)) = self.running.take() {
            stop.store(true, Ordering::Relaxed);
            let _ = handle.join();
            debug!("microphone released");
        }
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Speaker sink
// =============================================================================

/// Default speaker rendering the playback queue.
///
/// The render callback pulls from the jitter buffer at the session sample
/// rate, resamples to the device rate when they differ, and duplicates mono
/// across the device's channels.
pub struct SpeakerSink {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SpeakerSink {
    /// Acquire the default output device and begin rendering `playback`.
    /// The meter slot, when populated, observes rendered session-rate audio.
    pub fn open(
        playback: PlaybackHandle,
        clock: Arc<SampleClock>,
        meter: Arc<Mutex<Option<VolumeEstimator>>>,
        sample_rate: u32,
    ) -> LiveResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let (ready_tx, ready_rx) = std_mpsc::channel::<LiveResult<()>>();

        let handle = std::thread::Builder::new()
            .name("voicelink-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(playback, clock, meter, sample_rate) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(LiveError::Device(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(STOP_POLL_INTERVAL);
                }
                drop(stream);
            })
            .map_err(|e| LiveError::Device(e.to_string()))?;

        match ready_rx.recv_timeout(DEVICE_START_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                stop,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                Err(LiveError::Timeout(
                    "speaker acquisition timed out".to_string(),
                ))
            }
        }
    }

    /// Release the output device. Idempotent.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.store(true, Ordering::Relaxed);
            let _ = handle.join();
            debug!("speaker released");
        }
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output_stream(
    playback: PlaybackHandle,
    clock: Arc<SampleClock>,
    meter: Arc<Mutex<Option<VolumeEstimator>>>,
    sample_rate: u32,
) -> LiveResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| LiveError::Device("no default output device available".to_string()))?;
    let default_config = device
        .default_output_config()
        .map_err(|e| LiveError::Device(e.to_string()))?;
    if default_config.sample_format() != SampleFormat::F32 {
        return Err(LiveError::Device(format!(
            "unsupported output sample format: {:?}",
            default_config.sample_format()
        )));
    }
    let config: StreamConfig = default_config.into();
    let device_rate = config.sample_rate.0;
    let channels = usize::from(config.channels.max(1));
    debug!(device_rate, channels, "opening output stream");

    let ratio = sample_rate as f64 / device_rate as f64;
    let mut scratch: Vec<f32> = Vec::new();
    let err_fn = |err| warn!("playback stream error: {err}");

    let stream = device
        .build_output_stream(
            &config,
            move |out: &mut [f32], _| {
                let frames = out.len() / channels;
                let need = (frames as f64 * ratio).round() as usize;
                scratch.resize(need, 0.0);
                playback.render(&mut scratch);
                if let Some(estimator) = meter.lock().as_mut() {
                    estimator.process(Some(&scratch), clock.now());
                }
                clock.advance(need);

                let rendered = if device_rate != sample_rate {
                    resample_linear(&scratch, sample_rate, device_rate)
                } else {
                    std::mem::take(&mut scratch)
                };
                for (frame_idx, frame) in out.chunks_mut(channels).enumerate() {
                    let sample = rendered.get(frame_idx).copied().unwrap_or(0.0);
                    frame.fill(sample);
                }
                if device_rate == sample_rate {
                    scratch = rendered;
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| LiveError::Device(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo_averages_channels() {
        let data = [0.5_f32, -0.5, 1.0, 0.0];
        let mono = downmix_to_mono(&data, 2, |s| s);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn test_downmix_mono_is_identity() {
        let data = [0.1_f32, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&data, 1, |s| s), data.to_vec());
    }

    #[test]
    fn test_downmix_converts_i16() {
        let data = [16_384_i16, -16_384];
        let mono = downmix_to_mono(&data, 1, |s| s as f32 / 32_768.0);
        assert!((mono[0] - 0.5).abs() < 1e-6);
        assert!((mono[1] + 0.5).abs() < 1e-6);
    }
}
