//! Render-thread volume estimation.
//!
//! The estimator runs inside audio callbacks and must never block: each
//! computed value is published through an atomic cell where the latest value
//! simply overwrites the previous one. Readers poll [`VolumeHandle::value`]
//! at whatever rate suits their UI.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Decay factor applied per update tick. Instant attack, slow release.
const SMOOTHING_FACTOR: f32 = 0.8;

/// Maximum update rate in estimates per second of render-clock time.
const UPDATES_PER_SECOND: f64 = 60.0;

const UPDATE_INTERVAL: f64 = 1.0 / UPDATES_PER_SECOND;

/// Shared latest-value cell for volume estimates in [0, 1].
///
/// Lock-free on both sides; no queue, no backpressure. A slow reader just
/// observes fewer intermediate values.
#[derive(Clone, Debug)]
pub struct VolumeHandle {
    bits: Arc<AtomicU32>,
}

impl VolumeHandle {
    /// Create a handle reading 0.0.
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(0.0_f32.to_bits())),
        }
    }

    /// Latest published estimate.
    pub fn value(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn publish(&self, volume: f32) {
        self.bits.store(volume.to_bits(), Ordering::Relaxed);
    }
}

impl Default for VolumeHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Smoothed RMS volume estimator with VU-meter ballistics.
///
/// Updates are rate-limited to one per tick interval of render-clock time.
/// On a tick with audio the estimate punches up to the frame's RMS instantly;
/// without audio it decays by the smoothing factor until it reaches zero.
pub struct VolumeEstimator {
    handle: VolumeHandle,
    volume: f32,
    last_update: f64,
}

impl VolumeEstimator {
    /// Create an estimator publishing into `handle`.
    pub fn new(handle: VolumeHandle) -> Self {
        Self {
            handle,
            volume: 0.0,
            last_update: f64::NEG_INFINITY,
        }
    }

    /// Feed one render-callback frame. `now` is render-clock seconds.
    ///
    /// Empty or missing frames are treated as silence, never an error.
    pub fn process(&mut self, frame: Option<&[f32]>, now: f64) {
        if now - self.last_update <= UPDATE_INTERVAL {
            return;
        }
        self.last_update = now;

        match frame {
            Some(samples) if !samples.is_empty() => {
                let energy: f32 =
                    samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
                let rms = energy.sqrt();
                self.volume = rms.max(self.volume * SMOOTHING_FACTOR);
            }
            _ => {
                self.volume = (self.volume * SMOOTHING_FACTOR).max(0.0);
            }
        }
        self.handle.publish(self.volume);
    }

    /// Current smoothed estimate.
    pub fn volume(&self) -> f32 {
        self.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: f64 = UPDATE_INTERVAL * 1.01;

    #[test]
    fn test_handle_starts_at_zero() {
        assert_eq!(VolumeHandle::new().value(), 0.0);
    }

    #[test]
    fn test_constant_input_converges_on_first_tick() {
        let handle = VolumeHandle::new();
        let mut estimator = VolumeEstimator::new(handle.clone());
        // Constant 0.5 amplitude: RMS is exactly 0.5.
        let frame = vec![0.5_f32; 128];

        estimator.process(Some(&frame), 0.0);
        assert!((handle.value() - 0.5).abs() < 1e-6);

        // Never exceeds the input RMS on subsequent ticks.
        for i in 1..20 {
            estimator.process(Some(&frame), i as f64 * TICK);
            assert!(handle.value() <= 0.5 + 1e-6);
            assert!((handle.value() - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_silence_decays_by_exact_factor() {
        let handle = VolumeHandle::new();
        let mut estimator = VolumeEstimator::new(handle.clone());
        let loud = vec![0.8_f32; 64];
        estimator.process(Some(&loud), 0.0);
        let mut expected = handle.value();
        assert!(expected > 0.7);

        for i in 1..30 {
            estimator.process(None, i as f64 * TICK);
            expected *= SMOOTHING_FACTOR;
            assert!((handle.value() - expected).abs() < 1e-6);
        }
        assert!(handle.value() > 0.0);
        assert!(handle.value() < 0.01);
    }

    #[test]
    fn test_rate_limited_to_tick_interval() {
        let handle = VolumeHandle::new();
        let mut estimator = VolumeEstimator::new(handle.clone());
        let frame = vec![0.5_f32; 64];
        estimator.process(Some(&frame), 0.0);

        // Calls inside the same tick window are ignored.
        estimator.process(None, UPDATE_INTERVAL * 0.5);
        assert!((handle.value() - 0.5).abs() < 1e-6);

        estimator.process(None, TICK);
        assert!((handle.value() - 0.5 * SMOOTHING_FACTOR).abs() < 1e-6);
    }

    #[test]
    fn test_empty_frame_is_silence() {
        let handle = VolumeHandle::new();
        let mut estimator = VolumeEstimator::new(handle.clone());
        let frame = vec![0.4_f32; 64];
        estimator.process(Some(&frame), 0.0);
        estimator.process(Some(&[]), TICK);
        assert!((handle.value() - 0.4 * SMOOTHING_FACTOR).abs() < 1e-6);
    }

    #[test]
    fn test_attack_is_instant() {
        let handle = VolumeHandle::new();
        let mut estimator = VolumeEstimator::new(handle.clone());
        let quiet = vec![0.1_f32; 64];
        let loud = vec![0.9_f32; 64];
        estimator.process(Some(&quiet), 0.0);
        estimator.process(Some(&loud), TICK);
        assert!((handle.value() - 0.9).abs() < 1e-6);
    }
}
