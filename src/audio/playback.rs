//! Playback jitter buffer.
//!
//! Inbound PCM fragments arrive at irregular wall-clock intervals and in
//! irregular sizes; the queue schedules them back-to-back on the audio output
//! clock so the render callback produces continuous output. Each fragment's
//! playback window starts where the previous one ended (or "now" when the
//! queue was empty), guaranteeing zero gap and zero overlap within a turn.
//!
//! State machine: `Idle → Buffering → Playing → (Draining | Interrupted) → Idle`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::pcm16_to_f32;

/// A monotonic clock in seconds of audio output time.
pub trait PlaybackClock: Send + Sync {
    /// Current position on the output clock.
    fn now(&self) -> f64;
}

/// Clock driven by the number of samples the output device has consumed.
pub struct SampleClock {
    samples: AtomicU64,
    sample_rate: u32,
}

impl SampleClock {
    /// Create a clock at position zero.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Advance by `count` rendered samples.
    pub fn advance(&self, count: usize) {
        self.samples.fetch_add(count as u64, Ordering::Relaxed);
    }
}

impl PlaybackClock for SampleClock {
    fn now(&self) -> f64 {
        self.samples.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }
}

/// Manually stepped clock for tests.
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    /// Create a clock at position zero.
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(0.0_f64.to_bits()),
        }
    }

    /// Set the clock position in seconds.
    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Relaxed);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Jitter buffer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing queued, nothing playing.
    #[default]
    Idle,
    /// Fragments queued, output not yet armed.
    Buffering,
    /// Rendering queued fragments.
    Playing,
    /// Turn complete; playing out what is buffered, then back to idle.
    Draining,
    /// Stopped by interruption; settles to idle on the next render pass.
    Interrupted,
}

/// Scheduled playback window of one fragment, in output-clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackWindow {
    /// Window start.
    pub start: f64,
    /// Window end (exclusive).
    pub end: f64,
}

struct ScheduledFragment {
    samples: Vec<f32>,
    start: f64,
    cursor: usize,
}

/// The jitter buffer proper. Callers hold it behind [`PlaybackHandle`]; the
/// render side locks it briefly from the audio callback.
pub struct PlaybackQueue {
    sample_rate: u32,
    state: PlaybackState,
    queue: VecDeque<ScheduledFragment>,
    next_start: f64,
}

impl PlaybackQueue {
    /// Create an empty queue.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: PlaybackState::Idle,
            queue: VecDeque::new(),
            next_start: 0.0,
        }
    }

    /// Queue a PCM16-LE fragment, scheduling it immediately after the last
    /// queued fragment (or at `now` when the queue was drained). Returns the
    /// scheduled window.
    pub fn add_fragment(&mut self, pcm: &[u8], now: f64) -> PlaybackWindow {
        let samples = pcm16_to_f32(pcm);
        let start = self.next_start.max(now);
        let end = start + samples.len() as f64 / self.sample_rate as f64;
        self.queue.push_back(ScheduledFragment {
            samples,
            start,
            cursor: 0,
        });
        self.next_start = end;

        self.state = match self.state {
            PlaybackState::Idle | PlaybackState::Interrupted => PlaybackState::Buffering,
            // A fragment after turn completion opens the next turn.
            PlaybackState::Draining => PlaybackState::Playing,
            other => other,
        };

        PlaybackWindow { start, end }
    }

    /// Arm output. Idempotent while already playing.
    pub fn resume(&mut self) {
        if self.state == PlaybackState::Buffering {
            self.state = PlaybackState::Playing;
        }
    }

    /// Turn completion: play out what is buffered, accept nothing more for
    /// this turn. Advisory bookkeeping, never audio truncation.
    pub fn complete(&mut self) {
        self.state = if self.queue.is_empty() {
            PlaybackState::Idle
        } else {
            PlaybackState::Draining
        };
    }

    /// Interruption: flush everything queued and scheduled, silence output.
    /// Nothing queued before this call will ever play.
    pub fn stop(&mut self) {
        self.queue.clear();
        self.next_start = 0.0;
        self.state = PlaybackState::Interrupted;
    }

    /// Current state.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Number of fragments queued and not yet fully rendered.
    pub fn pending_fragments(&self) -> usize {
        self.queue.len()
    }

    /// Fill `out` with the next samples due at `now` on the output clock.
    /// Runs on the render thread: no allocation beyond queue pops, no I/O.
    pub fn render(&mut self, out: &mut [f32], now: f64) {
        out.fill(0.0);

        match self.state {
            PlaybackState::Interrupted => {
                self.state = PlaybackState::Idle;
                return;
            }
            PlaybackState::Playing | PlaybackState::Draining => {}
            _ => return,
        }

        let rate = self.sample_rate as f64;
        let mut idx = 0;
        while idx < out.len() {
            let Some(front) = self.queue.front_mut() else {
                if self.state == PlaybackState::Draining {
                    self.state = PlaybackState::Idle;
                }
                // Underrun mid-turn: a deliberate silence gap until the next
                // fragment arrives.
                break;
            };
            if front.cursor >= front.samples.len() {
                // Zero-length fragment (empty payload decodes to no samples).
                self.queue.pop_front();
                continue;
            }
            let due = front.start + front.cursor as f64 / rate;
            let t = now + idx as f64 / rate;
            // Half-sample tolerance absorbs float drift in the schedule sums.
            if due > t + 0.5 / rate {
                let skip = ((due - now) * rate).round() as usize;
                if skip >= out.len() {
                    break;
                }
                idx = skip.max(idx + 1);
                continue;
            }
            out[idx] = front.samples[front.cursor];
            front.cursor += 1;
            idx += 1;
            if front.cursor == front.samples.len() {
                self.queue.pop_front();
            }
        }
    }
}

/// Cloneable handle pairing the queue with its output clock.
#[derive(Clone)]
pub struct PlaybackHandle {
    queue: Arc<Mutex<PlaybackQueue>>,
    clock: Arc<dyn PlaybackClock>,
}

impl PlaybackHandle {
    /// Create a handle over a fresh queue.
    pub fn new(sample_rate: u32, clock: Arc<dyn PlaybackClock>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(PlaybackQueue::new(sample_rate))),
            clock,
        }
    }

    /// Queue a PCM16-LE fragment for gapless playback.
    pub fn add_fragment(&self, pcm: &[u8]) -> PlaybackWindow {
        let now = self.clock.now();
        self.queue.lock().add_fragment(pcm, now)
    }

    /// Arm output. Idempotent.
    pub fn resume(&self) {
        self.queue.lock().resume();
    }

    /// Signal turn completion (graceful drain).
    pub fn complete(&self) {
        self.queue.lock().complete();
    }

    /// Signal interruption (immediate flush).
    pub fn stop(&self) {
        self.queue.lock().stop();
    }

    /// Current state.
    pub fn state(&self) -> PlaybackState {
        self.queue.lock().state()
    }

    /// Number of fragments queued and not yet fully rendered.
    pub fn pending_fragments(&self) -> usize {
        self.queue.lock().pending_fragments()
    }

    /// Fill an output buffer from the render side.
    pub fn render(&self, out: &mut [f32]) {
        let now = self.clock.now();
        self.queue.lock().render(out, now);
    }
}
