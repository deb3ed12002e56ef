//! Audio pipelines: capture, playback, and volume metering.
//!
//! All PCM on the wire is 16-bit signed little-endian mono at the session
//! sample rate; everything in-process is `f32` in [-1, 1].

pub mod capture;
pub mod device;
pub mod meter;
pub mod playback;

pub use capture::{CaptureChunk, CapturePipeline, CaptureSource};
pub use meter::{VolumeEstimator, VolumeHandle};
pub use playback::{ManualClock, PlaybackClock, PlaybackHandle, PlaybackState, SampleClock};

/// Decode PCM 16-bit little-endian bytes to f32 samples.
///
/// A trailing odd byte is ignored; malformed data degrades to silence, never
/// an error.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect()
}

/// Encode f32 samples to PCM 16-bit little-endian bytes.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * 32_767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Linear resampler for device rates that differ from the session rate.
///
/// Quality is adequate for speech; the capture path only needs it when the
/// hardware cannot open a stream at the session rate directly.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let base = pos.floor() as usize;
        let frac = (pos - base as f64) as f32;
        let a = input[base];
        let b = input[(base + 1).min(input.len() - 1)];
        out.push(a + (b - a) * frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_round_trip() {
        let samples = vec![0.0, 0.5, -0.5, 1.0, -1.0];
        let bytes = f32_to_pcm16(&samples);
        let decoded = pcm16_to_f32(&bytes);
        assert_eq!(decoded.len(), samples.len());
        for (orig, round) in samples.iter().zip(&decoded) {
            assert!((orig - round).abs() < 2.0 / 32_768.0, "{orig} vs {round}");
        }
    }

    #[test]
    fn test_pcm16_ignores_trailing_byte() {
        let decoded = pcm16_to_f32(&[0, 0, 0xFF]);
        assert_eq!(decoded, vec![0.0]);
    }

    #[test]
    fn test_pcm16_clamps_out_of_range() {
        let bytes = f32_to_pcm16(&[2.0, -2.0]);
        let decoded = pcm16_to_f32(&bytes);
        assert!(decoded[0] > 0.99);
        assert!(decoded[1] < -0.99);
    }

    #[test]
    fn test_resample_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 24_000, 24_000), input);
    }

    #[test]
    fn test_resample_halves_length() {
        let input: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let out = resample_linear(&input, 48_000, 24_000);
        assert_eq!(out.len(), 240);
        // Monotonic input stays monotonic through linear interpolation.
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }
}
