//! Session configuration.
//!
//! # Example
//!
//! ```rust,ignore
//! use voicelink::SessionOptions;
//!
//! let options = SessionOptions::new("wss://voice.example.com/live")
//!     .with_token("session-token")
//!     .with_sample_rate(24000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LiveError, LiveResult};

/// Default sample rate for both capture and playback (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Default capture chunk size in samples.
pub const DEFAULT_CHUNK_SAMPLES: usize = 2048;

/// Default ceiling for consecutive connection failures.
pub const DEFAULT_MAX_CONNECTION_ATTEMPTS: u32 = 3;

/// Reset policy for the cumulative transcription buffer.
///
/// The buffer is never cleared by default, matching the cumulative-transcript
/// behavior consumers rely on; `OnTurnComplete` bounds its growth instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptResetPolicy {
    /// Keep accumulating across turns for the whole session.
    #[default]
    Never,
    /// Clear the buffer whenever a model turn completes.
    OnTurnComplete,
}

/// Configuration for a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Duplex channel endpoint URL (ws:// or wss://).
    pub endpoint: String,

    /// Authentication token sent with the channel handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Sample rate for capture and playback in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Capture chunk size in samples at `sample_rate`.
    #[serde(default = "default_chunk_samples")]
    pub chunk_samples: usize,

    /// Consecutive transport failures before errors are flagged terminal.
    #[serde(default = "default_max_attempts")]
    pub max_connection_attempts: u32,

    /// How long `ensure_connected` waits for the channel.
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Handshake timeout for the underlying channel.
    #[serde(default = "default_handshake_timeout", with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Transcription buffer reset policy.
    #[serde(default)]
    pub transcript_reset: TranscriptResetPolicy,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_chunk_samples() -> usize {
    DEFAULT_CHUNK_SAMPLES
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_CONNECTION_ATTEMPTS
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(20)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl SessionOptions {
    /// Create options for the given endpoint with defaults everywhere else.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            max_connection_attempts: DEFAULT_MAX_CONNECTION_ATTEMPTS,
            connect_timeout: default_connect_timeout(),
            handshake_timeout: default_handshake_timeout(),
            transcript_reset: TranscriptResetPolicy::Never,
        }
    }

    /// Set the authentication token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the audio sample rate in Hz.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the capture chunk size in samples.
    pub fn with_chunk_samples(mut self, chunk_samples: usize) -> Self {
        self.chunk_samples = chunk_samples;
        self
    }

    /// Set the transport failure ceiling.
    pub fn with_max_connection_attempts(mut self, ceiling: u32) -> Self {
        self.max_connection_attempts = ceiling;
        self
    }

    /// Set the transcription buffer reset policy.
    pub fn with_transcript_reset(mut self, policy: TranscriptResetPolicy) -> Self {
        self.transcript_reset = policy;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LiveResult<()> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| LiveError::Misuse(format!("invalid endpoint '{}': {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(LiveError::Misuse(format!(
                "endpoint scheme must be ws or wss, got '{}'",
                url.scheme()
            )));
        }
        if self.sample_rate == 0 {
            return Err(LiveError::Misuse("sample_rate must be non-zero".to_string()));
        }
        if self.chunk_samples == 0 {
            return Err(LiveError::Misuse("chunk_samples must be non-zero".to_string()));
        }
        if self.max_connection_attempts == 0 {
            return Err(LiveError::Misuse(
                "max_connection_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SessionOptions::new("wss://voice.example.com/live");
        assert_eq!(options.sample_rate, 24_000);
        assert_eq!(options.chunk_samples, 2048);
        assert_eq!(options.max_connection_attempts, 3);
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.handshake_timeout, Duration::from_secs(20));
        assert_eq!(options.transcript_reset, TranscriptResetPolicy::Never);
        assert!(options.token.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let options = SessionOptions::new("ws://localhost:9000")
            .with_token("tok")
            .with_sample_rate(16_000)
            .with_chunk_samples(1024)
            .with_max_connection_attempts(5)
            .with_transcript_reset(TranscriptResetPolicy::OnTurnComplete);
        assert_eq!(options.token.as_deref(), Some("tok"));
        assert_eq!(options.sample_rate, 16_000);
        assert_eq!(options.chunk_samples, 1024);
        assert_eq!(options.max_connection_attempts, 5);
        assert_eq!(
            options.transcript_reset,
            TranscriptResetPolicy::OnTurnComplete
        );
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        assert!(SessionOptions::new("not a url").validate().is_err());
        assert!(
            SessionOptions::new("https://voice.example.com")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut options = SessionOptions::new("wss://voice.example.com");
        options.sample_rate = 0;
        assert!(options.validate().is_err());

        let mut options = SessionOptions::new("wss://voice.example.com");
        options.chunk_samples = 0;
        assert!(options.validate().is_err());

        let mut options = SessionOptions::new("wss://voice.example.com");
        options.max_connection_attempts = 0;
        assert!(options.validate().is_err());
    }
}
