//! Configuration types for the Soniox real-time WebSocket API.
//!
//! This module contains all configuration-related types including:
//! - Audio format specifications
//! - Translation directives
//! - Reconnect policy tuning
//! - Configuration validation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::base::StreamError;

/// WebSocket endpoint for the Soniox real-time API.
pub const SONIOX_WS_ENDPOINT: &str = "wss://stt-rt.soniox.com/transcribe-websocket";

// =============================================================================
// Audio Format
// =============================================================================

/// Supported audio formats for the real-time API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SonioxAudioFormat {
    /// PCM signed 16-bit little-endian. Requires an explicit sample rate and
    /// channel count in the configuration handshake.
    #[default]
    PcmS16le,
    /// Container formats (wav, mp3, ...) detected by upstream; sample rate
    /// and channel count are read from the container.
    Auto,
}

impl SonioxAudioFormat {
    /// Convert to the wire value used in the configuration message.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PcmS16le => "pcm_s16le",
            Self::Auto => "auto",
        }
    }

    /// True if this format requires explicit sample rate and channel count.
    #[inline]
    pub fn is_raw_pcm(&self) -> bool {
        matches!(self, Self::PcmS16le)
    }
}

/// Supported sample rate range for raw PCM input (in Hz).
pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 48_000;

/// Check if a sample rate is inside the supported range.
#[inline]
pub fn is_sample_rate_supported(sample_rate: u32) -> bool {
    (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate)
}

// =============================================================================
// Translation Directive
// =============================================================================

/// Translation directive included in the configuration handshake.
///
/// Serializes to the wire shape directly:
/// `{"type":"one_way","target_language":"en"}` or
/// `{"type":"two_way","language_a":"en","language_b":"es"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranslationConfig {
    /// Translate everything into one target language.
    OneWay { target_language: String },
    /// Translate between a language pair in both directions.
    TwoWay {
        language_a: String,
        language_b: String,
    },
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Immutable per-session parameters for one logical streaming session.
///
/// Constructed once and reused verbatim when the rotator opens a secondary
/// connection; only the bearer credential is re-minted per connection, which
/// is why the credential lives outside this struct.
#[derive(Debug, Clone)]
pub struct SonioxConfig {
    /// Upstream model identifier.
    pub model: String,

    /// Audio format of the frames the session will send.
    pub audio_format: SonioxAudioFormat,

    /// Sample rate in Hz. Required when `audio_format` is raw PCM.
    pub sample_rate: Option<u32>,

    /// Channel count. Required when `audio_format` is raw PCM.
    pub channels: Option<u16>,

    /// Language hints to bias recognition (e.g., ["en", "zh"]).
    pub language_hints: Vec<String>,

    /// Ask upstream to tag each token with a detected language.
    pub enable_language_identification: bool,

    /// Ask upstream to attribute tokens to speakers.
    pub enable_speaker_diarization: bool,

    /// Optional translation directive.
    pub translation: Option<TranslationConfig>,

    /// WebSocket endpoint. Defaults to the production endpoint; tests point
    /// this at a local mock server.
    pub endpoint: String,
}

impl Default for SonioxConfig {
    fn default() -> Self {
        Self {
            model: "stt-rt-preview".to_string(),
            audio_format: SonioxAudioFormat::default(),
            sample_rate: Some(16_000),
            channels: Some(1),
            language_hints: Vec::new(),
            enable_language_identification: false,
            enable_speaker_diarization: false,
            translation: None,
            endpoint: SONIOX_WS_ENDPOINT.to_string(),
        }
    }
}

impl SonioxConfig {
    /// Validate the configuration.
    ///
    /// Checks that:
    /// - Model identifier is not empty
    /// - The endpoint parses as a ws:// or wss:// URL
    /// - Raw PCM input carries a supported sample rate and a channel count
    /// - A translation directive names non-empty, distinct languages
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, otherwise
    /// `Err(StreamError::ConfigurationError)`.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.model.is_empty() {
            return Err(StreamError::ConfigurationError(
                "Model identifier is required".to_string(),
            ));
        }

        let endpoint = url::Url::parse(&self.endpoint).map_err(|e| {
            StreamError::ConfigurationError(format!("Invalid endpoint URL: {e}"))
        })?;
        if endpoint.scheme() != "ws" && endpoint.scheme() != "wss" {
            return Err(StreamError::ConfigurationError(format!(
                "Endpoint must be a ws:// or wss:// URL, got scheme: {}",
                endpoint.scheme()
            )));
        }

        if self.audio_format.is_raw_pcm() {
            let sample_rate = self.sample_rate.ok_or_else(|| {
                StreamError::ConfigurationError(
                    "sample_rate is required for raw PCM input".to_string(),
                )
            })?;
            if !is_sample_rate_supported(sample_rate) {
                return Err(StreamError::ConfigurationError(format!(
                    "Unsupported sample rate: {sample_rate}. Supported range: {MIN_SAMPLE_RATE}-{MAX_SAMPLE_RATE}"
                )));
            }
            let channels = self.channels.ok_or_else(|| {
                StreamError::ConfigurationError(
                    "channels is required for raw PCM input".to_string(),
                )
            })?;
            if channels == 0 {
                return Err(StreamError::ConfigurationError(
                    "channels must be at least 1".to_string(),
                ));
            }
        }

        match &self.translation {
            Some(TranslationConfig::OneWay { target_language }) => {
                if target_language.is_empty() {
                    return Err(StreamError::ConfigurationError(
                        "one_way translation requires a target language".to_string(),
                    ));
                }
            }
            Some(TranslationConfig::TwoWay {
                language_a,
                language_b,
            }) => {
                if language_a.is_empty() || language_b.is_empty() {
                    return Err(StreamError::ConfigurationError(
                        "two_way translation requires both languages".to_string(),
                    ));
                }
                if language_a == language_b {
                    return Err(StreamError::ConfigurationError(format!(
                        "two_way translation requires distinct languages, got: {language_a}"
                    )));
                }
            }
            None => {}
        }

        Ok(())
    }
}

// =============================================================================
// Reconnect Policy
// =============================================================================

/// Bounded exponential backoff policy for automatic reconnects.
///
/// The delay doubles per attempt starting from `base_delay` and is capped at
/// `max_delay`; after `max_attempts` failures the connection stays in a
/// terminal error state. Defaults produce the sequence 1s, 2s, 4s, 8s, 8s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum number of automatic reconnect attempts.
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Ceiling on the backoff delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay before the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Cap the exponent so large attempt numbers cannot overflow the
        // multiplier before max_delay clamps the result.
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.pow(exp))
            .min(self.max_delay)
    }
}
