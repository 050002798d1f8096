//! Configuration module for the streamscribe CLI
//!
//! Configuration comes from environment variables (optionally via a `.env`
//! file). The values map onto the two configuration surfaces of the core:
//! the per-session upstream parameters ([`SonioxConfig`]) and the rotation
//! timing ([`RotationPolicy`]).
//!
//! # Modules
//! - `env`: Environment variable loading
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use streamscribe::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::from_env()?;
//! println!("Streaming with model {}", config.model);
//! # Ok(())
//! # }
//! ```

mod env;
mod utils;

use std::time::Duration;

use crate::core::session::RotationPolicy;
use crate::core::soniox::{SonioxAudioFormat, SonioxConfig, TranslationConfig};

/// Application configuration
///
/// Contains everything needed to run a streaming transcription session:
/// - Upstream credentials and model selection
/// - Audio parameters (sample rate, channel count)
/// - Recognition features (language hints, identification, diarization)
/// - Optional translation directive
/// - Connection rotation timing
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Upstream settings
    pub soniox_api_key: Option<String>,
    pub model: String,

    // Audio parameters
    pub sample_rate: u32,
    pub channels: u16,

    // Recognition features
    pub language_hints: Vec<String>,
    pub enable_language_identification: bool,
    pub enable_speaker_diarization: bool,
    pub translation: Option<TranslationConfig>,

    // Rotation timing, in seconds
    pub connection_lifetime_secs: u64,
    pub rotation_margin_secs: u64,
    pub overlap_window_secs: u64,
    pub handover_retry_delay_secs: u64,
}

impl AppConfig {
    /// Get the upstream API key
    ///
    /// # Returns
    /// * `Result<String, String>` - The API key on success, or an error message on failure
    pub fn api_key(&self) -> Result<String, String> {
        self.soniox_api_key
            .as_ref()
            .cloned()
            .ok_or_else(|| "Soniox API key not configured in the environment".to_string())
    }

    /// Per-session upstream configuration built from these settings
    pub fn stream_config(&self) -> SonioxConfig {
        SonioxConfig {
            model: self.model.clone(),
            audio_format: SonioxAudioFormat::PcmS16le,
            sample_rate: Some(self.sample_rate),
            channels: Some(self.channels),
            language_hints: self.language_hints.clone(),
            enable_language_identification: self.enable_language_identification,
            enable_speaker_diarization: self.enable_speaker_diarization,
            translation: self.translation.clone(),
            ..SonioxConfig::default()
        }
    }

    /// Rotation timing built from these settings
    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            connection_lifetime: Duration::from_secs(self.connection_lifetime_secs),
            rotation_margin: Duration::from_secs(self.rotation_margin_secs),
            overlap_window: Duration::from_secs(self.overlap_window_secs),
            handover_retry_delay: Duration::from_secs(self.handover_retry_delay_secs),
        }
    }
}
