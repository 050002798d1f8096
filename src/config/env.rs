use std::env;

use crate::core::soniox::TranslationConfig;

use super::AppConfig;
use super::utils::{parse_bool, parse_list};

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Reads configuration from environment variables, with sensible defaults.
    /// Also loads from .env file if present using dotenvy.
    ///
    /// # Returns
    /// * `Result<Self, Box<dyn std::error::Error>>` - The loaded configuration or an error
    ///
    /// # Errors
    /// Returns an error if:
    /// - Numeric environment variables are malformed
    /// - The translation directive is incomplete or names an unknown mode
    /// - The resulting stream or rotation settings fail validation
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        // Upstream settings
        let soniox_api_key = env::var("SONIOX_API_KEY").ok();
        let model = env::var("SONIOX_MODEL").unwrap_or_else(|_| "stt-rt-preview".to_string());

        // Audio parameters
        let sample_rate = env::var("AUDIO_SAMPLE_RATE")
            .unwrap_or_else(|_| "16000".to_string())
            .parse::<u32>()
            .map_err(|e| format!("Invalid AUDIO_SAMPLE_RATE: {e}"))?;
        let channels = env::var("AUDIO_CHANNELS")
            .unwrap_or_else(|_| "1".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid AUDIO_CHANNELS: {e}"))?;

        // Recognition features
        let language_hints = env::var("LANGUAGE_HINTS")
            .map(|v| parse_list(&v))
            .unwrap_or_default();
        let enable_language_identification = env::var("ENABLE_LANGUAGE_IDENTIFICATION")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);
        let enable_speaker_diarization = env::var("ENABLE_SPEAKER_DIARIZATION")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);
        let translation = translation_from_env()?;

        // Rotation timing
        let connection_lifetime_secs = parse_secs("CONNECTION_LIFETIME_SECS", 3600)?;
        let rotation_margin_secs = parse_secs("ROTATION_MARGIN_SECS", 300)?;
        let overlap_window_secs = parse_secs("OVERLAP_WINDOW_SECS", 10)?;
        let handover_retry_delay_secs = parse_secs("HANDOVER_RETRY_DELAY_SECS", 15)?;

        let config = AppConfig {
            soniox_api_key,
            model,
            sample_rate,
            channels,
            language_hints,
            enable_language_identification,
            enable_speaker_diarization,
            translation,
            connection_lifetime_secs,
            rotation_margin_secs,
            overlap_window_secs,
            handover_retry_delay_secs,
        };

        // Surface bad combinations at load time rather than on first connect
        config.stream_config().validate()?;
        config.rotation_policy().validate()?;

        Ok(config)
    }
}

/// Read the translation directive from TRANSLATION_MODE and its companion
/// variables. Absent or "none" means no translation.
fn translation_from_env() -> Result<Option<TranslationConfig>, Box<dyn std::error::Error>> {
    let mode = match env::var("TRANSLATION_MODE") {
        Ok(value) => value.to_lowercase(),
        Err(_) => return Ok(None),
    };

    match mode.as_str() {
        "" | "none" => Ok(None),
        "one_way" => {
            let target_language = env::var("TRANSLATION_TARGET_LANGUAGE").map_err(|_| {
                "TRANSLATION_MODE=one_way requires TRANSLATION_TARGET_LANGUAGE".to_string()
            })?;
            Ok(Some(TranslationConfig::OneWay { target_language }))
        }
        "two_way" => {
            let language_a = env::var("TRANSLATION_LANGUAGE_A").map_err(|_| {
                "TRANSLATION_MODE=two_way requires TRANSLATION_LANGUAGE_A".to_string()
            })?;
            let language_b = env::var("TRANSLATION_LANGUAGE_B").map_err(|_| {
                "TRANSLATION_MODE=two_way requires TRANSLATION_LANGUAGE_B".to_string()
            })?;
            Ok(Some(TranslationConfig::TwoWay {
                language_a,
                language_b,
            }))
        }
        other => Err(format!(
            "Invalid TRANSLATION_MODE {other:?}: expected one_way, two_way, or none"
        )
        .into()),
    }
}

fn parse_secs(name: &str, default: u64) -> Result<u64, String> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|e| format!("Invalid {name}: {e}")),
        Err(_) => Ok(default),
    }
}
