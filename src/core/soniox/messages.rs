//! WebSocket message types for the Soniox real-time API.
//!
//! This module contains all message types for communication with the
//! upstream WebSocket endpoint, including:
//!
//! - **Outgoing messages**: Messages sent from client to server
//!   - [`ConfigRequest`]: Configuration handshake, sent once as the first
//!     message after the socket opens
//!   - Audio data (sent as raw binary WebSocket frames, NOT through these
//!     types)
//!   - [`ControlRequest::Finalize`]: Ask upstream to flush buffered audio
//!     and emit remaining final results
//!
//! - **Incoming messages**: Messages received from server, classified by
//!   [`SonioxMessage::parse()`] into exactly one of result / progress /
//!   error / finished
//!
//! # Terminal signals
//!
//! Upstream signals completion two ways: an explicit `finished: true` field,
//! or a reserved sentinel token (`<fin>`, legacy `<end>`) carrying a set
//! finality flag. Both are equivalent; either may occur alone. Sentinel
//! tokens are protocol markers and are never surfaced as ordinary tokens.

use serde::{Deserialize, Serialize};

use super::base::{SessionCredential, StreamError, Token};
use super::config::{SonioxConfig, TranslationConfig};

/// Sentinel token text marking the end of the token stream.
pub const FIN_SENTINEL: &str = "<fin>";
/// Legacy spelling of the end sentinel, still emitted by older models.
pub const END_SENTINEL: &str = "<end>";

/// True if this token is a finality-flagged end sentinel, equivalent to an
/// explicit `finished: true` message.
#[inline]
pub fn is_terminal_token(token: &Token) -> bool {
    token.is_final && (token.text == FIN_SENTINEL || token.text == END_SENTINEL)
}

/// True if this token is a protocol marker that must not reach the consumer,
/// regardless of finality.
#[inline]
pub fn is_sentinel_token(token: &Token) -> bool {
    token.text == FIN_SENTINEL || token.text == END_SENTINEL
}

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

/// Configuration handshake, serialized and sent as the first message on the
/// open socket. Audio must not be sent before this message.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigRequest {
    /// Bearer credential for this connection
    pub api_key: String,
    /// Upstream model identifier
    pub model: String,
    /// Audio format wire value (e.g., "pcm_s16le", "auto")
    pub audio_format: String,
    /// Sample rate in Hz, required for raw PCM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// Channel count, required for raw PCM
    #[serde(rename = "num_channels", skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    /// Language hints to bias recognition
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub language_hints: Vec<String>,
    /// Tag tokens with a detected language
    pub enable_language_identification: bool,
    /// Attribute tokens to speakers
    pub enable_speaker_diarization: bool,
    /// Optional translation directive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<TranslationConfig>,
}

impl ConfigRequest {
    /// Build the handshake message from session parameters and the
    /// per-connection credential.
    pub fn new(config: &SonioxConfig, credential: &SessionCredential) -> Self {
        Self {
            api_key: credential.token.clone(),
            model: config.model.clone(),
            audio_format: config.audio_format.as_str().to_string(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            language_hints: config.language_hints.clone(),
            enable_language_identification: config.enable_language_identification,
            enable_speaker_diarization: config.enable_speaker_diarization,
            translation: config.translation.clone(),
        }
    }
}

/// Control messages sent as JSON text frames after the handshake.
///
/// # Example
///
/// ```rust
/// use streamscribe::core::soniox::ControlRequest;
///
/// let json = serde_json::to_string(&ControlRequest::Finalize).unwrap();
/// assert_eq!(json, r#"{"type":"finalize"}"#);
/// ```
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlRequest {
    /// Ask upstream to flush buffered audio and emit remaining final
    /// results, then the terminal finished signal. Sent at most once.
    Finalize,
}

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// Raw inbound message shape. Upstream does not tag messages with a type
/// field; the class of a message is determined by which fields it carries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerResponse {
    /// Recognition output, possibly empty
    #[serde(default)]
    pub tokens: Vec<Token>,
    /// Explicit terminal signal
    #[serde(default)]
    pub finished: bool,
    /// Upstream error code, present only on error messages
    #[serde(default)]
    pub error_code: Option<u16>,
    /// Upstream error description, paired with `error_code`
    #[serde(default)]
    pub error_message: Option<String>,
    /// Bare error string, the older error shape
    #[serde(default)]
    pub error: Option<String>,
    /// Audio processing duration metric in milliseconds. The wire uses two
    /// spellings for this field; both are accepted.
    #[serde(default, alias = "total_audio_proc_ms")]
    pub final_audio_proc_ms: Option<u64>,
}

/// A batch of renderable tokens from one result message.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPayload {
    /// Tokens in wire order, sentinels already stripped
    pub tokens: Vec<Token>,
    /// True if this same message also carried the terminal signal
    /// (explicit flag or sentinel token)
    pub finished: bool,
}

/// Processing-duration metrics from a progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressPayload {
    /// Milliseconds of audio upstream has processed so far
    pub audio_proc_ms: u64,
}

/// Error description decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Upstream error code, absent for the bare-string error shape
    pub code: Option<u16>,
    /// Human-readable description
    pub message: String,
}

impl ErrorPayload {
    /// Map an upstream-reported error to the connection error taxonomy.
    ///
    /// Credential failures must stay distinguishable from generic upstream
    /// errors: retrying with an expired credential cannot succeed, so the
    /// client never feeds these into its reconnect loop.
    pub fn to_stream_error(&self) -> StreamError {
        let lowered = self.message.to_lowercase();
        if lowered.contains("expire") {
            return StreamError::CredentialExpired(self.message.clone());
        }
        match self.code {
            Some(401) | Some(403) => StreamError::AuthenticationFailed(self.message.clone()),
            Some(code) => StreamError::ProviderError(format!("{code}: {}", self.message)),
            None => StreamError::ProviderError(self.message.clone()),
        }
    }
}

// =============================================================================
// Message Enum and Classification
// =============================================================================

/// Classified inbound message from upstream.
///
/// Use [`SonioxMessage::parse()`] to decode and classify incoming WebSocket
/// text payloads.
///
/// # Classification
///
/// | Wire fields | Variant |
/// |-------------|---------|
/// | `error_code`/`error_message` or `error` | `Error` |
/// | non-sentinel `tokens` (terminal flag may ride along) | `Result` |
/// | `finished: true` or a final sentinel token, nothing renderable | `Finished` |
/// | `final_audio_proc_ms`/`total_audio_proc_ms` only | `Progress` |
/// | anything else | `Unknown` |
#[derive(Debug, Clone)]
pub enum SonioxMessage {
    /// Token batch (interim and/or final tokens), forwarded to the result
    /// handler in wire order.
    Result(ResultPayload),

    /// Processing-duration metrics only, for optional instrumentation.
    Progress(ProgressPayload),

    /// Upstream-reported error. Does not by itself terminate the
    /// connection; the caller decides whether to continue, finalize, or
    /// close.
    Error(ErrorPayload),

    /// Terminal signal: no further results will arrive on this connection.
    Finished,

    /// Unrecognized message shape (for forward compatibility).
    Unknown(String),
}

impl SonioxMessage {
    /// Parse a WebSocket text payload into a classified message.
    ///
    /// # Arguments
    /// * `text` - Raw JSON text from the WebSocket message
    ///
    /// # Returns
    /// * `Result<Self, serde_json::Error>` - Classified message or parse
    ///   error
    ///
    /// # Example
    ///
    /// ```rust
    /// use streamscribe::core::soniox::SonioxMessage;
    ///
    /// let json = r#"{"tokens":[{"text":"hello","is_final":true}]}"#;
    /// let msg = SonioxMessage::parse(json).unwrap();
    /// assert!(msg.is_result());
    /// ```
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let response: ServerResponse = serde_json::from_str(text)?;
        Ok(Self::classify(response, text))
    }

    /// Classify an already-deserialized response.
    fn classify(response: ServerResponse, raw: &str) -> Self {
        if response.error_code.is_some()
            || response.error_message.is_some()
            || response.error.is_some()
        {
            let message = response
                .error_message
                .or(response.error)
                .unwrap_or_else(|| "unspecified upstream error".to_string());
            return SonioxMessage::Error(ErrorPayload {
                code: response.error_code,
                message,
            });
        }

        let saw_terminal_sentinel = response.tokens.iter().any(is_terminal_token);
        let visible: Vec<Token> = response
            .tokens
            .into_iter()
            .filter(|t| !is_sentinel_token(t))
            .collect();
        let finished = response.finished || saw_terminal_sentinel;

        if !visible.is_empty() {
            return SonioxMessage::Result(ResultPayload {
                tokens: visible,
                finished,
            });
        }
        if finished {
            return SonioxMessage::Finished;
        }
        if let Some(audio_proc_ms) = response.final_audio_proc_ms {
            return SonioxMessage::Progress(ProgressPayload { audio_proc_ms });
        }

        SonioxMessage::Unknown(raw.to_string())
    }

    /// Check if this message carries renderable tokens.
    #[inline]
    pub fn is_result(&self) -> bool {
        matches!(self, SonioxMessage::Result(_))
    }

    /// Check if this message represents an upstream error.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, SonioxMessage::Error(_))
    }

    /// Check if this message carries the terminal "no further results"
    /// signal, either standalone or riding on a final token batch.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SonioxMessage::Finished)
            || matches!(self, SonioxMessage::Result(p) if p.finished)
    }

    /// Get the token batch if this is a result message.
    #[inline]
    pub fn as_result(&self) -> Option<&ResultPayload> {
        match self {
            SonioxMessage::Result(p) => Some(p),
            _ => None,
        }
    }

    /// Get the error payload if this is an error message.
    #[inline]
    pub fn as_error(&self) -> Option<&ErrorPayload> {
        match self {
            SonioxMessage::Error(e) => Some(e),
            _ => None,
        }
    }
}
