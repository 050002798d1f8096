use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One unit of upstream output: a fragment of recognized or translated text.
///
/// Tokens are immutable once received. Accumulation semantics (interim vs
/// final, per-speaker grouping) are the consumer's concern, not the wire's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The text fragment
    pub text: String,
    /// Language tag for this fragment (e.g., "en", "zh")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Speaker id assigned by upstream diarization. `0` means "not yet
    /// assigned" and must be treated as pending, never as a real speaker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
    /// Start offset of the fragment in the audio stream, milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    /// End offset of the fragment in the audio stream, milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
    /// Whether this fragment is final (stable) or interim (subject to
    /// replacement). The wire uses two spellings for this flag; both are
    /// accepted on decode.
    #[serde(default, alias = "final")]
    pub is_final: bool,
    /// Role of the fragment: original-language transcript or translation.
    /// Absent means original.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_status: Option<TranslationStatus>,
}

impl Token {
    /// Creates a final token with just text, no metadata
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            speaker: None,
            start_ms: None,
            end_ms: None,
            is_final: true,
            translation_status: None,
        }
    }

    /// Creates an interim token with just text, no metadata
    pub fn interim_text(text: impl Into<String>) -> Self {
        Self {
            is_final: false,
            ..Self::final_text(text)
        }
    }

    /// The effective role of this token, defaulting to original when the
    /// wire omitted the tag
    pub fn role(&self) -> TranslationStatus {
        self.translation_status.unwrap_or(TranslationStatus::Original)
    }

    /// True if this token carries translated rather than original text
    pub fn is_translation(&self) -> bool {
        self.role() == TranslationStatus::Translation
    }

    /// True if upstream has not yet attributed this token to a speaker
    pub fn speaker_pending(&self) -> bool {
        self.speaker == Some(0)
    }
}

/// Role tag distinguishing original-language text from translated text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    Original,
    Translation,
}

/// Lifecycle state of a single upstream connection.
///
/// Exactly one connection instance owns one state value at a time. A closed
/// connection may be connected again; an `Error` state reached after the
/// reconnect budget is exhausted is permanent for the instance.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Constructed, never connected
    Idle,
    /// Socket dial or reconnect in progress
    Connecting,
    /// Socket open, configuration not yet written
    Connected,
    /// Configuration sent; audio flows, results arrive
    Streaming,
    /// Socket or upstream failure; may be transient (reconnect pending) or
    /// terminal (attempts exhausted)
    Error(String),
    /// Explicitly closed, or closed after the upstream finished signal
    Closed,
}

impl ConnectionState {
    /// True if the connection accepts audio directly on the socket
    pub fn is_streaming(&self) -> bool {
        matches!(self, ConnectionState::Streaming)
    }

    /// True if the connection is closed or in an error state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Error(_))
    }
}

/// Error types for streaming connection operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Credential expired: {0}")]
    CredentialExpired(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Upstream error: {0}")]
    ProviderError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },
}

impl StreamError {
    /// True if retrying with the same credential cannot succeed
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            StreamError::AuthenticationFailed(_) | StreamError::CredentialExpired(_)
        )
    }
}

/// Type alias for token batch callback: invoked once per inbound result
/// message, with the message's tokens in wire order
pub type ResultCallback =
    Arc<dyn Fn(Vec<Token>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Type alias for streaming error callback
pub type ErrorCallback =
    Arc<dyn Fn(StreamError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Type alias for the terminal "no further results" callback
pub type FinishedCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Type alias for progress callback: audio processing milliseconds reported
/// by upstream, for optional instrumentation
pub type ProgressCallback =
    Arc<dyn Fn(u64) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Base trait for a single upstream streaming connection.
///
/// `connect` is asynchronous and resolves once the configuration handshake
/// has completed (state `Streaming`). `send_audio`, `finalize`, and `close`
/// are synchronous fire-and-continue operations; frame delivery and protocol
/// writes happen on the connection's own task.
#[async_trait::async_trait]
pub trait BaseConnection: Send + Sync {
    /// Connect to the upstream endpoint and perform the configuration
    /// handshake.
    ///
    /// # Returns
    /// * `Result<(), StreamError>` - Ok once streaming, or the terminal
    ///   error if the handshake could not be completed
    async fn connect(&mut self) -> Result<(), StreamError>;

    /// Submit one audio frame.
    ///
    /// While not yet streaming the frame is queued and flushed in FIFO
    /// order once streaming begins. After `finalize` the frame is dropped
    /// with a warning.
    fn send_audio(&self, frame: Bytes);

    /// Ask upstream to flush buffered audio and emit remaining final
    /// results. Sent at most once per connection; subsequent calls are
    /// no-ops.
    ///
    /// Upstream is expected to answer with a terminal finished signal, but
    /// is not guaranteed to: callers must bound their wait and force-close
    /// if nothing arrives.
    fn finalize(&self);

    /// Close the connection: cancel pending reconnects, close the socket
    /// with a normal-closure code, clear queued audio. Idempotent.
    fn close(&self);

    /// Current lifecycle state
    fn state(&self) -> ConnectionState;

    /// True if audio frames are being forwarded on the socket
    fn is_streaming(&self) -> bool;

    /// Register the callback invoked for each inbound result message
    fn on_result(&self, callback: ResultCallback);

    /// Register the callback invoked for connection and upstream errors
    fn on_error(&self, callback: ErrorCallback);

    /// Register the callback invoked when upstream signals that no further
    /// results will arrive on this connection
    fn on_finished(&self, callback: FinishedCallback);

    /// Register the callback invoked with upstream audio-processing
    /// progress reports
    fn on_progress(&self, callback: ProgressCallback);

    /// Unique id of this connection instance, for log correlation
    fn id(&self) -> Uuid;

    /// Snapshot of per-connection counters
    fn stats(&self) -> SessionStats;
}

/// Short-lived bearer credential scoped to one streaming connection
#[derive(Debug, Clone)]
pub struct SessionCredential {
    /// Bearer token presented in the configuration handshake
    pub token: String,
    /// Expiry reported by the issuer, if any
    pub expires_at: Option<SystemTime>,
}

impl SessionCredential {
    /// True if the issuer-reported expiry has already passed
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => SystemTime::now() >= at,
            None => false,
        }
    }
}

/// Credential acquisition boundary.
///
/// Exchanges a long-lived secret for a short-lived bearer credential before
/// each connection is opened. The rotator calls this once per connection,
/// including for every rotation secondary, so credentials never outlive the
/// upstream connection limit.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Issue a credential for one streaming connection
    async fn issue(&self) -> Result<SessionCredential, StreamError>;
}

/// Credential provider for callers holding a plain long-lived API key.
///
/// The key is passed through unchanged with no expiry. Suitable for
/// server-side use where the key never crosses a trust boundary.
pub struct StaticCredentialProvider {
    api_key: String,
}

impl StaticCredentialProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn issue(&self) -> Result<SessionCredential, StreamError> {
        if self.api_key.is_empty() {
            return Err(StreamError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        Ok(SessionCredential {
            token: self.api_key.clone(),
            expires_at: None,
        })
    }
}

/// Statistics for one streaming connection
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Audio frames written to the socket
    pub frames_sent: u64,
    /// Audio bytes written to the socket
    pub bytes_sent: u64,
    /// Frames evicted from the pre-streaming queue or dropped after finalize
    pub frames_dropped: u64,
    /// Tokens received across all result messages
    pub tokens_received: u64,
    /// Final tokens received
    pub final_tokens_received: u64,
    /// Reconnect attempts performed
    pub reconnects: u32,
    /// Most recent audio processing duration reported by upstream, ms
    pub last_audio_proc_ms: Option<u64>,
}

impl SessionStats {
    /// Update counters with a received token batch
    pub fn update_with_tokens(&mut self, tokens: &[Token]) {
        self.tokens_received += tokens.len() as u64;
        self.final_tokens_received += tokens.iter().filter(|t| t.is_final).count() as u64;
    }
}
