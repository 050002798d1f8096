//! Soniox real-time speech-to-text and translation WebSocket integration.
//!
//! This module provides a streaming client for the Soniox real-time API
//! with support for:
//!
//! - Real-time streaming transcription and translation
//! - Interim and final tokens with speaker and language tags
//! - Automatic bounded-backoff reconnect on socket interruption
//! - Finalize/close session control
//!
//! # Architecture
//!
//! The module is organized into focused submodules:
//!
//! - [`base`]: The `BaseConnection` trait, token and state types, error
//!   taxonomy, and the credential acquisition boundary
//! - [`config`]: Configuration types (`SonioxConfig`, `TranslationConfig`,
//!   `ReconnectPolicy`)
//! - [`messages`]: WebSocket message types for API communication
//! - [`client`]: The main `SonioxClient` implementation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamscribe::core::soniox::{
//!     BaseConnection, SonioxClient, SonioxConfig, StaticCredentialProvider,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SonioxConfig {
//!         language_hints: vec!["en".to_string()],
//!         ..Default::default()
//!     };
//!     let provider = Arc::new(StaticCredentialProvider::new("your-api-key"));
//!
//!     let mut connection = SonioxClient::new(config, provider);
//!     connection.on_result(Arc::new(|tokens| {
//!         Box::pin(async move {
//!             for token in tokens {
//!                 println!("{}", token.text);
//!             }
//!         })
//!     }));
//!     connection.connect().await?;
//!
//!     // Send audio data
//!     let frame = vec![0u8; 3200];
//!     connection.send_audio(frame.into());
//!
//!     Ok(())
//! }
//! ```

pub mod base;
pub mod config;
pub mod messages;

mod client;

// Re-export public types
pub use base::{
    BaseConnection, ConnectionState, CredentialProvider, ErrorCallback, FinishedCallback,
    ProgressCallback, ResultCallback, SessionCredential, SessionStats,
    StaticCredentialProvider, StreamError, Token, TranslationStatus,
};
pub use client::SonioxClient;
pub use config::{
    MAX_SAMPLE_RATE, MIN_SAMPLE_RATE, ReconnectPolicy, SONIOX_WS_ENDPOINT, SonioxAudioFormat,
    SonioxConfig, TranslationConfig, is_sample_rate_supported,
};
pub use messages::{
    ConfigRequest, ControlRequest, END_SENTINEL, ErrorPayload, FIN_SENTINEL, ProgressPayload,
    ResultPayload, ServerResponse, SonioxMessage, is_sentinel_token, is_terminal_token,
};
