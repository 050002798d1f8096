//! Soniox streaming WebSocket client implementation.
//!
//! This module contains the main `SonioxClient` struct that implements the
//! `BaseConnection` trait for real-time speech-to-text streaming.
//!
//! # Architecture
//!
//! The client keeps the caller-facing operations synchronous and does all
//! socket work on a single owned task:
//! - One outbound queue (audio frames and the finalize control message)
//!   drained by the session task; frames submitted before streaming begins
//!   are flushed in submission order once the configuration handshake
//!   completes
//! - Unbounded event channel for results and errors (never blocks the
//!   socket loop), drained by a forwarding task that invokes the
//!   registered callbacks
//! - Bounded exponential-backoff reconnect inside the session task; the
//!   outbound queue survives reconnects so no accepted frame is lost while
//!   the socket is down
//!
//! # Audio Format
//!
//! Audio is sent as raw binary WebSocket frames (NOT base64 encoded),
//! one message per captured chunk. With the default configuration that is
//! PCM signed 16-bit little-endian at 16000 Hz, mono.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::base::{
    BaseConnection, ConnectionState, CredentialProvider, ErrorCallback, FinishedCallback,
    ProgressCallback, ResultCallback, SessionStats, StreamError, Token,
};
use super::config::{ReconnectPolicy, SonioxConfig};
use super::messages::{ConfigRequest, ControlRequest, SonioxMessage};

// =============================================================================
// Constants
// =============================================================================

/// Timeout for one socket dial plus TLS and WebSocket upgrade.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on audio bytes held while not yet streaming. An upstream that never
/// opens must not grow memory without bound, so the oldest frames are dropped
/// beyond this point. 320000 bytes is 10 seconds of 16 kHz mono s16le.
const DEFAULT_QUEUE_CAP_BYTES: usize = 320_000;

// =============================================================================
// Internal Events
// =============================================================================

/// Events emitted by the session task and dispatched to callbacks by the
/// forwarding task. A single ordered channel keeps the finished notification
/// from overtaking the result batch it follows.
#[derive(Debug)]
enum ClientEvent {
    Results(Vec<Token>),
    Progress(u64),
    Error(StreamError),
    Finished,
}

// =============================================================================
// Outbound Queue
// =============================================================================

/// One queued outbound item: an audio frame or the finalize control message.
#[derive(Debug, Clone)]
enum OutboundItem {
    Frame(Bytes),
    Finalize,
}

/// FIFO queue of outbound items with byte-bounded audio backlog.
///
/// Only audio frames count toward the byte cap; the finalize control message
/// is never evicted. Frames always precede finalize in the queue because
/// frames submitted after finalize are dropped before they get here.
#[derive(Debug, Default)]
struct OutboundQueue {
    items: VecDeque<OutboundItem>,
    queued_bytes: usize,
}

impl OutboundQueue {
    /// Append one audio frame, evicting the oldest frames while the audio
    /// backlog exceeds `cap_bytes`. Returns the number of evicted frames.
    fn push_frame(&mut self, frame: Bytes, cap_bytes: usize) -> usize {
        self.queued_bytes += frame.len();
        self.items.push_back(OutboundItem::Frame(frame));

        let mut evicted = 0;
        while self.queued_bytes > cap_bytes {
            let oldest_len = match self.items.front() {
                Some(OutboundItem::Frame(frame)) => frame.len(),
                _ => break,
            };
            self.items.pop_front();
            self.queued_bytes -= oldest_len;
            evicted += 1;
        }
        evicted
    }

    fn push_finalize(&mut self) {
        self.items.push_back(OutboundItem::Finalize);
    }

    fn pop(&mut self) -> Option<OutboundItem> {
        let item = self.items.pop_front();
        if let Some(OutboundItem::Frame(frame)) = &item {
            self.queued_bytes -= frame.len();
        }
        item
    }

    /// Put an item back at the front after a failed socket write, so the
    /// next connection resumes from exactly where this one stopped.
    fn requeue_front(&mut self, item: OutboundItem) {
        if let OutboundItem::Frame(frame) = &item {
            self.queued_bytes += frame.len();
        }
        self.items.push_front(item);
    }

    /// Drop everything. Returns the number of audio frames discarded.
    fn clear(&mut self) -> usize {
        let frames = self
            .items
            .iter()
            .filter(|item| matches!(item, OutboundItem::Frame(_)))
            .count();
        self.items.clear();
        self.queued_bytes = 0;
        frames
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// Callback storage shared between the caller and the forwarding task.
#[derive(Default)]
struct ClientCallbacks {
    result: Option<ResultCallback>,
    error: Option<ErrorCallback>,
    finished: Option<FinishedCallback>,
    progress: Option<ProgressCallback>,
}

/// State shared between the caller-facing handle and the session task.
struct ClientShared {
    id: Uuid,
    state: RwLock<ConnectionState>,
    state_notify: Notify,
    outbound: Mutex<OutboundQueue>,
    /// Wakes the session task when the queue has new items or close was
    /// requested.
    wake: Notify,
    close_requested: AtomicBool,
    finalize_requested: AtomicBool,
    callbacks: RwLock<ClientCallbacks>,
    stats: Mutex<SessionStats>,
}

impl ClientShared {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            state: RwLock::new(ConnectionState::Idle),
            state_notify: Notify::new(),
            outbound: Mutex::new(OutboundQueue::default()),
            wake: Notify::new(),
            close_requested: AtomicBool::new(false),
            finalize_requested: AtomicBool::new(false),
            callbacks: RwLock::new(ClientCallbacks::default()),
            stats: Mutex::new(SessionStats::default()),
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        self.state_notify.notify_waiters();
    }

    fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }

    fn is_finalized(&self) -> bool {
        self.finalize_requested.load(Ordering::SeqCst)
    }
}

/// How one connection's event loop ended.
enum LoopOutcome {
    /// `close()` was called; leave quietly.
    CloseRequested,
    /// Upstream signalled that no further results will arrive.
    Finished,
    /// Unrecoverable failure; no reconnect.
    Fatal(StreamError),
    /// Socket interruption; reconnect if budget remains.
    Interrupted(StreamError),
}

// =============================================================================
// SonioxClient
// =============================================================================

/// Soniox real-time streaming WebSocket client.
///
/// Implements the `BaseConnection` trait: an async `connect` that resolves
/// once the configuration handshake has completed, and synchronous
/// fire-and-continue `send_audio`, `finalize`, and `close`.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use streamscribe::core::soniox::{
///     BaseConnection, SonioxClient, SonioxConfig, StaticCredentialProvider,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = SonioxConfig {
///         language_hints: vec!["en".to_string()],
///         ..Default::default()
///     };
///     let provider = Arc::new(StaticCredentialProvider::new("your-api-key"));
///
///     let mut connection = SonioxClient::new(config, provider);
///     connection.on_result(Arc::new(|tokens| {
///         Box::pin(async move {
///             for token in tokens {
///                 println!("{}", token.text);
///             }
///         })
///     }));
///     connection.connect().await?;
///
///     // Send audio data (raw PCM S16LE bytes)
///     let frame = vec![0u8; 3200]; // 100ms at 16kHz
///     connection.send_audio(frame.into());
///
///     connection.finalize();
///     Ok(())
/// }
/// ```
pub struct SonioxClient {
    /// Per-session configuration, reused verbatim across reconnects.
    config: SonioxConfig,

    /// Issues a fresh bearer credential before each connection attempt.
    credential_provider: Arc<dyn CredentialProvider>,

    /// Backoff tuning for automatic reconnects.
    reconnect_policy: ReconnectPolicy,

    /// Byte cap on the not-yet-streaming audio backlog.
    queue_cap_bytes: usize,

    /// State shared with the session task.
    shared: Arc<ClientShared>,

    /// Session task handle (socket owner).
    session_handle: Option<tokio::task::JoinHandle<()>>,

    /// Callback forwarding task handle.
    forward_handle: Option<tokio::task::JoinHandle<()>>,
}

impl SonioxClient {
    /// Create a client for the given session parameters. No socket is opened
    /// until `connect` is called.
    pub fn new(config: SonioxConfig, credential_provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config,
            credential_provider,
            reconnect_policy: ReconnectPolicy::default(),
            queue_cap_bytes: DEFAULT_QUEUE_CAP_BYTES,
            shared: Arc::new(ClientShared::new(Uuid::new_v4())),
            session_handle: None,
            forward_handle: None,
        }
    }

    /// Override the reconnect backoff policy.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Override the byte cap on the not-yet-streaming audio backlog.
    pub fn with_queue_capacity(mut self, cap_bytes: usize) -> Self {
        self.queue_cap_bytes = cap_bytes;
        self
    }

    /// Handle one incoming WebSocket message.
    ///
    /// Returns `Ok(true)` when the upstream finished signal arrived and the
    /// session is complete, `Ok(false)` to keep reading, and `Err` when the
    /// connection cannot continue (the caller decides between reconnecting
    /// and giving up based on the error classification).
    fn handle_websocket_message(
        message: Message,
        events_tx: &mpsc::UnboundedSender<ClientEvent>,
        shared: &ClientShared,
    ) -> Result<bool, StreamError> {
        match message {
            Message::Text(text) => Self::handle_server_payload(&text, events_tx, shared),
            Message::Binary(data) => {
                // Upstream occasionally delivers JSON payloads on binary
                // frames; decode to text before classifying.
                match std::str::from_utf8(&data) {
                    Ok(text) => Self::handle_server_payload(text, events_tx, shared),
                    Err(_) => {
                        warn!(
                            "Discarding non-UTF-8 binary message ({} bytes)",
                            data.len()
                        );
                        Ok(false)
                    }
                }
            }
            Message::Close(frame) => {
                if shared.is_finalized() {
                    debug!("Upstream closed after finalize: {frame:?}");
                    let _ = events_tx.send(ClientEvent::Finished);
                    Ok(true)
                } else {
                    Err(StreamError::NetworkError(format!(
                        "Connection closed by upstream: {frame:?}"
                    )))
                }
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Handled automatically by tokio-tungstenite
                Ok(false)
            }
            Message::Frame(_) => {
                // Raw frames, ignore
                Ok(false)
            }
        }
    }

    /// Classify one decoded text payload and emit the matching events.
    fn handle_server_payload(
        text: &str,
        events_tx: &mpsc::UnboundedSender<ClientEvent>,
        shared: &ClientShared,
    ) -> Result<bool, StreamError> {
        match SonioxMessage::parse(text) {
            Ok(SonioxMessage::Result(payload)) => {
                shared.stats.lock().update_with_tokens(&payload.tokens);
                if events_tx.send(ClientEvent::Results(payload.tokens)).is_err() {
                    warn!("Failed to forward result batch - channel closed");
                }
                if payload.finished {
                    let _ = events_tx.send(ClientEvent::Finished);
                    return Ok(true);
                }
                Ok(false)
            }
            Ok(SonioxMessage::Progress(progress)) => {
                shared.stats.lock().last_audio_proc_ms = Some(progress.audio_proc_ms);
                let _ = events_tx.send(ClientEvent::Progress(progress.audio_proc_ms));
                Ok(false)
            }
            Ok(SonioxMessage::Error(payload)) => {
                let stream_error = payload.to_stream_error();
                if stream_error.is_credential_failure() {
                    // Retrying with the same credential cannot succeed. The
                    // terminal error path owns the caller notification.
                    return Err(stream_error);
                }
                if events_tx.send(ClientEvent::Error(stream_error)).is_err() {
                    warn!("Failed to forward upstream error - channel closed");
                }
                // Upstream errors do not terminate the connection by
                // themselves; the caller decides what to do next
                Ok(false)
            }
            Ok(SonioxMessage::Finished) => {
                debug!("Received upstream finished signal");
                let _ = events_tx.send(ClientEvent::Finished);
                Ok(true)
            }
            Ok(SonioxMessage::Unknown(raw)) => {
                debug!("Received unknown message shape: {raw}");
                Ok(false)
            }
            Err(e) => {
                warn!("Failed to parse upstream message: {e} - raw: {text}");
                Ok(false)
            }
        }
    }

    /// Drain the outbound queue onto the socket. On a failed write the
    /// unsent item is put back at the front so no frame is lost across a
    /// reconnect.
    async fn flush_outbound<S>(ws_sink: &mut S, shared: &ClientShared) -> Result<(), StreamError>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        loop {
            let item = shared.outbound.lock().pop();
            let Some(item) = item else {
                return Ok(());
            };

            match item {
                OutboundItem::Frame(frame) => {
                    let frame_len = frame.len();
                    if let Err(e) = ws_sink.send(Message::Binary(frame.clone())).await {
                        shared.outbound.lock().requeue_front(OutboundItem::Frame(frame));
                        return Err(StreamError::SendFailed(format!(
                            "Failed to send audio frame: {e}"
                        )));
                    }
                    let mut stats = shared.stats.lock();
                    stats.frames_sent += 1;
                    stats.bytes_sent += frame_len as u64;
                }
                OutboundItem::Finalize => {
                    let payload = serde_json::to_string(&ControlRequest::Finalize)
                        .map_err(|e| StreamError::SendFailed(format!("Failed to encode finalize: {e}")))?;
                    if let Err(e) = ws_sink.send(Message::Text(payload.into())).await {
                        shared.outbound.lock().requeue_front(OutboundItem::Finalize);
                        return Err(StreamError::SendFailed(format!(
                            "Failed to send finalize: {e}"
                        )));
                    }
                    debug!("Sent finalize control message");
                }
            }
        }
    }

    /// Session task body: owns the socket, performs the configuration
    /// handshake, drains the outbound queue, reads inbound messages, and
    /// reconnects with bounded exponential backoff on interruption.
    async fn run_session(
        shared: Arc<ClientShared>,
        config: SonioxConfig,
        credential_provider: Arc<dyn CredentialProvider>,
        policy: ReconnectPolicy,
        events_tx: mpsc::UnboundedSender<ClientEvent>,
        connected_tx: oneshot::Sender<Result<(), StreamError>>,
    ) {
        let connection_id = shared.id;
        let mut connected_tx = Some(connected_tx);
        let mut attempt: u32 = 0;

        loop {
            if shared.is_close_requested() {
                return;
            }
            shared.set_state(ConnectionState::Connecting);

            // Credential is re-minted per connection attempt so rotations
            // and reconnects never present a stale token.
            let credential = match credential_provider.issue().await {
                Ok(credential) if !credential.is_expired() => credential,
                Ok(_) => {
                    Self::fail_terminal(
                        &shared,
                        &events_tx,
                        &mut connected_tx,
                        StreamError::CredentialExpired(
                            "Credential expired before connect".to_string(),
                        ),
                    );
                    return;
                }
                Err(e) => {
                    Self::fail_terminal(&shared, &events_tx, &mut connected_tx, e);
                    return;
                }
            };

            let dial = timeout(CONNECT_TIMEOUT, connect_async(config.endpoint.as_str())).await;
            let ws_stream = match dial {
                Ok(Ok((ws_stream, _response))) => ws_stream,
                Ok(Err(e)) => {
                    let error =
                        StreamError::ConnectionFailed(format!("Failed to connect to upstream: {e}"));
                    if !Self::schedule_reconnect(
                        &shared,
                        &events_tx,
                        &policy,
                        &mut attempt,
                        error,
                        &mut connected_tx,
                    )
                    .await
                    {
                        return;
                    }
                    continue;
                }
                Err(_) => {
                    let error = StreamError::ConnectionFailed("Connection timeout".to_string());
                    if !Self::schedule_reconnect(
                        &shared,
                        &events_tx,
                        &policy,
                        &mut attempt,
                        error,
                        &mut connected_tx,
                    )
                    .await
                    {
                        return;
                    }
                    continue;
                }
            };

            info!("WebSocket connected [{connection_id}]");
            shared.set_state(ConnectionState::Connected);
            let (mut ws_sink, mut ws_reader) = ws_stream.split();

            if shared.is_close_requested() {
                let _ = ws_sink.send(Self::normal_close_message()).await;
                return;
            }

            // Configuration must be the first message on the socket.
            let handshake = ConfigRequest::new(&config, &credential);
            let payload = match serde_json::to_string(&handshake) {
                Ok(payload) => payload,
                Err(e) => {
                    Self::fail_terminal(
                        &shared,
                        &events_tx,
                        &mut connected_tx,
                        StreamError::ConfigurationError(format!(
                            "Failed to encode configuration: {e}"
                        )),
                    );
                    return;
                }
            };
            if let Err(e) = ws_sink.send(Message::Text(payload.into())).await {
                let error =
                    StreamError::NetworkError(format!("Failed to send configuration: {e}"));
                if !Self::schedule_reconnect(
                    &shared,
                    &events_tx,
                    &policy,
                    &mut attempt,
                    error,
                    &mut connected_tx,
                )
                .await
                {
                    return;
                }
                continue;
            }

            shared.set_state(ConnectionState::Streaming);
            attempt = 0;
            if let Some(tx) = connected_tx.take() {
                let _ = tx.send(Ok(()));
            }
            info!("Configuration sent, streaming [{connection_id}]");

            // Frames queued while connecting (or during the previous
            // connection's outage) go out now, in submission order.
            if let Err(e) = Self::flush_outbound(&mut ws_sink, &shared).await {
                if !Self::schedule_reconnect(
                    &shared,
                    &events_tx,
                    &policy,
                    &mut attempt,
                    e,
                    &mut connected_tx,
                )
                .await
                {
                    return;
                }
                continue;
            }

            let outcome = loop {
                tokio::select! {
                    _ = shared.wake.notified() => {
                        if shared.is_close_requested() {
                            break LoopOutcome::CloseRequested;
                        }
                        if let Err(e) = Self::flush_outbound(&mut ws_sink, &shared).await {
                            break LoopOutcome::Interrupted(e);
                        }
                    }

                    inbound = ws_reader.next() => {
                        match inbound {
                            Some(Ok(message)) => {
                                match Self::handle_websocket_message(message, &events_tx, &shared) {
                                    Ok(false) => {}
                                    Ok(true) => break LoopOutcome::Finished,
                                    Err(e) if e.is_credential_failure() => {
                                        break LoopOutcome::Fatal(e);
                                    }
                                    Err(e) => break LoopOutcome::Interrupted(e),
                                }
                            }
                            Some(Err(e)) => {
                                break LoopOutcome::Interrupted(StreamError::NetworkError(
                                    format!("WebSocket error: {e}"),
                                ));
                            }
                            None => {
                                if shared.is_finalized() {
                                    let _ = events_tx.send(ClientEvent::Finished);
                                    break LoopOutcome::Finished;
                                }
                                break LoopOutcome::Interrupted(StreamError::NetworkError(
                                    "WebSocket stream ended".to_string(),
                                ));
                            }
                        }
                    }
                }
            };

            match outcome {
                LoopOutcome::CloseRequested => {
                    let _ = ws_sink.send(Self::normal_close_message()).await;
                    info!("WebSocket connection closed [{connection_id}]");
                    return;
                }
                LoopOutcome::Finished => {
                    // The caller is expected to close() after the finished
                    // notification; the socket itself is done.
                    let _ = ws_sink.send(Self::normal_close_message()).await;
                    info!("Upstream session finished [{connection_id}]");
                    return;
                }
                LoopOutcome::Fatal(e) => {
                    Self::fail_terminal(&shared, &events_tx, &mut connected_tx, e);
                    return;
                }
                LoopOutcome::Interrupted(e) => {
                    if !Self::schedule_reconnect(
                        &shared,
                        &events_tx,
                        &policy,
                        &mut attempt,
                        e,
                        &mut connected_tx,
                    )
                    .await
                    {
                        return;
                    }
                }
            }
        }
    }

    fn normal_close_message() -> Message {
        Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "session closed".into(),
        }))
    }

    /// Enter the terminal error state and stop reconnecting.
    fn fail_terminal(
        shared: &ClientShared,
        events_tx: &mpsc::UnboundedSender<ClientEvent>,
        connected_tx: &mut Option<oneshot::Sender<Result<(), StreamError>>>,
        error: StreamError,
    ) {
        error!("Connection failed terminally [{}]: {error}", shared.id);
        shared.set_state(ConnectionState::Error(error.to_string()));
        let _ = events_tx.send(ClientEvent::Error(error.clone()));
        if let Some(tx) = connected_tx.take() {
            let _ = tx.send(Err(error));
        }
    }

    /// Record an interruption and wait out the backoff delay before the next
    /// attempt. Returns false once the attempt budget is exhausted or close
    /// was requested, meaning the session task must exit.
    async fn schedule_reconnect(
        shared: &ClientShared,
        events_tx: &mpsc::UnboundedSender<ClientEvent>,
        policy: &ReconnectPolicy,
        attempt: &mut u32,
        error: StreamError,
        connected_tx: &mut Option<oneshot::Sender<Result<(), StreamError>>>,
    ) -> bool {
        warn!("Connection interrupted [{}]: {error}", shared.id);
        shared.set_state(ConnectionState::Error(error.to_string()));
        let _ = events_tx.send(ClientEvent::Error(error));

        *attempt += 1;
        if *attempt > policy.max_attempts {
            let exhausted = StreamError::ReconnectExhausted {
                attempts: policy.max_attempts,
            };
            Self::fail_terminal(shared, events_tx, connected_tx, exhausted);
            return false;
        }

        shared.stats.lock().reconnects += 1;
        let delay = policy.delay_for(*attempt);
        info!(
            "Scheduling reconnect attempt {}/{} in {:?} [{}]",
            attempt, policy.max_attempts, delay, shared.id
        );

        // Audio pushed during the wait also fires the wake notify; only a
        // close request cancels the pending reconnect.
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                _ = shared.wake.notified() => {
                    if shared.is_close_requested() {
                        debug!("Pending reconnect cancelled by close [{}]", shared.id);
                        return false;
                    }
                }
            }
        }
    }

    /// Callback dispatch task body: drains the event channel in order and
    /// invokes the registered callbacks. Duplicate finished signals (explicit
    /// message plus sentinel token, or signal plus socket close) collapse
    /// into one notification.
    async fn forward_events(
        shared: Arc<ClientShared>,
        mut events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let mut finished_notified = false;
        while let Some(event) = events_rx.recv().await {
            match event {
                ClientEvent::Results(tokens) => {
                    let callback = shared.callbacks.read().result.clone();
                    match callback {
                        Some(callback) => callback(tokens).await,
                        None => debug!(
                            "Received {} tokens but no result callback registered",
                            tokens.len()
                        ),
                    }
                }
                ClientEvent::Progress(audio_proc_ms) => {
                    let callback = shared.callbacks.read().progress.clone();
                    if let Some(callback) = callback {
                        callback(audio_proc_ms).await;
                    }
                }
                ClientEvent::Error(stream_error) => {
                    let callback = shared.callbacks.read().error.clone();
                    match callback {
                        Some(callback) => callback(stream_error).await,
                        None => error!(
                            "Streaming error but no error callback registered: {stream_error}"
                        ),
                    }
                }
                ClientEvent::Finished => {
                    if finished_notified {
                        debug!("Suppressing duplicate finished signal");
                        continue;
                    }
                    finished_notified = true;
                    let callback = shared.callbacks.read().finished.clone();
                    match callback {
                        Some(callback) => callback().await,
                        None => info!("Upstream finished but no finished callback registered"),
                    }
                }
            }
        }
    }
}

// =============================================================================
// BaseConnection Trait Implementation
// =============================================================================

#[async_trait::async_trait]
impl BaseConnection for SonioxClient {
    async fn connect(&mut self) -> Result<(), StreamError> {
        let current = self.shared.state();
        if !matches!(current, ConnectionState::Idle | ConnectionState::Closed) {
            return Err(StreamError::InvalidState(format!(
                "Cannot connect from state {current:?}"
            )));
        }
        self.config.validate()?;

        // A connect from closed starts a fresh lifecycle; clear the flags
        // the previous one left behind and drop its tasks.
        self.shared.close_requested.store(false, Ordering::SeqCst);
        self.shared.finalize_requested.store(false, Ordering::SeqCst);
        if let Some(handle) = self.session_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.forward_handle.take() {
            handle.abort();
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (connected_tx, connected_rx) = oneshot::channel::<Result<(), StreamError>>();

        self.forward_handle = Some(tokio::spawn(Self::forward_events(
            self.shared.clone(),
            events_rx,
        )));
        self.session_handle = Some(tokio::spawn(Self::run_session(
            self.shared.clone(),
            self.config.clone(),
            self.credential_provider.clone(),
            self.reconnect_policy.clone(),
            events_tx,
            connected_tx,
        )));

        // Resolves on the first successful handshake; earlier dial failures
        // consume reconnect budget while we keep waiting.
        match connected_rx.await {
            Ok(result) => result,
            Err(_) => Err(StreamError::ConnectionFailed(
                "Connection task ended unexpectedly".to_string(),
            )),
        }
    }

    fn send_audio(&self, frame: Bytes) {
        if self.shared.is_finalized() {
            warn!("Dropping audio frame submitted after finalize");
            self.shared.stats.lock().frames_dropped += 1;
            return;
        }

        let evicted = {
            let mut queue = self.shared.outbound.lock();
            queue.push_frame(frame, self.queue_cap_bytes)
        };
        if evicted > 0 {
            self.shared.stats.lock().frames_dropped += evicted as u64;
            warn!(
                "Audio backlog over {} bytes, dropped {evicted} oldest frames",
                self.queue_cap_bytes
            );
        }
        self.shared.wake.notify_one();
    }

    fn finalize(&self) {
        if self.shared.is_finalized() {
            debug!("Finalize already requested");
            return;
        }
        match self.shared.state() {
            ConnectionState::Connected | ConnectionState::Streaming => {
                self.shared.finalize_requested.store(true, Ordering::SeqCst);
                self.shared.outbound.lock().push_finalize();
                self.shared.wake.notify_one();
                info!("Finalize requested [{}]", self.shared.id);
            }
            state => {
                debug!("Finalize ignored, no active socket (state {state:?})");
            }
        }
    }

    fn close(&self) {
        if matches!(self.shared.state(), ConnectionState::Closed) {
            debug!("Close already performed");
            return;
        }

        self.shared.close_requested.store(true, Ordering::SeqCst);
        self.shared.finalize_requested.store(false, Ordering::SeqCst);
        let cleared = self.shared.outbound.lock().clear();
        if cleared > 0 {
            self.shared.stats.lock().frames_dropped += cleared as u64;
            debug!("Discarded {cleared} queued frames on close");
        }
        self.shared.set_state(ConnectionState::Closed);
        self.shared.wake.notify_one();
        info!("Connection closed [{}]", self.shared.id);
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn is_streaming(&self) -> bool {
        self.shared.state().is_streaming()
    }

    fn on_result(&self, callback: ResultCallback) {
        self.shared.callbacks.write().result = Some(callback);
    }

    fn on_error(&self, callback: ErrorCallback) {
        self.shared.callbacks.write().error = Some(callback);
    }

    fn on_finished(&self, callback: FinishedCallback) {
        self.shared.callbacks.write().finished = Some(callback);
    }

    fn on_progress(&self, callback: ProgressCallback) {
        self.shared.callbacks.write().progress = Some(callback);
    }

    fn id(&self) -> Uuid {
        self.shared.id
    }

    fn stats(&self) -> SessionStats {
        self.shared.stats.lock().clone()
    }
}

// =============================================================================
// Drop Implementation
// =============================================================================

impl Drop for SonioxClient {
    fn drop(&mut self) {
        if let Some(handle) = self.session_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.forward_handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
