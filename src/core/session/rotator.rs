//! Transparent connection rotation for long-running streaming sessions.
//!
//! Upstream enforces a hard per-connection duration ceiling. `SessionRotator`
//! keeps a logical session alive past it by opening a replacement connection
//! shortly before the ceiling, dual-writing audio to both connections for a
//! short overlap window, then promoting the replacement and closing the
//! outgoing connection. Callers see the surface of a single connection and
//! never observe the handover.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock as SyncRwLock};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};

use crate::core::soniox::{
    BaseConnection, ConnectionState, CredentialProvider, ErrorCallback, FinishedCallback,
    ProgressCallback, ResultCallback, SessionStats, SonioxClient, SonioxConfig, Token,
};

use super::config::RotationPolicy;
use super::errors::{SessionError, SessionResult};

/// Type alias for the connection factory invoked once per connection: at
/// session start and again for every rotation secondary.
pub type ConnectionFactory = Arc<dyn Fn() -> Box<dyn BaseConnection> + Send + Sync>;

// =============================================================================
// Shared State
// =============================================================================

/// Consumer-facing callbacks, invoked only for the authoritative connection.
#[derive(Default)]
struct ConsumerCallbacks {
    result: Option<ResultCallback>,
    error: Option<ErrorCallback>,
    finished: Option<FinishedCallback>,
    progress: Option<ProgressCallback>,
}

/// The connection slots. Only the rotator mutates which connection is
/// primary; nothing else holds a connection reference across a rotation.
#[derive(Default)]
struct Slots {
    primary: Option<Box<dyn BaseConnection>>,
    /// Present only during an active overlap window.
    secondary: Option<Box<dyn BaseConnection>>,
}

struct RotatorShared {
    factory: ConnectionFactory,
    policy: RotationPolicy,
    slots: SyncRwLock<Slots>,

    /// Generation counter handed to each connection as it is wired up.
    next_generation: AtomicU64,

    /// Generation of the connection whose inbound events are forwarded to
    /// the consumer. Events from any other generation are suppressed, which
    /// is what silences the outgoing primary during the overlap window.
    authoritative: AtomicU64,

    callbacks: SyncRwLock<ConsumerCallbacks>,
    stopped: AtomicBool,
    rotations_completed: AtomicU64,
    rotation_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

// =============================================================================
// SessionRotator
// =============================================================================

/// Session-level facade over one or two upstream connections.
///
/// `start` connects the first primary and schedules the rotation timer;
/// `send_audio`, `finalize`, and `stop` are synchronous fire-and-continue
/// like the underlying connection surface.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use streamscribe::core::session::{RotationPolicy, SessionRotator};
/// use streamscribe::core::soniox::{SonioxConfig, StaticCredentialProvider};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = SonioxConfig {
///         language_hints: vec!["en".to_string()],
///         ..Default::default()
///     };
///     let provider = Arc::new(StaticCredentialProvider::new("your-api-key"));
///
///     let rotator =
///         SessionRotator::for_soniox(config, provider, RotationPolicy::default());
///     rotator.on_result(Arc::new(|tokens| {
///         Box::pin(async move {
///             for token in tokens {
///                 println!("{}", token.text);
///             }
///         })
///     }));
///
///     rotator.start().await?;
///     rotator.send_audio(vec![0u8; 3200].into());
///     rotator.stop();
///     Ok(())
/// }
/// ```
pub struct SessionRotator {
    shared: Arc<RotatorShared>,
}

impl SessionRotator {
    /// Create a rotator over an arbitrary connection factory.
    pub fn new(factory: ConnectionFactory, policy: RotationPolicy) -> Self {
        Self {
            shared: Arc::new(RotatorShared {
                factory,
                policy,
                slots: SyncRwLock::new(Slots::default()),
                next_generation: AtomicU64::new(0),
                authoritative: AtomicU64::new(0),
                callbacks: SyncRwLock::new(ConsumerCallbacks::default()),
                stopped: AtomicBool::new(false),
                rotations_completed: AtomicU64::new(0),
                rotation_handle: Mutex::new(None),
            }),
        }
    }

    /// Create a rotator producing Soniox connections. The configuration is
    /// reused verbatim for every connection; the credential provider is
    /// asked for a fresh credential each time one is opened.
    pub fn for_soniox(
        config: SonioxConfig,
        credential_provider: Arc<dyn CredentialProvider>,
        policy: RotationPolicy,
    ) -> Self {
        let factory: ConnectionFactory = Arc::new(move || {
            Box::new(SonioxClient::new(
                config.clone(),
                credential_provider.clone(),
            )) as Box<dyn BaseConnection>
        });
        Self::new(factory, policy)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect the first primary and schedule the rotation timer.
    ///
    /// # Returns
    /// * `SessionResult<()>` - Ok once the primary is streaming
    pub async fn start(&self) -> SessionResult<()> {
        self.shared.policy.validate()?;
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(SessionError::InvalidState(
                "Session has been stopped".to_string(),
            ));
        }
        if self.shared.slots.read().primary.is_some() {
            return Err(SessionError::InvalidState(
                "Session is already started".to_string(),
            ));
        }

        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut primary = (self.shared.factory)();
        Self::wire_connection(&self.shared, primary.as_ref(), generation);

        primary.connect().await?;

        self.shared.authoritative.store(generation, Ordering::SeqCst);
        self.shared.slots.write().primary = Some(primary);

        let handle = tokio::spawn(Self::run_rotation_schedule(self.shared.clone()));
        *self.shared.rotation_handle.lock() = Some(handle);

        info!(
            "Session started, first rotation in {:?}",
            self.shared.policy.rotation_interval()
        );
        Ok(())
    }

    /// Stop the session: cancel the rotation timer and close both
    /// connections. Idempotent.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            debug!("Session already stopped");
            return;
        }

        if let Some(handle) = self.shared.rotation_handle.lock().take() {
            handle.abort();
        }

        let slots = self.shared.slots.read();
        if let Some(secondary) = &slots.secondary {
            secondary.close();
        }
        if let Some(primary) = &slots.primary {
            primary.close();
        }
        info!("Session stopped");
    }

    // =========================================================================
    // Audio and Session Control
    // =========================================================================

    /// Submit one audio frame.
    ///
    /// During an overlap window the frame goes to the replacement connection
    /// first and then always to the primary; both receive every frame. This
    /// is intentional dual-write, not a failover choice.
    pub fn send_audio(&self, frame: Bytes) {
        let slots = self.shared.slots.read();
        if let Some(secondary) = &slots.secondary {
            secondary.send_audio(frame.clone());
        }
        if let Some(primary) = &slots.primary {
            primary.send_audio(frame);
        } else {
            debug!("Discarding audio frame, session not started");
        }
    }

    /// Ask the authoritative connection to flush buffered audio and emit
    /// remaining final results.
    pub fn finalize(&self) {
        let slots = self.shared.slots.read();
        if let Some(secondary) = &slots.secondary {
            secondary.finalize();
        } else if let Some(primary) = &slots.primary {
            primary.finalize();
        } else {
            debug!("Finalize ignored, session not started");
        }
    }

    // =========================================================================
    // Callback Registration
    // =========================================================================

    /// Register the callback invoked with each authoritative result batch.
    pub fn on_result(&self, callback: ResultCallback) {
        self.shared.callbacks.write().result = Some(callback);
    }

    /// Register the callback invoked with authoritative connection errors.
    pub fn on_error(&self, callback: ErrorCallback) {
        self.shared.callbacks.write().error = Some(callback);
    }

    /// Register the callback invoked when the authoritative connection
    /// reports that no further results will arrive.
    pub fn on_finished(&self, callback: FinishedCallback) {
        self.shared.callbacks.write().finished = Some(callback);
    }

    /// Register the callback invoked with upstream progress reports.
    pub fn on_progress(&self, callback: ProgressCallback) {
        self.shared.callbacks.write().progress = Some(callback);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Lifecycle state of the authoritative connection.
    pub fn state(&self) -> ConnectionState {
        let slots = self.shared.slots.read();
        if let Some(secondary) = &slots.secondary {
            return secondary.state();
        }
        match &slots.primary {
            Some(primary) => primary.state(),
            None => ConnectionState::Idle,
        }
    }

    /// True if the authoritative connection is streaming.
    pub fn is_streaming(&self) -> bool {
        self.state().is_streaming()
    }

    /// Number of completed rotations since `start`.
    pub fn rotation_count(&self) -> u64 {
        self.shared.rotations_completed.load(Ordering::SeqCst)
    }

    /// Counters of the authoritative connection, if one exists.
    pub fn connection_stats(&self) -> Option<SessionStats> {
        let slots = self.shared.slots.read();
        if let Some(secondary) = &slots.secondary {
            return Some(secondary.stats());
        }
        slots.primary.as_ref().map(|primary| primary.stats())
    }

    // =========================================================================
    // Rotation Internals
    // =========================================================================

    /// Install generation-filtered callbacks on a connection. Events from a
    /// connection that is not (or no longer) authoritative are suppressed so
    /// the consumer never sees duplicate tokens across a handover.
    fn wire_connection(
        shared: &Arc<RotatorShared>,
        connection: &dyn BaseConnection,
        generation: u64,
    ) {
        let for_result = shared.clone();
        connection.on_result(Arc::new(move |tokens: Vec<Token>| {
            let shared = for_result.clone();
            Box::pin(async move {
                if shared.authoritative.load(Ordering::SeqCst) != generation {
                    debug!(
                        "Suppressing {} tokens from superseded connection",
                        tokens.len()
                    );
                    return;
                }
                let callback = shared.callbacks.read().result.clone();
                if let Some(callback) = callback {
                    callback(tokens).await;
                }
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        }));

        let for_error = shared.clone();
        connection.on_error(Arc::new(move |stream_error| {
            let shared = for_error.clone();
            Box::pin(async move {
                if shared.authoritative.load(Ordering::SeqCst) != generation {
                    debug!("Suppressing error from superseded connection: {stream_error}");
                    return;
                }
                let callback = shared.callbacks.read().error.clone();
                match callback {
                    Some(callback) => callback(stream_error).await,
                    None => error!("Session error with no error callback registered: {stream_error}"),
                }
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        }));

        let for_finished = shared.clone();
        connection.on_finished(Arc::new(move || {
            let shared = for_finished.clone();
            Box::pin(async move {
                if shared.authoritative.load(Ordering::SeqCst) != generation {
                    debug!("Suppressing finished signal from superseded connection");
                    return;
                }
                let callback = shared.callbacks.read().finished.clone();
                if let Some(callback) = callback {
                    callback().await;
                }
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        }));

        let for_progress = shared.clone();
        connection.on_progress(Arc::new(move |audio_proc_ms| {
            let shared = for_progress.clone();
            Box::pin(async move {
                if shared.authoritative.load(Ordering::SeqCst) != generation {
                    return;
                }
                let callback = shared.callbacks.read().progress.clone();
                if let Some(callback) = callback {
                    callback(audio_proc_ms).await;
                }
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        }));
    }

    /// Timer task body: wait out each rotation interval, perform the
    /// handover, and reschedule. A failed handover is retried after a short
    /// delay rather than abandoned, since a session running past the hard
    /// ceiling would be cut off by upstream.
    async fn run_rotation_schedule(shared: Arc<RotatorShared>) {
        let mut deadline = Instant::now() + shared.policy.rotation_interval();
        loop {
            sleep_until(deadline).await;
            if shared.stopped.load(Ordering::SeqCst) {
                return;
            }

            match Self::rotate_once(&shared).await {
                Ok(()) => {
                    // The replacement's clock started ticking when it
                    // connected; schedule relative to now, not session start.
                    deadline = Instant::now() + shared.policy.rotation_interval();
                    info!(
                        "Rotation complete ({} total), next in {:?}",
                        shared.rotations_completed.load(Ordering::SeqCst),
                        shared.policy.rotation_interval()
                    );
                }
                Err(e) => {
                    warn!(
                        "Connection handover failed, retrying in {:?}: {e}",
                        shared.policy.handover_retry_delay
                    );
                    deadline = Instant::now() + shared.policy.handover_retry_delay;
                }
            }

            if shared.stopped.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// One rotation attempt: open and connect a replacement, make it
    /// authoritative, dual-write through the overlap window, then promote it
    /// and close the outgoing primary.
    async fn rotate_once(shared: &Arc<RotatorShared>) -> SessionResult<()> {
        let generation = shared.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut secondary = (shared.factory)();
        Self::wire_connection(shared, secondary.as_ref(), generation);

        info!("Opening replacement connection (generation {generation})");
        if let Err(e) = secondary.connect().await {
            // The failed replacement is discarded; the existing primary
            // stays authoritative and untouched.
            secondary.close();
            return Err(e.into());
        }

        // The replacement is authoritative from this instant; the outgoing
        // primary's remaining results are suppressed rather than risking
        // duplicate token emission.
        shared.authoritative.store(generation, Ordering::SeqCst);
        shared.slots.write().secondary = Some(secondary);
        debug!("Overlap window open (generation {generation} authoritative)");

        sleep(shared.policy.overlap_window).await;

        let outgoing = {
            let mut slots = shared.slots.write();
            let incoming = slots.secondary.take();
            std::mem::replace(&mut slots.primary, incoming)
        };
        if let Some(outgoing) = outgoing {
            outgoing.close();
        }
        shared.rotations_completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for SessionRotator {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.rotation_handle.lock().take() {
            handle.abort();
        }
    }
}

// Compile-time assertion that SessionRotator is Send + Sync.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<SessionRotator>;
};
