//! Test-only stub connection for exercising the rotator without sockets.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use parking_lot::RwLock as SyncRwLock;
use uuid::Uuid;

use crate::core::soniox::{
    BaseConnection, ConnectionState, ErrorCallback, FinishedCallback, ProgressCallback,
    ResultCallback, SessionStats, StreamError, Token,
};

use super::rotator::ConnectionFactory;

#[derive(Default)]
struct MockCallbacks {
    result: Option<ResultCallback>,
    error: Option<ErrorCallback>,
    finished: Option<FinishedCallback>,
    progress: Option<ProgressCallback>,
}

struct MockInner {
    id: Uuid,
    state: SyncRwLock<ConnectionState>,
    frames: SyncRwLock<Vec<Bytes>>,
    connect_failure: SyncRwLock<Option<StreamError>>,
    connect_calls: AtomicU32,
    finalize_calls: AtomicU32,
    close_calls: AtomicU32,
    callbacks: SyncRwLock<MockCallbacks>,
}

/// Stub connection that records every operation and lets tests drive the
/// callbacks the rotator installed on it.
pub struct MockConnection {
    inner: Arc<MockInner>,
}

impl MockConnection {
    /// `connect_failure` of Some makes the first connect call fail with the
    /// given error; None makes connects succeed immediately.
    pub fn new(connect_failure: Option<StreamError>) -> Self {
        Self {
            inner: Arc::new(MockInner {
                id: Uuid::new_v4(),
                state: SyncRwLock::new(ConnectionState::Idle),
                frames: SyncRwLock::new(Vec::new()),
                connect_failure: SyncRwLock::new(connect_failure),
                connect_calls: AtomicU32::new(0),
                finalize_calls: AtomicU32::new(0),
                close_calls: AtomicU32::new(0),
                callbacks: SyncRwLock::new(MockCallbacks::default()),
            }),
        }
    }

    /// Handle for assertions and event injection after the connection has
    /// been moved into the rotator.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            inner: self.inner.clone(),
        }
    }
}

#[async_trait::async_trait]
impl BaseConnection for MockConnection {
    async fn connect(&mut self) -> Result<(), StreamError> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.inner.connect_failure.write().take() {
            *self.inner.state.write() = ConnectionState::Error(error.to_string());
            return Err(error);
        }
        *self.inner.state.write() = ConnectionState::Streaming;
        Ok(())
    }

    fn send_audio(&self, frame: Bytes) {
        self.inner.frames.write().push(frame);
    }

    fn finalize(&self) {
        self.inner.finalize_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        *self.inner.state.write() = ConnectionState::Closed;
    }

    fn state(&self) -> ConnectionState {
        self.inner.state.read().clone()
    }

    fn is_streaming(&self) -> bool {
        self.inner.state.read().is_streaming()
    }

    fn on_result(&self, callback: ResultCallback) {
        self.inner.callbacks.write().result = Some(callback);
    }

    fn on_error(&self, callback: ErrorCallback) {
        self.inner.callbacks.write().error = Some(callback);
    }

    fn on_finished(&self, callback: FinishedCallback) {
        self.inner.callbacks.write().finished = Some(callback);
    }

    fn on_progress(&self, callback: ProgressCallback) {
        self.inner.callbacks.write().progress = Some(callback);
    }

    fn id(&self) -> Uuid {
        self.inner.id
    }

    fn stats(&self) -> SessionStats {
        let frames = self.inner.frames.read();
        SessionStats {
            frames_sent: frames.len() as u64,
            bytes_sent: frames.iter().map(|f| f.len() as u64).sum(),
            ..Default::default()
        }
    }
}

/// Cloneable view into a mock connection owned by the rotator.
#[derive(Clone)]
pub struct MockHandle {
    inner: Arc<MockInner>,
}

impl MockHandle {
    pub fn frames(&self) -> Vec<Bytes> {
        self.inner.frames.read().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.inner.frames.read().len()
    }

    pub fn received_frame(&self, frame: &[u8]) -> bool {
        self.inner.frames.read().iter().any(|f| f[..] == *frame)
    }

    pub fn connect_calls(&self) -> u32 {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn finalize_calls(&self) -> u32 {
        self.inner.finalize_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.read().clone()
    }

    /// Drive the result callback the rotator installed on this connection.
    pub async fn emit_results(&self, tokens: Vec<Token>) {
        let callback = self.inner.callbacks.read().result.clone();
        if let Some(callback) = callback {
            callback(tokens).await;
        }
    }

    /// Drive the error callback the rotator installed on this connection.
    pub async fn emit_error(&self, error: StreamError) {
        let callback = self.inner.callbacks.read().error.clone();
        if let Some(callback) = callback {
            callback(error).await;
        }
    }

    /// Drive the finished callback the rotator installed on this connection.
    pub async fn emit_finished(&self) {
        let callback = self.inner.callbacks.read().finished.clone();
        if let Some(callback) = callback {
            callback().await;
        }
    }
}

/// Factory producing mock connections and keeping a handle to each, in
/// creation order. Connect failures can be scripted ahead of time.
pub struct MockFactory {
    handles: SyncRwLock<Vec<MockHandle>>,
    connect_failures: SyncRwLock<VecDeque<StreamError>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handles: SyncRwLock::new(Vec::new()),
            connect_failures: SyncRwLock::new(VecDeque::new()),
        })
    }

    /// Make the next created connection fail its connect call.
    pub fn fail_next_connect(&self, error: StreamError) {
        self.connect_failures.write().push_back(error);
    }

    /// Handle to the n-th created connection (0 is the first primary).
    pub fn handle(&self, index: usize) -> MockHandle {
        self.handles.read()[index].clone()
    }

    /// Number of connections created so far.
    pub fn connection_count(&self) -> usize {
        self.handles.read().len()
    }

    pub fn as_factory(self: &Arc<Self>) -> ConnectionFactory {
        let this = self.clone();
        Arc::new(move || {
            let failure = this.connect_failures.write().pop_front();
            let connection = MockConnection::new(failure);
            this.handles.write().push(connection.handle());
            Box::new(connection) as Box<dyn BaseConnection>
        })
    }
}
