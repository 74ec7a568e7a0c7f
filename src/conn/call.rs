//! One outstanding procedure invocation, from admission to resolution.

use crate::protocol::response::ClientResponse;
use crate::{VoltError, VoltResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, OwnedSemaphorePermit};
use tokio::time::Instant;

/// How an admission request behaves when the node's inflight ceiling is
/// reached.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdmissionMode {
    /// Suspend until there is slack or the call's deadline fires.
    Block,
    /// Fail immediately with `Backpressure`.
    FailFast,
}

/// Where a call's result is delivered. Every admitted call is resolved
/// into its sink exactly once.
pub(crate) enum CompletionSink {
    /// Invoked on the reader task.
    Callback(Box<dyn FnOnce(VoltResult<ClientResponse>) + Send + 'static>),
    /// One-shot notifier backing a [`CallHandle`].
    Notify(oneshot::Sender<VoltResult<ClientResponse>>),
    /// Internal calls (keep-alive pings) whose result nobody reads.
    Discard,
}

impl std::fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback"),
            Self::Notify(_) => f.write_str("Notify"),
            Self::Discard => f.write_str("Discard"),
        }
    }
}

impl CompletionSink {
    pub(crate) fn resolve(self, result: VoltResult<ClientResponse>) {
        match self {
            Self::Callback(callback) => callback(result),
            Self::Notify(tx) => {
                // the caller may have dropped its CallHandle; that is fine
                let _ = tx.send(result);
            }
            Self::Discard => {}
        }
    }
}

/// A pending request-response pair.
///
/// Exclusively owned by its executor from admission to completion; the
/// semaphore permit it carries is the slot it occupies in the node's
/// inflight ceiling and is released when the call is resolved.
#[derive(Debug)]
pub(crate) struct Call {
    pub(crate) procedure: String,
    pub(crate) param_buf: Vec<u8>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) sink: CompletionSink,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) permit: Option<OwnedSemaphorePermit>,
    pub(crate) is_ping: bool,
    pub(crate) enqueued_at: Instant,
}

impl Call {
    pub(crate) fn new(
        procedure: String,
        param_buf: Vec<u8>,
        deadline: Option<Instant>,
        sink: CompletionSink,
    ) -> Self {
        Self {
            procedure,
            param_buf,
            deadline,
            sink,
            cancelled: Arc::new(AtomicBool::new(false)),
            permit: None,
            is_ping: false,
            enqueued_at: Instant::now(),
        }
    }

    pub(crate) fn resolve(self, result: VoltResult<ClientResponse>) {
        self.sink.resolve(result);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn into_pending(self) -> PendingCall {
        PendingCall {
            deadline: self.deadline,
            sink: self.sink,
            cancelled: self.cancelled,
            permit: self.permit,
            is_ping: self.is_ping,
            dispatched_at: Instant::now(),
        }
    }
}

/// What stays in the pending table once the writer has put the call on the
/// wire.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub(crate) deadline: Option<Instant>,
    pub(crate) sink: CompletionSink,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) permit: Option<OwnedSemaphorePermit>,
    pub(crate) is_ping: bool,
    pub(crate) dispatched_at: Instant,
}

impl PendingCall {
    pub(crate) fn resolve(self, result: VoltResult<ClientResponse>) {
        self.sink.resolve(result);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Handle to an in-flight call started with
/// [`Client::begin`](crate::Client::begin).
///
/// The result is claimed with [`CallHandle::end`]; claiming it twice
/// fails with [`VoltError::InvalidHandle`]. Dropping the handle does not
/// cancel the call; use [`CallHandle::cancel`] for that.
#[derive(Debug)]
pub struct CallHandle {
    receiver: Option<oneshot::Receiver<VoltResult<ClientResponse>>>,
    cancelled: Arc<AtomicBool>,
}

impl CallHandle {
    pub(crate) fn new(
        receiver: oneshot::Receiver<VoltResult<ClientResponse>>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            receiver: Some(receiver),
            cancelled,
        }
    }

    /// Waits for the call to resolve and returns its result.
    ///
    /// # Errors
    /// `VoltError::InvalidHandle` if the result was already consumed.
    pub async fn end(&mut self) -> VoltResult<ClientResponse> {
        let receiver = self.receiver.take().ok_or(VoltError::InvalidHandle)?;
        match receiver.await {
            Ok(result) => result,
            // the executor went away without resolving; treated like a close
            Err(_) => Err(VoltError::ShutDown),
        }
    }

    /// Marks the call cancelled.
    ///
    /// There is no wire message revoking a call server-side: a response
    /// that still arrives is dropped, and the pending entry is reaped when
    /// its deadline fires.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}
