//! One TCP session to one server node.
//!
//! An executor owns a logged-in socket and three cooperative tasks: a
//! writer that assigns handles and puts admitted calls on the wire, a
//! reader that demultiplexes responses by handle, and a low-frequency
//! ticker that expires deadlines. The inflight ceiling is enforced with a
//! semaphore whose permits travel with the calls; `pending + outbound`
//! can therefore never exceed the configured maximum.

use crate::conn::call::{AdmissionMode, Call, CompletionSink, PendingCall};
use crate::conn::config::ClientConfiguration;
use crate::conn::params::ConnectParams;
use crate::conn::system::SystemProcedure;
use crate::protocol::login::{self, ServerIdentity, Service};
use crate::protocol::response::ClientResponse;
use crate::protocol::{frame, invocation};
use crate::{VoltError, VoltResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::{self, Duration, Instant};

/// How often the deadline sweep runs.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of an executor.
///
/// The connecting/login phase is the [`Executor::open`] future itself; an
/// executor that failed to open is simply never constructed, which is the
/// `Dead` outcome for the connection attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ExecutorState {
    /// Accepts calls, reads responses, expires deadlines.
    Ready,
    /// No longer admits calls, but still drains pending ones up to their
    /// deadlines. Entered on graceful shutdown.
    Draining,
    /// An I/O or protocol error was observed; pending calls are being
    /// failed with `ConnectionLost`.
    Faulted,
    /// Terminal; the pool may discard the executor.
    Dead,
}

/// Notifications to the pool's supervisor.
#[derive(Debug)]
pub(crate) enum PoolEvent {
    /// An executor observed a fault and is now dead.
    Down { host_id: i32, addr: String },
    /// The pool was closed; the supervisor can stop.
    Closed,
}

struct ExecutorInner {
    addr: String,
    identity: ServerIdentity,
    config: ClientConfiguration,
    state: Mutex<ExecutorState>,
    // handle -> pending call; writer inserts, reader and ticker remove
    pending: Mutex<HashMap<i64, PendingCall>>,
    slots: Arc<Semaphore>,
    // |pending| + |outbound|, kept for the pool's load-based selection
    load: AtomicUsize,
    queue_tx: mpsc::UnboundedSender<Call>,
    shutdown_tx: watch::Sender<bool>,
    closed_by_user: AtomicBool,
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl ExecutorInner {
    fn state(&self) -> ExecutorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, new: ExecutorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = new;
    }

    fn close_error(&self) -> VoltError {
        if self.closed_by_user.load(Ordering::Relaxed) {
            VoltError::ShutDown
        } else {
            VoltError::ConnectionLost
        }
    }

    // Removes and returns every pending call.
    fn drain_pending(&self) -> Vec<(i64, PendingCall)> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect()
    }
}

/// Handle to one node connection; cheap to clone, shared with the tasks.
#[derive(Clone)]
pub(crate) struct Executor {
    inner: Arc<ExecutorInner>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("addr", &self.inner.addr)
            .field("host_id", &self.inner.identity.host_id())
            .field("state", &self.inner.state())
            .field("load", &self.load())
            .finish()
    }
}

impl Executor {
    /// Opens the TCP connection, performs the login handshake, and spawns
    /// the writer, reader and ticker tasks.
    pub(crate) async fn open(
        addr: &str,
        params: &ConnectParams,
        config: ClientConfiguration,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) -> VoltResult<Self> {
        debug!("opening connection to {addr}");
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let mut login_payload = Vec::new();
        login::emit_login_request(
            Service::Database,
            params.username(),
            params.password(),
            &mut login_payload,
        )?;
        frame::write_frame(&mut stream, &login_payload).await?;
        let response = frame::read_frame(&mut stream).await?;
        let identity = login::parse_login_response(&mut std::io::Cursor::new(response))?;
        debug!(
            "logged in to {addr}: host id {}, build {:?}",
            identity.host_id(),
            identity.build()
        );

        let (rd, wr) = stream.into_split();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(ExecutorInner {
            addr: addr.to_string(),
            identity,
            slots: Arc::new(Semaphore::new(config.max_inflight_per_node())),
            config,
            state: Mutex::new(ExecutorState::Ready),
            pending: Mutex::new(HashMap::new()),
            load: AtomicUsize::new(0),
            queue_tx,
            shutdown_tx,
            closed_by_user: AtomicBool::new(false),
            events,
        });

        tokio::spawn(writer_task(inner.clone(), queue_rx, wr, shutdown_rx.clone()));
        tokio::spawn(reader_task(inner.clone(), rd, shutdown_rx.clone()));
        tokio::spawn(ticker_task(inner.clone(), shutdown_rx));
        Ok(Self { inner })
    }

    pub(crate) fn identity(&self) -> &ServerIdentity {
        &self.inner.identity
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.inner.state() == ExecutorState::Ready
    }

    /// Current `|pending| + |outbound|`.
    pub(crate) fn load(&self) -> usize {
        self.inner.load.load(Ordering::Relaxed)
    }

    /// Tries to admit a call.
    ///
    /// On success the call is owned by this executor until it is resolved.
    /// On failure the call is handed back together with the reason, so the
    /// pool can either re-dispatch it to another node or fail it.
    pub(crate) async fn admit(
        &self,
        mut call: Call,
        mode: AdmissionMode,
    ) -> Result<(), (VoltError, Call)> {
        match self.inner.state() {
            ExecutorState::Ready => {}
            ExecutorState::Draining => return Err((VoltError::ShutDown, call)),
            ExecutorState::Faulted | ExecutorState::Dead => {
                return Err((VoltError::ConnectionLost, call));
            }
        }

        let slots = Arc::clone(&self.inner.slots);
        let permit = match mode {
            AdmissionMode::FailFast => match slots.try_acquire_owned() {
                Ok(permit) => permit,
                Err(tokio::sync::TryAcquireError::NoPermits) => {
                    return Err((VoltError::Backpressure, call));
                }
                Err(tokio::sync::TryAcquireError::Closed) => {
                    return Err((self.inner.close_error(), call));
                }
            },
            AdmissionMode::Block => {
                let acquired = match call.deadline {
                    Some(deadline) => match time::timeout_at(deadline, slots.acquire_owned()).await
                    {
                        Ok(acquired) => acquired,
                        // the deadline fired before there was slack; the
                        // call was never enqueued
                        Err(_elapsed) => return Err((VoltError::Timeout, call)),
                    },
                    None => slots.acquire_owned().await,
                };
                match acquired {
                    Ok(permit) => permit,
                    Err(_closed) => return Err((self.inner.close_error(), call)),
                }
            }
        };

        // the state may have flipped while we waited for a slot
        if self.inner.state() != ExecutorState::Ready {
            return Err((self.inner.close_error(), call));
        }

        call.permit = Some(permit);
        self.inner.load.fetch_add(1, Ordering::SeqCst);
        if let Err(rejected) = self.inner.queue_tx.send(call) {
            self.inner.load.fetch_sub(1, Ordering::SeqCst);
            let mut call = rejected.0;
            call.permit = None;
            return Err((self.inner.close_error(), call));
        }
        Ok(())
    }

    /// Stops admission; pending calls keep draining up to their deadlines.
    pub(crate) fn start_draining(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *state == ExecutorState::Ready {
            debug!("connection to {} draining", self.inner.addr);
            *state = ExecutorState::Draining;
        }
    }

    /// Terminal close: fails everything still pending or queued with
    /// `ShutDown` and stops the tasks.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *state == ExecutorState::Dead {
                return;
            }
            *state = ExecutorState::Dead;
        }
        debug!("connection to {} shut down", self.inner.addr);
        self.inner.closed_by_user.store(true, Ordering::Relaxed);
        self.inner.slots.close();
        let _ = self.inner.shutdown_tx.send(true);
        for (_, call) in self.inner.drain_pending() {
            self.inner.load.fetch_sub(1, Ordering::SeqCst);
            call.resolve(Err(VoltError::ShutDown));
        }
    }
}

async fn writer_task(
    inner: Arc<ExecutorInner>,
    mut queue_rx: mpsc::UnboundedReceiver<Call>,
    mut wr: OwnedWriteHalf,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // the writer owns the handle counter; handles are unique per executor
    // and never reused while a call is pending
    let mut next_handle: i64 = 1;
    let keepalive = inner.config.keepalive_interval();
    loop {
        let call = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            received = queue_rx.recv() => match received {
                Some(call) => call,
                None => break,
            },
            () = time::sleep(keepalive) => match synthesize_ping(&inner) {
                Some(ping) => ping,
                None => continue,
            },
        };

        let handle = next_handle;
        next_handle += 1;

        let mut payload = Vec::new();
        if let Err(e) =
            invocation::emit_invocation(&call.procedure, handle, &call.param_buf, &mut payload)
        {
            // per-call failure; the connection itself is fine
            inner.load.fetch_sub(1, Ordering::SeqCst);
            call.resolve(Err(e));
            continue;
        }
        trace!(
            "{}: writing {} as handle {handle} after {:?} in queue",
            inner.addr,
            call.procedure,
            call.enqueued_at.elapsed()
        );
        inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, call.into_pending());
        if let Err(e) = frame::write_frame(&mut wr, &payload).await {
            fault(&inner, &e);
            break;
        }
    }

    // refuse further sends, then fail whatever is still queued; a send
    // racing with the close is either drained here or bounced to the pool
    queue_rx.close();
    while let Ok(call) = queue_rx.try_recv() {
        inner.load.fetch_sub(1, Ordering::SeqCst);
        call.resolve(Err(inner.close_error()));
    }
    trace!("{}: writer task ends", inner.addr);
}

// A ping occupies an inflight slot like any other call; when the node is
// saturated the ping is skipped, since a saturated connection is not idle.
fn synthesize_ping(inner: &Arc<ExecutorInner>) -> Option<Call> {
    if inner.state() != ExecutorState::Ready {
        return None;
    }
    let permit = Arc::clone(&inner.slots).try_acquire_owned().ok()?;
    let param_buf = invocation::serialize_params(&[]).ok()?;
    let mut call = Call::new(
        SystemProcedure::Ping.name().to_string(),
        param_buf,
        Some(Instant::now() + inner.config.keepalive_interval()),
        CompletionSink::Discard,
    );
    call.is_ping = true;
    call.permit = Some(permit);
    inner.load.fetch_add(1, Ordering::SeqCst);
    trace!("{}: synthesizing keep-alive ping", inner.addr);
    Some(call)
}

async fn reader_task(
    inner: Arc<ExecutorInner>,
    mut rd: OwnedReadHalf,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            read = frame::read_frame(&mut rd) => match read {
                Ok(payload) => payload,
                Err(e) => {
                    fault(&inner, &e);
                    break;
                }
            },
        };
        match ClientResponse::parse(&mut std::io::Cursor::new(payload)) {
            Ok(response) => deliver(&inner, response),
            Err(e) => {
                fault(&inner, &e);
                break;
            }
        }
    }
    trace!("{}: reader task ends", inner.addr);
}

// Responses are delivered in wire arrival order, on the reader task.
fn deliver(inner: &Arc<ExecutorInner>, response: ClientResponse) {
    let handle = response.client_handle();
    let removed = inner
        .pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&handle);
    match removed {
        None => {
            // a late response for a timed-out or cancelled call, or a
            // server-side protocol bug; either way not fatal
            warn!("{}: dropping response for unknown handle {handle}", inner.addr);
        }
        Some(pending) => {
            inner.load.fetch_sub(1, Ordering::SeqCst);
            if pending.is_cancelled() {
                trace!("{}: dropping response for cancelled handle {handle}", inner.addr);
            } else {
                trace!(
                    "{}: handle {handle} resolved after {:?}",
                    inner.addr,
                    pending.dispatched_at.elapsed()
                );
                pending.resolve(Ok(response));
            }
        }
    }
}

async fn ticker_task(inner: Arc<ExecutorInner>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut interval = time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = interval.tick() => {}
        }
        if matches!(inner.state(), ExecutorState::Faulted | ExecutorState::Dead) {
            break;
        }

        let now = Instant::now();
        let expired: Vec<(i64, PendingCall)> = {
            let mut pending = inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let handles: Vec<i64> = pending
                .iter()
                .filter(|(_, call)| call.deadline.is_some_and(|deadline| deadline <= now))
                .map(|(handle, _)| *handle)
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| pending.remove(&handle).map(|call| (handle, call)))
                .collect()
        };

        let mut ping_timed_out = false;
        for (handle, call) in expired {
            inner.load.fetch_sub(1, Ordering::SeqCst);
            if call.is_ping {
                ping_timed_out = true;
            } else if call.is_cancelled() {
                trace!("{}: reaped cancelled handle {handle}", inner.addr);
            } else {
                debug!("{}: handle {handle} timed out", inner.addr);
                call.resolve(Err(VoltError::Timeout));
            }
        }
        // an unanswered ping means the peer is gone, unlike a user call
        // timeout, which the server may answer late but healthily
        if ping_timed_out {
            fault(&inner, &"keep-alive ping went unanswered");
            break;
        }
    }
    trace!("{}: ticker task ends", inner.addr);
}

// Transitions Faulted -> Dead, failing every pending call with
// `ConnectionLost` and notifying the pool. Only the first fault acts.
fn fault(inner: &Arc<ExecutorInner>, reason: &dyn std::fmt::Display) {
    {
        let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, ExecutorState::Faulted | ExecutorState::Dead) {
            return;
        }
        *state = ExecutorState::Faulted;
    }
    warn!("connection to {} faulted: {reason}", inner.addr);
    inner.slots.close();
    let _ = inner.shutdown_tx.send(true);
    for (_, call) in inner.drain_pending() {
        inner.load.fetch_sub(1, Ordering::SeqCst);
        if !call.is_cancelled() {
            call.resolve(Err(VoltError::ConnectionLost));
        }
    }
    inner.set_state(ExecutorState::Dead);
    let _ = inner.events.send(PoolEvent::Down {
        host_id: inner.identity.host_id(),
        addr: inner.addr.clone(),
    });
}
