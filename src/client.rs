//! The public API surface.

use crate::conn::call::{AdmissionMode, Call, CallHandle, CompletionSink};
use crate::conn::pool::Pool;
use crate::conn::system::{self, SystemProcedure};
use crate::conn::{ClientConfiguration, ConnectParams};
use crate::protocol::invocation;
use crate::protocol::login::ServerIdentity;
use crate::protocol::response::ClientResponse;
use crate::protocol::value::VoltValue;
use crate::{VoltError, VoltResult};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// A completion ready to run, handed out through
/// [`Client::route_completions`].
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

/// A client to a database cluster.
///
/// One `Client` maintains a pool of node connections and routes each
/// procedure call to the least-loaded live node. Three invocation styles
/// share this core:
///
/// - *synchronous over asynchronous*: [`Client::call`] suspends until the
///   result is in;
/// - *handle style*: [`Client::begin`] returns a [`CallHandle`] whose
///   result is claimed later with [`CallHandle::end`];
/// - *callback style*: [`Client::submit`] runs a closure when the result
///   arrives.
///
/// ```rust,no_run
/// use voltconnect::{Client, ConnectParams, VoltValue};
///
/// # async fn example() -> voltconnect::VoltResult<()> {
/// let params = ConnectParams::builder()
///     .host("node1")
///     .username("operator")
///     .password("secret")
///     .build()?;
/// let client = Client::open(params).await?;
///
/// let response = client.call("Vote", &[VoltValue::from(42_i64)]).await?;
/// println!("{} table(s)", response.tables().len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    pool: Pool,
    config: ClientConfiguration,
    delivery: Mutex<Option<mpsc::UnboundedSender<Completion>>>,
}

impl Client {
    /// Connects with default configuration.
    pub async fn open(params: ConnectParams) -> VoltResult<Self> {
        Self::open_with_configuration(params, ClientConfiguration::default()).await
    }

    /// Connects with the given configuration.
    ///
    /// At least one seed host must be reachable and accept the
    /// credentials; further nodes are discovered and attached in the
    /// background of the running client.
    pub async fn open_with_configuration(
        params: ConnectParams,
        config: ClientConfiguration,
    ) -> VoltResult<Self> {
        let pool = Pool::open(params, config.clone()).await?;
        Ok(Self {
            pool,
            config,
            delivery: Mutex::new(None),
        })
    }

    /// Invokes a procedure and suspends until its result is in.
    ///
    /// Non-success server statuses are converted into
    /// [`VoltError::ServerError`].
    pub async fn call(
        &self,
        procedure: &str,
        params: &[VoltValue],
    ) -> VoltResult<ClientResponse> {
        let mut handle = self.begin(procedure, params, None)?;
        handle.end().await?.into_result()
    }

    /// Like [`Client::call`], pinned to the node with the given host id.
    ///
    /// Used by workloads that exploit single-partition affinity; the
    /// least-loaded routing policy is bypassed.
    pub async fn call_at(
        &self,
        host_id: i32,
        procedure: &str,
        params: &[VoltValue],
    ) -> VoltResult<ClientResponse> {
        let (call, mut handle) = self.user_call(procedure, params, None)?;
        self.spawn_submit(call, AdmissionMode::Block, Some(host_id));
        handle.end().await?.into_result()
    }

    /// Starts a procedure call and returns a handle to its future result.
    ///
    /// Only name validation and parameter serialization happen here;
    /// routing, admission and all later failures surface through
    /// [`CallHandle::end`].
    pub fn begin(
        &self,
        procedure: &str,
        params: &[VoltValue],
        timeout: Option<Duration>,
    ) -> VoltResult<CallHandle> {
        let (call, handle) = self.user_call(procedure, params, timeout)?;
        self.spawn_submit(call, AdmissionMode::Block, None);
        Ok(handle)
    }

    /// Like [`Client::begin`], pinned to the node with the given host id.
    pub fn begin_at(
        &self,
        host_id: i32,
        procedure: &str,
        params: &[VoltValue],
        timeout: Option<Duration>,
    ) -> VoltResult<CallHandle> {
        let (call, handle) = self.user_call(procedure, params, timeout)?;
        self.spawn_submit(call, AdmissionMode::Block, Some(host_id));
        Ok(handle)
    }

    /// Fail-fast variant of [`Client::begin`]: when the chosen node's
    /// inflight ceiling is reached, returns [`VoltError::Backpressure`]
    /// right away instead of waiting for slack, and when no node is ready,
    /// returns [`VoltError::NoConnection`] without waiting for one.
    pub async fn begin_fail_fast(
        &self,
        procedure: &str,
        params: &[VoltValue],
        timeout: Option<Duration>,
    ) -> VoltResult<CallHandle> {
        let (call, handle) = self.user_call(procedure, params, timeout)?;
        match self.pool.submit(call, AdmissionMode::FailFast, None).await {
            Ok(()) => Ok(handle),
            Err((error, call)) => {
                drop(call);
                Err(error)
            }
        }
    }

    /// Invokes a procedure and runs `on_complete` when the result arrives.
    ///
    /// Returns immediately; the callback runs on the connection's reader
    /// task, or is handed to the channel installed with
    /// [`Client::route_completions`].
    pub fn submit<F>(
        &self,
        procedure: &str,
        params: &[VoltValue],
        timeout: Option<Duration>,
        on_complete: F,
    ) -> VoltResult<()>
    where
        F: FnOnce(VoltResult<ClientResponse>) + Send + 'static,
    {
        let (name, param_buf, deadline) = self.prepare(procedure, params, timeout)?;
        let call = Call::new(name, param_buf, deadline, self.callback_sink(on_complete));
        self.spawn_submit(call, AdmissionMode::Block, None);
        Ok(())
    }

    /// Invokes a system procedure through the privileged path.
    ///
    /// System procedure names never pass the regular name validation;
    /// they are admitted only through this explicit allow-list.
    pub async fn call_system(
        &self,
        procedure: SystemProcedure,
        params: &[VoltValue],
    ) -> VoltResult<ClientResponse> {
        self.pool.call_system_internal(procedure, params).await
    }

    /// Redirects callback delivery to the returned channel.
    ///
    /// By default callbacks run on the reader task of the connection that
    /// produced the response. After this call, completions are instead
    /// sent (non-blockingly) to the returned receiver, and the application
    /// decides where to run them.
    pub fn route_completions(&self) -> mpsc::UnboundedReceiver<Completion> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.delivery.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Identities of the currently connected server nodes.
    pub fn server_identities(&self) -> Vec<ServerIdentity> {
        self.pool.server_identities()
    }

    /// Number of nodes currently accepting calls.
    pub fn ready_node_count(&self) -> usize {
        self.pool.ready_count()
    }

    /// False once the client has been closed.
    pub fn is_open(&self) -> bool {
        self.pool.is_open()
    }

    /// Closes the client gracefully: admission stops, pending calls run to
    /// completion or to their deadlines, then the sockets are released.
    pub async fn close(&self) {
        self.pool.close(false).await;
    }

    /// Closes the client immediately, failing every outstanding call with
    /// [`VoltError::ShutDown`].
    pub async fn close_forced(&self) {
        self.pool.close(true).await;
    }

    // Builds a notify-style call plus its handle.
    fn user_call(
        &self,
        procedure: &str,
        params: &[VoltValue],
        timeout: Option<Duration>,
    ) -> VoltResult<(Call, CallHandle)> {
        let (name, param_buf, deadline) = self.prepare(procedure, params, timeout)?;
        let (tx, rx) = oneshot::channel();
        let call = Call::new(name, param_buf, deadline, CompletionSink::Notify(tx));
        let handle = CallHandle::new(rx, call.cancelled.clone());
        Ok((call, handle))
    }

    fn prepare(
        &self,
        procedure: &str,
        params: &[VoltValue],
        timeout: Option<Duration>,
    ) -> VoltResult<(String, Vec<u8>, Option<Instant>)> {
        if !system::valid_procedure_name(procedure) {
            return Err(VoltError::InvalidProcedureName(procedure.to_string()));
        }
        let param_buf = invocation::serialize_params(params)?;
        let deadline = timeout
            .or_else(|| self.config.default_timeout())
            .map(|timeout| Instant::now() + timeout);
        Ok((procedure.to_string(), param_buf, deadline))
    }

    fn callback_sink<F>(&self, on_complete: F) -> CompletionSink
    where
        F: FnOnce(VoltResult<ClientResponse>) + Send + 'static,
    {
        let delivery = self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match delivery {
            None => CompletionSink::Callback(Box::new(on_complete)),
            Some(tx) => CompletionSink::Callback(Box::new(move |result| {
                let completion: Completion = Box::new(move || on_complete(result));
                if let Err(rejected) = tx.send(completion) {
                    // the application dropped its receiver; run inline
                    // rather than losing the completion
                    (rejected.0)();
                }
            })),
        }
    }

    fn spawn_submit(&self, call: Call, mode: AdmissionMode, pin: Option<i32>) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err((error, call)) = pool.submit(call, mode, pin).await {
                call.resolve(Err(error));
            }
        });
    }
}

impl Drop for Client {
    // sockets are released even when the client is not closed explicitly
    fn drop(&mut self) {
        self.pool.shutdown_now();
    }
}
