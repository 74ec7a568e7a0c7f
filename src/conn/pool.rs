//! The multi-node connection pool.
//!
//! Owns one executor per live cluster node and presents them as a single
//! logical connection. Calls are routed to the least-loaded ready node;
//! dispatch is retried across alive nodes until a call has been admitted
//! somewhere, never afterwards. A supervisor task watches for faulted
//! executors and reopens them with capped exponential backoff.

use crate::conn::call::{AdmissionMode, Call, CompletionSink};
use crate::conn::config::ClientConfiguration;
use crate::conn::executor::{Executor, PoolEvent};
use crate::conn::params::ConnectParams;
use crate::conn::system::SystemProcedure;
use crate::protocol::login::ServerIdentity;
use crate::protocol::response::ClientResponse;
use crate::protocol::{invocation, value::VoltValue};
use crate::{VoltError, VoltResult};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{self, Duration, Instant};

const INITIAL_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct PoolInner {
    params: ConnectParams,
    config: ClientConfiguration,
    // read-mostly: the submission path takes snapshots, the supervisor and
    // reconnect tasks write
    executors: RwLock<HashMap<i32, Executor>>,
    // rotating tie-break for equally loaded nodes
    cursor: AtomicUsize,
    open: AtomicBool,
    // signalled whenever an executor joins the selection set
    ready_notify: Notify,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
}

impl PoolInner {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn executors_snapshot(&self) -> Vec<(i32, Executor)> {
        self.executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(host_id, executor)| (*host_id, executor.clone()))
            .collect()
    }

    fn insert_executor(&self, executor: Executor) {
        let host_id = executor.identity().host_id();
        let replaced = self
            .executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host_id, executor);
        if let Some(old) = replaced {
            // a duplicate address reached an already-connected node
            debug!("replacing executor for host {host_id}");
            old.shutdown();
        }
        self.ready_notify.notify_waiters();
    }

    fn remove_executor(&self, host_id: i32) {
        self.executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&host_id);
    }

    // Least-loaded ready executor, rotating cursor on ties.
    fn select(&self, pin: Option<i32>, excluded: &HashSet<i32>) -> Option<(i32, Executor)> {
        let snapshot = self.executors_snapshot();
        if let Some(host_id) = pin {
            return snapshot
                .into_iter()
                .find(|(id, executor)| *id == host_id && executor.is_ready());
        }
        let candidates: Vec<(i32, Executor, usize)> = snapshot
            .into_iter()
            .filter(|(host_id, executor)| !excluded.contains(host_id) && executor.is_ready())
            .map(|(host_id, executor)| {
                let load = executor.load();
                (host_id, executor, load)
            })
            .collect();
        let min_load = candidates.iter().map(|(_, _, load)| *load).min()?;
        let ties: Vec<(i32, Executor)> = candidates
            .into_iter()
            .filter(|(_, _, load)| *load == min_load)
            .map(|(host_id, executor, _)| (host_id, executor))
            .collect();
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % ties.len();
        ties.into_iter().nth(index)
    }
}

/// The caller-visible connection: a set of per-node executors behind one
/// routing surface.
#[derive(Clone)]
pub(crate) struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("params", &self.inner.params)
            .field("open", &self.inner.is_open())
            .field("executors", &self.inner.executors_snapshot().len())
            .finish()
    }
}

impl Pool {
    /// Connects to the first reachable seed, optionally discovers the rest
    /// of the cluster, and starts the supervisor.
    pub(crate) async fn open(
        params: ConnectParams,
        config: ClientConfiguration,
    ) -> VoltResult<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PoolInner {
            params,
            config,
            executors: RwLock::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
            open: AtomicBool::new(true),
            ready_notify: Notify::new(),
            events_tx,
        });
        let pool = Self { inner };

        let seeds = pool.inner.params.addrs().to_vec();
        let mut last_error = VoltError::NoConnection;
        let mut first_seed = None;
        for addr in &seeds {
            match pool.open_executor(addr).await {
                Ok(()) => {
                    first_seed = Some(addr.clone());
                    break;
                }
                Err(e) => {
                    warn!("seed {addr} is unreachable: {e}");
                    last_error = e;
                }
            }
        }
        let Some(first_seed) = first_seed else {
            return Err(last_error);
        };

        if pool.inner.config.auto_topology() {
            if let Err(e) = pool.discover_topology().await {
                // discovery is best-effort; the seed connection works
                warn!("topology discovery failed: {e}");
            }
        } else {
            // connect the remaining explicitly listed seeds
            for addr in seeds.iter().filter(|addr| **addr != first_seed) {
                if let Err(e) = pool.open_executor(addr).await {
                    warn!("secondary seed {addr} is unreachable: {e}");
                }
            }
        }

        tokio::spawn(supervisor_task(Arc::clone(&pool.inner), events_rx));
        Ok(pool)
    }

    async fn open_executor(&self, addr: &str) -> VoltResult<()> {
        let executor = Executor::open(
            addr,
            &self.inner.params,
            self.inner.config.clone(),
            self.inner.events_tx.clone(),
        )
        .await?;
        self.inner.insert_executor(executor);
        Ok(())
    }

    /// Routes a call to an executor and admits it.
    ///
    /// Dispatch failures on one node (lost or draining connections) are
    /// retried on the remaining alive nodes; once a call has been admitted
    /// anywhere it is never moved again. On error the unadmitted call is
    /// handed back to the caller.
    pub(crate) async fn submit(
        &self,
        mut call: Call,
        mode: AdmissionMode,
        pin: Option<i32>,
    ) -> Result<(), (VoltError, Call)> {
        let mut excluded: HashSet<i32> = HashSet::new();
        loop {
            if !self.inner.is_open() {
                return Err((VoltError::ShutDown, call));
            }
            match self.inner.select(pin, &excluded) {
                Some((host_id, executor)) => match executor.admit(call, mode).await {
                    Ok(()) => return Ok(()),
                    Err((error, returned)) => {
                        call = returned;
                        match error {
                            // authoritative per-call outcomes
                            VoltError::Backpressure | VoltError::Timeout => {
                                return Err((error, call));
                            }
                            // this node is gone or draining; try another
                            _ => {
                                trace!("dispatch to host {host_id} failed: {error}");
                                excluded.insert(host_id);
                            }
                        }
                    }
                },
                None => {
                    if mode == AdmissionMode::FailFast {
                        return Err((VoltError::NoConnection, call));
                    }
                    excluded.clear();
                    if let Err(error) = self.wait_for_ready(pin, call.deadline).await {
                        return Err((error, call));
                    }
                }
            }
        }
    }

    // Parks until an executor usable for this call joins the selection
    // set, or the deadline fires, or the pool closes.
    async fn wait_for_ready(&self, pin: Option<i32>, deadline: Option<Instant>) -> VoltResult<()> {
        let notified = self.inner.ready_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        // an executor may have joined between selection and registration
        if self.inner.select(pin, &HashSet::new()).is_some() {
            return Ok(());
        }
        if !self.inner.is_open() {
            return Err(VoltError::ShutDown);
        }
        match deadline {
            Some(deadline) => time::timeout_at(deadline, notified)
                .await
                .map_err(|_elapsed| VoltError::NoConnection),
            None => {
                notified.await;
                Ok(())
            }
        }
    }

    /// Queries cluster metadata on the already-connected nodes and opens
    /// an executor for every node not yet in the set.
    pub(crate) async fn discover_topology(&self) -> VoltResult<()> {
        let response = self
            .call_system_internal(
                SystemProcedure::SystemInformation,
                &[VoltValue::from("OVERVIEW")],
            )
            .await?
            .into_result()?;
        let known: HashSet<i32> = self
            .inner
            .executors_snapshot()
            .iter()
            .map(|(host_id, _)| *host_id)
            .collect();
        for (host_id, addr) in parse_overview(response.tables()) {
            if known.contains(&host_id) {
                continue;
            }
            info!("discovered cluster node {host_id} at {addr}");
            if let Err(e) = self.open_executor(&addr).await {
                // secondary login failures are non-fatal
                warn!("cannot connect to discovered node {addr}: {e}");
            }
        }
        Ok(())
    }

    // Privileged submission path used for system procedures; also carries
    // the pool's own topology query.
    pub(crate) async fn call_system_internal(
        &self,
        procedure: SystemProcedure,
        params: &[VoltValue],
    ) -> VoltResult<ClientResponse> {
        let param_buf = invocation::serialize_params(params)?;
        let deadline = self
            .inner
            .config
            .default_timeout()
            .map(|timeout| Instant::now() + timeout);
        let (tx, rx) = oneshot::channel();
        let call = Call::new(
            procedure.name().to_string(),
            param_buf,
            deadline,
            CompletionSink::Notify(tx),
        );
        if let Err((error, call)) = self.submit(call, AdmissionMode::Block, None).await {
            drop(call);
            return Err(error);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(VoltError::ShutDown),
        }
    }

    /// Identities of all currently connected server nodes.
    pub(crate) fn server_identities(&self) -> Vec<ServerIdentity> {
        self.inner
            .executors_snapshot()
            .iter()
            .map(|(_, executor)| executor.identity().clone())
            .collect()
    }

    /// Number of executors currently accepting calls.
    pub(crate) fn ready_count(&self) -> usize {
        self.inner
            .executors_snapshot()
            .iter()
            .filter(|(_, executor)| executor.is_ready())
            .count()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Closes the pool.
    ///
    /// A graceful close first drains: executors stop admitting and pending
    /// calls run to completion or to their deadlines. A forced close fails
    /// everything outstanding with `ShutDown` immediately.
    pub(crate) async fn close(&self, force: bool) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let executors: Vec<Executor> = self
            .inner
            .executors_snapshot()
            .into_iter()
            .map(|(_, executor)| executor)
            .collect();
        if !force {
            for executor in &executors {
                executor.start_draining();
            }
            while executors.iter().any(|executor| executor.load() > 0) {
                time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        }
        self.finish_close(&executors);
    }

    /// Non-async close used from `Drop`: no draining, everything
    /// outstanding fails with `ShutDown`.
    pub(crate) fn shutdown_now(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let executors: Vec<Executor> = self
            .inner
            .executors_snapshot()
            .into_iter()
            .map(|(_, executor)| executor)
            .collect();
        self.finish_close(&executors);
    }

    fn finish_close(&self, executors: &[Executor]) {
        for executor in executors {
            executor.shutdown();
        }
        // wake parked submitters so they observe the closed pool
        self.inner.ready_notify.notify_waiters();
        let _ = self.inner.events_tx.send(PoolEvent::Closed);
        info!("pool closed");
    }
}

async fn supervisor_task(inner: Arc<PoolInner>, mut events_rx: mpsc::UnboundedReceiver<PoolEvent>) {
    while let Some(event) = events_rx.recv().await {
        match event {
            PoolEvent::Down { host_id, addr } => {
                inner.remove_executor(host_id);
                if !inner.is_open() {
                    continue;
                }
                info!("host {host_id} at {addr} is down, scheduling reconnection");
                tokio::spawn(reconnect_loop(Arc::clone(&inner), addr));
            }
            PoolEvent::Closed => break,
        }
    }
    trace!("supervisor task ends");
}

async fn reconnect_loop(inner: Arc<PoolInner>, addr: String) {
    let ceiling = inner.config.reconnect_backoff_ceiling();
    let mut backoff = INITIAL_RECONNECT_BACKOFF.min(ceiling);
    loop {
        time::sleep(jittered(backoff)).await;
        if !inner.is_open() {
            return;
        }
        match Executor::open(
            &addr,
            &inner.params,
            inner.config.clone(),
            inner.events_tx.clone(),
        )
        .await
        {
            Ok(executor) => {
                info!(
                    "reconnected to {addr} as host {}",
                    executor.identity().host_id()
                );
                inner.insert_executor(executor);
                return;
            }
            Err(e) => {
                debug!("reconnect to {addr} failed: {e}");
                backoff = (backoff * 2).min(ceiling);
            }
        }
    }
}

fn jittered(backoff: Duration) -> Duration {
    backoff.mul_f64(rand::thread_rng().gen_range(0.75..=1.25))
}

// Extracts `host_id -> client address` pairs from the OVERVIEW metadata
// table (rows of HOST_ID, KEY, VALUE).
fn parse_overview(tables: &[crate::protocol::table::VoltTable]) -> Vec<(i32, String)> {
    let mut ips: HashMap<i32, String> = HashMap::new();
    let mut ports: HashMap<i32, String> = HashMap::new();
    for table in tables {
        let (Some(host_col), Some(key_col), Some(value_col)) = (
            table.column_index("HOST_ID"),
            table.column_index("KEY"),
            table.column_index("VALUE"),
        ) else {
            continue;
        };
        for row in table.rows() {
            let (Some(VoltValue::Integer(host_id)), Some(VoltValue::String(key))) =
                (row.get(host_col), row.get(key_col))
            else {
                continue;
            };
            let Some(VoltValue::String(value)) = row.get(value_col) else {
                continue;
            };
            match key.as_str() {
                "IPADDRESS" => {
                    ips.insert(*host_id, value.clone());
                }
                "CLIENTPORT" => {
                    ports.insert(*host_id, value.clone());
                }
                _ => {}
            }
        }
    }
    ips.into_iter()
        .filter_map(|(host_id, ip)| {
            let port = ports.get(&host_id)?;
            Some((host_id, format!("{ip}:{port}")))
        })
        .collect()
}
