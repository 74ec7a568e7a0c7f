use std::time::Duration;

/// Tuning knobs of a [`Client`](crate::Client), with builder-style setters.
#[derive(Clone, Debug)]
pub struct ClientConfiguration {
    default_timeout: Option<Duration>,
    max_inflight_per_node: usize,
    keepalive_interval: Duration,
    auto_topology: bool,
    reconnect_backoff_ceiling: Duration,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            default_timeout: Some(Self::DEFAULT_TIMEOUT),
            max_inflight_per_node: Self::DEFAULT_MAX_INFLIGHT_PER_NODE,
            keepalive_interval: Self::DEFAULT_KEEPALIVE_INTERVAL,
            auto_topology: true,
            reconnect_backoff_ceiling: Self::DEFAULT_RECONNECT_BACKOFF_CEILING,
        }
    }
}

impl ClientConfiguration {
    /// Default per-call deadline, applied when the caller does not supply
    /// a timeout of its own.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    /// Default ceiling for admitted-but-unresolved calls per node.
    ///
    /// Admission beyond this ceiling either blocks until there is slack or
    /// fails fast with `Backpressure`, depending on the call.
    pub const DEFAULT_MAX_INFLIGHT_PER_NODE: usize = 3_000;

    /// Default writer idle threshold after which a keep-alive ping is sent.
    pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

    /// Default ceiling for the exponential reconnection backoff.
    pub const DEFAULT_RECONNECT_BACKOFF_CEILING: Duration = Duration::from_secs(30);

    /// Returns the default per-call timeout; `None` means calls without an
    /// explicit timeout never expire.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }
    /// Sets the default per-call timeout; `None` disables it.
    pub fn set_default_timeout(&mut self, timeout: Option<Duration>) {
        self.default_timeout = timeout;
    }
    /// Builder-method for setting the default per-call timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Returns the per-node inflight ceiling.
    pub fn max_inflight_per_node(&self) -> usize {
        self.max_inflight_per_node
    }
    /// Sets the per-node inflight ceiling; values below 1 are raised to 1.
    pub fn set_max_inflight_per_node(&mut self, max_inflight: usize) {
        self.max_inflight_per_node = std::cmp::max(max_inflight, 1);
    }
    /// Builder-method for setting the per-node inflight ceiling.
    #[must_use]
    pub fn with_max_inflight_per_node(mut self, max_inflight: usize) -> Self {
        self.set_max_inflight_per_node(max_inflight);
        self
    }

    /// Returns the keep-alive interval.
    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }
    /// Sets the keep-alive interval.
    pub fn set_keepalive_interval(&mut self, interval: Duration) {
        self.keepalive_interval = interval;
    }
    /// Builder-method for setting the keep-alive interval.
    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Returns whether cluster topology is discovered after the first login.
    pub fn auto_topology(&self) -> bool {
        self.auto_topology
    }
    /// Defines whether cluster topology is discovered after the first login.
    pub fn set_auto_topology(&mut self, auto_topology: bool) {
        self.auto_topology = auto_topology;
    }
    /// Builder-method for defining whether cluster topology is discovered.
    #[must_use]
    pub fn with_auto_topology(mut self, auto_topology: bool) -> Self {
        self.auto_topology = auto_topology;
        self
    }

    /// Returns the reconnection backoff ceiling.
    pub fn reconnect_backoff_ceiling(&self) -> Duration {
        self.reconnect_backoff_ceiling
    }
    /// Sets the reconnection backoff ceiling.
    pub fn set_reconnect_backoff_ceiling(&mut self, ceiling: Duration) {
        self.reconnect_backoff_ceiling = ceiling;
    }
    /// Builder-method for setting the reconnection backoff ceiling.
    #[must_use]
    pub fn with_reconnect_backoff_ceiling(mut self, ceiling: Duration) -> Self {
        self.reconnect_backoff_ceiling = ceiling;
        self
    }
}
