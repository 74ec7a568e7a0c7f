//! Connection handling: per-node executors and the routing pool.

pub(crate) mod call;
mod config;
pub(crate) mod executor;
mod params;
pub(crate) mod pool;
pub(crate) mod system;

pub use call::CallHandle;
pub use config::ClientConfiguration;
pub use params::{ConnectParams, ConnectParamsBuilder, IntoConnectParams};
pub use system::SystemProcedure;
