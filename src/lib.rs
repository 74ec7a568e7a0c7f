//! A pure rust client for a VoltDB-compatible cluster.
//!
//! The client speaks the binary wire protocol over long-lived TCP
//! connections, one per cluster node, and lets applications invoke
//! server-side stored procedures and receive their result tables.
//!
//! # Connecting
//!
//! ```rust,no_run
//! use voltconnect::{Client, ConnectParams, VoltValue};
//!
//! # async fn example() -> voltconnect::VoltResult<()> {
//! let params = ConnectParams::builder()
//!     .host("node1")
//!     .host("node2")
//!     .username("operator")
//!     .password("secret")
//!     .build()?;
//! let client = Client::open(params).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Invoking procedures
//!
//! ```rust,no_run
//! # async fn example(client: voltconnect::Client) -> voltconnect::VoltResult<()> {
//! # use voltconnect::VoltValue;
//! let response = client
//!     .call("AddFlight", &[VoltValue::from(17_i64), VoltValue::from("FRA")])
//!     .await?;
//! for table in response.tables() {
//!     println!("{} rows", table.row_count());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Calls are routed to the least-loaded live node; lost nodes are failed
//! over and reconnected in the background. See [`Client`] for the three
//! invocation styles and [`ClientConfiguration`] for the tuning knobs.

#![deny(missing_debug_implementations)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

mod client;
mod conn;
mod protocol;
mod volt_error;

pub use crate::client::{Client, Completion};
pub use crate::conn::{
    CallHandle, ClientConfiguration, ConnectParams, ConnectParamsBuilder, IntoConnectParams,
    SystemProcedure,
};
pub use crate::protocol::login::{ServerIdentity, Service};
pub use crate::protocol::{
    ClientResponse, ColumnInfo, ResponseStatus, TypeTag, VoltTable, VoltValue,
};
pub use crate::volt_error::{VoltError, VoltResult};
