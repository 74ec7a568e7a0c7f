//! Connection parameters
use crate::{ConnectParamsBuilder, VoltResult};
use secstr::SecUtf8;
use serde::de::Deserialize;

/// An immutable struct with all information necessary to open connections
/// to a database cluster.
///
/// `ConnectParams` is instantiated with a [`ConnectParamsBuilder`]:
///
/// ```rust
/// use voltconnect::ConnectParams;
///
/// let connect_params = ConnectParams::builder()
///     .host("node1")
///     .host("node2:32121")
///     .username("operator")
///     .password("secret")
///     .build()
///     .unwrap();
/// ```
///
/// The listed hosts are seeds; with topology discovery enabled the client
/// learns the remaining cluster nodes from the first server it reaches.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectParams {
    addrs: Vec<String>,
    username: String,
    password: SecUtf8,
}

impl ConnectParams {
    /// The port used when a host is given without one.
    pub const DEFAULT_PORT: u16 = 21212;

    pub(crate) fn new(addrs: Vec<String>, username: String, password: SecUtf8) -> Self {
        Self {
            addrs,
            username,
            password,
        }
    }

    /// Returns a new builder for `ConnectParams`.
    pub fn builder() -> ConnectParamsBuilder {
        ConnectParamsBuilder::new()
    }

    /// The seed socket addresses, in the order they were added.
    pub fn addrs(&self) -> &[String] {
        &self.addrs
    }

    /// The database user.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password.
    pub fn password(&self) -> &SecUtf8 {
        &self.password
    }

    pub(crate) fn with_addr(&self, addr: &str) -> Self {
        let mut params = self.clone();
        params.addrs = vec![addr.to_string()];
        params
    }
}

impl std::fmt::Display for ConnectParams {
    // the password is never displayed
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}@{}", self.username, self.addrs.join(","))
    }
}

impl<'de> Deserialize<'de> for ConnectParams {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct DeserializationHelper {
            hosts: Vec<String>,
            #[serde(default)]
            username: String,
            #[serde(default)]
            password: String,
        }
        let helper: DeserializationHelper = DeserializationHelper::deserialize(deserializer)?;
        let mut builder = ConnectParams::builder();
        for host in &helper.hosts {
            builder.host(host);
        }
        builder
            .username(helper.username)
            .password(helper.password)
            .build()
            .map_err(serde::de::Error::custom)
    }
}

/// A trait implemented by types that can be converted into [`ConnectParams`].
pub trait IntoConnectParams {
    /// Converts the value into `ConnectParams`.
    fn into_connect_params(self) -> VoltResult<ConnectParams>;
}

impl IntoConnectParams for ConnectParams {
    fn into_connect_params(self) -> VoltResult<ConnectParams> {
        Ok(self)
    }
}

impl IntoConnectParams for &str {
    /// Accepts a comma-separated host list, e.g. `"node1,node2:32121"`;
    /// username and password stay empty.
    fn into_connect_params(self) -> VoltResult<ConnectParams> {
        let mut builder = ConnectParams::builder();
        for host in self.split(',') {
            builder.host(host.trim());
        }
        builder.build()
    }
}
