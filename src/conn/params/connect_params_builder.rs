use crate::{ConnectParams, VoltError, VoltResult};
use secstr::SecUtf8;

/// A builder for [`ConnectParams`].
///
/// ```rust
/// use voltconnect::ConnectParams;
///
/// let connect_params = ConnectParams::builder()
///     .host("abcd123")
///     .username("MEIER")
///     .password("schlau")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct ConnectParamsBuilder {
    hosts: Vec<String>,
    username: Option<String>,
    password: Option<SecUtf8>,
}

impl ConnectParamsBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a seed host, either as `host` or `host:port`; without a port,
    /// [`ConnectParams::DEFAULT_PORT`] is used.
    pub fn host<H: AsRef<str>>(&mut self, host: H) -> &mut Self {
        let host = host.as_ref();
        if host.contains(':') {
            self.hosts.push(host.to_owned());
        } else {
            self.hosts
                .push(format!("{host}:{}", ConnectParams::DEFAULT_PORT));
        }
        self
    }

    /// Sets the database user.
    pub fn username<U: AsRef<str>>(&mut self, username: U) -> &mut Self {
        self.username = Some(username.as_ref().to_owned());
        self
    }

    /// Sets the password.
    pub fn password<P: AsRef<str>>(&mut self, pw: P) -> &mut Self {
        self.password = Some(SecUtf8::from(pw.as_ref()));
        self
    }

    /// Unsets the password.
    pub fn unset_password(&mut self) -> &mut Self {
        self.password = None;
        self
    }

    /// Constructs the `ConnectParams`.
    ///
    /// # Errors
    /// `VoltError::ConnParams` if no host was added or a host string is
    /// malformed.
    pub fn build(&self) -> VoltResult<ConnectParams> {
        if self.hosts.is_empty() {
            return Err(VoltError::ConnParams(
                "at least one host is required".to_string(),
            ));
        }
        for host in &self.hosts {
            let (host_part, port_part) = host
                .rsplit_once(':')
                .ok_or_else(|| VoltError::ConnParams(format!("malformed host {host:?}")))?;
            if host_part.is_empty() || port_part.parse::<u16>().is_err() {
                return Err(VoltError::ConnParams(format!("malformed host {host:?}")));
            }
        }
        Ok(ConnectParams::new(
            self.hosts.clone(),
            self.username.clone().unwrap_or_default(),
            self.password.clone().unwrap_or_else(|| SecUtf8::from("")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectParamsBuilder;

    #[test]
    fn malformed_hosts_are_rejected() {
        assert!(ConnectParamsBuilder::new().host(":21212").build().is_err());
        assert!(ConnectParamsBuilder::new().host("h:notaport").build().is_err());
        assert!(ConnectParamsBuilder::new().host("h:99999").build().is_err());
    }

    #[test]
    fn credentials_default_to_empty() {
        let params = ConnectParamsBuilder::new().host("h").build().unwrap();
        assert_eq!(params.username(), "");
        assert_eq!(params.password().unsecure(), "");
    }
}
