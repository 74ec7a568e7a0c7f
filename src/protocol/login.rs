//! The one-shot login handshake performed on a freshly opened connection.

use crate::protocol::util;
use crate::{VoltError, VoltResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use secstr::SecUtf8;
use sha1::{Digest, Sha1};
use std::net::Ipv4Addr;

const PROTOCOL_VERSION: u8 = 1;

/// The service a connection logs in to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Service {
    /// The regular SQL service.
    Database,
    /// The export stream service.
    Export,
}

impl Service {
    fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Export => "export",
        }
    }
}

/// Identity of the server node, as reported in the login response.
///
/// The pool uses the connection id for deduplicating nodes discovered via
/// topology queries; all fields are available to callers on demand.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerIdentity {
    host_id: i32,
    connection_id: i64,
    cluster_start_ms: i64,
    leader: Ipv4Addr,
    build: String,
}

impl ServerIdentity {
    /// Id of the server node within its cluster.
    pub fn host_id(&self) -> i32 {
        self.host_id
    }
    /// Id the server assigned to this connection.
    pub fn connection_id(&self) -> i64 {
        self.connection_id
    }
    /// Cluster start time, milliseconds since the Unix epoch.
    pub fn cluster_start_ms(&self) -> i64 {
        self.cluster_start_ms
    }
    /// IPv4 address of the cluster leader.
    pub fn leader(&self) -> Ipv4Addr {
        self.leader
    }
    /// The server's build string.
    pub fn build(&self) -> &str {
        &self.build
    }
}

/// Emits the login request payload: protocol version, service name,
/// username, SHA-1 of the password.
pub(crate) fn emit_login_request(
    service: Service,
    username: &str,
    password: &SecUtf8,
    w: &mut dyn std::io::Write,
) -> VoltResult<()> {
    w.write_u8(PROTOCOL_VERSION)?;
    util::emit_length_and_string(service.as_str(), w)?;
    util::emit_length_and_string(username, w)?;
    let digest = Sha1::digest(password.unsecure().as_bytes());
    w.write_all(&digest)?;
    Ok(())
}

/// Parses the login response payload.
///
/// A non-zero status byte maps to `AuthenticationFailed` or
/// `IncompatibleVersion`; both are terminal for the connection attempt.
pub(crate) fn parse_login_response(
    rdr: &mut std::io::Cursor<Vec<u8>>,
) -> VoltResult<ServerIdentity> {
    let _server_version = rdr.read_u8()?;
    let status = rdr.read_i8()?;
    match status {
        0 => {}
        3 => return Err(VoltError::IncompatibleVersion(status)),
        status => return Err(VoltError::AuthenticationFailed(status)),
    }
    let host_id = rdr.read_i32::<BigEndian>()?;
    let connection_id = rdr.read_i64::<BigEndian>()?;
    let cluster_start_ms = rdr.read_i64::<BigEndian>()?;
    let mut octets = [0_u8; 4];
    std::io::Read::read_exact(rdr, &mut octets)?;
    let leader = Ipv4Addr::from(octets);
    let build = util::parse_nonnull_string(rdr, "build string")?;
    Ok(ServerIdentity {
        host_id,
        connection_id,
        cluster_start_ms,
        leader,
        build,
    })
}

#[cfg(test)]
pub(crate) fn emit_login_response(
    identity: &ServerIdentity,
    status: i8,
    w: &mut dyn std::io::Write,
) -> VoltResult<()> {
    w.write_u8(PROTOCOL_VERSION)?;
    w.write_i8(status)?;
    w.write_i32::<BigEndian>(identity.host_id)?;
    w.write_i64::<BigEndian>(identity.connection_id)?;
    w.write_i64::<BigEndian>(identity.cluster_start_ms)?;
    w.write_all(&identity.leader.octets())?;
    util::emit_length_and_string(&identity.build, w)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        emit_login_request, emit_login_response, parse_login_response, Service, ServerIdentity,
    };
    use crate::VoltError;
    use secstr::SecUtf8;
    use std::io::Cursor;

    #[test]
    fn login_request_layout() {
        let mut buf = Vec::new();
        emit_login_request(
            Service::Database,
            "operator",
            &SecUtf8::from("sekrit"),
            &mut buf,
        )
        .unwrap();

        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..5], &8_i32.to_be_bytes());
        assert_eq!(&buf[5..13], b"database");
        assert_eq!(&buf[13..17], &8_i32.to_be_bytes());
        assert_eq!(&buf[17..25], b"operator");
        // SHA-1 digest is always 20 bytes
        assert_eq!(buf.len(), 25 + 20);
        let digest: [u8; 20] = {
            use sha1::{Digest, Sha1};
            Sha1::digest(b"sekrit").into()
        };
        assert_eq!(buf[25..], digest, "password travels as its SHA-1");
    }

    fn identity() -> ServerIdentity {
        ServerIdentity {
            host_id: 2,
            connection_id: 77,
            cluster_start_ms: 1_700_000_000_000,
            leader: std::net::Ipv4Addr::new(10, 0, 0, 1),
            build: "v13.3.1".to_string(),
        }
    }

    #[test]
    fn login_response_roundtrip() {
        let mut buf = Vec::new();
        emit_login_response(&identity(), 0, &mut buf).unwrap();
        let parsed = parse_login_response(&mut Cursor::new(buf)).unwrap();
        assert_eq!(parsed, identity());
    }

    #[test]
    fn login_failure_statuses() {
        let mut buf = Vec::new();
        emit_login_response(&identity(), 2, &mut buf).unwrap();
        assert!(matches!(
            parse_login_response(&mut Cursor::new(buf)),
            Err(VoltError::AuthenticationFailed(2))
        ));

        let mut buf = Vec::new();
        emit_login_response(&identity(), 3, &mut buf).unwrap();
        assert!(matches!(
            parse_login_response(&mut Cursor::new(buf)),
            Err(VoltError::IncompatibleVersion(3))
        ));
    }
}
