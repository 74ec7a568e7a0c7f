//! Codec for the invocation response envelope.

use crate::protocol::{table::VoltTable, util};
use crate::{VoltError, VoltResult};
use byteorder::{BigEndian, ReadBytesExt};

// fields-present bits in the response envelope
const STATUS_TEXT_PRESENT: u8 = 0b0010_0000;
const APP_STATUS_TEXT_PRESENT: u8 = 0b1000_0000;

/// Status of a completed procedure call, as reported by the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseStatus {
    /// The procedure completed.
    Success,
    /// The procedure aborted itself.
    UserAbort,
    /// The procedure failed in a controlled way, e.g. a constraint
    /// violation.
    GracefulFailure,
    /// The procedure failed unexpectedly server-side.
    UnexpectedFailure,
    /// The connection was lost while the call was outstanding;
    /// synthesized client-side, never sent by a server.
    ConnectionLost,
    /// A status byte this client does not know.
    Unknown(i8),
}

impl ResponseStatus {
    pub(crate) fn from_i8(i: i8) -> Self {
        match i {
            1 => Self::Success,
            -2 => Self::UserAbort,
            -3 => Self::GracefulFailure,
            -4 => Self::UnexpectedFailure,
            -5 => Self::ConnectionLost,
            i => Self::Unknown(i),
        }
    }

    /// Returns the number encoding of the status.
    #[must_use]
    pub fn to_i8(self) -> i8 {
        match self {
            Self::Success => 1,
            Self::UserAbort => -2,
            Self::GracefulFailure => -3,
            Self::UnexpectedFailure => -4,
            Self::ConnectionLost => -5,
            Self::Unknown(i) => i,
        }
    }

    /// True for [`ResponseStatus::Success`].
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Self::Success => write!(f, "success"),
            Self::UserAbort => write!(f, "user abort"),
            Self::GracefulFailure => write!(f, "graceful failure"),
            Self::UnexpectedFailure => write!(f, "unexpected failure"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::Unknown(i) => write!(f, "unknown status ({i})"),
        }
    }
}

/// The decoded result of one procedure call.
///
/// Ownership transfers to the caller on completion; the connection that
/// produced it retains no reference.
#[derive(Debug)]
pub struct ClientResponse {
    client_handle: i64,
    status: ResponseStatus,
    status_text: Option<String>,
    app_status: i8,
    app_status_text: Option<String>,
    cluster_roundtrip_ms: i32,
    tables: Vec<VoltTable>,
}

impl ClientResponse {
    /// The call status reported by the server.
    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    /// The server's error text; empty if none was sent.
    pub fn status_text(&self) -> &str {
        self.status_text.as_deref().unwrap_or("")
    }

    /// The procedure-defined application status byte.
    pub fn app_status(&self) -> i8 {
        self.app_status
    }

    /// The procedure-defined application status text; empty if none.
    pub fn app_status_text(&self) -> &str {
        self.app_status_text.as_deref().unwrap_or("")
    }

    /// Round-trip time within the cluster, in milliseconds.
    pub fn cluster_roundtrip_ms(&self) -> i32 {
        self.cluster_roundtrip_ms
    }

    /// The result tables.
    pub fn tables(&self) -> &[VoltTable] {
        &self.tables
    }

    /// Consumes the response, returning the result tables.
    pub fn into_tables(self) -> Vec<VoltTable> {
        self.tables
    }

    /// Converts a non-success status into [`VoltError::ServerError`].
    pub fn into_result(self) -> VoltResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(VoltError::ServerError {
                status: self.status,
                text: self.status_text.unwrap_or_default(),
            })
        }
    }

    pub(crate) fn client_handle(&self) -> i64 {
        self.client_handle
    }

    /// Parses a response envelope from one frame.
    pub(crate) fn parse(rdr: &mut std::io::Cursor<Vec<u8>>) -> VoltResult<Self> {
        let _version = rdr.read_u8()?;
        let client_handle = rdr.read_i64::<BigEndian>()?;
        let fields = rdr.read_u8()?;
        let status = ResponseStatus::from_i8(rdr.read_i8()?);
        let status_text = if fields & STATUS_TEXT_PRESENT == 0 {
            None
        } else {
            Some(util::parse_nonnull_string(rdr, "status text")?)
        };
        let app_status = rdr.read_i8()?;
        let app_status_text = if fields & APP_STATUS_TEXT_PRESENT == 0 {
            None
        } else {
            Some(util::parse_nonnull_string(rdr, "app status text")?)
        };
        let cluster_roundtrip_ms = rdr.read_i32::<BigEndian>()?;
        let table_count = rdr.read_i16::<BigEndian>()?;
        if table_count < 0 {
            return Err(VoltError::malformed(format!(
                "negative table count {table_count}"
            )));
        }
        #[allow(clippy::cast_sign_loss)]
        let mut tables = Vec::with_capacity(table_count as usize);
        for _ in 0..table_count {
            tables.push(VoltTable::parse(rdr)?);
        }
        if rdr.position() < rdr.get_ref().len() as u64 {
            return Err(VoltError::malformed("trailing bytes after response"));
        }
        Ok(Self {
            client_handle,
            status,
            status_text,
            app_status,
            app_status_text,
            cluster_roundtrip_ms,
            tables,
        })
    }
}
