use crate::protocol::response::ResponseStatus;
use thiserror::Error;

/// A list specifying categories of [`VoltError`](crate::VoltError).
///
/// Errors that concern a single procedure call (`Timeout`, `Backpressure`,
/// `ServerError`, ...) are delivered through that call's completion sink;
/// only `MalformedResponse` takes the affected connection down with it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum VoltError {
    /// The procedure name contains characters outside `[A-Za-z0-9_]`.
    ///
    /// Detected before submission; the call never reaches a connection.
    #[error("Invalid procedure name: {0:?}")]
    InvalidProcedureName(String),

    /// The server rejected the presented credentials during login.
    #[error("Authentication failed (server login status {0})")]
    AuthenticationFailed(i8),

    /// The server speaks a protocol version this client does not support.
    #[error("Incompatible protocol version (server login status {0})")]
    IncompatibleVersion(i8),

    /// Admission was refused because the node's inflight ceiling is reached
    /// and the caller chose fail-fast.
    #[error("Request queue is full")]
    Backpressure,

    /// The call's deadline expired before a response arrived.
    #[error("Procedure call timed out")]
    Timeout,

    /// The connection to the server was lost while the call was outstanding.
    ///
    /// The call may or may not have executed server-side; only the
    /// application can decide whether a retry is safe.
    #[error("Connection to the server was lost")]
    ConnectionLost,

    /// The server sent a frame or value that violates the wire format.
    ///
    /// This indicates a server-side protocol bug; the affected connection
    /// is faulted.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The pool had no ready connection and none came up before the
    /// caller's deadline.
    #[error("No connection to any server is available")]
    NoConnection,

    /// The pool was closed while the call was outstanding.
    #[error("Client was shut down")]
    ShutDown,

    /// The call reached the server and came back with a non-success status;
    /// the contained status and text describe the concrete reason.
    #[error("Server responded with {status}: {text}")]
    ServerError {
        /// The response status reported by the server.
        status: ResponseStatus,
        /// The server-provided error text, empty if none was sent.
        text: String,
    },

    /// `end()` was called on a call handle whose result has already been
    /// consumed.
    #[error("Call handle has already been consumed")]
    InvalidHandle,

    /// Erroneous connection parameters.
    #[error("Erroneous connection parameters: {0}")]
    ConnParams(String),

    /// Error caused by wrong usage.
    #[error("Wrong usage: {0}")]
    Usage(String),

    /// Error occured in communication with the database.
    #[error(transparent)]
    Io {
        /// The causing Error.
        #[from]
        source: std::io::Error,
    },

    /// Error occured in thread synchronization.
    #[error("Error occured in thread synchronization")]
    Poison,
}

/// Abbreviation of `Result<T, VoltError>`.
pub type VoltResult<T> = std::result::Result<T, VoltError>;

impl VoltError {
    /// Returns the server-reported status and message, if this is a
    /// [`VoltError::ServerError`].
    pub fn server_error(&self) -> Option<(ResponseStatus, &str)> {
        match self {
            Self::ServerError { status, text } => Some((*status, text)),
            _ => None,
        }
    }

    /// True if the call is known not to have reached any server.
    ///
    /// Useful for deciding retry safety: `Backpressure`, `NoConnection`,
    /// `InvalidProcedureName` and the parameter/usage errors are all
    /// raised before the request was written to a socket.
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(
            self,
            Self::InvalidProcedureName(_)
                | Self::Backpressure
                | Self::NoConnection
                | Self::ConnParams(_)
                | Self::Usage(_)
        )
    }

    pub(crate) fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedResponse(msg.into())
    }
}

impl<G> From<std::sync::PoisonError<G>> for VoltError {
    fn from(_error: std::sync::PoisonError<G>) -> Self {
        Self::Poison
    }
}
