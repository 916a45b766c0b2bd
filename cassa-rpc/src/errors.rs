//! Errors a remote call or a session setup can end with.
//!
//! The split that matters to the client is between
//! [`BrokenConnectionError`] - the link to the server is unusable, the call may be
//! retried elsewhere - and [`DbError`] - the server answered, and the answer is
//! an error that must reach the caller untouched.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::endpoint::ServerAddr;

/// An error returned by the server in response to a well-formed call.
///
/// These are application-level outcomes: retrying the call on another server
/// would either give the same answer or mask a real problem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DbError {
    /// The requested row, column or keyspace does not exist.
    #[error("The requested key or column does not exist")]
    NotFound,

    /// The request was malformed or referred to an unknown schema element.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The coordinator knows that not enough replicas are alive.
    #[error("Not enough replicas are alive to satisfy the requested consistency level")]
    Unavailable,

    /// Replicas did not answer in time to satisfy the consistency level.
    #[error("Replicas did not respond in time to satisfy the requested consistency level")]
    TimedOut,

    /// Credentials were rejected.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The logged user may not perform the request.
    #[error("The logged user is not authorized: {0}")]
    Unauthorized(String),

    /// Schema versions disagree across the cluster.
    #[error("Schema versions disagree across the cluster")]
    SchemaDisagreement,
}

/// The link to the server cannot be used any more.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum BrokenConnectionError {
    /// Input/Output error has occurred, connection broken etc.
    #[error("IO Error: {0}")]
    IoError(Arc<io::Error>),

    /// The socket timeout elapsed before the server answered.
    #[error("Timed out waiting for the server to respond")]
    Timeout,

    /// The peer closed the connection.
    #[error("Connection closed by the server")]
    Closed,

    /// The server sent something the protocol implementation could not make sense of.
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl From<io::Error> for BrokenConnectionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => BrokenConnectionError::Timeout,
            io::ErrorKind::UnexpectedEof => BrokenConnectionError::Closed,
            _ => BrokenConnectionError::IoError(Arc::new(err)),
        }
    }
}

/// Failure of a single attempt of a remote call.
///
/// Every failure is either connection-level or application-level; there is no third kind.
#[derive(Error, Debug, Clone)]
pub enum RequestAttemptError {
    /// The connection broke during the call.
    #[error(transparent)]
    BrokenConnection(#[from] BrokenConnectionError),

    /// Database sent a response containing an error.
    #[error("Database returned an error: {0}")]
    DbError(#[from] DbError),
}

impl RequestAttemptError {
    /// True if the failure is a property of the connection rather than of the call,
    /// which makes the call safe and meaningful to retry on another server.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, RequestAttemptError::BrokenConnection(_))
    }
}

impl From<io::Error> for RequestAttemptError {
    fn from(err: io::Error) -> Self {
        RequestAttemptError::BrokenConnection(err.into())
    }
}

/// Failure to open a session to a server.
///
/// Every variant is treated as connection-level: the server is skipped and the
/// next one is tried.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Establishing the TCP connection took longer than the connect timeout.
    #[error("Connect timeout elapsed while connecting to {0}")]
    ConnectTimeout(ServerAddr),

    /// The address did not resolve to anything we could connect to.
    #[error("Could not resolve {0}")]
    AddressResolution(ServerAddr),

    /// Input/Output error while connecting.
    #[error("IO Error while connecting to {server}: {error}")]
    IoError {
        #[allow(missing_docs)]
        server: ServerAddr,
        #[allow(missing_docs)]
        error: Arc<io::Error>,
    },

    /// The connection was established, but `login` or `set_keyspace` failed.
    #[error("Session setup with {server} failed: {error}")]
    SetupFailed {
        #[allow(missing_docs)]
        server: ServerAddr,
        #[allow(missing_docs)]
        error: RequestAttemptError,
    },

    /// Credentials could not be produced for the server.
    #[error("Authenticator failed for {server}: {reason}")]
    AuthenticatorFailed {
        #[allow(missing_docs)]
        server: ServerAddr,
        #[allow(missing_docs)]
        reason: String,
    },
}

impl ConnectionError {
    /// Wraps an I/O error that happened while connecting to `server`.
    pub fn io(server: &ServerAddr, error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::TimedOut {
            return ConnectionError::ConnectTimeout(server.clone());
        }
        ConnectionError::IoError {
            server: server.clone(),
            error: Arc::new(error),
        }
    }
}
