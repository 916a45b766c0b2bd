//! This module contains various errors which can be returned by [`Session`](crate::client::session::Session).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub use cassa_rpc::endpoint::InvalidServerAddr;
pub use cassa_rpc::errors::{BrokenConnectionError, ConnectionError, DbError, RequestAttemptError};

/// Error that occurred during session creation.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum NewSessionError {
    /// List of known nodes passed to the builder was empty.
    #[error("Empty known nodes list")]
    EmptyKnownNodesList,

    /// A known node could not be parsed as `host[:port]`.
    #[error(transparent)]
    InvalidServerAddr(#[from] InvalidServerAddr),

    /// Pool parameters make no sense, e.g. a zero pool size.
    #[error("Invalid pool configuration: {0}")]
    InvalidPoolConfig(&'static str),

    /// The pool is configured to open connections eagerly and no server accepted one.
    #[error("Failed to prefill the pool: {0}")]
    Prefill(#[from] NoServerAvailable),
}

/// A single failed attempt recorded by failover: either opening a connection
/// to a server failed, or a call on an open connection broke it.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ServerAttemptError {
    /// Opening the connection failed.
    #[error(transparent)]
    Connect(#[from] ConnectionError),

    /// The connection broke during a call.
    #[error(transparent)]
    BrokenConnection(#[from] BrokenConnectionError),
}

/// Every server allowed by the failover budget was tried and none of them could
/// serve the request.
#[derive(Error, Debug, Clone)]
pub struct NoServerAvailable {
    /// Number of servers tried.
    pub attempts: usize,
    /// The error which ended the last attempt.
    pub last_error: Option<ServerAttemptError>,
}

impl fmt::Display for NoServerAvailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No server available after {} attempt(s)", self.attempts)?;
        if let Some(last_error) = &self.last_error {
            write!(f, ", last error: {last_error}")?;
        }
        Ok(())
    }
}

/// An error that occurred while checking a connection out of a pool.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum PoolError {
    /// Every connection the pool may own is checked out, and the pool is configured
    /// not to wait.
    #[error("Pool exhausted: all {max} connections are checked out")]
    Exhausted {
        /// Upper bound on connections (or threads) of the pool.
        max: usize,
    },

    /// No connection was returned to the pool within the checkout timeout.
    #[error("Timed out after {0:?} waiting for a connection to be returned to the pool")]
    Timeout(Duration),

    /// The pool has been disposed and accepts no more checkouts.
    #[error("The pool has been disposed")]
    Disposed,

    /// The calling thread already holds the connection the thread-local pool assigned to it.
    #[error("The connection of the current thread is already checked out")]
    AlreadyCheckedOut,

    /// A second connection was requested from the assertion pool while the first
    /// one was still checked out.
    #[error("Assertion pool allows only one connection to be checked out at a time")]
    ConcurrentCheckout,

    /// The single shared connection broke. It is never replaced.
    #[error("The shared connection is broken")]
    SharedConnectionBroken,

    /// No server accepted a new connection.
    #[error(transparent)]
    NoServerAvailable(#[from] NoServerAvailable),
}

/// Error returned by every request executed through the client.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ExecutionError {
    /// The server answered with an error. Never retried.
    #[error(transparent)]
    DbError(#[from] DbError),

    /// Every server allowed by the failover budget was tried.
    #[error(transparent)]
    NoServerAvailable(NoServerAvailable),

    /// No connection could be checked out.
    #[error("Failed to check out a connection: {0}")]
    Pool(PoolError),

    /// The connection broke and the pool does not fail over.
    #[error("Connection broken and the pool does not support failover: {0}")]
    BrokenConnection(BrokenConnectionError),

    /// The caller passed an argument the request cannot be built from.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<PoolError> for ExecutionError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NoServerAvailable(err) => ExecutionError::NoServerAvailable(err),
            other => ExecutionError::Pool(other),
        }
    }
}

impl From<NoServerAvailable> for ExecutionError {
    fn from(err: NoServerAvailable) -> Self {
        ExecutionError::NoServerAvailable(err)
    }
}

impl ExecutionError {
    /// The server-side error, if this is one.
    pub fn as_db_error(&self) -> Option<&DbError> {
        match self {
            ExecutionError::DbError(err) => Some(err),
            _ => None,
        }
    }
}
