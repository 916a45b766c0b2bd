use std::fmt;
use std::sync::Arc;

use cassa_rpc::errors::{ConnectionError, RequestAttemptError};
use cassa_rpc::{ConnectionConfig, RpcClient, RpcConnector, RpcResult, ServerAddr};
use tracing::{debug, trace};

use crate::authentication::AuthenticatorProvider;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Usable.
    Open,
    /// A connection-level failure happened; the connection must be discarded.
    Broken,
    /// Closed by the client. Terminal.
    Closed,
}

/// Everything needed to turn a TCP-level session into a usable [`Connection`].
#[derive(Clone)]
pub(crate) struct ConnectionSetup {
    pub(crate) rpc: Arc<dyn RpcConnector>,
    pub(crate) config: ConnectionConfig,
    pub(crate) keyspace: Option<String>,
    pub(crate) authenticator: Option<Arc<dyn AuthenticatorProvider>>,
}

impl fmt::Debug for ConnectionSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSetup")
            .field("config", &self.config)
            .field("keyspace", &self.keyspace)
            .field("authenticator", &self.authenticator.is_some())
            .finish_non_exhaustive()
    }
}

/// A session with exactly one server.
///
/// Obtained from a [pool](crate::pool) and used through
/// [`PooledConnection::execute`](crate::pool::PooledConnection::execute).
/// Closed when dropped.
pub struct Connection {
    server: ServerAddr,
    client: Box<dyn RpcClient>,
    state: ConnectionState,
    operations: u64,
}

impl Connection {
    /// Connects to `server`, logs in if credentials are configured, and selects the keyspace.
    pub(crate) fn open(server: &ServerAddr, setup: &ConnectionSetup) -> Result<Self, ConnectionError> {
        trace!(server = %server, "Opening connection");
        let client = setup.rpc.connect(server, &setup.config)?;
        let mut connection = Connection {
            server: server.clone(),
            client,
            state: ConnectionState::Open,
            operations: 0,
        };

        if let Some(authenticator) = &setup.authenticator {
            let request = authenticator.authentication_request(server).map_err(|reason| {
                ConnectionError::AuthenticatorFailed {
                    server: server.clone(),
                    reason,
                }
            })?;
            connection
                .client
                .login(&request)
                .map_err(|error| connection.setup_failed(error))?;
        }
        if let Some(keyspace) = &setup.keyspace {
            connection
                .client
                .set_keyspace(keyspace)
                .map_err(|error| connection.setup_failed(error))?;
        }

        debug!(server = %server, "Connection opened");
        Ok(connection)
    }

    fn setup_failed(&self, error: RequestAttemptError) -> ConnectionError {
        ConnectionError::SetupFailed {
            server: self.server.clone(),
            error,
        }
    }

    /// The server this connection talks to.
    pub fn server(&self) -> &ServerAddr {
        &self.server
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once a connection-level failure has been observed.
    pub fn is_broken(&self) -> bool {
        self.state == ConnectionState::Broken
    }

    /// Number of calls executed on this connection, failed ones included.
    pub fn operation_count(&self) -> u64 {
        self.operations
    }

    /// Runs one remote call. A connection-level failure marks the connection broken.
    pub(crate) fn call<T, F>(&mut self, call: &mut F) -> RpcResult<T>
    where
        F: FnMut(&mut dyn RpcClient) -> RpcResult<T>,
    {
        self.operations += 1;
        let result = call(self.client.as_mut());
        if let Err(err) = &result {
            if err.is_connection_level() {
                self.mark_broken();
            }
        }
        result
    }

    pub(crate) fn mark_broken(&mut self) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Broken;
        }
    }

    /// Closes the underlying session. Idempotent.
    pub(crate) fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.client.close();
        debug!(
            server = %self.server,
            operations = self.operations,
            broken = self.is_broken(),
            "Connection closed"
        );
        self.state = ConnectionState::Closed;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.server)
            .field("state", &self.state)
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}
