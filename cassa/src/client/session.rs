//! `Session` is the main object used in the driver.\
//! It owns the connection pool and runs every request with failover.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cassa_rpc::types::KsDef;
use cassa_rpc::{
    ConnectionConfig, Consistency, RpcClient, RpcConnector, RpcResult, ServerAddr, TransportMode,
};
use tracing::{debug, info};

use super::column_family::ColumnFamily;
use crate::authentication::AuthenticatorProvider;
use crate::batch::{Mutator, DEFAULT_QUEUE_SIZE};
use crate::errors::{ExecutionError, NewSessionError, PoolError};
use crate::execution::FailoverBudget;
use crate::network::{ConnectionSetup, Connector};
use crate::policies::server_selector::ServerOrder;
use crate::policies::timestamp_generator::{MonotonicTimestampGenerator, TimestampGenerator};
use crate::pool::{ConnectionPool, PoolKind, PooledConnection};

/// `Session` manages connections to the cluster and allows to perform requests.
///
/// A session is created once, shared by reference, and disposed explicitly with
/// [`Session::dispose`] or by dropping it.
pub struct Session {
    pool: Box<dyn ConnectionPool>,
    keyspace: Option<String>,
    read_consistency: Consistency,
    write_consistency: Consistency,
    timestamp_generator: Arc<dyn TimestampGenerator>,
    batch_queue_size: Option<usize>,
}

/// Configuration options for [`Session`].
/// Can be created manually, but usually it's easier to use
/// [SessionBuilder](super::session_builder::SessionBuilder)
#[derive(Clone)]
#[non_exhaustive]
pub struct SessionConfig {
    /// Servers of the cluster, as `host[:port]`. The port defaults to 9160.
    pub known_nodes: Vec<String>,

    /// Keyspace selected on every new connection.
    pub keyspace: Option<String>,

    /// Framed or unframed transport.
    pub transport_mode: TransportMode,

    /// Read/write timeout of every socket. A request timing out counts as a
    /// connection failure and is failed over.
    pub socket_timeout: Option<Duration>,

    /// Time allowed for establishing a TCP connection.
    pub connect_timeout: Duration,

    /// TCP keepalive interval, which means how often keepalive messages
    /// are sent **on TCP layer** when a connection is idle.
    /// If `None`, no TCP keepalive messages are sent.
    pub tcp_keepalive_interval: Option<Duration>,

    /// Whether to set the nodelay TCP flag.
    pub tcp_nodelay: bool,

    /// Provides the credentials presented when a connection is opened.
    pub authenticator: Option<Arc<dyn AuthenticatorProvider>>,

    /// Pool strategy and its parameters.
    pub pool: PoolKind,

    /// Order in which servers are picked for new connections.
    pub server_order: ServerOrder,

    /// Servers a single request may try before failing with `NoServerAvailable`.
    /// `None` means as many as there are known nodes.
    pub max_failover_attempts: Option<usize>,

    /// Default consistency level of reads.
    pub read_consistency: Consistency,

    /// Default consistency level of writes.
    pub write_consistency: Consistency,

    /// Generator of write timestamps. `None` means [`MonotonicTimestampGenerator`].
    pub timestamp_generator: Option<Arc<dyn TimestampGenerator>>,

    /// Flush threshold of the mutators created by [`Session::batch`].
    /// `None` disables automatic flushing.
    pub batch_queue_size: Option<usize>,
}

impl SessionConfig {
    /// Creates a [`SessionConfig`] with default configuration
    /// # Default configuration
    /// * Pool: queue of 5 connections, 10 overflow
    /// * Server order: round robin
    /// * Consistency: `One` for reads and writes
    /// * Batch queue size: 100
    ///
    /// # Example
    /// ```
    /// # use cassa::SessionConfig;
    /// let config = SessionConfig::new();
    /// ```
    pub fn new() -> Self {
        let connection = ConnectionConfig::default();
        SessionConfig {
            known_nodes: Vec::new(),
            keyspace: None,
            transport_mode: connection.transport_mode,
            socket_timeout: connection.socket_timeout,
            connect_timeout: connection.connect_timeout,
            tcp_keepalive_interval: connection.tcp_keepalive_interval,
            tcp_nodelay: connection.tcp_nodelay,
            authenticator: None,
            pool: PoolKind::default(),
            server_order: ServerOrder::default(),
            max_failover_attempts: None,
            read_consistency: Consistency::One,
            write_consistency: Consistency::One,
            timestamp_generator: None,
            batch_queue_size: Some(DEFAULT_QUEUE_SIZE),
        }
    }

    /// Adds a known server.
    /// If the port is not explicitly specified, 9160 is used as default
    /// # Example
    /// ```
    /// # use cassa::SessionConfig;
    /// let mut config = SessionConfig::new();
    /// config.add_known_node("127.0.0.1");
    /// config.add_known_node("db1.example.com:9160");
    /// ```
    pub fn add_known_node(&mut self, hostname: impl AsRef<str>) {
        self.known_nodes.push(hostname.as_ref().to_owned());
    }

    /// Adds a list of known servers.
    pub fn add_known_nodes(&mut self, hostnames: impl IntoIterator<Item = impl AsRef<str>>) {
        for hostname in hostnames {
            self.add_known_node(hostname);
        }
    }

    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            transport_mode: self.transport_mode,
            socket_timeout: self.socket_timeout,
            connect_timeout: self.connect_timeout,
            tcp_keepalive_interval: self.tcp_keepalive_interval,
            tcp_nodelay: self.tcp_nodelay,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Establishes a session with the servers in `config`, using `rpc` to open connections.
    ///
    /// Usually it's easier to use [SessionBuilder](crate::client::session_builder::SessionBuilder)
    /// instead of calling `Session::connect` directly.
    ///
    /// Fails if the configuration is invalid, or if the pool prefills connections
    /// and no server accepts them.
    pub fn connect(
        config: SessionConfig,
        rpc: Arc<dyn RpcConnector>,
    ) -> Result<Self, NewSessionError> {
        // Ensure there is at least one known node
        if config.known_nodes.is_empty() {
            return Err(NewSessionError::EmptyKnownNodesList);
        }
        let servers: Vec<ServerAddr> = config
            .known_nodes
            .iter()
            .map(|node| node.parse::<ServerAddr>())
            .collect::<Result<_, _>>()?;
        if config.max_failover_attempts == Some(0) {
            return Err(NewSessionError::InvalidPoolConfig(
                "max_failover_attempts must be positive",
            ));
        }
        if config.batch_queue_size == Some(0) {
            return Err(NewSessionError::InvalidPoolConfig(
                "batch_queue_size must be positive",
            ));
        }

        let setup = ConnectionSetup {
            rpc,
            config: config.connection_config(),
            keyspace: config.keyspace.clone(),
            authenticator: config.authenticator.clone(),
        };
        let connector = Arc::new(Connector::new(
            servers,
            config.server_order,
            setup,
            config.max_failover_attempts,
        ));
        let pool = config.pool.build(connector)?;
        info!(
            keyspace = config.keyspace.as_deref().unwrap_or(""),
            pool = config.pool.name(),
            "Session created"
        );

        Ok(Session {
            pool,
            keyspace: config.keyspace,
            read_consistency: config.read_consistency,
            write_consistency: config.write_consistency,
            timestamp_generator: config
                .timestamp_generator
                .unwrap_or_else(|| Arc::new(MonotonicTimestampGenerator::new())),
            batch_queue_size: config.batch_queue_size,
        })
    }

    /// Runs a remote call with failover.
    ///
    /// A connection is checked out of the pool and `call` is run on it. If the
    /// connection breaks, it is replaced by one to the next server not tried yet
    /// and `call` runs again, until the failover budget is spent. Errors reported
    /// by the server end the request at once and are returned unchanged.
    ///
    /// ```rust,no_run
    /// # use cassa::Session;
    /// # fn example(session: &Session) -> Result<(), cassa::ExecutionError> {
    /// let version = session.execute(|rpc| rpc.describe_version())?;
    /// println!("Server speaks {version}");
    /// # Ok(())
    /// # }
    /// ```
    pub fn execute<T, F>(&self, call: F) -> Result<T, ExecutionError>
    where
        F: FnMut(&mut dyn RpcClient) -> RpcResult<T>,
    {
        let mut budget = self.budget();
        let mut conn = self.pool.checkout_within(&mut budget)?;
        conn.execute_within(&mut budget, call)
    }

    fn budget(&self) -> FailoverBudget {
        self.pool.connector().budget()
    }

    /// Checks a connection out of the pool, for several calls in a row on the
    /// same connection. It goes back to the pool when dropped.
    pub fn checkout(&self) -> Result<PooledConnection, PoolError> {
        self.pool.checkout()
    }

    /// The connection pool of this session.
    pub fn pool(&self) -> &dyn ConnectionPool {
        self.pool.as_ref()
    }

    /// The keyspace selected on every connection.
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    /// Default consistency level of reads.
    pub fn read_consistency(&self) -> Consistency {
        self.read_consistency
    }

    /// Default consistency level of writes.
    pub fn write_consistency(&self) -> Consistency {
        self.write_consistency
    }

    /// A new write timestamp, in microseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp_generator.next_timestamp()
    }

    /// Definition of `keyspace` and its column families.
    pub fn describe_keyspace(&self, keyspace: &str) -> Result<KsDef, ExecutionError> {
        self.execute(|rpc| rpc.describe_keyspace(keyspace))
    }

    /// Definitions of every keyspace.
    pub fn describe_keyspaces(&self) -> Result<Vec<KsDef>, ExecutionError> {
        self.execute(|rpc| rpc.describe_keyspaces())
    }

    /// Version of the remote interface spoken by the cluster.
    pub fn describe_version(&self) -> Result<String, ExecutionError> {
        self.execute(|rpc| rpc.describe_version())
    }

    /// A mutation queue flushing every `batch_queue_size` entries, as configured.
    pub fn batch(&self) -> Mutator<'_> {
        Mutator::new(self, self.batch_queue_size)
    }

    /// A mutation queue with its own flush threshold; `None` never flushes on its own.
    pub fn batch_with_queue_size(&self, queue_size: Option<usize>) -> Mutator<'_> {
        Mutator::new(self, queue_size)
    }

    pub(crate) fn batch_queue_size(&self) -> Option<usize> {
        self.batch_queue_size
    }

    /// A handle for reading and writing one column family of the keyspace.
    pub fn column_family(&self, name: impl Into<String>) -> ColumnFamily<'_> {
        ColumnFamily::new(self, name.into())
    }

    /// Closes idle connections and refuses new requests. Connections still in use
    /// are closed when they are returned.
    pub fn dispose(&self) {
        if !self.pool.is_disposed() {
            debug!(pool = ?self.pool, "Disposing session");
            self.pool.dispose();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pool", &self.pool)
            .field("keyspace", &self.keyspace)
            .field("read_consistency", &self.read_consistency)
            .field("write_consistency", &self.write_consistency)
            .field("batch_queue_size", &self.batch_queue_size)
            .finish_non_exhaustive()
    }
}
