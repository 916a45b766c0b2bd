//! SessionBuilder provides an easy way to create new Sessions

use std::sync::Arc;
use std::time::Duration;

use cassa_rpc::{Consistency, RpcConnector, TransportMode};

use super::session::{Session, SessionConfig};
use crate::authentication::{AuthenticatorProvider, PlainTextAuthenticator};
use crate::errors::NewSessionError;
use crate::policies::server_selector::ServerOrder;
use crate::policies::timestamp_generator::TimestampGenerator;
use crate::pool::PoolKind;

/// SessionBuilder is used to create new Session instances
/// # Example
///
/// ```
/// # use std::sync::Arc;
/// # use cassa::rpc::RpcConnector;
/// # use cassa::{Session, SessionBuilder};
/// # use cassa::pool::PoolKind;
/// # fn example(rpc: Arc<dyn RpcConnector>) -> Result<(), Box<dyn std::error::Error>> {
/// let session: Session = SessionBuilder::new()
///     .known_node("127.0.0.1:9160")
///     .pool(PoolKind::thread_local())
///     .build(rpc)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionBuilder {
    /// The configuration being built.
    pub config: SessionConfig,
}

impl SessionBuilder {
    /// Creates new SessionBuilder with default configuration
    /// # Default configuration
    /// * Pool: [`PoolKind::queue`]
    /// * Servers tried in round-robin order
    /// * Framed transport, 0.5 s socket timeout
    pub fn new() -> Self {
        SessionBuilder {
            config: SessionConfig::new(),
        }
    }

    /// Add a known server with a hostname or an IP address, and an optional port
    /// # Examples
    /// ```
    /// # use std::sync::Arc;
    /// # use cassa::rpc::RpcConnector;
    /// # use cassa::{Session, SessionBuilder};
    /// # fn example(rpc: Arc<dyn RpcConnector>) -> Result<(), Box<dyn std::error::Error>> {
    /// let session: Session = SessionBuilder::new()
    ///     .known_node("db1.example.com")
    ///     .build(rpc)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn known_node(mut self, hostname: impl AsRef<str>) -> Self {
        self.config.add_known_node(hostname);
        self
    }

    /// Add a list of known servers
    /// # Example
    /// ```
    /// # use std::sync::Arc;
    /// # use cassa::rpc::RpcConnector;
    /// # use cassa::{Session, SessionBuilder};
    /// # fn example(rpc: Arc<dyn RpcConnector>) -> Result<(), Box<dyn std::error::Error>> {
    /// let session: Session = SessionBuilder::new()
    ///     .known_nodes(["127.0.0.1:9160", "db1.example.com"])
    ///     .build(rpc)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn known_nodes(mut self, hostnames: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.config.add_known_nodes(hostnames);
        self
    }

    /// Keyspace selected on every connection.
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.config.keyspace = Some(keyspace.into());
        self
    }

    /// Set the pool strategy and its parameters.
    /// # Example
    /// ```
    /// # use std::sync::Arc;
    /// # use std::time::Duration;
    /// # use cassa::rpc::RpcConnector;
    /// # use cassa::{Session, SessionBuilder};
    /// use cassa::pool::{PoolKind, QueuePoolConfig};
    /// # fn example(rpc: Arc<dyn RpcConnector>) -> Result<(), Box<dyn std::error::Error>> {
    /// let session: Session = SessionBuilder::new()
    ///     .known_node("127.0.0.1:9160")
    ///     .pool(PoolKind::Queue(QueuePoolConfig {
    ///         pool_size: 10,
    ///         timeout: Duration::from_secs(2),
    ///         ..Default::default()
    ///     }))
    ///     .build(rpc)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn pool(mut self, pool: PoolKind) -> Self {
        self.config.pool = pool;
        self
    }

    /// Set username and password for plain text authentication.
    pub fn user(mut self, username: impl Into<String>, passwd: impl Into<String>) -> Self {
        self.config.authenticator = Some(Arc::new(PlainTextAuthenticator::new(
            username.into(),
            passwd.into(),
        )));
        self
    }

    /// Set a custom provider of the credentials presented on every new connection.
    pub fn authenticator_provider(
        mut self,
        authenticator_provider: Arc<dyn AuthenticatorProvider>,
    ) -> Self {
        self.config.authenticator = Some(authenticator_provider);
        self
    }

    /// Read/write timeout of every socket. `None` blocks forever.
    ///
    /// The default is 0.5 s.
    pub fn socket_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.socket_timeout = timeout;
        self
    }

    /// Changes connection timeout
    /// The default is 5 seconds.
    /// If it's higher than underlying os's default connection timeout it won't effect.
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = duration;
        self
    }

    /// Set the TCP keepalive interval.
    /// The default is `None`, which implies that no keepalive messages
    /// are sent **on TCP layer** when a connection is idle.
    pub fn tcp_keepalive_interval(mut self, interval: Duration) -> Self {
        if interval <= Duration::from_secs(1) {
            tracing::warn!(
                "Setting the TCP keepalive interval to low values ({:?}) is not recommended as it can have a negative impact on performance. Consider setting it above 1 second.",
                interval
            );
        }
        self.config.tcp_keepalive_interval = Some(interval);
        self
    }

    /// Set the nodelay TCP flag.
    /// The default is true.
    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.config.tcp_nodelay = nodelay;
        self
    }

    /// Framed (the default) or unframed transport.
    pub fn framed(mut self, framed: bool) -> Self {
        self.config.transport_mode = if framed {
            TransportMode::Framed
        } else {
            TransportMode::Unframed
        };
        self
    }

    /// Pick servers for new connections in round-robin order (the default), or always
    /// start with the first server of the list.
    pub fn round_robin(mut self, round_robin: bool) -> Self {
        self.config.server_order = if round_robin {
            ServerOrder::RoundRobin
        } else {
            ServerOrder::Ordered
        };
        self
    }

    /// Same as [`round_robin`](SessionBuilder::round_robin), with an explicit order.
    pub fn server_order(mut self, order: ServerOrder) -> Self {
        self.config.server_order = order;
        self
    }

    /// How many servers a single request may try. The default is the number of
    /// known servers.
    pub fn max_failover_attempts(mut self, attempts: usize) -> Self {
        self.config.max_failover_attempts = Some(attempts);
        self
    }

    /// Default consistency level of reads. The default is `One`.
    pub fn read_consistency(mut self, consistency: Consistency) -> Self {
        self.config.read_consistency = consistency;
        self
    }

    /// Default consistency level of writes. The default is `One`.
    pub fn write_consistency(mut self, consistency: Consistency) -> Self {
        self.config.write_consistency = consistency;
        self
    }

    /// Set the generator of write timestamps.
    /// The default is [`MonotonicTimestampGenerator`](crate::policies::timestamp_generator::MonotonicTimestampGenerator).
    pub fn timestamp_generator(mut self, timestamp_generator: Arc<dyn TimestampGenerator>) -> Self {
        self.config.timestamp_generator = Some(timestamp_generator);
        self
    }

    /// Flush threshold of [`Session::batch`] mutators. `None` disables automatic flushing.
    /// The default is 100.
    pub fn batch_queue_size(mut self, queue_size: Option<usize>) -> Self {
        self.config.batch_queue_size = queue_size;
        self
    }

    /// Builds the Session after setting all the options, using `rpc` to open connections.
    pub fn build(&self, rpc: Arc<dyn RpcConnector>) -> Result<Session, NewSessionError> {
        Session::connect(self.config.clone(), rpc)
    }
}

/// Creates a [`SessionBuilder`] with default configuration, same as [`SessionBuilder::new`]
impl Default for SessionBuilder {
    fn default() -> Self {
        SessionBuilder::new()
    }
}
