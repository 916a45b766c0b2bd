//! Connection pools.
//!
//! Every strategy implements [`ConnectionPool`]. The strategy is picked once, at
//! session creation, with [`PoolKind`]:
//!
//! | Strategy | Checkout | Failover |
//! |---|---|---|
//! | [`QueuePool`] | reuses an idle connection, opens a new one up to `pool_size + max_overflow`, then waits up to `timeout` | yes |
//! | [`ThreadLocalPool`] | one connection per calling thread, opened lazily and reused by that thread | yes |
//! | [`SingletonPool`] | one connection for the whole process, lent to one caller at a time | no |
//! | [`NullPool`] | a new connection for every checkout, closed on checkin | yes |
//! | [`AssertionPool`] | at most one connection, a second concurrent checkout is an error | yes |
//!
//! A checked-out connection is returned by dropping its [`PooledConnection`].
//! Broken connections are never returned to the idle set.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use cassa_rpc::{RpcClient, RpcResult, ServerAddr};
use tracing::{debug, trace};

use crate::errors::{ExecutionError, NewSessionError, NoServerAvailable, PoolError};
use crate::execution::{execute_with_failover, FailoverBudget};
use crate::network::{Connection, Connector};

mod assertion;
mod null;
mod queue;
mod singleton;
mod thread_local;

pub use assertion::AssertionPool;
pub use null::NullPool;
pub use queue::{QueuePool, QueuePoolConfig};
pub use singleton::{SingletonPool, SingletonPoolConfig};
pub use thread_local::{ThreadLocalPool, ThreadLocalPoolConfig};

/// Common interface of every pool strategy.
pub trait ConnectionPool: Send + Sync + fmt::Debug {
    /// Checks a connection out, with a failover budget of its own.
    fn checkout(&self) -> Result<PooledConnection, PoolError> {
        let mut budget = self.connector().budget();
        self.checkout_within(&mut budget)
    }

    /// Checks a connection out. Servers refusing a new connection are charged to `budget`.
    fn checkout_within(&self, budget: &mut FailoverBudget) -> Result<PooledConnection, PoolError>;

    /// Number of connections the pool currently owns, checked out or not.
    fn size(&self) -> usize;

    /// Number of connections currently checked out.
    fn checked_out(&self) -> usize;

    /// Closes every idle connection and refuses later checkouts.
    /// Connections still checked out are closed when they come back.
    fn dispose(&self);

    /// True once [`dispose`](ConnectionPool::dispose) was called.
    fn is_disposed(&self) -> bool;

    /// Opens the connections of this pool.
    fn connector(&self) -> &Connector;

    /// Whether a broken connection is replaced by one to another server.
    fn supports_failover(&self) -> bool {
        true
    }
}

/// Where a [`PooledConnection`] goes back to.
pub(crate) trait Reclaim: Send + Sync {
    /// Takes a connection back. `lent_to` is the thread that checked it out.
    fn reclaim(&self, conn: Connection, lent_to: ThreadId);

    /// Connector used to replace broken connections, if the pool fails over.
    fn failover_connector(&self) -> Option<&Connector>;
}

/// A connection checked out of a pool. Goes back to the pool when dropped.
pub struct PooledConnection {
    // Only `None` while dropping.
    conn: Option<Connection>,
    owner: Arc<dyn Reclaim>,
    lent_to: ThreadId,
}

impl PooledConnection {
    pub(crate) fn new(conn: Connection, owner: Arc<dyn Reclaim>) -> Self {
        trace!(server = %conn.server(), "Connection checked out");
        PooledConnection {
            conn: Some(conn),
            owner,
            lent_to: thread::current().id(),
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("BUG: PooledConnection used after its connection was returned")
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("BUG: PooledConnection used after its connection was returned")
    }

    /// The server the connection currently talks to. Changes when failover replaces it.
    pub fn server(&self) -> &ServerAddr {
        self.connection().server()
    }

    /// Whether the owning pool replaces a broken connection.
    pub fn supports_failover(&self) -> bool {
        self.owner.failover_connector().is_some()
    }

    /// Replaces the (broken) connection with a new one to a server not yet tried.
    pub(crate) fn replace(&mut self, budget: &mut FailoverBudget) -> Result<(), NoServerAvailable> {
        let Some(connector) = self.owner.failover_connector() else {
            return Err(budget.to_error());
        };
        let fresh = connector.open(budget)?;
        let Some(slot) = self.conn.as_mut() else {
            return Err(budget.to_error());
        };
        debug!(from = %slot.server(), to = %fresh.server(), "Replacing broken connection");
        let mut broken = std::mem::replace(slot, fresh);
        broken.close();
        Ok(())
    }

    /// Runs a remote call on this connection, failing over to other servers if it breaks.
    pub fn execute<T, F>(&mut self, call: F) -> Result<T, ExecutionError>
    where
        F: FnMut(&mut dyn RpcClient) -> RpcResult<T>,
    {
        let mut budget = match self.owner.failover_connector() {
            Some(connector) => connector.budget(),
            None => FailoverBudget::new(1, 1),
        };
        self.execute_within(&mut budget, call)
    }

    /// Like [`execute`](PooledConnection::execute), charging failover to `budget`.
    pub fn execute_within<T, F>(
        &mut self,
        budget: &mut FailoverBudget,
        call: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut(&mut dyn RpcClient) -> RpcResult<T>,
    {
        execute_with_failover(self, budget, call)
    }

    /// Returns the connection to its pool. Same as dropping it.
    pub fn checkin(self) {}
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            trace!(server = %conn.server(), "Connection checked in");
            self.owner.reclaim(conn, self.lent_to);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("lent_to", &self.lent_to)
            .finish_non_exhaustive()
    }
}

/// Pool strategy of a session, together with its parameters.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PoolKind {
    /// Bounded queue of reusable connections.
    Queue(QueuePoolConfig),
    /// One connection per thread.
    ThreadLocal(ThreadLocalPoolConfig),
    /// One connection shared by the whole process, without failover.
    Singleton(SingletonPoolConfig),
    /// No pooling: a connection per checkout.
    Null,
    /// At most one connection checked out at a time; for debugging.
    Assertion,
}

impl Default for PoolKind {
    fn default() -> Self {
        PoolKind::queue()
    }
}

impl PoolKind {
    /// Bounded queue with default parameters.
    pub fn queue() -> Self {
        PoolKind::Queue(QueuePoolConfig::default())
    }

    /// One connection per thread, unbounded number of threads.
    pub fn thread_local() -> Self {
        PoolKind::ThreadLocal(ThreadLocalPoolConfig::default())
    }

    /// Single shared connection with default parameters.
    pub fn singleton() -> Self {
        PoolKind::Singleton(SingletonPoolConfig::default())
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            PoolKind::Queue(_) => "queue",
            PoolKind::ThreadLocal(_) => "thread-local",
            PoolKind::Singleton(_) => "singleton",
            PoolKind::Null => "null",
            PoolKind::Assertion => "assertion",
        }
    }

    pub(crate) fn validate(&self) -> Result<(), NewSessionError> {
        match self {
            PoolKind::Queue(config) if config.pool_size + config.max_overflow == 0 => Err(
                NewSessionError::InvalidPoolConfig("pool_size + max_overflow must be positive"),
            ),
            PoolKind::ThreadLocal(ThreadLocalPoolConfig {
                pool_size: Some(0), ..
            }) => Err(NewSessionError::InvalidPoolConfig(
                "thread-local pool_size must be positive",
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn build(
        &self,
        connector: Arc<Connector>,
    ) -> Result<Box<dyn ConnectionPool>, NewSessionError> {
        self.validate()?;
        debug!(kind = self.name(), "Creating connection pool");
        let pool: Box<dyn ConnectionPool> = match self {
            PoolKind::Queue(config) => Box::new(QueuePool::new(connector, config.clone())?),
            PoolKind::ThreadLocal(config) => {
                Box::new(ThreadLocalPool::new(connector, config.clone()))
            }
            PoolKind::Singleton(config) => Box::new(SingletonPool::new(connector, config.clone())),
            PoolKind::Null => Box::new(NullPool::new(connector)),
            PoolKind::Assertion => Box::new(AssertionPool::new(connector)),
        };
        Ok(pool)
    }
}

pub(crate) const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);
