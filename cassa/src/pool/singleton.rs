use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{ConnectionPool, PooledConnection, Reclaim, DEFAULT_CHECKOUT_TIMEOUT};
use crate::errors::PoolError;
use crate::execution::FailoverBudget;
use crate::network::{Connection, Connector};

/// Parameters of a [`SingletonPool`].
#[derive(Debug, Clone)]
pub struct SingletonPoolConfig {
    /// How long a checkout waits while another caller holds the connection.
    pub timeout: Duration,
}

impl Default for SingletonPoolConfig {
    fn default() -> Self {
        SingletonPoolConfig {
            timeout: DEFAULT_CHECKOUT_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
struct SingletonState {
    // `None` while lent, before the first checkout, and after it broke.
    conn: Option<Connection>,
    lent: bool,
    broken: bool,
    disposed: bool,
}

#[derive(Debug)]
struct SingletonShared {
    connector: Arc<Connector>,
    config: SingletonPoolConfig,
    state: Mutex<SingletonState>,
    returned: Condvar,
}

impl SingletonShared {
    fn lock(&self) -> MutexGuard<'_, SingletonState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reclaim for SingletonShared {
    fn reclaim(&self, conn: Connection, _lent_to: ThreadId) {
        let mut state = self.lock();
        state.lent = false;
        let keep = if state.disposed {
            false
        } else if conn.is_broken() {
            state.broken = true;
            warn!(server = %conn.server(), "Shared connection broken, it will not be replaced");
            false
        } else {
            true
        };
        if keep {
            state.conn = Some(conn);
            drop(state);
        } else {
            drop(state);
            drop(conn);
        }
        self.returned.notify_all();
    }

    fn failover_connector(&self) -> Option<&Connector> {
        None
    }
}

/// A single connection shared by every caller, one caller at a time.
///
/// The connection is opened on first checkout. It is never replaced: once it
/// breaks, the broken request fails with
/// [`ExecutionError::BrokenConnection`](crate::errors::ExecutionError::BrokenConnection)
/// and every later checkout with [`PoolError::SharedConnectionBroken`].
pub struct SingletonPool {
    shared: Arc<SingletonShared>,
}

impl SingletonPool {
    /// Creates the pool. No connection is opened yet.
    pub fn new(connector: Arc<Connector>, config: SingletonPoolConfig) -> Self {
        SingletonPool {
            shared: Arc::new(SingletonShared {
                connector,
                config,
                state: Mutex::new(SingletonState::default()),
                returned: Condvar::new(),
            }),
        }
    }

    /// True once the shared connection broke.
    pub fn is_broken(&self) -> bool {
        self.shared.lock().broken
    }
}

impl ConnectionPool for SingletonPool {
    fn checkout_within(&self, budget: &mut FailoverBudget) -> Result<PooledConnection, PoolError> {
        let timeout = self.shared.config.timeout;
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if state.disposed {
                return Err(PoolError::Disposed);
            }
            if state.broken {
                return Err(PoolError::SharedConnectionBroken);
            }
            if !state.lent {
                state.lent = true;
                if let Some(conn) = state.conn.take() {
                    return Ok(PooledConnection::new(conn, self.shared.clone()));
                }
                drop(state);
                // First checkout: the only time a server is picked.
                return match self.shared.connector.open(budget) {
                    Ok(conn) => {
                        debug!(server = %conn.server(), "Shared connection opened");
                        Ok(PooledConnection::new(conn, self.shared.clone()))
                    }
                    Err(err) => {
                        self.shared.lock().lent = false;
                        self.shared.returned.notify_one();
                        Err(err.into())
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Timeout(timeout));
            }
            state = self
                .shared
                .returned
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn size(&self) -> usize {
        let state = self.shared.lock();
        usize::from(state.lent || state.conn.is_some())
    }

    fn checked_out(&self) -> usize {
        usize::from(self.shared.lock().lent)
    }

    fn dispose(&self) {
        let conn = {
            let mut state = self.shared.lock();
            state.disposed = true;
            state.conn.take()
        };
        self.shared.returned.notify_all();
        if let Some(conn) = conn {
            debug!(server = %conn.server(), "Disposing singleton pool");
        }
    }

    fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    fn connector(&self) -> &Connector {
        &self.shared.connector
    }

    fn supports_failover(&self) -> bool {
        false
    }
}

impl fmt::Debug for SingletonPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("SingletonPool")
            .field("config", &self.shared.config)
            .field("lent", &state.lent)
            .field("broken", &state.broken)
            .field("disposed", &state.disposed)
            .finish()
    }
}
