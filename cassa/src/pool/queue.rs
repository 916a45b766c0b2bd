use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{ConnectionPool, PooledConnection, Reclaim, DEFAULT_CHECKOUT_TIMEOUT};
use crate::errors::{NoServerAvailable, PoolError};
use crate::execution::FailoverBudget;
use crate::network::{Connection, Connector};

/// Parameters of a [`QueuePool`].
#[derive(Debug, Clone)]
pub struct QueuePoolConfig {
    /// Connections kept open while idle.
    pub pool_size: usize,
    /// Extra connections that may be opened under load. They are closed as soon
    /// as they are returned.
    pub max_overflow: usize,
    /// How long a checkout waits for a connection to be returned when the pool is
    /// at capacity. Zero makes such a checkout fail at once with [`PoolError::Exhausted`].
    pub timeout: Duration,
    /// A connection is closed instead of reused after this many operations.
    /// `None` disables recycling.
    pub recycle: Option<u64>,
    /// Open `pool_size` connections when the pool is created.
    pub prefill: bool,
}

impl Default for QueuePoolConfig {
    fn default() -> Self {
        QueuePoolConfig {
            pool_size: 5,
            max_overflow: 10,
            timeout: DEFAULT_CHECKOUT_TIMEOUT,
            recycle: Some(10_000),
            prefill: true,
        }
    }
}

impl QueuePoolConfig {
    /// Upper bound on connections owned by the pool at any time.
    pub fn max_connections(&self) -> usize {
        self.pool_size + self.max_overflow
    }
}

#[derive(Debug, Default)]
struct QueueState {
    idle: VecDeque<Connection>,
    // Connections owned: idle, checked out, and being opened.
    size: usize,
    checked_out: usize,
    disposed: bool,
}

#[derive(Debug)]
struct QueueShared {
    connector: Arc<Connector>,
    config: QueuePoolConfig,
    state: Mutex<QueueState>,
    returned: Condvar,
}

impl QueueShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn discard_reason(&self, state: &QueueState, conn: &Connection) -> Option<&'static str> {
        if state.disposed {
            Some("pool disposed")
        } else if conn.is_broken() {
            Some("broken")
        } else if self
            .config
            .recycle
            .is_some_and(|recycle| conn.operation_count() >= recycle)
        {
            Some("recycled")
        } else if state.size > self.config.pool_size {
            Some("overflow")
        } else {
            None
        }
    }
}

impl Reclaim for QueueShared {
    fn reclaim(&self, conn: Connection, _lent_to: ThreadId) {
        let mut state = self.lock();
        state.checked_out = state.checked_out.saturating_sub(1);
        match self.discard_reason(&state, &conn) {
            Some(reason) => {
                state.size = state.size.saturating_sub(1);
                drop(state);
                self.returned.notify_one();
                debug!(server = %conn.server(), reason, "Discarding connection");
                drop(conn);
            }
            None => {
                state.idle.push_back(conn);
                drop(state);
                self.returned.notify_one();
            }
        }
    }

    fn failover_connector(&self) -> Option<&Connector> {
        Some(&self.connector)
    }
}

/// Bounded pool of reusable connections.
///
/// Keeps up to `pool_size` idle connections. Under load it opens up to
/// `max_overflow` more; when all of them are checked out, a checkout blocks until
/// one is returned or `timeout` passes.
pub struct QueuePool {
    shared: Arc<QueueShared>,
}

impl QueuePool {
    /// Creates the pool, opening `pool_size` connections first if `prefill` is set.
    pub fn new(connector: Arc<Connector>, config: QueuePoolConfig) -> Result<Self, NoServerAvailable> {
        let mut state = QueueState::default();
        if config.prefill {
            for _ in 0..config.pool_size {
                state.idle.push_back(connector.open_fresh()?);
                state.size += 1;
            }
        }
        debug!(
            pool_size = config.pool_size,
            max_overflow = config.max_overflow,
            prefilled = state.size,
            "Queue pool created"
        );
        Ok(QueuePool {
            shared: Arc::new(QueueShared {
                connector,
                config,
                state: Mutex::new(state),
                returned: Condvar::new(),
            }),
        })
    }

    /// Parameters of this pool.
    pub fn config(&self) -> &QueuePoolConfig {
        &self.shared.config
    }

    /// Number of idle connections.
    pub fn idle(&self) -> usize {
        self.shared.lock().idle.len()
    }

    fn lend(&self, conn: Connection) -> PooledConnection {
        PooledConnection::new(conn, self.shared.clone())
    }
}

impl ConnectionPool for QueuePool {
    fn checkout_within(&self, budget: &mut FailoverBudget) -> Result<PooledConnection, PoolError> {
        let config = &self.shared.config;
        let deadline = Instant::now() + config.timeout;
        let mut state = self.shared.lock();
        loop {
            if state.disposed {
                return Err(PoolError::Disposed);
            }
            if let Some(conn) = state.idle.pop_front() {
                state.checked_out += 1;
                return Ok(self.lend(conn));
            }
            if state.size < config.max_connections() {
                // Reserve the slot, then connect without holding the lock.
                state.size += 1;
                state.checked_out += 1;
                let overflow = state.size > config.pool_size;
                drop(state);
                trace!(overflow, "Opening a new pooled connection");
                return match self.shared.connector.open(budget) {
                    Ok(conn) => Ok(self.lend(conn)),
                    Err(err) => {
                        let mut state = self.shared.lock();
                        state.size -= 1;
                        state.checked_out -= 1;
                        drop(state);
                        self.shared.returned.notify_one();
                        Err(err.into())
                    }
                };
            }

            if config.timeout.is_zero() {
                return Err(PoolError::Exhausted {
                    max: config.max_connections(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Timeout(config.timeout));
            }
            trace!("Pool at capacity, waiting for a connection to be returned");
            state = self
                .shared
                .returned
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn size(&self) -> usize {
        self.shared.lock().size
    }

    fn checked_out(&self) -> usize {
        self.shared.lock().checked_out
    }

    fn dispose(&self) {
        let idle: Vec<Connection> = {
            let mut state = self.shared.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            let idle: Vec<Connection> = state.idle.drain(..).collect();
            state.size -= idle.len();
            idle
        };
        self.shared.returned.notify_all();
        debug!(closing = idle.len(), "Disposing queue pool");
    }

    fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    fn connector(&self) -> &Connector {
        &self.shared.connector
    }
}

impl fmt::Debug for QueuePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("QueuePool")
            .field("config", &self.shared.config)
            .field("size", &state.size)
            .field("idle", &state.idle.len())
            .field("checked_out", &state.checked_out)
            .field("disposed", &state.disposed)
            .finish()
    }
}
