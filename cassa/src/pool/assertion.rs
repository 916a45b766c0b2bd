use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

use tracing::{debug, error};

use super::{ConnectionPool, PooledConnection, Reclaim};
use crate::errors::PoolError;
use crate::execution::FailoverBudget;
use crate::network::{Connection, Connector};

#[derive(Debug, Default)]
struct AssertionState {
    conn: Option<Connection>,
    lent: bool,
    disposed: bool,
}

#[derive(Debug)]
struct AssertionShared {
    connector: Arc<Connector>,
    state: Mutex<AssertionState>,
}

impl AssertionShared {
    fn lock(&self) -> MutexGuard<'_, AssertionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reclaim for AssertionShared {
    fn reclaim(&self, conn: Connection, _lent_to: ThreadId) {
        let mut state = self.lock();
        state.lent = false;
        if state.disposed || conn.is_broken() {
            drop(state);
            drop(conn);
        } else {
            state.conn = Some(conn);
        }
    }

    fn failover_connector(&self) -> Option<&Connector> {
        Some(&self.connector)
    }
}

/// Debugging pool: allows at most one connection to be checked out at a time.
///
/// A checkout while the connection is out does not wait; it fails with
/// [`PoolError::ConcurrentCheckout`], which points at code holding a connection
/// longer than it should, or at unexpected concurrency.
pub struct AssertionPool {
    shared: Arc<AssertionShared>,
}

impl AssertionPool {
    /// Creates the pool.
    pub fn new(connector: Arc<Connector>) -> Self {
        AssertionPool {
            shared: Arc::new(AssertionShared {
                connector,
                state: Mutex::new(AssertionState::default()),
            }),
        }
    }
}

impl ConnectionPool for AssertionPool {
    fn checkout_within(&self, budget: &mut FailoverBudget) -> Result<PooledConnection, PoolError> {
        let mut state = self.shared.lock();
        if state.disposed {
            return Err(PoolError::Disposed);
        }
        if state.lent {
            error!("Connection requested from the assertion pool while another one is checked out");
            return Err(PoolError::ConcurrentCheckout);
        }
        state.lent = true;
        if let Some(conn) = state.conn.take() {
            return Ok(PooledConnection::new(conn, self.shared.clone()));
        }
        drop(state);
        match self.shared.connector.open(budget) {
            Ok(conn) => Ok(PooledConnection::new(conn, self.shared.clone())),
            Err(err) => {
                self.shared.lock().lent = false;
                Err(err.into())
            }
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
        debug!(idle = conn.is_some(), "Disposing assertion pool");
    }

    fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    fn connector(&self) -> &Connector {
        &self.shared.connector
    }
}

impl fmt::Debug for AssertionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("AssertionPool")
            .field("lent", &state.lent)
            .field("disposed", &state.disposed)
            .finish()
    }
}
