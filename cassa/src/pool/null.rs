use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use tracing::debug;

use super::{ConnectionPool, PooledConnection, Reclaim};
use crate::errors::PoolError;
use crate::execution::FailoverBudget;
use crate::network::{Connection, Connector};

#[derive(Debug)]
struct NullShared {
    connector: Arc<Connector>,
    checked_out: AtomicUsize,
    disposed: AtomicBool,
}

impl Reclaim for NullShared {
    fn reclaim(&self, conn: Connection, _lent_to: ThreadId) {
        self.checked_out.fetch_sub(1, Ordering::SeqCst);
        drop(conn);
    }

    fn failover_connector(&self) -> Option<&Connector> {
        Some(&self.connector)
    }
}

/// No pooling at all: every checkout opens a connection, every checkin closes it.
#[derive(Debug)]
pub struct NullPool {
    shared: Arc<NullShared>,
}

impl NullPool {
    /// Creates the pool.
    pub fn new(connector: Arc<Connector>) -> Self {
        NullPool {
            shared: Arc::new(NullShared {
                connector,
                checked_out: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

impl ConnectionPool for NullPool {
    fn checkout_within(&self, budget: &mut FailoverBudget) -> Result<PooledConnection, PoolError> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(PoolError::Disposed);
        }
        let conn = self.shared.connector.open(budget)?;
        self.shared.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection::new(conn, self.shared.clone()))
    }

    fn size(&self) -> usize {
        self.checked_out()
    }

    fn checked_out(&self) -> usize {
        self.shared.checked_out.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        if !self.shared.disposed.swap(true, Ordering::SeqCst) {
            debug!("Disposing null pool");
        }
    }

    fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    fn connector(&self) -> &Connector {
        &self.shared.connector
    }
}
