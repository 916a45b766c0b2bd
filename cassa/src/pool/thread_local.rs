use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::{ConnectionPool, PooledConnection, Reclaim};
use crate::errors::PoolError;
use crate::execution::FailoverBudget;
use crate::network::{Connection, Connector};

/// Parameters of a [`ThreadLocalPool`].
#[derive(Debug, Clone, Default)]
pub struct ThreadLocalPoolConfig {
    /// Maximum number of threads holding a connection at the same time.
    /// `None` means unbounded.
    pub pool_size: Option<usize>,
}

enum Slot {
    Idle(Connection),
    Lent,
}

struct ThreadLocalShared {
    connector: Arc<Connector>,
    config: ThreadLocalPoolConfig,
    slots: DashMap<ThreadId, Slot>,
    // Number of slots; kept apart from `slots` so that it can be checked while
    // a shard of the map is locked.
    threads: AtomicUsize,
    disposed: AtomicBool,
}

impl ThreadLocalShared {
    fn reserve_thread(&self) -> Result<(), PoolError> {
        match self.config.pool_size {
            None => {
                self.threads.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Some(max) => self
                .threads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
                .map(|_| ())
                .map_err(|_| PoolError::Exhausted { max }),
        }
    }

    /// Forgets the slot of `thread`, closing its connection if it is idle.
    fn release_thread(&self, thread: ThreadId) {
        if let Some((_, slot)) = self.slots.remove(&thread) {
            self.threads.fetch_sub(1, Ordering::SeqCst);
            if let Slot::Idle(conn) = slot {
                debug!(?thread, server = %conn.server(), "Closing connection of thread");
                drop(conn);
            }
        }
    }
}

impl Reclaim for ThreadLocalShared {
    fn reclaim(&self, conn: Connection, lent_to: ThreadId) {
        if !self.disposed.load(Ordering::SeqCst) && !conn.is_broken() {
            if let Some(mut slot) = self.slots.get_mut(&lent_to) {
                if matches!(*slot, Slot::Lent) {
                    *slot = Slot::Idle(conn);
                    return;
                }
            }
            // The owning thread exited, or the pool was disposed meanwhile.
            trace!(thread = ?lent_to, "No slot to return the connection to");
            return;
        }
        if self
            .slots
            .remove_if(&lent_to, |_, slot| matches!(slot, Slot::Lent))
            .is_some()
        {
            self.threads.fetch_sub(1, Ordering::SeqCst);
        }
        debug!(thread = ?lent_to, server = %conn.server(), broken = conn.is_broken(), "Discarding thread connection");
    }

    fn failover_connector(&self) -> Option<&Connector> {
        Some(&self.connector)
    }
}

/// Closes the connections of the current thread when it exits.
struct ThreadExitHook {
    thread: ThreadId,
    pools: Vec<Weak<ThreadLocalShared>>,
}

impl Drop for ThreadExitHook {
    fn drop(&mut self) {
        for pool in self.pools.drain(..) {
            if let Some(pool) = pool.upgrade() {
                pool.release_thread(self.thread);
            }
        }
    }
}

thread_local! {
    static EXIT_HOOK: RefCell<ThreadExitHook> = RefCell::new(ThreadExitHook {
        thread: thread::current().id(),
        pools: Vec::new(),
    });
}

fn register_exit_hook(pool: &Arc<ThreadLocalShared>) {
    let weak = Arc::downgrade(pool);
    // Fails only while the thread is already tearing down its locals.
    let _ = EXIT_HOOK.try_with(|hook| {
        let mut hook = hook.borrow_mut();
        hook.pools.retain(|p| p.strong_count() > 0);
        if !hook.pools.iter().any(|p| Weak::ptr_eq(p, &weak)) {
            hook.pools.push(weak);
        }
    });
}

/// One connection per thread.
///
/// A thread's first checkout opens a connection, later checkouts from the same
/// thread reuse it. A connection is never handed to another thread: a second
/// checkout on a thread whose connection is already out fails with
/// [`PoolError::AlreadyCheckedOut`]. The connection is closed when it breaks,
/// when the thread exits, or when the pool is disposed.
pub struct ThreadLocalPool {
    shared: Arc<ThreadLocalShared>,
}

enum CheckoutPlan {
    Reuse(Connection),
    Open,
}

impl ThreadLocalPool {
    /// Creates an empty pool.
    pub fn new(connector: Arc<Connector>, config: ThreadLocalPoolConfig) -> Self {
        ThreadLocalPool {
            shared: Arc::new(ThreadLocalShared {
                connector,
                config,
                slots: DashMap::new(),
                threads: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Whether the calling thread currently owns a connection of this pool.
    pub fn has_connection(&self) -> bool {
        self.shared.slots.contains_key(&thread::current().id())
    }

    /// Closes the calling thread's connection, if it is idle. The next checkout
    /// from this thread opens a new one.
    pub fn release_current_thread(&self) {
        let thread = thread::current().id();
        if self
            .shared
            .slots
            .get(&thread)
            .is_some_and(|slot| matches!(*slot, Slot::Idle(_)))
        {
            self.shared.release_thread(thread);
        }
    }

    fn plan_checkout(&self, thread: ThreadId) -> Result<CheckoutPlan, PoolError> {
        match self.shared.slots.entry(thread) {
            Entry::Occupied(mut entry) => match std::mem::replace(entry.get_mut(), Slot::Lent) {
                Slot::Lent => Err(PoolError::AlreadyCheckedOut),
                Slot::Idle(conn) => Ok(CheckoutPlan::Reuse(conn)),
            },
            Entry::Vacant(entry) => {
                self.shared.reserve_thread()?;
                entry.insert(Slot::Lent);
                Ok(CheckoutPlan::Open)
            }
        }
    }
}

impl ConnectionPool for ThreadLocalPool {
    fn checkout_within(&self, budget: &mut FailoverBudget) -> Result<PooledConnection, PoolError> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(PoolError::Disposed);
        }
        let thread = thread::current().id();
        match self.plan_checkout(thread)? {
            CheckoutPlan::Reuse(conn) => Ok(PooledConnection::new(conn, self.shared.clone())),
            CheckoutPlan::Open => {
                register_exit_hook(&self.shared);
                match self.shared.connector.open(budget) {
                    Ok(conn) => {
                        debug!(?thread, server = %conn.server(), "Opened connection for thread");
                        Ok(PooledConnection::new(conn, self.shared.clone()))
                    }
                    Err(err) => {
                        self.shared.release_thread(thread);
                        Err(err.into())
                    }
                }
            }
        }
    }

    fn size(&self) -> usize {
        self.shared.threads.load(Ordering::SeqCst)
    }

    fn checked_out(&self) -> usize {
        self.shared
            .slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Lent))
            .count()
    }

    fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let threads: Vec<ThreadId> = self.shared.slots.iter().map(|slot| *slot.key()).collect();
        debug!(threads = threads.len(), "Disposing thread-local pool");
        for thread in threads {
            self.shared.release_thread(thread);
        }
    }

    fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    fn connector(&self) -> &Connector {
        &self.shared.connector
    }
}

impl fmt::Debug for ThreadLocalPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLocalPool")
            .field("config", &self.shared.config)
            .field("threads", &self.shared.threads.load(Ordering::SeqCst))
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{ThreadLocalPool, ThreadLocalPoolConfig};
    use crate::errors::PoolError;
    use crate::pool::ConnectionPool;
    use crate::testing::{Fault, MockCluster};
    use crate::utils::test_utils::{mock_connector, setup_tracing};

    fn pool(cluster: &MockCluster, pool_size: Option<usize>) -> ThreadLocalPool {
        ThreadLocalPool::new(
            mock_connector(cluster, None),
            ThreadLocalPoolConfig { pool_size },
        )
    }

    #[test]
    fn same_thread_reuses_its_connection() {
        setup_tracing();
        let cluster = MockCluster::new(["10.0.0.1:9160", "10.0.0.2:9160"]);
        let pool = pool(&cluster, None);
        assert!(!pool.has_connection());

        let server = pool.checkout().unwrap().server().clone();
        for _ in 0..5 {
            let mut conn = pool.checkout().unwrap();
            assert_eq!(conn.server(), &server);
            conn.execute(|rpc| rpc.describe_version()).unwrap();
        }
        assert!(pool.has_connection());
        assert_eq!(pool.size(), 1);
        assert_eq!(cluster.total_connections_opened(), 1);
    }

    #[test]
    fn nested_checkout_fails() {
        setup_tracing();
        let cluster = MockCluster::new(["10.0.0.1:9160"]);
        let pool = pool(&cluster, None);
        let held = pool.checkout().unwrap();
        assert_matches!(pool.checkout(), Err(PoolError::AlreadyCheckedOut));
        assert_eq!(pool.checked_out(), 1);
        drop(held);
        assert_eq!(pool.checked_out(), 0);
        assert!(pool.checkout().is_ok());
    }

    #[test]
    #[ntest::timeout(10000)]
    fn threads_get_distinct_connections_closed_on_exit() {
        setup_tracing();
        let cluster = MockCluster::new(["10.0.0.1:9160", "10.0.0.2:9160"]);
        let pool = pool(&cluster, None);
        let barrier = std::sync::Barrier::new(4);
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let mut conn = pool.checkout().unwrap();
                        conn.execute(|rpc| rpc.describe_version()).unwrap();
                        drop(conn);
                        // Every thread holds its connection at the same time.
                        barrier.wait();
                    })
                })
                .collect();
            // An explicit join also waits for thread-local destructors.
            for handle in handles {
                handle.join().unwrap();
            }
        });
        assert_eq!(cluster.total_connections_opened(), 4);
        // Thread exit hooks have closed them all.
        assert_eq!(cluster.total_open_connections(), 0);
        assert_eq!(pool.size(), 0);
    }

    #[test]
    #[ntest::timeout(10000)]
    fn pool_size_bounds_threads() {
        setup_tracing();
        let cluster = MockCluster::new(["10.0.0.1:9160"]);
        let pool = pool(&cluster, Some(1));
        let _mine = pool.checkout().unwrap();
        std::thread::scope(|s| {
            let other = s.spawn(|| pool.checkout().map(|_| ()));
            assert_matches!(other.join().unwrap(), Err(PoolError::Exhausted { max: 1 }));
        });
    }

    #[test]
    fn broken_connection_is_replaced_in_place() {
        setup_tracing();
        let cluster = MockCluster::new(["10.0.0.1:9160", "10.0.0.2:9160"]);
        let pool = pool(&cluster, None);
        let mut conn = pool.checkout().unwrap();
        let first = conn.server().clone();
        cluster.inject_fault(&first, Fault::Reset);
        conn.execute(|rpc| rpc.describe_version()).unwrap();
        let second = conn.server().clone();
        assert_ne!(first, second);
        drop(conn);

        // The replacement stays with this thread.
        assert_eq!(pool.checkout().unwrap().server(), &second);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn dispose_closes_everything() {
        setup_tracing();
        let cluster = MockCluster::new(["10.0.0.1:9160"]);
        let pool = pool(&cluster, None);
        let lent = pool.checkout().unwrap();
        pool.dispose();
        assert_matches!(pool.checkout(), Err(PoolError::Disposed));
        assert_eq!(cluster.total_open_connections(), 1);
        drop(lent);
        assert_eq!(cluster.total_open_connections(), 0);
        assert_eq!(pool.size(), 0);
    }
}
