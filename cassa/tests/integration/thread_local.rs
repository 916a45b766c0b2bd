use std::collections::HashSet;
use std::thread;

use assert_matches::assert_matches;
use cassa::pool::{PoolKind, ThreadLocalPoolConfig};
use cassa::testing::MOCK_VERSION;
use cassa::{ExecutionError, PoolError};

use crate::utils::{create_new_session_builder, setup_tracing, test_cluster};

#[test]
fn each_thread_gets_its_own_connection() {
    setup_tracing();
    let cluster = test_cluster(3);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::thread_local())
        .build(cluster.connector())
        .unwrap();

    let threads = thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    let first = session.checkout().unwrap();
                    let server = first.server().clone();
                    drop(first);
                    // Later checkouts on this thread reuse the same connection.
                    for _ in 0..5 {
                        assert_eq!(session.describe_version().unwrap(), MOCK_VERSION);
                    }
                    assert_eq!(session.checkout().unwrap().server(), &server);
                    thread::current().id()
                })
            })
            .collect();
        // Joining waits for thread-local destructors, which close the connections.
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect::<HashSet<_>>()
    });

    assert_eq!(threads.len(), 4);
    assert_eq!(cluster.total_connections_opened(), 4);
    assert_eq!(cluster.total_open_connections(), 0);
    assert_eq!(session.pool().size(), 0);
}

#[test]
fn nested_checkout_on_one_thread_fails() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::thread_local())
        .build(cluster.connector())
        .unwrap();

    let held = session.checkout().unwrap();
    assert_matches!(session.checkout(), Err(PoolError::AlreadyCheckedOut));
    assert_matches!(
        session.describe_version(),
        Err(ExecutionError::Pool(PoolError::AlreadyCheckedOut))
    );

    // Another thread is not affected.
    thread::scope(|s| {
        let other = s.spawn(|| session.describe_version());
        assert_eq!(other.join().unwrap().unwrap(), MOCK_VERSION);
    });

    drop(held);
    assert_eq!(session.describe_version().unwrap(), MOCK_VERSION);
}

#[test]
fn thread_limit_is_enforced() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::ThreadLocal(ThreadLocalPoolConfig {
            pool_size: Some(1),
        }))
        .build(cluster.connector())
        .unwrap();

    let held = session.checkout().unwrap();
    thread::scope(|s| {
        let other = s.spawn(|| session.checkout().map(drop));
        assert_matches!(other.join().unwrap(), Err(PoolError::Exhausted { max: 1 }));
    });
    drop(held);
}

#[test]
fn broken_connection_is_replaced_for_the_thread() {
    setup_tracing();
    let cluster = test_cluster(2);
    let servers = cluster.servers();
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::thread_local())
        .build(cluster.connector())
        .unwrap();

    let first = session.checkout().unwrap().server().clone();
    cluster.stop(&first);
    assert_eq!(session.describe_version().unwrap(), MOCK_VERSION);

    let second = session.checkout().unwrap().server().clone();
    assert_ne!(first, second);
    assert!(servers.contains(&second));
    assert_eq!(cluster.total_connections_opened(), 2);
}
