use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use cassa::pool::{PoolKind, QueuePoolConfig, SingletonPoolConfig};
use cassa::testing::MOCK_VERSION;
use cassa::{ExecutionError, PoolError};

use crate::utils::{create_new_session_builder, ordered_session_builder, setup_tracing, test_cluster};

#[test]
#[ntest::timeout(10000)]
fn queue_checkout_waits_at_most_timeout() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::Queue(QueuePoolConfig {
            pool_size: 1,
            max_overflow: 0,
            timeout: Duration::from_millis(100),
            ..Default::default()
        }))
        .build(cluster.connector())
        .unwrap();

    let held = session.checkout().unwrap();
    let start = Instant::now();
    assert_matches!(session.checkout(), Err(PoolError::Timeout(_)));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(session.pool().checked_out(), 1);

    drop(held);
    assert_eq!(session.describe_version().unwrap(), MOCK_VERSION);
    assert_eq!(cluster.total_connections_opened(), 1);
}

#[test]
#[ntest::timeout(10000)]
fn queue_checkout_is_woken_by_checkin() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::Queue(QueuePoolConfig {
            pool_size: 1,
            max_overflow: 0,
            timeout: Duration::from_secs(5),
            ..Default::default()
        }))
        .build(cluster.connector())
        .unwrap();

    let held = session.checkout().unwrap();
    std::thread::scope(|s| {
        let waiter = s.spawn(|| session.describe_version());
        std::thread::sleep(Duration::from_millis(50));
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), MOCK_VERSION);
    });
    assert_eq!(cluster.total_connections_opened(), 1);
}

#[test]
fn queue_overflow_connections_are_closed_on_checkin() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::Queue(QueuePoolConfig {
            pool_size: 2,
            max_overflow: 1,
            ..Default::default()
        }))
        .build(cluster.connector())
        .unwrap();
    assert_eq!(cluster.total_open_connections(), 2);

    let conns: Vec<_> = (0..3).map(|_| session.checkout().unwrap()).collect();
    assert_eq!(cluster.total_open_connections(), 3);
    assert_eq!(session.pool().size(), 3);
    drop(conns);

    assert_eq!(cluster.total_open_connections(), 2);
    assert_eq!(session.pool().size(), 2);
    assert_eq!(session.pool().checked_out(), 0);
}

#[test]
fn queue_recycles_old_connections() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::Queue(QueuePoolConfig {
            pool_size: 1,
            max_overflow: 0,
            recycle: Some(3),
            ..Default::default()
        }))
        .build(cluster.connector())
        .unwrap();

    for _ in 0..4 {
        session.describe_version().unwrap();
    }
    assert_eq!(cluster.total_connections_opened(), 2);
    assert_eq!(cluster.total_open_connections(), 1);
}

#[test]
fn assertion_pool_fails_at_once() {
    setup_tracing();
    let cluster = test_cluster(2);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::Assertion)
        .build(cluster.connector())
        .unwrap();

    let held = session.checkout().unwrap();
    let start = Instant::now();
    assert_matches!(session.checkout(), Err(PoolError::ConcurrentCheckout));
    assert_matches!(
        session.describe_version(),
        Err(ExecutionError::Pool(PoolError::ConcurrentCheckout))
    );
    assert!(start.elapsed() < Duration::from_secs(1));

    drop(held);
    assert_eq!(session.describe_version().unwrap(), MOCK_VERSION);
    assert_eq!(cluster.total_connections_opened(), 1);
}

#[test]
#[ntest::timeout(10000)]
fn singleton_shares_one_connection() {
    setup_tracing();
    let cluster = test_cluster(3);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::Singleton(SingletonPoolConfig {
            timeout: Duration::from_secs(5),
        }))
        .build(cluster.connector())
        .unwrap();

    std::thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    for _ in 0..10 {
                        session.describe_version().unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    });
    assert_eq!(cluster.total_connections_opened(), 1);
    assert_eq!(session.pool().size(), 1);
}

#[test]
fn null_pool_opens_a_connection_per_checkout() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::Null)
        .build(cluster.connector())
        .unwrap();
    assert_eq!(cluster.total_connections_opened(), 0);

    for _ in 0..3 {
        session.describe_version().unwrap();
    }
    assert_eq!(cluster.total_connections_opened(), 3);
    assert_eq!(cluster.total_open_connections(), 0);
}

#[test]
fn round_robin_alternates_servers() {
    setup_tracing();
    let cluster = test_cluster(3);
    let servers = cluster.servers();
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::Null)
        .build(cluster.connector())
        .unwrap();

    let mut used = Vec::new();
    for _ in 0..6 {
        let conn = session.checkout().unwrap();
        used.push(conn.server().clone());
    }
    assert_eq!(used[..3], used[3..]);
    for server in &servers {
        assert_eq!(cluster.connections_opened(server), 2);
    }
}

#[test]
fn ordered_servers_prefer_the_first() {
    setup_tracing();
    let cluster = test_cluster(3);
    let servers = cluster.servers();
    let session = ordered_session_builder(&cluster)
        .pool(PoolKind::Null)
        .build(cluster.connector())
        .unwrap();

    for _ in 0..4 {
        assert_eq!(session.checkout().unwrap().server(), &servers[0]);
    }
    assert_eq!(cluster.connections_opened(&servers[0]), 4);
    assert_eq!(cluster.connect_attempts(&servers[1]), 0);
}

#[test]
fn dispose_closes_idle_connections() {
    setup_tracing();
    for pool in [PoolKind::queue(), PoolKind::singleton(), PoolKind::Assertion] {
        let cluster = test_cluster(2);
        let session = create_new_session_builder(&cluster)
            .pool(pool.clone())
            .build(cluster.connector())
            .unwrap();
        session.describe_version().unwrap();
        assert!(cluster.total_open_connections() > 0, "pool: {}", pool.name());

        session.dispose();
        assert_eq!(cluster.total_open_connections(), 0, "pool: {}", pool.name());
        assert_matches!(session.checkout(), Err(PoolError::Disposed));
    }
}
