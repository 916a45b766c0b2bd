use assert_matches::assert_matches;
use cassa::errors::ServerAttemptError;
use cassa::pool::PoolKind;
use cassa::rpc::errors::DbError;
use cassa::testing::{Fault, MOCK_VERSION};
use cassa::{ExecutionError, NoServerAvailable, PoolError};

use crate::utils::{
    create_new_session_builder, failover_pools, ordered_session_builder, setup_tracing,
    test_cluster,
};

#[test]
fn fails_over_when_server_is_down() {
    setup_tracing();
    for pool in failover_pools() {
        let cluster = test_cluster(3);
        let servers = cluster.servers();
        let session = ordered_session_builder(&cluster)
            .pool(pool.clone())
            .build(cluster.connector())
            .unwrap();

        cluster.stop(&servers[0]);
        let version = session.describe_version().unwrap();
        assert_eq!(version, MOCK_VERSION, "pool: {}", pool.name());
        assert_eq!(cluster.connections_opened(&servers[1]), 1, "pool: {}", pool.name());
        assert_eq!(cluster.connect_attempts(&servers[2]), 0, "pool: {}", pool.name());
    }
}

#[test]
fn fails_over_when_connection_breaks_mid_call() {
    setup_tracing();
    for fault in [Fault::Reset, Fault::Timeout] {
        let cluster = test_cluster(2);
        let servers = cluster.servers();
        let session = ordered_session_builder(&cluster)
            .pool(PoolKind::queue())
            .build(cluster.connector())
            .unwrap();

        // The pool was prefilled, so the fault hits the call itself.
        cluster.inject_fault(&servers[0], fault);
        let mut conn = session.checkout().unwrap();
        assert_eq!(conn.server(), &servers[0]);
        let version = conn.execute(|rpc| rpc.describe_version()).unwrap();
        assert_eq!(version, MOCK_VERSION);
        assert_eq!(conn.server(), &servers[1]);
        assert_eq!(cluster.calls(&servers[0]), 5 + 1);
    }
}

#[test]
fn gives_up_after_max_failover_attempts() {
    setup_tracing();
    let cluster = test_cluster(4);
    let servers = cluster.servers();
    let session = ordered_session_builder(&cluster)
        .pool(PoolKind::Null)
        .max_failover_attempts(2)
        .build(cluster.connector())
        .unwrap();
    for server in &servers {
        cluster.inject_fault(server, Fault::Reset);
    }

    let err = session.describe_version().unwrap_err();
    assert_matches!(
        err,
        ExecutionError::NoServerAvailable(NoServerAvailable {
            attempts: 2,
            last_error: Some(ServerAttemptError::Connect(_)),
        })
    );
    assert_eq!(cluster.connect_attempts(&servers[0]), 1);
    assert_eq!(cluster.connect_attempts(&servers[1]), 1);
    assert_eq!(cluster.connect_attempts(&servers[2]), 0);
    assert_eq!(cluster.connect_attempts(&servers[3]), 0);
}

#[test]
fn every_server_is_tried_by_default() {
    setup_tracing();
    let cluster = test_cluster(3);
    let servers = cluster.servers();
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::Null)
        .build(cluster.connector())
        .unwrap();
    for server in &servers {
        cluster.stop(server);
    }

    let err = session.describe_version().unwrap_err();
    assert_matches!(err, ExecutionError::NoServerAvailable(NoServerAvailable { attempts: 3, .. }));
    for server in &servers {
        assert_eq!(cluster.connect_attempts(server), 1);
    }

    cluster.start(&servers[1]);
    assert_eq!(session.describe_version().unwrap(), MOCK_VERSION);
}

#[test]
fn server_errors_are_not_retried() {
    setup_tracing();
    for pool in failover_pools() {
        let cluster = test_cluster(2);
        let servers = cluster.servers();
        let session = ordered_session_builder(&cluster)
            .pool(pool.clone())
            .build(cluster.connector())
            .unwrap();
        // Check out first, so that the fault reaches the call and not the setup.
        let mut conn = session.checkout().unwrap();
        let calls_before = cluster.calls(&servers[0]);

        cluster.inject_fault(&servers[0], Fault::Db(DbError::TimedOut));
        let err = conn.execute(|rpc| rpc.describe_version()).unwrap_err();
        assert_matches!(err, ExecutionError::DbError(DbError::TimedOut), "pool: {}", pool.name());
        assert_eq!(conn.server(), &servers[0]);
        assert_eq!(cluster.calls(&servers[0]), calls_before + 1);
        assert_eq!(cluster.calls(&servers[1]), 0, "pool: {}", pool.name());
    }
}

#[test]
fn singleton_does_not_fail_over() {
    setup_tracing();
    let cluster = test_cluster(2);
    let servers = cluster.servers();
    let session = ordered_session_builder(&cluster)
        .pool(PoolKind::singleton())
        .build(cluster.connector())
        .unwrap();
    assert_eq!(session.describe_version().unwrap(), MOCK_VERSION);

    cluster.inject_fault(&servers[0], Fault::Reset);
    assert_matches!(
        session.describe_version(),
        Err(ExecutionError::BrokenConnection(_))
    );
    assert_matches!(
        session.describe_version(),
        Err(ExecutionError::Pool(PoolError::SharedConnectionBroken))
    );
    assert_eq!(cluster.connect_attempts(&servers[1]), 0);
}
