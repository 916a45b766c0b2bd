use cassa::policies::server_selector::ServerOrder;
use cassa::pool::{PoolKind, QueuePoolConfig};
use cassa::rpc::types::ColumnType;
use cassa::testing::MockCluster;
use cassa::SessionBuilder;

pub(crate) const KEYSPACE: &str = "Keyspace1";

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

/// A cluster of `servers` nodes, with `Standard1` and `Super1` defined in [`KEYSPACE`].
pub(crate) fn test_cluster(servers: usize) -> MockCluster {
    let cluster = MockCluster::new((1..=servers).map(|i| format!("10.0.0.{i}:9160")));
    cluster.create_keyspace(
        KEYSPACE,
        [
            ("Standard1", ColumnType::Standard),
            ("Super1", ColumnType::Super),
        ],
    );
    cluster
}

pub(crate) fn create_new_session_builder(cluster: &MockCluster) -> SessionBuilder {
    SessionBuilder::new()
        .known_nodes(cluster.addresses())
        .keyspace(KEYSPACE)
}

/// Same as [`create_new_session_builder`], but new connections always go to the
/// first server still untried, which makes failover deterministic.
pub(crate) fn ordered_session_builder(cluster: &MockCluster) -> SessionBuilder {
    create_new_session_builder(cluster).server_order(ServerOrder::Ordered)
}

/// Every pool strategy that replaces a broken connection.
pub(crate) fn failover_pools() -> Vec<PoolKind> {
    vec![
        PoolKind::queue(),
        PoolKind::Queue(QueuePoolConfig {
            prefill: false,
            ..Default::default()
        }),
        PoolKind::thread_local(),
        PoolKind::Null,
        PoolKind::Assertion,
    ]
}
