use std::sync::Arc;

use cassa_rpc::ConnectionConfig;

use crate::network::{ConnectionSetup, Connector};
use crate::policies::server_selector::ServerOrder;
use crate::testing::MockCluster;

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

// Round robin over every server of the cluster, no credentials.
pub(crate) fn mock_connector(cluster: &MockCluster, keyspace: Option<&str>) -> Arc<Connector> {
    let setup = ConnectionSetup {
        rpc: cluster.connector(),
        config: ConnectionConfig::default(),
        keyspace: keyspace.map(ToOwned::to_owned),
        authenticator: None,
    };
    Arc::new(Connector::new(
        cluster.servers(),
        ServerOrder::RoundRobin,
        setup,
        None,
    ))
}
