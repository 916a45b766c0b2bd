use std::fmt;

use cassa_rpc::ServerAddr;
use itertools::Itertools;
use tracing::{debug, warn};

use super::connection::{Connection, ConnectionSetup};
use crate::errors::NoServerAvailable;
use crate::execution::FailoverBudget;
use crate::policies::server_selector::{ServerOrder, ServerSelector};

/// Opens connections to the servers of one cluster.
///
/// Shared by a pool and every failover attempt made through it: the selector's
/// cursor, and therefore round-robin order, is common to all of them.
pub struct Connector {
    selector: ServerSelector,
    setup: ConnectionSetup,
    max_attempts: usize,
}

impl Connector {
    pub(crate) fn new(
        servers: Vec<ServerAddr>,
        order: ServerOrder,
        setup: ConnectionSetup,
        max_attempts: Option<usize>,
    ) -> Self {
        let max_attempts = max_attempts.unwrap_or(servers.len());
        debug!(
            servers = %servers.iter().join(", "),
            ?order,
            max_attempts,
            "Creating connector"
        );
        Connector {
            selector: ServerSelector::new(servers, order),
            setup,
            max_attempts,
        }
    }

    /// The configured servers.
    pub fn servers(&self) -> &[ServerAddr] {
        self.selector.servers()
    }

    /// How many servers a single request may try before giving up.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// A fresh budget for one request.
    pub fn budget(&self) -> FailoverBudget {
        FailoverBudget::new(self.max_attempts, self.servers().len())
    }

    /// Opens a connection to the next server the budget has not tried yet.
    ///
    /// Every server that refuses costs one attempt. Fails once the budget is spent.
    pub fn open(&self, budget: &mut FailoverBudget) -> Result<Connection, NoServerAvailable> {
        loop {
            if budget.is_exhausted() {
                return Err(budget.to_error());
            }
            let Some(server) = self.selector.next_server_excluding(budget.tried()).cloned() else {
                return Err(budget.to_error());
            };
            match Connection::open(&server, &self.setup) {
                Ok(connection) => return Ok(connection),
                Err(err) => {
                    warn!(
                        server = %server,
                        error = %err,
                        attempt = budget.attempts() + 1,
                        "Failed to open connection"
                    );
                    budget.record_failure(server, err.into());
                }
            }
        }
    }

    /// Opens a connection using a budget of its own.
    pub fn open_fresh(&self) -> Result<Connection, NoServerAvailable> {
        self.open(&mut self.budget())
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("selector", &self.selector)
            .field("setup", &self.setup)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
