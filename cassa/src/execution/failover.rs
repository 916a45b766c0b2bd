use cassa_rpc::errors::RequestAttemptError;
use cassa_rpc::{RpcClient, RpcResult, ServerAddr};
use smallvec::SmallVec;
use tracing::{trace, trace_span, warn};

use crate::errors::{ExecutionError, NoServerAvailable, ServerAttemptError};
use crate::pool::PooledConnection;

/// Attempt bookkeeping for one request.
///
/// Every server that fails the request, whether by refusing a new connection or
/// by breaking an open one, costs one attempt and is excluded from the rest of
/// the current cycle. A cycle ends once every configured server was tried; a
/// budget larger than the cluster then starts over with all servers eligible.
#[derive(Debug, Clone)]
pub struct FailoverBudget {
    limit: usize,
    used: usize,
    server_count: usize,
    tried: SmallVec<[ServerAddr; 4]>,
    last_error: Option<ServerAttemptError>,
}

impl FailoverBudget {
    /// A budget of `limit` attempts over a cluster of `server_count` servers.
    pub fn new(limit: usize, server_count: usize) -> Self {
        FailoverBudget {
            limit,
            used: 0,
            server_count,
            tried: SmallVec::new(),
            last_error: None,
        }
    }

    /// Attempts spent so far.
    pub fn attempts(&self) -> usize {
        self.used
    }

    /// Total attempts allowed.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// True when no attempt is left.
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    /// Servers already tried in the current cycle.
    pub fn tried(&self) -> &[ServerAddr] {
        &self.tried
    }

    /// Records that `server` failed.
    pub fn record_failure(&mut self, server: ServerAddr, error: ServerAttemptError) {
        self.used += 1;
        if !self.tried.contains(&server) {
            self.tried.push(server);
        }
        if self.tried.len() >= self.server_count {
            self.tried.clear();
        }
        self.last_error = Some(error);
    }

    /// The error to report once the budget is exhausted.
    pub fn to_error(&self) -> NoServerAvailable {
        NoServerAvailable {
            attempts: self.used,
            last_error: self.last_error.clone(),
        }
    }
}

/// Runs `call` on `conn`, failing over to other servers on connection-level errors.
///
/// Server-reported errors end the request immediately, unchanged. A broken
/// connection is replaced in place by a connection to the next untried server,
/// and the call is repeated there, until the budget runs out.
pub(crate) fn execute_with_failover<T, F>(
    conn: &mut PooledConnection,
    budget: &mut FailoverBudget,
    mut call: F,
) -> Result<T, ExecutionError>
where
    F: FnMut(&mut dyn RpcClient) -> RpcResult<T>,
{
    loop {
        let server = conn.server().clone();
        let span = trace_span!("Executing request", server = %server, attempt = budget.attempts() + 1);
        let result = span.in_scope(|| conn.connection_mut().call(&mut call));

        let error = match result {
            Ok(value) => {
                trace!(parent: &span, "Request succeeded");
                return Ok(value);
            }
            Err(RequestAttemptError::DbError(err)) => {
                trace!(parent: &span, error = %err, "Server returned an error, not retrying");
                return Err(ExecutionError::DbError(err));
            }
            Err(RequestAttemptError::BrokenConnection(err)) => err,
        };

        if !conn.supports_failover() {
            warn!(server = %server, error = %error, "Connection broken, pool does not fail over");
            return Err(ExecutionError::BrokenConnection(error));
        }

        budget.record_failure(server.clone(), error.clone().into());
        if budget.is_exhausted() {
            warn!(
                server = %server,
                error = %error,
                attempts = budget.attempts(),
                "Connection broken and failover budget exhausted"
            );
            return Err(budget.to_error().into());
        }
        warn!(server = %server, error = %error, "Connection broken, failing over");
        conn.replace(budget)?;
    }
}
