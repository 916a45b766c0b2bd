//! Executing remote calls with failover.
//!
//! Errors returned by a remote call are split in two. Connection-level failures
//! (timeouts, resets, a closed socket) say nothing about the request itself, so the
//! connection is discarded and the call is repeated on the next untried server.
//! Errors reported by the server (`NotFound`, `TimedOut`, `Unavailable`, ...) are
//! returned to the caller as they are.

mod failover;

pub use failover::FailoverBudget;
pub(crate) use failover::execute_with_failover;
