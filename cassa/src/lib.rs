//! Pooled, failover-aware client for a column store spoken to over its RPC interface.
//!
//! The wire protocol is not part of this crate. It is consumed through the
//! [`RpcConnector`](crate::rpc::RpcConnector) and [`RpcClient`](crate::rpc::RpcClient)
//! traits defined in `cassa-rpc`; everything around those calls lives here:
//! * connections and the [server selection](crate::policies::server_selector) that decides
//!   where a new connection goes,
//! * a family of [connection pools](crate::pool) with one shared interface,
//! * [failover](crate::execution) of every call to the next untried server when a connection
//!   breaks,
//! * a [batch mutation queue](crate::batch) that flushes itself when it fills up.
//!
//! # Driver overview
//! ### Connecting
//! All requests are executed through a [`Session`], created with a [`SessionBuilder`]:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use cassa::rpc::RpcConnector;
//! # fn connect(rpc: Arc<dyn RpcConnector>) -> Result<(), Box<dyn std::error::Error>> {
//! use cassa::{Session, SessionBuilder};
//! use cassa::pool::PoolKind;
//!
//! let session: Session = SessionBuilder::new()
//!     .known_node("10.0.0.1:9160")
//!     .known_node("10.0.0.2:9160")
//!     .keyspace("Keyspace1")
//!     .pool(PoolKind::queue())
//!     .build(rpc)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Making requests
//! [`Session::execute`] runs any remote call with failover. Common reads and writes are
//! available on a [`ColumnFamily`](crate::client::column_family::ColumnFamily) handle:
//!
//! ```rust,no_run
//! # use cassa::Session;
//! # fn example(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
//! let users = session.column_family("Users");
//! users.insert("jsmith", [("first", "John"), ("last", "Smith")])?;
//! let row = users.get("jsmith", &Default::default())?;
//! println!("{} columns", row.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### Batching
//! ```rust,no_run
//! # use cassa::Session;
//! # fn example(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
//! let batch = session.batch();
//! {
//!     let scope = batch.scope();
//!     scope.insert("key1", "Users", [("name", "a")])?;
//!     scope.remove("key2", "Users", None)?;
//!     scope.finish()?;
//! }
//! # Ok(())
//! # }
//! ```

pub use cassa_rpc as rpc;

pub mod authentication;
pub mod batch;
pub mod client;
pub mod errors;
pub mod execution;
pub mod network;
pub mod policies;
pub mod pool;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod time_uuid;
pub(crate) mod utils;

pub use client::session::{Session, SessionConfig};
pub use client::session_builder::SessionBuilder;
pub use errors::{ExecutionError, NewSessionError, NoServerAvailable, PoolError};
