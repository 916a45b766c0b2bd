//! Defines the remote procedure interface of the column store, as consumed by the
//! `cassa` client.
//!
//! The wire encoding of the interface is not implemented here. Instead, this crate
//! describes:
//! * the records exchanged with a server ([`types`]),
//! * the errors a remote call can end with, split into connection-level and
//!   application-level failures ([`errors`]),
//! * the [`RpcClient`] and [`RpcConnector`] traits which a wire-protocol
//!   implementation provides, and which the client drives through its pools.

pub mod client;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod types;

pub use crate::client::{RpcClient, RpcConnector, RpcResult};
pub use crate::config::{ConnectionConfig, TransportMode};
pub use crate::endpoint::ServerAddr;
pub use crate::types::Consistency;
