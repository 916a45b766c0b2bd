//! Connections to single servers, and the means of opening them.

mod connection;
mod connector;
pub mod transport;

pub use connection::{Connection, ConnectionState};
pub(crate) use connection::ConnectionSetup;
pub use connector::Connector;
