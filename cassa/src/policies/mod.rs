//! Pluggable behaviour of the client: where new connections go, and how write
//! timestamps are produced.

pub mod server_selector;
pub mod timestamp_generator;
