//! The caller-facing part of the driver: [`Session`](session::Session), its
//! builder and [`ColumnFamily`](column_family::ColumnFamily) handles.

pub mod column_family;

pub mod session;

pub mod session_builder;
