//! The remote interface, as a pair of traits.
//!
//! A wire-protocol implementation provides an [`RpcConnector`] that opens sessions,
//! and an [`RpcClient`] per open session. The `cassa` client never touches the
//! wire itself; it only drives these traits and classifies their errors.

use std::collections::HashMap;

use bytes::Bytes;

use crate::config::ConnectionConfig;
use crate::endpoint::ServerAddr;
use crate::errors::{ConnectionError, RequestAttemptError};
use crate::types::{
    AuthenticationRequest, Column, ColumnOrSuperColumn, ColumnParent, ColumnPath, Consistency,
    IndexClause, KeyRange, KeySlice, KsDef, MutationMap, SlicePredicate,
};

/// Result of a single attempt of a remote call.
pub type RpcResult<T> = Result<T, RequestAttemptError>;

/// One open session to one server.
///
/// A session is used by one caller at a time, hence `&mut self` everywhere.
/// It may be parked by one thread and picked up by another, so it has to be
/// `Send + Sync`.
/// Implementations report transport trouble as
/// [`RequestAttemptError::BrokenConnection`] and server-reported errors as
/// [`RequestAttemptError::DbError`]; the client's failover depends on this split.
pub trait RpcClient: Send + Sync {
    /// Presents credentials to the server.
    fn login(&mut self, request: &AuthenticationRequest) -> RpcResult<()>;

    /// Binds the session to a keyspace.
    fn set_keyspace(&mut self, keyspace: &str) -> RpcResult<()>;

    /// Reads a single column or super column.
    fn get(
        &mut self,
        key: &[u8],
        path: &ColumnPath,
        consistency: Consistency,
    ) -> RpcResult<ColumnOrSuperColumn>;

    /// Reads the columns of one row selected by `predicate`.
    fn get_slice(
        &mut self,
        key: &[u8],
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        consistency: Consistency,
    ) -> RpcResult<Vec<ColumnOrSuperColumn>>;

    /// [`get_slice`](RpcClient::get_slice) for many rows at once.
    fn multiget_slice(
        &mut self,
        keys: &[Bytes],
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        consistency: Consistency,
    ) -> RpcResult<HashMap<Bytes, Vec<ColumnOrSuperColumn>>>;

    /// Counts the columns of one row selected by `predicate`.
    fn get_count(
        &mut self,
        key: &[u8],
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        consistency: Consistency,
    ) -> RpcResult<i32>;

    /// [`get_count`](RpcClient::get_count) for many rows at once.
    fn multiget_count(
        &mut self,
        keys: &[Bytes],
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        consistency: Consistency,
    ) -> RpcResult<HashMap<Bytes, i32>>;

    /// Reads a range of rows.
    fn get_range_slices(
        &mut self,
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        range: &KeyRange,
        consistency: Consistency,
    ) -> RpcResult<Vec<KeySlice>>;

    /// Reads the rows matching a secondary index clause.
    fn get_indexed_slices(
        &mut self,
        parent: &ColumnParent,
        clause: &IndexClause,
        predicate: &SlicePredicate,
        consistency: Consistency,
    ) -> RpcResult<Vec<KeySlice>>;

    /// Writes a single column.
    fn insert(
        &mut self,
        key: &[u8],
        parent: &ColumnParent,
        column: &Column,
        consistency: Consistency,
    ) -> RpcResult<()>;

    /// Applies many mutations in one call. Atomic per row key and column family only.
    fn batch_mutate(&mut self, mutations: &MutationMap, consistency: Consistency)
        -> RpcResult<()>;

    /// Removes a column, a super column or a whole row.
    fn remove(
        &mut self,
        key: &[u8],
        path: &ColumnPath,
        timestamp: i64,
        consistency: Consistency,
    ) -> RpcResult<()>;

    /// Removes all data of a column family. Requires every server to be up.
    fn truncate(&mut self, column_family: &str) -> RpcResult<()>;

    /// Describes one keyspace.
    fn describe_keyspace(&mut self, keyspace: &str) -> RpcResult<KsDef>;

    /// Describes every keyspace.
    fn describe_keyspaces(&mut self) -> RpcResult<Vec<KsDef>>;

    /// Version of the remote interface the server speaks.
    fn describe_version(&mut self) -> RpcResult<String>;

    /// Closes the underlying transport. Called once, when the client discards the session.
    fn close(&mut self) {}
}

/// Opens sessions to servers.
pub trait RpcConnector: Send + Sync {
    /// Connects to `server`. No login or keyspace selection is expected here,
    /// the client performs those through the returned [`RpcClient`].
    fn connect(
        &self,
        server: &ServerAddr,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn RpcClient>, ConnectionError>;
}
