//! An in-memory cluster, for testing code built on this crate without a server.
//!
//! [`MockCluster`] implements [`RpcConnector`] over a set of fake servers that share
//! one data store. Servers can be stopped and started, faults can be injected
//! into the next call a server receives, and every connection and call is counted.
//!
//! Compiled only with the `testing` feature.
//!
//! ```
//! use cassa::testing::MockCluster;
//! use cassa::rpc::types::ColumnType;
//! use cassa::SessionBuilder;
//!
//! let cluster = MockCluster::new(["10.0.0.1:9160", "10.0.0.2:9160"]);
//! cluster.create_keyspace("ks", [("users", ColumnType::Standard)]);
//! let session = SessionBuilder::new()
//!     .known_nodes(cluster.addresses())
//!     .keyspace("ks")
//!     .build(cluster.connector())
//!     .unwrap();
//! let users = session.column_family("users");
//! users.insert("alice", [("age", "33")]).unwrap();
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use cassa_rpc::errors::{BrokenConnectionError, ConnectionError, DbError, RequestAttemptError};
use cassa_rpc::types::{
    AuthenticationRequest, CfDef, Column, ColumnOrSuperColumn, ColumnParent, ColumnPath,
    ColumnType, Deletion, IndexClause, IndexOperator, KeyRange, KeySlice, KsDef, Mutation,
    MutationMap, SlicePredicate, SuperColumn,
};
use cassa_rpc::{ConnectionConfig, Consistency, RpcClient, RpcConnector, RpcResult, ServerAddr};

/// Version reported by `describe_version`.
pub const MOCK_VERSION: &str = "19.4.0";

/// A failure injected into the next call a server receives.
#[derive(Debug, Clone)]
pub enum Fault {
    /// The connection is reset by the peer.
    Reset,
    /// The call times out.
    Timeout,
    /// The server answers with an error.
    Db(DbError),
}

#[derive(Debug, Default)]
struct ServerStats {
    down: bool,
    connect_attempts: usize,
    opened: usize,
    closed: usize,
    calls: usize,
    faults: VecDeque<Fault>,
}

#[derive(Debug, Clone)]
struct Cell {
    // `None` is a tombstone.
    value: Option<Bytes>,
    timestamp: i64,
    ttl: Option<i32>,
}

type CellKey = (Option<Bytes>, Bytes);

#[derive(Debug, Default)]
struct StoredRow {
    tombstone: Option<i64>,
    super_tombstones: HashMap<Bytes, i64>,
    cells: BTreeMap<CellKey, Cell>,
}

impl StoredRow {
    /// Last write wins; on a timestamp tie a deletion wins.
    fn write(&mut self, key: CellKey, value: Option<Bytes>, timestamp: i64, ttl: Option<i32>) {
        let newer = match self.cells.get(&key) {
            Some(existing) => {
                timestamp > existing.timestamp
                    || (timestamp == existing.timestamp && value.is_none())
            }
            None => true,
        };
        if newer {
            self.cells.insert(
                key,
                Cell {
                    value,
                    timestamp,
                    ttl,
                },
            );
        }
    }

    fn delete_row(&mut self, timestamp: i64) {
        self.tombstone = Some(self.tombstone.map_or(timestamp, |t| t.max(timestamp)));
    }

    fn delete_super_column(&mut self, super_column: Bytes, timestamp: i64) {
        let entry = self.super_tombstones.entry(super_column).or_insert(timestamp);
        *entry = (*entry).max(timestamp);
    }

    fn is_live(&self, (super_column, _): &CellKey, cell: &Cell) -> bool {
        cell.value.is_some()
            && self.tombstone.is_none_or(|t| cell.timestamp > t)
            && super_column
                .as_ref()
                .and_then(|sc| self.super_tombstones.get(sc))
                .is_none_or(|t| cell.timestamp > *t)
    }

    fn live_cells(&self) -> impl Iterator<Item = (&CellKey, Column)> + '_ {
        self.cells
            .iter()
            .filter(|(key, cell)| self.is_live(key, cell))
            .map(|(key, cell)| {
                let column = Column {
                    name: key.1.clone(),
                    value: cell.value.clone().unwrap_or_default(),
                    timestamp: cell.timestamp,
                    ttl: cell.ttl,
                };
                (key, column)
            })
    }

    fn has_live_cells(&self) -> bool {
        self.live_cells().next().is_some()
    }

    fn columns_of(&self, super_column: Option<&Bytes>) -> Vec<(Bytes, Column)> {
        self.live_cells()
            .filter(|((sc, _), _)| sc.as_ref() == super_column)
            .map(|((_, name), column)| (name.clone(), column))
            .collect()
    }

    fn super_columns(&self) -> Vec<(Bytes, SuperColumn)> {
        let mut grouped: Vec<(Bytes, SuperColumn)> = Vec::new();
        for ((sc, _), column) in self.live_cells() {
            let Some(sc) = sc else { continue };
            match grouped.last_mut() {
                Some((name, group)) if name == sc => group.columns.push(column),
                _ => grouped.push((
                    sc.clone(),
                    SuperColumn {
                        name: sc.clone(),
                        columns: vec![column],
                    },
                )),
            }
        }
        grouped
    }

    fn slice(
        &self,
        column_type: ColumnType,
        parent: &ColumnParent,
        predicate: &SlicePredicate,
    ) -> Vec<ColumnOrSuperColumn> {
        match (column_type, &parent.super_column) {
            (ColumnType::Super, None) => apply_predicate(self.super_columns(), predicate)
                .into_iter()
                .map(ColumnOrSuperColumn::SuperColumn)
                .collect(),
            (_, super_column) => apply_predicate(self.columns_of(super_column.as_ref()), predicate)
                .into_iter()
                .map(ColumnOrSuperColumn::Column)
                .collect(),
        }
    }
}

fn apply_predicate<T>(entries: Vec<(Bytes, T)>, predicate: &SlicePredicate) -> Vec<T> {
    match predicate {
        SlicePredicate::ColumnNames(names) => entries
            .into_iter()
            .filter(|(name, _)| names.contains(name))
            .map(|(_, entry)| entry)
            .collect(),
        SlicePredicate::SliceRange(range) => {
            let count = usize::try_from(range.count).unwrap_or(0);
            let (low, high) = if range.reversed {
                (&range.finish, &range.start)
            } else {
                (&range.start, &range.finish)
            };
            let in_range = |name: &Bytes| {
                (low.is_empty() || name >= low) && (high.is_empty() || name <= high)
            };
            let matching = entries.into_iter().filter(|(name, _)| in_range(name));
            if range.reversed {
                let mut matching: Vec<T> = matching.map(|(_, entry)| entry).collect();
                matching.reverse();
                matching.truncate(count);
                matching
            } else {
                matching.take(count).map(|(_, entry)| entry).collect()
            }
        }
    }
}

type Table = BTreeMap<Bytes, StoredRow>;

#[derive(Debug, Default)]
struct ClusterState {
    servers: Vec<ServerAddr>,
    stats: HashMap<ServerAddr, ServerStats>,
    keyspaces: BTreeMap<String, KsDef>,
    tables: HashMap<(String, String), Table>,
    credentials: Option<(String, String)>,
    batch_sizes: Vec<usize>,
}

impl ClusterState {
    fn stats(&mut self, server: &ServerAddr) -> &mut ServerStats {
        self.stats.entry(server.clone()).or_default()
    }

    fn table(&mut self, keyspace: &str, column_family: &str) -> RpcResult<(ColumnType, &mut Table)> {
        let column_type = self
            .keyspaces
            .get(keyspace)
            .and_then(|ks| ks.column_family(column_family))
            .map(|cf| cf.column_type)
            .ok_or_else(|| {
                DbError::InvalidRequest(format!("unconfigured columnfamily {column_family}"))
            })?;
        let table = self
            .tables
            .entry((keyspace.to_owned(), column_family.to_owned()))
            .or_default();
        Ok((column_type, table))
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<ClusterState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-memory cluster of interchangeable servers sharing one store.
///
/// Cheap to clone; clones share the same cluster.
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    inner: Arc<Inner>,
}

impl MockCluster {
    /// Creates a cluster with the given server addresses, all of them up.
    ///
    /// # Panics
    ///
    /// Panics if an address cannot be parsed.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cluster = MockCluster::default();
        {
            let mut state = cluster.inner.lock();
            for server in servers {
                let addr: ServerAddr = match server.as_ref().parse() {
                    Ok(addr) => addr,
                    Err(err) => panic!("invalid mock server address: {err}"),
                };
                state.stats(&addr);
                state.servers.push(addr);
            }
        }
        cluster
    }

    /// The servers, in the order they were given.
    pub fn servers(&self) -> Vec<ServerAddr> {
        self.inner.lock().servers.clone()
    }

    /// The servers as strings, ready for `SessionBuilder::known_nodes`.
    pub fn addresses(&self) -> Vec<String> {
        self.servers().iter().map(ToString::to_string).collect()
    }

    /// A connector opening sessions to this cluster.
    pub fn connector(&self) -> Arc<dyn RpcConnector> {
        Arc::new(MockConnector {
            inner: self.inner.clone(),
        })
    }

    /// Defines a keyspace with the given column families.
    pub fn create_keyspace<'a, I>(&self, name: &str, column_families: I)
    where
        I: IntoIterator<Item = (&'a str, ColumnType)>,
    {
        let cf_defs = column_families
            .into_iter()
            .map(|(cf, column_type)| CfDef {
                keyspace: name.to_owned(),
                name: cf.to_owned(),
                column_type,
                comparator_type: "BytesType".to_owned(),
                subcomparator_type: (column_type == ColumnType::Super)
                    .then(|| "BytesType".to_owned()),
                default_validation_class: None,
                column_metadata: Vec::new(),
            })
            .collect();
        self.inner.lock().keyspaces.insert(
            name.to_owned(),
            KsDef {
                name: name.to_owned(),
                strategy_class: "org.apache.cassandra.locator.SimpleStrategy".to_owned(),
                replication_factor: 1,
                cf_defs,
            },
        );
    }

    /// Makes `login` mandatory, with these credentials.
    pub fn require_credentials(&self, username: &str, password: &str) {
        self.inner.lock().credentials = Some((username.to_owned(), password.to_owned()));
    }

    /// Takes a server down: it refuses connections, and calls on its open
    /// connections fail with a reset.
    pub fn stop(&self, server: &ServerAddr) {
        self.inner.lock().stats(server).down = true;
    }

    /// Brings a server back up.
    pub fn start(&self, server: &ServerAddr) {
        self.inner.lock().stats(server).down = false;
    }

    /// Makes the next call received by `server` fail with `fault`. Faults queue up.
    pub fn inject_fault(&self, server: &ServerAddr, fault: Fault) {
        self.inner.lock().stats(server).faults.push_back(fault);
    }

    /// Connection attempts received by `server`, refused ones included.
    pub fn connect_attempts(&self, server: &ServerAddr) -> usize {
        self.inner.lock().stats(server).connect_attempts
    }

    /// Connections accepted by `server`.
    pub fn connections_opened(&self, server: &ServerAddr) -> usize {
        self.inner.lock().stats(server).opened
    }

    /// Connections to `server` closed by the client.
    pub fn connections_closed(&self, server: &ServerAddr) -> usize {
        self.inner.lock().stats(server).closed
    }

    /// Connections to `server` opened and not yet closed.
    pub fn open_connections(&self, server: &ServerAddr) -> usize {
        let mut state = self.inner.lock();
        let stats = state.stats(server);
        stats.opened - stats.closed
    }

    /// Calls received by `server`, failed ones included.
    pub fn calls(&self, server: &ServerAddr) -> usize {
        self.inner.lock().stats(server).calls
    }

    /// Connections accepted by any server.
    pub fn total_connections_opened(&self) -> usize {
        self.inner.lock().stats.values().map(|s| s.opened).sum()
    }

    /// Connections open on any server.
    pub fn total_open_connections(&self) -> usize {
        self.inner
            .lock()
            .stats
            .values()
            .map(|s| s.opened - s.closed)
            .sum()
    }

    /// Number of successful `batch_mutate` calls.
    pub fn batch_mutate_calls(&self) -> usize {
        self.inner.lock().batch_sizes.len()
    }

    /// Number of mutations carried by each successful `batch_mutate` call.
    pub fn batch_mutate_sizes(&self) -> Vec<usize> {
        self.inner.lock().batch_sizes.clone()
    }

    /// Version reported by every server.
    pub fn version(&self) -> String {
        MOCK_VERSION.to_owned()
    }
}

#[derive(Debug)]
struct MockConnector {
    inner: Arc<Inner>,
}

impl RpcConnector for MockConnector {
    fn connect(
        &self,
        server: &ServerAddr,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn RpcClient>, ConnectionError> {
        let mut state = self.inner.lock();
        let Some(stats) = state.stats.get_mut(server) else {
            return Err(ConnectionError::AddressResolution(server.clone()));
        };
        stats.connect_attempts += 1;
        if stats.down {
            return Err(ConnectionError::io(
                server,
                io::Error::from(io::ErrorKind::ConnectionRefused),
            ));
        }
        stats.opened += 1;
        Ok(Box::new(MockClient {
            inner: self.inner.clone(),
            server: server.clone(),
            keyspace: None,
            logged_in: false,
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct MockClient {
    inner: Arc<Inner>,
    server: ServerAddr,
    keyspace: Option<String>,
    logged_in: bool,
    closed: bool,
}

impl MockClient {
    /// Accounts for a call and applies server state and injected faults.
    fn begin(&self) -> RpcResult<MutexGuard<'_, ClusterState>> {
        let mut state = self.inner.lock();
        let stats = state.stats(&self.server);
        stats.calls += 1;
        if self.closed {
            return Err(BrokenConnectionError::Closed.into());
        }
        if stats.down {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset).into());
        }
        match stats.faults.pop_front() {
            None => Ok(state),
            Some(Fault::Reset) => Err(io::Error::from(io::ErrorKind::ConnectionReset).into()),
            Some(Fault::Timeout) => Err(BrokenConnectionError::Timeout.into()),
            Some(Fault::Db(err)) => Err(err.into()),
        }
    }

    /// Like `begin`, for calls needing a logged in session bound to a keyspace.
    fn begin_data(&self) -> RpcResult<(MutexGuard<'_, ClusterState>, &str)> {
        let state = self.begin()?;
        if state.credentials.is_some() && !self.logged_in {
            return Err(DbError::Unauthorized("you have not logged in".to_owned()).into());
        }
        let keyspace = self
            .keyspace
            .as_deref()
            .ok_or_else(|| DbError::InvalidRequest("you have not set a keyspace".to_owned()))?;
        Ok((state, keyspace))
    }
}

fn check_parent(column_type: ColumnType, super_column: Option<&Bytes>) -> RpcResult<()> {
    match (column_type, super_column) {
        (ColumnType::Standard, Some(_)) => Err(DbError::InvalidRequest(
            "super column given for a standard column family".to_owned(),
        )
        .into()),
        _ => Ok(()),
    }
}

fn index_matches(row: &StoredRow, clause: &IndexClause) -> bool {
    let columns = row.columns_of(None);
    clause.expressions.iter().all(|expr| {
        columns
            .iter()
            .find(|(name, _)| *name == expr.column_name)
            .is_some_and(|(_, column)| match expr.op {
                IndexOperator::Eq => column.value == expr.value,
                IndexOperator::Gte => column.value >= expr.value,
                IndexOperator::Gt => column.value > expr.value,
                IndexOperator::Lte => column.value <= expr.value,
                IndexOperator::Lt => column.value < expr.value,
            })
    })
}

impl RpcClient for MockClient {
    fn login(&mut self, request: &AuthenticationRequest) -> RpcResult<()> {
        let state = self.begin()?;
        let accepted = match &state.credentials {
            None => true,
            Some((username, password)) => {
                request.credentials.get("username") == Some(username)
                    && request.credentials.get("password") == Some(password)
            }
        };
        drop(state);
        if !accepted {
            return Err(
                DbError::AuthenticationFailed("invalid username or password".to_owned()).into(),
            );
        }
        self.logged_in = true;
        Ok(())
    }

    fn set_keyspace(&mut self, keyspace: &str) -> RpcResult<()> {
        let state = self.begin()?;
        if state.credentials.is_some() && !self.logged_in {
            return Err(DbError::Unauthorized("you have not logged in".to_owned()).into());
        }
        let exists = state.keyspaces.contains_key(keyspace);
        drop(state);
        if !exists {
            return Err(DbError::InvalidRequest(format!("keyspace {keyspace} does not exist")).into());
        }
        self.keyspace = Some(keyspace.to_owned());
        Ok(())
    }

    fn get(
        &mut self,
        key: &[u8],
        path: &ColumnPath,
        _consistency: Consistency,
    ) -> RpcResult<ColumnOrSuperColumn> {
        let (mut state, keyspace) = self.begin_data()?;
        let (column_type, table) = state.table(keyspace, &path.column_family)?;
        check_parent(column_type, path.super_column.as_ref())?;
        let row = table.get(key).ok_or(DbError::NotFound)?;
        match (&path.super_column, &path.column) {
            (super_column, Some(column)) => row
                .columns_of(super_column.as_ref())
                .into_iter()
                .find(|(name, _)| name == column)
                .map(|(_, column)| ColumnOrSuperColumn::Column(column))
                .ok_or_else(|| DbError::NotFound.into()),
            (Some(super_column), None) => row
                .super_columns()
                .into_iter()
                .find(|(name, _)| name == super_column)
                .map(|(_, sc)| ColumnOrSuperColumn::SuperColumn(sc))
                .ok_or_else(|| DbError::NotFound.into()),
            (None, None) => Err(DbError::InvalidRequest(
                "column path must name a column or a super column".to_owned(),
            )
            .into()),
        }
    }

    fn get_slice(
        &mut self,
        key: &[u8],
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        _consistency: Consistency,
    ) -> RpcResult<Vec<ColumnOrSuperColumn>> {
        let (mut state, keyspace) = self.begin_data()?;
        let (column_type, table) = state.table(keyspace, &parent.column_family)?;
        check_parent(column_type, parent.super_column.as_ref())?;
        Ok(table
            .get(key)
            .map(|row| row.slice(column_type, parent, predicate))
            .unwrap_or_default())
    }

    fn multiget_slice(
        &mut self,
        keys: &[Bytes],
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        _consistency: Consistency,
    ) -> RpcResult<HashMap<Bytes, Vec<ColumnOrSuperColumn>>> {
        let (mut state, keyspace) = self.begin_data()?;
        let (column_type, table) = state.table(keyspace, &parent.column_family)?;
        check_parent(column_type, parent.super_column.as_ref())?;
        Ok(keys
            .iter()
            .map(|key| {
                let columns = table
                    .get(key)
                    .map(|row| row.slice(column_type, parent, predicate))
                    .unwrap_or_default();
                (key.clone(), columns)
            })
            .collect())
    }

    fn get_count(
        &mut self,
        key: &[u8],
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        consistency: Consistency,
    ) -> RpcResult<i32> {
        let columns = self.get_slice(key, parent, predicate, consistency)?;
        Ok(columns.len() as i32)
    }

    fn multiget_count(
        &mut self,
        keys: &[Bytes],
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        consistency: Consistency,
    ) -> RpcResult<HashMap<Bytes, i32>> {
        let rows = self.multiget_slice(keys, parent, predicate, consistency)?;
        Ok(rows
            .into_iter()
            .map(|(key, columns)| (key, columns.len() as i32))
            .collect())
    }

    fn get_range_slices(
        &mut self,
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        range: &KeyRange,
        _consistency: Consistency,
    ) -> RpcResult<Vec<KeySlice>> {
        let (mut state, keyspace) = self.begin_data()?;
        let (column_type, table) = state.table(keyspace, &parent.column_family)?;
        check_parent(column_type, parent.super_column.as_ref())?;
        let count = usize::try_from(range.count).unwrap_or(0);
        Ok(table
            .iter()
            .filter(|(key, _)| range.start_key.is_empty() || **key >= range.start_key)
            .take_while(|(key, _)| range.end_key.is_empty() || **key <= range.end_key)
            .filter(|(_, row)| row.has_live_cells())
            .take(count)
            .map(|(key, row)| KeySlice {
                key: key.clone(),
                columns: row.slice(column_type, parent, predicate),
            })
            .collect())
    }

    fn get_indexed_slices(
        &mut self,
        parent: &ColumnParent,
        clause: &IndexClause,
        predicate: &SlicePredicate,
        _consistency: Consistency,
    ) -> RpcResult<Vec<KeySlice>> {
        let (mut state, keyspace) = self.begin_data()?;
        let (column_type, table) = state.table(keyspace, &parent.column_family)?;
        if column_type == ColumnType::Super {
            return Err(DbError::InvalidRequest(
                "secondary indexes are not supported on super column families".to_owned(),
            )
            .into());
        }
        let count = usize::try_from(clause.count).unwrap_or(0);
        Ok(table
            .iter()
            .filter(|(key, _)| clause.start_key.is_empty() || **key >= clause.start_key)
            .filter(|(_, row)| row.has_live_cells() && index_matches(row, clause))
            .take(count)
            .map(|(key, row)| KeySlice {
                key: key.clone(),
                columns: row.slice(column_type, parent, predicate),
            })
            .collect())
    }

    fn insert(
        &mut self,
        key: &[u8],
        parent: &ColumnParent,
        column: &Column,
        _consistency: Consistency,
    ) -> RpcResult<()> {
        let (mut state, keyspace) = self.begin_data()?;
        let (column_type, table) = state.table(keyspace, &parent.column_family)?;
        check_parent(column_type, parent.super_column.as_ref())?;
        if column_type == ColumnType::Super && parent.super_column.is_none() {
            return Err(DbError::InvalidRequest(
                "insert into a super column family needs a super column".to_owned(),
            )
            .into());
        }
        table.entry(Bytes::copy_from_slice(key)).or_default().write(
            (parent.super_column.clone(), column.name.clone()),
            Some(column.value.clone()),
            column.timestamp,
            column.ttl,
        );
        Ok(())
    }

    fn batch_mutate(&mut self, mutations: &MutationMap, _consistency: Consistency) -> RpcResult<()> {
        let (mut state, keyspace) = self.begin_data()?;
        let keyspace = keyspace.to_owned();

        // Validate everything before applying anything.
        for by_cf in mutations.values() {
            for (cf, list) in by_cf {
                let (column_type, _) = state.table(&keyspace, cf)?;
                for mutation in list {
                    match mutation {
                        Mutation::Insert(ColumnOrSuperColumn::SuperColumn(_))
                            if column_type == ColumnType::Standard =>
                        {
                            return Err(DbError::InvalidRequest(
                                "super column mutation on a standard column family".to_owned(),
                            )
                            .into())
                        }
                        Mutation::Delete(Deletion {
                            predicate: Some(SlicePredicate::SliceRange(_)),
                            ..
                        }) => {
                            return Err(DbError::InvalidRequest(
                                "range deletions are not supported".to_owned(),
                            )
                            .into())
                        }
                        _ => {}
                    }
                }
            }
        }

        let mut size = 0;
        for (key, by_cf) in mutations {
            for (cf, list) in by_cf {
                let (_, table) = state.table(&keyspace, cf)?;
                let row = table.entry(key.clone()).or_default();
                for mutation in list {
                    size += 1;
                    match mutation {
                        Mutation::Insert(ColumnOrSuperColumn::Column(c)) => {
                            row.write((None, c.name.clone()), Some(c.value.clone()), c.timestamp, c.ttl)
                        }
                        Mutation::Insert(ColumnOrSuperColumn::SuperColumn(sc)) => {
                            for c in &sc.columns {
                                row.write(
                                    (Some(sc.name.clone()), c.name.clone()),
                                    Some(c.value.clone()),
                                    c.timestamp,
                                    c.ttl,
                                );
                            }
                        }
                        Mutation::Delete(deletion) => match (&deletion.predicate, &deletion.super_column) {
                            (Some(SlicePredicate::ColumnNames(names)), super_column) => {
                                for name in names {
                                    row.write(
                                        (super_column.clone(), name.clone()),
                                        None,
                                        deletion.timestamp,
                                        None,
                                    );
                                }
                            }
                            (Some(SlicePredicate::SliceRange(_)), _) => {}
                            (None, Some(super_column)) => {
                                row.delete_super_column(super_column.clone(), deletion.timestamp)
                            }
                            (None, None) => row.delete_row(deletion.timestamp),
                        },
                    }
                }
            }
        }
        state.batch_sizes.push(size);
        Ok(())
    }

    fn remove(
        &mut self,
        key: &[u8],
        path: &ColumnPath,
        timestamp: i64,
        _consistency: Consistency,
    ) -> RpcResult<()> {
        let (mut state, keyspace) = self.begin_data()?;
        let (column_type, table) = state.table(keyspace, &path.column_family)?;
        check_parent(column_type, path.super_column.as_ref())?;
        let row = table.entry(Bytes::copy_from_slice(key)).or_default();
        match (&path.super_column, &path.column) {
            (super_column, Some(column)) => {
                row.write((super_column.clone(), column.clone()), None, timestamp, None)
            }
            (Some(super_column), None) => row.delete_super_column(super_column.clone(), timestamp),
            (None, None) => row.delete_row(timestamp),
        }
        Ok(())
    }

    fn truncate(&mut self, column_family: &str) -> RpcResult<()> {
        let (mut state, keyspace) = self.begin_data()?;
        let keyspace = keyspace.to_owned();
        if state.stats.values().any(|s| s.down) {
            return Err(DbError::Unavailable.into());
        }
        let (_, table) = state.table(&keyspace, column_family)?;
        table.clear();
        Ok(())
    }

    fn describe_keyspace(&mut self, keyspace: &str) -> RpcResult<KsDef> {
        let state = self.begin()?;
        state
            .keyspaces
            .get(keyspace)
            .cloned()
            .ok_or_else(|| DbError::NotFound.into())
    }

    fn describe_keyspaces(&mut self) -> RpcResult<Vec<KsDef>> {
        let state = self.begin()?;
        Ok(state.keyspaces.values().cloned().collect())
    }

    fn describe_version(&mut self) -> RpcResult<String> {
        let _state = self.begin()?;
        Ok(MOCK_VERSION.to_owned())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inner.lock().stats(&self.server).closed += 1;
    }
}
