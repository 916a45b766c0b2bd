//! Reads and writes on one column family, routed through a [`Session`].

use std::collections::VecDeque;

use bytes::Bytes;
use cassa_rpc::errors::DbError;
use cassa_rpc::types::{
    Column, ColumnOrSuperColumn, ColumnParent, ColumnPath, IndexClause, KeyRange, KeySlice,
    SlicePredicate, SliceRange,
};
use cassa_rpc::Consistency;
use tracing::trace;

use super::session::Session;
use crate::batch::{into_mutation_map, CfMutator, InsertOptions, Mutator, PendingMutation, RemoveOptions};
use crate::errors::ExecutionError;

/// Rows fetched per call by [`ColumnFamily::multiget`] and [`ColumnFamily::get_range`].
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Which columns of a row a read returns.
///
/// The default selects the first 100 columns (or super columns) in comparator order.
#[derive(Debug, Clone, Default)]
pub struct ColumnSelection {
    /// Exactly these columns. Takes precedence over `range`.
    pub columns: Option<Vec<Bytes>>,
    /// A range of columns, used when `columns` is `None`.
    pub range: SliceRange,
    /// Read the subcolumns of this super column.
    pub super_column: Option<Bytes>,
}

impl ColumnSelection {
    /// Exactly the named columns.
    pub fn columns(names: impl IntoIterator<Item = impl Into<Bytes>>) -> Self {
        ColumnSelection {
            columns: Some(names.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Up to `count` columns between `start` and `finish`, both inclusive; empty means unbounded.
    pub fn range(start: impl Into<Bytes>, finish: impl Into<Bytes>, count: i32) -> Self {
        ColumnSelection {
            range: SliceRange {
                start: start.into(),
                finish: finish.into(),
                reversed: false,
                count,
            },
            ..Default::default()
        }
    }

    /// Returns columns in reverse comparator order. `range.start` is then the upper bound.
    pub fn reversed(mut self) -> Self {
        self.range.reversed = true;
        self
    }

    /// Reads within the given super column.
    pub fn in_super_column(mut self, super_column: impl Into<Bytes>) -> Self {
        self.super_column = Some(super_column.into());
        self
    }

    fn predicate(&self) -> SlicePredicate {
        match &self.columns {
            Some(names) => SlicePredicate::ColumnNames(names.clone()),
            None => SlicePredicate::SliceRange(self.range.clone()),
        }
    }

    fn parent(&self, column_family: &str) -> ColumnParent {
        ColumnParent {
            column_family: column_family.to_owned(),
            super_column: self.super_column.clone(),
        }
    }
}

/// Row keys scanned by [`ColumnFamily::get_range`].
#[derive(Debug, Clone, Default)]
pub struct RangeOptions {
    /// First key, inclusive. Empty starts at the beginning of the ring.
    pub start: Bytes,
    /// Last key, inclusive. Empty scans to the end.
    pub finish: Bytes,
    /// Stop after this many rows.
    pub row_count: Option<usize>,
}

/// A handle on one column family, created by [`Session::column_family`].
///
/// Reads use the session's read consistency and writes its write consistency,
/// unless overridden on the handle.
#[derive(Debug, Clone)]
pub struct ColumnFamily<'s> {
    session: &'s Session,
    name: String,
    read_consistency: Consistency,
    write_consistency: Consistency,
    buffer_size: usize,
}

impl<'s> ColumnFamily<'s> {
    pub(crate) fn new(session: &'s Session, name: String) -> Self {
        ColumnFamily {
            session,
            name,
            read_consistency: session.read_consistency(),
            write_consistency: session.write_consistency(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Name of the column family.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consistency level of reads made through this handle.
    pub fn with_read_consistency(mut self, consistency: Consistency) -> Self {
        self.read_consistency = consistency;
        self
    }

    /// Consistency level of writes made through this handle and its mutators.
    pub fn with_write_consistency(mut self, consistency: Consistency) -> Self {
        self.write_consistency = consistency;
        self
    }

    /// Rows fetched per call by `multiget` and `get_range`. Values below 2 are raised to 2.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(2);
        self
    }

    /// Reads the selected columns of one row.
    ///
    /// Fails with [`DbError::NotFound`] if the row has none of them.
    pub fn get(
        &self,
        key: impl Into<Bytes>,
        selection: &ColumnSelection,
    ) -> Result<Vec<ColumnOrSuperColumn>, ExecutionError> {
        let key = key.into();
        let parent = selection.parent(&self.name);
        let predicate = selection.predicate();
        let consistency = self.read_consistency;
        let columns = self
            .session
            .execute(|rpc| rpc.get_slice(&key, &parent, &predicate, consistency))?;
        if columns.is_empty() {
            return Err(DbError::NotFound.into());
        }
        Ok(columns)
    }

    /// Reads the selected columns of several rows.
    ///
    /// Rows come back in the order of `keys`; rows without any selected column are
    /// left out. Keys are requested `buffer_size` at a time.
    pub fn multiget(
        &self,
        keys: impl IntoIterator<Item = impl Into<Bytes>>,
        selection: &ColumnSelection,
    ) -> Result<Vec<KeySlice>, ExecutionError> {
        let keys: Vec<Bytes> = keys.into_iter().map(Into::into).collect();
        let parent = selection.parent(&self.name);
        let predicate = selection.predicate();
        let consistency = self.read_consistency;

        let mut rows = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(self.buffer_size) {
            let mut fetched = self
                .session
                .execute(|rpc| rpc.multiget_slice(chunk, &parent, &predicate, consistency))?;
            for key in chunk {
                match fetched.remove(key) {
                    Some(columns) if !columns.is_empty() => rows.push(KeySlice {
                        key: key.clone(),
                        columns,
                    }),
                    _ => {}
                }
            }
        }
        Ok(rows)
    }

    /// Number of selected columns in a row.
    pub fn get_count(
        &self,
        key: impl Into<Bytes>,
        selection: &ColumnSelection,
    ) -> Result<i32, ExecutionError> {
        let key = key.into();
        let parent = selection.parent(&self.name);
        let predicate = selection.predicate();
        let consistency = self.read_consistency;
        self.session
            .execute(|rpc| rpc.get_count(&key, &parent, &predicate, consistency))
    }

    /// Number of selected columns in each row, in the order of `keys`.
    pub fn multiget_count(
        &self,
        keys: impl IntoIterator<Item = impl Into<Bytes>>,
        selection: &ColumnSelection,
    ) -> Result<Vec<(Bytes, i32)>, ExecutionError> {
        let keys: Vec<Bytes> = keys.into_iter().map(Into::into).collect();
        let parent = selection.parent(&self.name);
        let predicate = selection.predicate();
        let consistency = self.read_consistency;
        let mut counts = self
            .session
            .execute(|rpc| rpc.multiget_count(&keys, &parent, &predicate, consistency))?;
        Ok(keys
            .into_iter()
            .map(|key| {
                let count = counts.remove(&key).unwrap_or(0);
                (key, count)
            })
            .collect())
    }

    /// Iterates over a range of rows, fetching `buffer_size` rows per call.
    ///
    /// Every call after the first restarts from the last key received, so the
    /// iterator drops the repeated key at the head of each later page.
    pub fn get_range(&self, range: RangeOptions, selection: &ColumnSelection) -> RangeScan<'s> {
        RangeScan {
            session: self.session,
            parent: selection.parent(&self.name),
            predicate: selection.predicate(),
            consistency: self.read_consistency,
            buffer_size: self.buffer_size,
            next_start: range.start,
            finish: range.finish,
            remaining: range.row_count,
            last_key: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Rows matching a secondary index clause.
    pub fn get_indexed_slices(
        &self,
        clause: &IndexClause,
        selection: &ColumnSelection,
    ) -> Result<Vec<KeySlice>, ExecutionError> {
        let parent = selection.parent(&self.name);
        let predicate = selection.predicate();
        let consistency = self.read_consistency;
        self.session
            .execute(|rpc| rpc.get_indexed_slices(&parent, clause, &predicate, consistency))
    }

    /// Writes `columns` to row `key` and returns the timestamp used.
    pub fn insert<I, N, V>(&self, key: impl Into<Bytes>, columns: I) -> Result<i64, ExecutionError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        self.insert_with(key, columns, &InsertOptions::default())
    }

    /// Like [`insert`](ColumnFamily::insert), with a TTL, super column or explicit timestamp.
    ///
    /// A single column is written with `insert`, several with one `batch_mutate`.
    pub fn insert_with<I, N, V>(
        &self,
        key: impl Into<Bytes>,
        columns: I,
        options: &InsertOptions,
    ) -> Result<i64, ExecutionError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        let key = key.into();
        let columns: Vec<(Bytes, Bytes)> = columns
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        let timestamp = options
            .timestamp
            .unwrap_or_else(|| self.session.timestamp());
        let consistency = self.write_consistency;

        if let [(name, value)] = columns.as_slice() {
            let parent = ColumnParent {
                column_family: self.name.clone(),
                super_column: options.super_column.clone(),
            };
            let column = Column {
                name: name.clone(),
                value: value.clone(),
                timestamp,
                ttl: options.ttl,
            };
            self.session
                .execute(|rpc| rpc.insert(&key, &parent, &column, consistency))?;
        } else {
            let pending = PendingMutation::insert(key, self.name.as_str(), columns, options, timestamp)?;
            let map = into_mutation_map(std::slice::from_ref(&pending));
            self.session
                .execute(|rpc| rpc.batch_mutate(&map, consistency))?;
        }
        Ok(timestamp)
    }

    /// Writes several rows in one `batch_mutate`, all with the same timestamp, which is returned.
    pub fn batch_insert<R, K, I, N, V>(&self, rows: R) -> Result<i64, ExecutionError>
    where
        R: IntoIterator<Item = (K, I)>,
        K: Into<Bytes>,
        I: IntoIterator<Item = (N, V)>,
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        let timestamp = self.session.timestamp();
        let options = InsertOptions {
            timestamp: Some(timestamp),
            ..Default::default()
        };
        let pending = rows
            .into_iter()
            .map(|(key, columns)| {
                PendingMutation::insert(key, self.name.as_str(), columns, &options, timestamp)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if pending.is_empty() {
            return Ok(timestamp);
        }
        let map = into_mutation_map(&pending);
        let consistency = self.write_consistency;
        self.session
            .execute(|rpc| rpc.batch_mutate(&map, consistency))?;
        trace!(rows = pending.len(), column_family = %self.name, "Batch insert sent");
        Ok(timestamp)
    }

    /// Removes `columns` from row `key`, or the whole row if `None` or empty, and
    /// returns the deletion timestamp.
    pub fn remove(
        &self,
        key: impl Into<Bytes>,
        columns: Option<Vec<Bytes>>,
    ) -> Result<i64, ExecutionError> {
        self.remove_with(key, columns, &RemoveOptions::default())
    }

    /// Like [`remove`](ColumnFamily::remove), within a super column or with an explicit timestamp.
    pub fn remove_with(
        &self,
        key: impl Into<Bytes>,
        columns: Option<Vec<Bytes>>,
        options: &RemoveOptions,
    ) -> Result<i64, ExecutionError> {
        let key = key.into();
        let timestamp = options
            .timestamp
            .unwrap_or_else(|| self.session.timestamp());
        let consistency = self.write_consistency;

        let single = match columns.as_deref() {
            None | Some([]) => Some(None),
            Some([column]) => Some(Some(column.clone())),
            Some(_) => None,
        };
        match single {
            Some(column) => {
                let path = ColumnPath {
                    column_family: self.name.clone(),
                    super_column: options.super_column.clone(),
                    column,
                };
                self.session
                    .execute(|rpc| rpc.remove(&key, &path, timestamp, consistency))?;
            }
            None => {
                let pending = PendingMutation::remove(key, self.name.as_str(), columns, options, timestamp);
                let map = into_mutation_map(std::slice::from_ref(&pending));
                self.session
                    .execute(|rpc| rpc.batch_mutate(&map, consistency))?;
            }
        }
        Ok(timestamp)
    }

    /// A mutation queue for this column family, flushing as configured on the session.
    pub fn batch(&self) -> CfMutator<'s> {
        self.batch_with_queue_size(self.session.batch_queue_size())
    }

    /// A mutation queue for this column family with its own flush threshold;
    /// `None` never flushes on its own.
    pub fn batch_with_queue_size(&self, queue_size: Option<usize>) -> CfMutator<'s> {
        let mutator = Mutator::new(self.session, queue_size)
            .with_write_consistency(self.write_consistency);
        CfMutator::new(mutator, self.name.clone())
    }

    /// Removes every row. Needs every server of the cluster to be up.
    pub fn truncate(&self) -> Result<(), ExecutionError> {
        self.session.execute(|rpc| rpc.truncate(&self.name))
    }
}

/// Iterator returned by [`ColumnFamily::get_range`].
///
/// Yields rows in the cluster's key order. A failed call is yielded as an error
/// and ends the iteration.
#[derive(Debug)]
pub struct RangeScan<'s> {
    session: &'s Session,
    parent: ColumnParent,
    predicate: SlicePredicate,
    consistency: Consistency,
    buffer_size: usize,
    next_start: Bytes,
    finish: Bytes,
    remaining: Option<usize>,
    last_key: Option<Bytes>,
    buffer: VecDeque<KeySlice>,
    exhausted: bool,
}

impl RangeScan<'_> {
    fn fetch_page(&mut self) -> Result<(), ExecutionError> {
        let range = KeyRange {
            start_key: self.next_start.clone(),
            end_key: self.finish.clone(),
            count: i32::try_from(self.buffer_size).unwrap_or(i32::MAX),
        };
        let (parent, predicate, consistency) = (&self.parent, &self.predicate, self.consistency);
        let page = self
            .session
            .execute(|rpc| rpc.get_range_slices(parent, predicate, &range, consistency))?;
        trace!(rows = page.len(), start = ?range.start_key, "Range page fetched");

        if page.len() < self.buffer_size {
            self.exhausted = true;
        }
        let mut page = VecDeque::from(page);
        if let (Some(last), Some(first)) = (&self.last_key, page.front()) {
            if first.key == *last {
                page.pop_front();
            }
        }
        if let Some(last) = page.back() {
            self.last_key = Some(last.key.clone());
            self.next_start = last.key.clone();
        } else {
            self.exhausted = true;
        }
        self.buffer = page;
        Ok(())
    }
}

impl Iterator for RangeScan<'_> {
    type Item = Result<KeySlice, ExecutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }
            if let Some(row) = self.buffer.pop_front() {
                if let Some(remaining) = &mut self.remaining {
                    *remaining -= 1;
                }
                return Some(Ok(row));
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
    }
}
