//! Queues of mutations sent together in one `batch_mutate` call.
//!
//! A [`Mutator`] collects inserts and removals across column families. Each
//! enqueue flushes the queue first if it already holds `queue_size` entries, so a
//! long stream of writes goes out in batches of at most `queue_size`. Whatever is
//! left is sent by [`Mutator::send`].
//!
//! [`Mutator::scope`] returns a guard that sends the queue when the scope ends,
//! whether by [`BatchScope::finish`], early return or unwinding.
//!
//! ```rust,no_run
//! # use cassa::Session;
//! # fn example(session: &Session) -> Result<(), cassa::ExecutionError> {
//! let batch = session.batch();
//! batch
//!     .insert("jsmith", "Users", [("first", "John")])?
//!     .insert("jsmith", "Stats", [("logins", "1")])?
//!     .remove("rjones", "Users", None)?;
//! batch.send()?;
//! # Ok(())
//! # }
//! ```

use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use cassa_rpc::types::{Column, ColumnOrSuperColumn, Deletion, Mutation, MutationMap, SlicePredicate, SuperColumn};
use cassa_rpc::Consistency;
use tracing::{debug, trace, warn};

use crate::errors::ExecutionError;
use crate::Session;

/// Queue size used by [`Session::batch`] unless configured otherwise.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Optional parameters of an insert.
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// Expire the columns after this many seconds.
    pub ttl: Option<i32>,
    /// Insert into this super column. Required for super column families.
    pub super_column: Option<Bytes>,
    /// Write timestamp in microseconds. Taken from the session's generator if unset.
    pub timestamp: Option<i64>,
}

/// Optional parameters of a removal.
#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Remove from this super column only.
    pub super_column: Option<Bytes>,
    /// Deletion timestamp in microseconds. Taken from the session's generator if unset.
    pub timestamp: Option<i64>,
}

/// One queued insert or removal: the mutations it makes to one row of one column family.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    #[allow(missing_docs)]
    pub key: Bytes,
    #[allow(missing_docs)]
    pub column_family: String,
    #[allow(missing_docs)]
    pub mutations: Vec<Mutation>,
}

impl PendingMutation {
    /// Inserts of `columns`, grouped into one super column if `options` names one.
    pub fn insert<I, N, V>(
        key: impl Into<Bytes>,
        column_family: impl Into<String>,
        columns: I,
        options: &InsertOptions,
        timestamp: i64,
    ) -> Result<Self, ExecutionError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        let columns: Vec<Column> = columns
            .into_iter()
            .map(|(name, value)| Column {
                name: name.into(),
                value: value.into(),
                timestamp,
                ttl: options.ttl,
            })
            .collect();
        if columns.is_empty() {
            return Err(ExecutionError::InvalidArgument(
                "an insert needs at least one column".to_owned(),
            ));
        }
        let mutations = match &options.super_column {
            Some(name) => vec![Mutation::Insert(ColumnOrSuperColumn::SuperColumn(SuperColumn {
                name: name.clone(),
                columns,
            }))],
            None => columns
                .into_iter()
                .map(|c| Mutation::Insert(ColumnOrSuperColumn::Column(c)))
                .collect(),
        };
        Ok(PendingMutation {
            key: key.into(),
            column_family: column_family.into(),
            mutations,
        })
    }

    /// Removal of `columns`, or of the whole row (or super column) if `None` or empty.
    pub fn remove(
        key: impl Into<Bytes>,
        column_family: impl Into<String>,
        columns: Option<Vec<Bytes>>,
        options: &RemoveOptions,
        timestamp: i64,
    ) -> Self {
        PendingMutation {
            key: key.into(),
            column_family: column_family.into(),
            mutations: vec![Mutation::Delete(Deletion {
                timestamp,
                super_column: options.super_column.clone(),
                predicate: columns
                    .filter(|columns| !columns.is_empty())
                    .map(SlicePredicate::ColumnNames),
            })],
        }
    }
}

/// Groups queued mutations by row key, then column family, keeping enqueue order
/// within each group.
pub fn into_mutation_map(pending: &[PendingMutation]) -> MutationMap {
    let mut map = MutationMap::new();
    for entry in pending {
        map.entry(entry.key.clone())
            .or_default()
            .entry(entry.column_family.clone())
            .or_default()
            .extend(entry.mutations.iter().cloned());
    }
    map
}

/// Something that can send what it has queued.
pub trait Batch {
    /// Sends every queued mutation. Sending an empty queue does nothing.
    fn send(&self) -> Result<(), ExecutionError>;
}

/// A queue of mutations across column families of the session's keyspace.
///
/// Enqueue methods take `&self` and return `&Self` for chaining; the queue is
/// guarded by a mutex, so a mutator can be shared between threads.
pub struct Mutator<'s> {
    session: &'s Session,
    queue_size: Option<usize>,
    write_consistency: Consistency,
    pending: Mutex<Vec<PendingMutation>>,
}

impl<'s> Mutator<'s> {
    /// Creates an empty queue. `queue_size` of `None` disables automatic flushing.
    pub fn new(session: &'s Session, queue_size: Option<usize>) -> Self {
        Mutator {
            session,
            queue_size,
            write_consistency: session.write_consistency(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Sets the consistency level of the `batch_mutate` calls.
    pub fn with_write_consistency(mut self, consistency: Consistency) -> Self {
        self.write_consistency = consistency;
        self
    }

    /// The flush threshold.
    pub fn queue_size(&self) -> Option<usize> {
        self.queue_size
    }

    /// Number of queued inserts and removals.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Queues an insert of `columns` into row `key` of `column_family`.
    pub fn insert<I, N, V>(
        &self,
        key: impl Into<Bytes>,
        column_family: impl Into<String>,
        columns: I,
    ) -> Result<&Self, ExecutionError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        self.insert_with(key, column_family, columns, &InsertOptions::default())
    }

    /// Like [`insert`](Mutator::insert), with a TTL, super column or explicit timestamp.
    pub fn insert_with<I, N, V>(
        &self,
        key: impl Into<Bytes>,
        column_family: impl Into<String>,
        columns: I,
        options: &InsertOptions,
    ) -> Result<&Self, ExecutionError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        let timestamp = options
            .timestamp
            .unwrap_or_else(|| self.session.timestamp());
        let mutation = PendingMutation::insert(key, column_family, columns, options, timestamp)?;
        self.enqueue(mutation)
    }

    /// Queues the removal of `columns` from row `key`, or of the whole row if `None` or empty.
    pub fn remove(
        &self,
        key: impl Into<Bytes>,
        column_family: impl Into<String>,
        columns: Option<Vec<Bytes>>,
    ) -> Result<&Self, ExecutionError> {
        self.remove_with(key, column_family, columns, &RemoveOptions::default())
    }

    /// Like [`remove`](Mutator::remove), within a super column or with an explicit timestamp.
    pub fn remove_with(
        &self,
        key: impl Into<Bytes>,
        column_family: impl Into<String>,
        columns: Option<Vec<Bytes>>,
        options: &RemoveOptions,
    ) -> Result<&Self, ExecutionError> {
        let timestamp = options
            .timestamp
            .unwrap_or_else(|| self.session.timestamp());
        self.enqueue(PendingMutation::remove(
            key,
            column_family,
            columns,
            options,
            timestamp,
        ))
    }

    /// Sends every queued mutation in one `batch_mutate` call.
    ///
    /// The queue is cleared on success and left untouched on failure.
    pub fn send(&self) -> Result<(), ExecutionError> {
        let mut pending = self.lock();
        self.flush(&mut pending)
    }

    /// A guard sending the queue when it goes out of scope.
    pub fn scope(&self) -> BatchScope<'_, Self> {
        BatchScope::new(self)
    }

    fn enqueue(&self, mutation: PendingMutation) -> Result<&Self, ExecutionError> {
        let mut pending = self.lock();
        if self.queue_size.is_some_and(|size| pending.len() >= size) {
            self.flush(&mut pending)?;
        }
        trace!(
            key = ?mutation.key,
            column_family = %mutation.column_family,
            "Mutation queued"
        );
        pending.push(mutation);
        Ok(self)
    }

    fn flush(&self, pending: &mut Vec<PendingMutation>) -> Result<(), ExecutionError> {
        if pending.is_empty() {
            return Ok(());
        }
        let map = into_mutation_map(pending);
        let consistency = self.write_consistency;
        self.session
            .execute(|rpc| rpc.batch_mutate(&map, consistency))?;
        debug!(mutations = pending.len(), rows = map.len(), "Batch sent");
        pending.clear();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PendingMutation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Batch for Mutator<'_> {
    fn send(&self) -> Result<(), ExecutionError> {
        Mutator::send(self)
    }
}

impl Drop for Mutator<'_> {
    fn drop(&mut self) {
        let pending = self.lock().len();
        if pending > 0 {
            warn!(pending, "Mutator dropped with unsent mutations");
        }
    }
}

impl std::fmt::Debug for Mutator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutator")
            .field("queue_size", &self.queue_size)
            .field("write_consistency", &self.write_consistency)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// A [`Mutator`] bound to one column family.
#[derive(Debug)]
pub struct CfMutator<'s> {
    mutator: Mutator<'s>,
    column_family: String,
}

impl<'s> CfMutator<'s> {
    pub(crate) fn new(mutator: Mutator<'s>, column_family: String) -> Self {
        CfMutator {
            mutator,
            column_family,
        }
    }

    /// The column family mutations go to.
    pub fn column_family(&self) -> &str {
        &self.column_family
    }

    /// Number of queued inserts and removals.
    pub fn pending_count(&self) -> usize {
        self.mutator.pending_count()
    }

    /// Queues an insert of `columns` into row `key`.
    pub fn insert<I, N, V>(&self, key: impl Into<Bytes>, columns: I) -> Result<&Self, ExecutionError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        self.insert_with(key, columns, &InsertOptions::default())
    }

    /// Like [`insert`](CfMutator::insert), with a TTL, super column or explicit timestamp.
    pub fn insert_with<I, N, V>(
        &self,
        key: impl Into<Bytes>,
        columns: I,
        options: &InsertOptions,
    ) -> Result<&Self, ExecutionError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        self.mutator
            .insert_with(key, self.column_family.as_str(), columns, options)?;
        Ok(self)
    }

    /// Queues the removal of `columns` from row `key`, or of the whole row if `None` or empty.
    pub fn remove(&self, key: impl Into<Bytes>, columns: Option<Vec<Bytes>>) -> Result<&Self, ExecutionError> {
        self.remove_with(key, columns, &RemoveOptions::default())
    }

    /// Like [`remove`](CfMutator::remove), within a super column or with an explicit timestamp.
    pub fn remove_with(
        &self,
        key: impl Into<Bytes>,
        columns: Option<Vec<Bytes>>,
        options: &RemoveOptions,
    ) -> Result<&Self, ExecutionError> {
        self.mutator
            .remove_with(key, self.column_family.as_str(), columns, options)?;
        Ok(self)
    }

    /// Sends every queued mutation. See [`Mutator::send`].
    pub fn send(&self) -> Result<(), ExecutionError> {
        self.mutator.send()
    }

    /// A guard sending the queue when it goes out of scope.
    pub fn scope(&self) -> BatchScope<'_, Self> {
        BatchScope::new(self)
    }
}

impl Batch for CfMutator<'_> {
    fn send(&self) -> Result<(), ExecutionError> {
        CfMutator::send(self)
    }
}

/// Sends a batch when dropped.
///
/// Prefer [`finish`](BatchScope::finish), which reports the error; on drop a
/// failed send is only logged.
#[derive(Debug)]
pub struct BatchScope<'a, B: Batch> {
    batch: &'a B,
    finished: bool,
}

impl<'a, B: Batch> BatchScope<'a, B> {
    fn new(batch: &'a B) -> Self {
        BatchScope {
            batch,
            finished: false,
        }
    }

    /// Sends the batch and ends the scope.
    pub fn finish(mut self) -> Result<(), ExecutionError> {
        self.finished = true;
        self.batch.send()
    }
}

impl<B: Batch> Deref for BatchScope<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.batch
    }
}

impl<B: Batch> Drop for BatchScope<'_, B> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(error) = self.batch.send() {
            warn!(%error, "Failed to send batch at the end of its scope");
        }
    }
}
