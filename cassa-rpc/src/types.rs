//! Records exchanged with a server.
//!
//! The shapes follow the remote interface closely. Keys, column names and values
//! are opaque bytes; interpreting them is up to the caller.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::Bytes;

/// Number of replicas that must acknowledge a request before it succeeds.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Consistency {
    /// A write must reach at least one node, hinted handoff included.
    Any = 6,
    /// One replica.
    #[default]
    One = 1,
    /// A majority of replicas.
    Quorum = 2,
    /// A majority of replicas in the coordinator's datacenter.
    LocalQuorum = 3,
    /// A majority of replicas in every datacenter.
    EachQuorum = 4,
    /// Every replica.
    All = 5,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Quorum => "QUORUM",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::All => "ALL",
        };
        f.write_str(name)
    }
}

/// A single column: name, value and the write timestamp (microseconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    #[allow(missing_docs)]
    pub name: Bytes,
    #[allow(missing_docs)]
    pub value: Bytes,
    #[allow(missing_docs)]
    pub timestamp: i64,
    /// Time to live in seconds, if the column should expire.
    pub ttl: Option<i32>,
}

impl Column {
    /// Creates a column without a TTL.
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>, timestamp: i64) -> Self {
        Column {
            name: name.into(),
            value: value.into(),
            timestamp,
            ttl: None,
        }
    }
}

/// A named group of columns inside a row of a super column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperColumn {
    #[allow(missing_docs)]
    pub name: Bytes,
    #[allow(missing_docs)]
    pub columns: Vec<Column>,
}

/// Either a plain column or a super column, depending on the column family type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnOrSuperColumn {
    #[allow(missing_docs)]
    Column(Column),
    #[allow(missing_docs)]
    SuperColumn(SuperColumn),
}

impl ColumnOrSuperColumn {
    /// Name of the column or super column.
    pub fn name(&self) -> &Bytes {
        match self {
            ColumnOrSuperColumn::Column(c) => &c.name,
            ColumnOrSuperColumn::SuperColumn(sc) => &sc.name,
        }
    }
}

/// Identifies a column family, optionally narrowed to one super column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnParent {
    #[allow(missing_docs)]
    pub column_family: String,
    #[allow(missing_docs)]
    pub super_column: Option<Bytes>,
}

impl ColumnParent {
    /// Parent covering a whole column family.
    pub fn new(column_family: impl Into<String>) -> Self {
        ColumnParent {
            column_family: column_family.into(),
            super_column: None,
        }
    }
}

/// Path to a column, a super column, or a whole row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPath {
    #[allow(missing_docs)]
    pub column_family: String,
    #[allow(missing_docs)]
    pub super_column: Option<Bytes>,
    #[allow(missing_docs)]
    pub column: Option<Bytes>,
}

/// A contiguous range of column names.
///
/// Empty `start`/`finish` mean an unbounded end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRange {
    #[allow(missing_docs)]
    pub start: Bytes,
    #[allow(missing_docs)]
    pub finish: Bytes,
    #[allow(missing_docs)]
    pub reversed: bool,
    /// Maximum number of columns returned.
    pub count: i32,
}

impl Default for SliceRange {
    fn default() -> Self {
        SliceRange {
            start: Bytes::new(),
            finish: Bytes::new(),
            reversed: false,
            count: 100,
        }
    }
}

/// Selects the columns a read (or a deletion) applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlicePredicate {
    /// Exactly these column names.
    ColumnNames(Vec<Bytes>),
    /// A range of column names.
    SliceRange(SliceRange),
}

/// A range of row keys, for range scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// First key (inclusive). Empty means the beginning of the ring.
    pub start_key: Bytes,
    /// Last key (inclusive). Empty means the end of the ring.
    pub end_key: Bytes,
    /// Maximum number of rows returned.
    pub count: i32,
}

/// A row returned by a range or index scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlice {
    #[allow(missing_docs)]
    pub key: Bytes,
    #[allow(missing_docs)]
    pub columns: Vec<ColumnOrSuperColumn>,
}

/// Comparison used by an [`IndexExpression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum IndexOperator {
    Eq,
    Gte,
    Gt,
    Lte,
    Lt,
}

/// One condition of an [`IndexClause`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexExpression {
    #[allow(missing_docs)]
    pub column_name: Bytes,
    #[allow(missing_docs)]
    pub op: IndexOperator,
    #[allow(missing_docs)]
    pub value: Bytes,
}

/// Secondary index query. At least one expression must be on an indexed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexClause {
    #[allow(missing_docs)]
    pub expressions: Vec<IndexExpression>,
    #[allow(missing_docs)]
    pub start_key: Bytes,
    #[allow(missing_docs)]
    pub count: i32,
}

/// Removal of columns, a super column or a whole row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    #[allow(missing_docs)]
    pub timestamp: i64,
    #[allow(missing_docs)]
    pub super_column: Option<Bytes>,
    /// Columns to delete. `None` deletes everything under `super_column`, or the whole row.
    pub predicate: Option<SlicePredicate>,
}

/// One element of a `batch_mutate` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or overwrite a column or the columns of a super column.
    Insert(ColumnOrSuperColumn),
    #[allow(missing_docs)]
    Delete(Deletion),
}

/// Argument of `batch_mutate`: row key -> column family -> ordered mutations.
pub type MutationMap = HashMap<Bytes, HashMap<String, Vec<Mutation>>>;

/// Credentials presented by `login`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationRequest {
    #[allow(missing_docs)]
    pub credentials: BTreeMap<String, String>,
}

/// Whether a column family stores plain columns or super columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ColumnType {
    #[default]
    Standard,
    Super,
}

/// Metadata of one column with an explicit validator or an index.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct ColumnDef {
    pub name: Bytes,
    pub validation_class: String,
    pub index_name: Option<String>,
}

/// Column family definition, as returned by `describe_keyspace`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct CfDef {
    pub keyspace: String,
    pub name: String,
    pub column_type: ColumnType,
    pub comparator_type: String,
    pub subcomparator_type: Option<String>,
    pub default_validation_class: Option<String>,
    pub column_metadata: Vec<ColumnDef>,
}

/// Keyspace definition, as returned by `describe_keyspace(s)`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct KsDef {
    pub name: String,
    pub strategy_class: String,
    pub replication_factor: i32,
    pub cf_defs: Vec<CfDef>,
}

impl KsDef {
    /// Looks up a column family definition by name.
    pub fn column_family(&self, name: &str) -> Option<&CfDef> {
        self.cf_defs.iter().find(|cf| cf.name == name)
    }
}
