//! Storage interface consumed by the query engine.
//!
//! The engine never reaches into a storage implementation directly. It
//! loads records and walks clusters through [`Database`] and scans ordered
//! keys through [`Index`]. [`MemoryDatabase`] is the bundled implementation
//! used by tests and embedders.
//!
//! # Index key semantics
//!
//! Keys are vectors of [`Value`]s in index field order. Scan bounds may be
//! shorter than the full key: the leading components are matched by
//! equality and the last component carries the comparison. A bound whose
//! last component is not comparable with an entry's component (different
//! type, or null) never matches that entry.

mod memory;

pub use memory::{MemoryDatabase, MemoryIndex};

use quarry_sql::{RowAccess, Rid, Value};

use crate::catalog::{IndexDefinition, Schema};
use crate::error::Result;

/// A stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Persistent identity.
    pub rid: Rid,
    /// Class name.
    pub class: String,
    /// Properties in insertion order.
    pub properties: Vec<(String, Value)>,
}

impl Record {
    /// Create a record.
    pub fn new(rid: Rid, class: impl Into<String>, properties: Vec<(String, Value)>) -> Self {
        Self {
            rid,
            class: class.into(),
            properties,
        }
    }

    /// Get a property value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

impl RowAccess for Record {
    fn property(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }

    fn identity(&self) -> Option<Rid> {
        Some(self.rid)
    }

    fn class_name(&self) -> Option<&str> {
        Some(&self.class)
    }

    fn metadata(&self, _name: &str) -> Option<&Value> {
        None
    }

    fn to_value(&self) -> Value {
        Value::Map(self.properties.iter().cloned().collect())
    }
}

/// One index entry: a key and the record it points to.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Key components in index field order.
    pub key: Vec<Value>,
    /// Referenced record.
    pub rid: Rid,
}

/// Iterator over index entries.
pub type EntryIter<'a> = Box<dyn Iterator<Item = IndexEntry> + 'a>;

/// Iterator over records.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Record> + 'a>;

/// Record storage.
pub trait Database: Send + Sync {
    /// Current schema.
    fn schema(&self) -> &Schema;

    /// Load a record. `None` when it does not exist (deleted or dangling).
    fn load(&self, rid: Rid) -> Option<Record>;

    /// Iterate a cluster in position order.
    fn scan_cluster(&self, cluster: i32, ascending: bool) -> RecordIter<'_>;

    /// Number of live records in a cluster.
    fn cluster_count(&self, cluster: i32) -> usize;

    /// Look up an index by name.
    fn index(&self, name: &str) -> Option<&dyn Index>;
}

/// Ordered (or hashed) secondary index.
pub trait Index: Send + Sync {
    /// Index definition.
    fn definition(&self) -> &IndexDefinition;

    /// Entries whose key starts with `key`.
    fn point_lookup(&self, key: &[Value], ascending: bool) -> Result<EntryIter<'_>>;

    /// Entries above `key` on its last component, sharing the rest as prefix.
    fn scan_major(&self, key: &[Value], inclusive: bool, ascending: bool)
        -> Result<EntryIter<'_>>;

    /// Entries below `key` on its last component, sharing the rest as prefix.
    fn scan_minor(&self, key: &[Value], inclusive: bool, ascending: bool)
        -> Result<EntryIter<'_>>;

    /// Entries between `low` and `high`. Both bounds must share every
    /// component but the last.
    fn scan_between(
        &self,
        low: &[Value],
        low_inclusive: bool,
        high: &[Value],
        high_inclusive: bool,
        ascending: bool,
    ) -> Result<EntryIter<'_>>;

    /// Entries whose key is entirely null.
    fn null_entries(&self) -> EntryIter<'_>;

    /// Every non-null entry in key order.
    fn scan_all(&self, ascending: bool) -> Result<EntryIter<'_>>;

    /// Total number of entries, null keys included.
    fn entry_count(&self) -> usize;
}
