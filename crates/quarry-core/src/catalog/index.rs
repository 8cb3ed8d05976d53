//! Index definitions.

use serde::{Deserialize, Serialize};

/// Index implementation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Ordered, one record per key.
    Unique,
    /// Ordered, many records per key.
    NotUnique,
    /// Hashed; only full-key equality lookups.
    Hash,
    /// Full-text; never used for comparison conditions.
    FullText,
}

impl IndexKind {
    /// Whether the index can serve range scans and ordered iteration.
    pub fn supports_range(&self) -> bool {
        matches!(self, IndexKind::Unique | IndexKind::NotUnique)
    }

    /// Whether the index can serve equality lookups on comparison conditions.
    pub fn supports_equality(&self) -> bool {
        !matches!(self, IndexKind::FullText)
    }

    /// Whether a key maps to at most one record.
    pub fn is_unique(&self) -> bool {
        matches!(self, IndexKind::Unique)
    }
}

/// An index over one or more properties of a class (and its subclasses).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name.
    pub name: String,
    /// Indexed class.
    pub class: String,
    /// Key fields in key order.
    pub fields: Vec<String>,
    /// Implementation kind.
    pub kind: IndexKind,
    /// When set, records whose key is entirely null are not stored.
    pub ignore_nulls: bool,
}

impl IndexDefinition {
    /// Create an index definition that stores null keys.
    pub fn new(
        name: impl Into<String>,
        class: impl Into<String>,
        fields: Vec<&str>,
        kind: IndexKind,
    ) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            fields: fields.into_iter().map(str::to_string).collect(),
            kind,
            ignore_nulls: false,
        }
    }

    /// Skip null keys.
    pub fn ignoring_nulls(mut self) -> Self {
        self.ignore_nulls = true;
        self
    }

    /// Position of a field in the key.
    pub fn field_position(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }
}
