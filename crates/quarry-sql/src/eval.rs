//! Evaluation contract between the AST and the execution engine.
//!
//! Expressions and conditions never touch storage directly. They read the
//! current row through [`RowAccess`] and everything else (parameters,
//! variables, nested queries) through [`EvalContext`].

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::statement::SelectStatement;
use crate::value::{Rid, Value};

/// Read access to the row an expression is evaluated against.
pub trait RowAccess {
    /// Value of a top-level property.
    fn property(&self, name: &str) -> Option<&Value>;

    /// Persistent identity backing the row, if any.
    fn identity(&self) -> Option<Rid>;

    /// Class of the backing record, if any.
    fn class_name(&self) -> Option<&str>;

    /// Per-row metadata (LET values bound for this row).
    fn metadata(&self, name: &str) -> Option<&Value>;

    /// The whole row as a value (`@this`, `$current`).
    fn to_value(&self) -> Value;
}

/// Execution-scoped state visible to expressions.
pub trait EvalContext {
    /// Bound query parameter.
    fn parameter(&self, name: &str) -> Option<Value>;

    /// Context variable (global LET results, `$parent`).
    fn variable(&self, name: &str) -> Option<Value>;

    /// Run a nested SELECT and return one value per result row.
    ///
    /// `current` is the row the enclosing expression is evaluated against;
    /// it is exposed to the nested query as `$parent`.
    fn run_subquery(
        &self,
        statement: &SelectStatement,
        current: Option<&dyn RowAccess>,
    ) -> Result<Vec<Value>>;
}

/// A row with no properties, used for constant folding.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyRow;

impl RowAccess for EmptyRow {
    fn property(&self, _name: &str) -> Option<&Value> {
        None
    }

    fn identity(&self) -> Option<Rid> {
        None
    }

    fn class_name(&self) -> Option<&str> {
        None
    }

    fn metadata(&self, _name: &str) -> Option<&Value> {
        None
    }

    fn to_value(&self) -> Value {
        Value::Map(BTreeMap::new())
    }
}

/// Context holding only parameters. Nested queries are rejected.
#[derive(Debug, Default, Clone)]
pub struct StaticContext {
    parameters: BTreeMap<String, Value>,
}

impl StaticContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

impl EvalContext for StaticContext {
    fn parameter(&self, name: &str) -> Option<Value> {
        self.parameters.get(name).cloned()
    }

    fn variable(&self, _name: &str) -> Option<Value> {
        None
    }

    fn run_subquery(
        &self,
        statement: &SelectStatement,
        _current: Option<&dyn RowAccess>,
    ) -> Result<Vec<Value>> {
        Err(Error::Subquery(
            format!("no database available to run '{statement}'").into(),
        ))
    }
}

/// Row backed by an ordered property list. Handy for tests and literals.
impl RowAccess for Vec<(String, Value)> {
    fn property(&self, name: &str) -> Option<&Value> {
        self.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn identity(&self) -> Option<Rid> {
        None
    }

    fn class_name(&self) -> Option<&str> {
        None
    }

    fn metadata(&self, _name: &str) -> Option<&Value> {
        None
    }

    fn to_value(&self) -> Value {
        Value::Map(self.iter().cloned().collect())
    }
}
