//! Projection, `expand()` and UNWIND.

use quarry_sql::{Expression, ProjectionItem, Value};
use serde::{Deserialize, Serialize};

use super::fetch_rids::row_from_value;
use crate::error::{Error, Result};
use crate::query::context::CommandContext;
use crate::query::row::ResultRow;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;

/// Evaluate projection items into new rows.
///
/// A bare `*` keeps the row (identity included) and only drops the excluded
/// columns; anything else builds a computed row in item order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionCalculationStep {
    items: Vec<ProjectionItem>,
    exclude: Vec<String>,
    #[serde(skip)]
    base: StepBase,
}

impl ProjectionCalculationStep {
    /// Project `items`.
    pub fn new(items: Vec<ProjectionItem>) -> Self {
        Self {
            items,
            exclude: Vec::new(),
            base: StepBase::default(),
        }
    }

    /// Keep every column except `columns`.
    pub fn removing(columns: Vec<String>) -> Self {
        Self {
            items: vec![ProjectionItem::All],
            exclude: columns,
            base: StepBase::default(),
        }
    }
}

fn project(
    items: &[ProjectionItem],
    exclude: &[String],
    row: ResultRow,
    ctx: &CommandContext,
) -> Result<ResultRow> {
    if let [ProjectionItem::All] = items {
        let mut row = row;
        for column in exclude {
            row.remove(column);
        }
        return Ok(row);
    }
    let mut out = ResultRow::new();
    for item in items {
        match item {
            ProjectionItem::All => {
                for (name, value) in row.properties() {
                    out.set(name.clone(), value.clone());
                }
            }
            ProjectionItem::Expr { expr, .. } => {
                out.set(item.output_name(), expr.evaluate(&row, ctx)?);
            }
            ProjectionItem::Expand(_) => {
                return Err(Error::InvalidStatement(
                    "expand() must be the only projection item".to_string(),
                ))
            }
        }
    }
    for column in exclude {
        out.remove(column);
    }
    out.inherit_metadata(&row);
    Ok(out)
}

impl ExecutionStep for ProjectionCalculationStep {
    step_common!("ProjectionCalculationStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let (items, exclude) = (&self.items, &self.exclude);
        let upstream = self.base.start_prev(ctx, "ProjectionCalculationStep")?;
        Ok(upstream.map(move |row| project(items, exclude, row, ctx)))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        let items: Vec<String> = self.items.iter().map(ToString::to_string).collect();
        let mut text = format!("CALCULATE PROJECTIONS {}", items.join(", "));
        if !self.exclude.is_empty() {
            text.push_str(&format!(" EXCLUDING {}", self.exclude.join(", ")));
        }
        text
    }
}

/// `expand(expr)`: replace each row with the records or maps its value holds.
///
/// Links are loaded (dangling links expand to nothing), maps become computed
/// rows, lists expand element-wise. Scalars are an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandStep {
    expr: Expression,
    #[serde(skip)]
    base: StepBase,
}

impl ExpandStep {
    /// Expand `expr`.
    pub fn new(expr: Expression) -> Self {
        Self {
            expr,
            base: StepBase::default(),
        }
    }
}

fn expanded(value: Value, ctx: &CommandContext) -> Result<Vec<ResultRow>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Link(_) | Value::Map(_) => Ok(row_from_value(value, ctx).into_iter().collect()),
        Value::List(items) => {
            let mut rows = Vec::with_capacity(items.len());
            for item in items {
                rows.extend(expanded(item, ctx)?);
            }
            Ok(rows)
        }
        other => Err(Error::InvalidInput(format!(
            "cannot expand a value of type {}",
            other.type_name()
        ))),
    }
}

impl ExecutionStep for ExpandStep {
    step_common!("ExpandStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let expr = &self.expr;
        let upstream = self.base.start_prev(ctx, "ExpandStep")?;
        Ok(upstream.flat_map(move |row| {
            let value = expr.evaluate(&row, ctx)?;
            Ok(ExecutionStream::from_rows(expanded(value, ctx)?))
        }))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("EXPAND {}", self.expr)
    }
}

/// UNWIND: one row per element of list-valued fields.
///
/// An empty list yields one row with the field set to null; non-list values
/// pass through unchanged. Unwound rows are computed rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnwindStep {
    fields: Vec<String>,
    #[serde(skip)]
    base: StepBase,
}

impl UnwindStep {
    /// Unwind `fields`, in order.
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            base: StepBase::default(),
        }
    }
}

fn unwind(row: ResultRow, fields: &[String], out: &mut Vec<ResultRow>) {
    let Some((field, rest)) = fields.split_first() else {
        out.push(row);
        return;
    };
    match row.get(field) {
        Some(Value::List(items)) => {
            let items = items.clone();
            if items.is_empty() {
                let mut copy = row;
                copy.set_identity(None);
                copy.set(field.clone(), Value::Null);
                unwind(copy, rest, out);
                return;
            }
            for item in items {
                let mut copy = row.clone();
                copy.set_identity(None);
                copy.set(field.clone(), item);
                unwind(copy, rest, out);
            }
        }
        _ => unwind(row, rest, out),
    }
}

impl ExecutionStep for UnwindStep {
    step_common!("UnwindStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let fields = &self.fields;
        let upstream = self.base.start_prev(ctx, "UnwindStep")?;
        Ok(upstream.flat_map(move |row| {
            let mut rows = Vec::new();
            unwind(row, fields, &mut rows);
            Ok(ExecutionStream::from_rows(rows))
        }))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("UNWIND {}", self.fields.join(", "))
    }
}
