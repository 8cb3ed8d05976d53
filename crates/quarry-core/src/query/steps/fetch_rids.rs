//! Explicit identities, variables and the empty target.

use quarry_sql::{EvalContext, Rid, Value};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::query::context::CommandContext;
use crate::query::row::ResultRow;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;

/// Fetch records by identity, in the given order. Missing records are skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFromRidsStep {
    rids: Vec<Rid>,
    #[serde(skip)]
    base: StepBase,
}

impl FetchFromRidsStep {
    /// Fetch `rids`.
    pub fn new(rids: Vec<Rid>) -> Self {
        Self {
            rids,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for FetchFromRidsStep {
    step_common!("FetchFromRidsStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        let db = ctx.db();
        let rows = self
            .rids
            .iter()
            .filter_map(move |rid| db.load(*rid))
            .map(ResultRow::from_record);
        Ok(ExecutionStream::from_iterator(rows))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        let rids: Vec<String> = self.rids.iter().map(Rid::to_string).collect();
        format!("FETCH FROM RIDS [{}]", rids.join(", "))
    }
}

/// Where a [`FetchFromVariableStep`] reads its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableSource {
    /// A context variable (`$name`).
    Variable(String),
    /// A bound parameter (`:name`).
    Parameter(String),
}

/// Iterate the value of a variable or parameter.
///
/// Lists produce one row per element; links are loaded, maps become
/// computed rows and other scalars a single `value` column. Null produces
/// nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFromVariableStep {
    source: VariableSource,
    #[serde(skip)]
    base: StepBase,
}

impl FetchFromVariableStep {
    /// Read context variable `name`.
    pub fn variable(name: impl Into<String>) -> Self {
        Self {
            source: VariableSource::Variable(name.into()),
            base: StepBase::default(),
        }
    }

    /// Read parameter `name`.
    pub fn parameter(name: impl Into<String>) -> Self {
        Self {
            source: VariableSource::Parameter(name.into()),
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for FetchFromVariableStep {
    step_common!("FetchFromVariableStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        let value = match &self.source {
            VariableSource::Variable(name) => ctx.variable(name).unwrap_or(Value::Null),
            VariableSource::Parameter(name) => ctx.parameter(name).ok_or_else(|| {
                Error::Evaluation(quarry_sql::Error::UnboundParameter(name.clone()))
            })?,
        };
        let items = match value {
            Value::List(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        let rows = items
            .into_iter()
            .filter_map(move |item| row_from_value(item, ctx));
        Ok(ExecutionStream::from_iterator(rows))
    }

    fn describe(&self) -> String {
        match &self.source {
            VariableSource::Variable(name) => format!("FETCH FROM VARIABLE ${name}"),
            VariableSource::Parameter(name) => format!("FETCH FROM PARAMETER :{name}"),
        }
    }
}

/// Turn one value into a row: links are loaded (dangling ones yield
/// nothing), maps become computed rows, scalars a `value` column.
pub(crate) fn row_from_value(value: Value, ctx: &CommandContext) -> Option<ResultRow> {
    match value {
        Value::Null => None,
        Value::Link(rid) => ctx.db().load(rid).map(ResultRow::from_record),
        Value::Map(map) => Some(ResultRow::from_map(map)),
        other => Some(ResultRow::new().with_property("value", other)),
    }
}

/// One empty row, for SELECT without a target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyDataGeneratorStep {
    #[serde(skip)]
    base: StepBase,
}

impl EmptyDataGeneratorStep {
    /// Create the step.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionStep for EmptyDataGeneratorStep {
    step_common!("EmptyDataGeneratorStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        Ok(ExecutionStream::once(ResultRow::new()))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "GENERATE EMPTY ROW".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SelectExecutionPlan;
    use crate::testing::{column, ctx, map, people_db};

    fn run(step: impl ExecutionStep + 'static, ctx: &CommandContext) -> Result<Vec<ResultRow>> {
        let mut plan = SelectExecutionPlan::new();
        plan.chain(Box::new(step));
        plan.fetch_all(ctx)
    }

    #[test]
    fn test_missing_rids_are_skipped() {
        let ctx = ctx(people_db());
        let rows = run(
            FetchFromRidsStep::new(vec![Rid::new(0, 2), Rid::new(0, 99), Rid::new(0, 0)]),
            &ctx,
        )
        .unwrap();
        assert_eq!(
            column(&rows, "name"),
            vec![Value::from("carol"), Value::from("alice")]
        );
    }

    #[test]
    fn test_variable_mixes_links_maps_and_scalars() {
        let ctx = ctx(people_db());
        ctx.set_variable(
            "v",
            Value::List(vec![
                Value::Link(Rid::new(0, 1)),
                Value::Link(Rid::new(0, 77)),
                map(&[("k", Value::Int(1))]),
                Value::Int(5),
                Value::Null,
            ]),
        );
        let rows = run(FetchFromVariableStep::variable("v"), &ctx).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("name"), Some(&Value::from("bob")));
        assert_eq!(rows[1].get("k"), Some(&Value::Int(1)));
        assert_eq!(rows[2].get("value"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_unbound_parameter_fails() {
        let ctx = ctx(people_db());
        assert!(run(FetchFromVariableStep::parameter("nope"), &ctx).is_err());
        assert!(run(FetchFromVariableStep::variable("nope"), &ctx)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_empty_generator_emits_one_row() {
        let ctx = ctx(people_db());
        let rows = run(EmptyDataGeneratorStep::new(), &ctx).unwrap();
        assert_eq!(rows, vec![ResultRow::new()]);
    }
}
