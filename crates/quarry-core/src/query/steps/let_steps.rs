//! LET bindings.
//!
//! Global items are evaluated once per execution into context variables;
//! per-row items are evaluated for every row into its metadata, where
//! `$name` references resolve first.

use std::sync::Arc;

use quarry_sql::{EmptyRow, EvalContext, Expression, RowAccess, SelectStatement, Value};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::context::CommandContext;
use crate::query::plan::SelectExecutionPlan;
use crate::query::row::ResultRow;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;

/// `LET $name = <expr>` evaluated once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalLetExpressionStep {
    name: String,
    expr: Expression,
    #[serde(skip)]
    base: StepBase,
}

impl GlobalLetExpressionStep {
    /// Bind `name` to `expr`.
    pub fn new(name: impl Into<String>, expr: Expression) -> Self {
        Self {
            name: name.into(),
            expr,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for GlobalLetExpressionStep {
    step_common!("GlobalLetExpressionStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        let value = self.expr.evaluate(&EmptyRow, ctx)?;
        ctx.set_variable(self.name.clone(), value);
        Ok(ExecutionStream::empty())
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("LET (once) ${} = {}", self.name, self.expr)
    }
}

/// `LET $name = (SELECT ...)` evaluated once; binds the list of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalLetQueryStep {
    name: String,
    plan: SelectExecutionPlan,
    #[serde(skip)]
    base: StepBase,
}

impl GlobalLetQueryStep {
    /// Bind `name` to the rows of `plan`.
    pub fn new(name: impl Into<String>, plan: SelectExecutionPlan) -> Self {
        Self {
            name: name.into(),
            plan,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for GlobalLetQueryStep {
    step_common!("GlobalLetQueryStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        let child = ctx.fork();
        let rows = self.plan.fetch_all(&child)?;
        let value = Value::List(rows.into_iter().map(ResultRow::into_value).collect());
        ctx.set_variable(self.name.clone(), value);
        Ok(ExecutionStream::empty())
    }

    fn close(&mut self) {
        self.plan.close();
        self.base.close();
    }

    fn reset(&mut self) {
        self.plan.reset();
        self.base.reset();
    }

    fn send_timeout(&mut self) {
        self.plan.send_timeout();
        self.base.send_timeout();
    }

    fn set_profiling(&mut self, profiling: bool) {
        self.plan.set_profiling(profiling);
        self.base.set_profiling(profiling);
    }

    fn can_be_cached(&self) -> bool {
        self.plan.can_be_cached()
    }

    fn describe(&self) -> String {
        format!("LET (once) ${} = (subquery)", self.name)
    }

    fn sub_plans(&self) -> Vec<&SelectExecutionPlan> {
        vec![&self.plan]
    }
}

/// `LET $name = <expr>` evaluated for every row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetExpressionStep {
    name: String,
    expr: Expression,
    #[serde(skip)]
    base: StepBase,
}

impl LetExpressionStep {
    /// Bind `name` to `expr` on every row.
    pub fn new(name: impl Into<String>, expr: Expression) -> Self {
        Self {
            name: name.into(),
            expr,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for LetExpressionStep {
    step_common!("LetExpressionStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let (name, expr) = (&self.name, &self.expr);
        let upstream = self.base.start_prev(ctx, "LetExpressionStep")?;
        Ok(upstream.map(move |mut row| {
            let value = expr.evaluate(&row, ctx)?;
            row.set_metadata(name.clone(), value);
            Ok(row)
        }))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("LET (for each record) ${} = {}", self.name, self.expr)
    }
}

/// `LET $name = (SELECT ...)` evaluated for every row, with the row as `$parent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetQueryStep {
    name: String,
    statement: Arc<SelectStatement>,
    #[serde(skip)]
    base: StepBase,
}

impl LetQueryStep {
    /// Bind `name` to the results of `statement` on every row.
    pub fn new(name: impl Into<String>, statement: Arc<SelectStatement>) -> Self {
        Self {
            name: name.into(),
            statement,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for LetQueryStep {
    step_common!("LetQueryStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let (name, statement) = (&self.name, &self.statement);
        let upstream = self.base.start_prev(ctx, "LetQueryStep")?;
        Ok(upstream.map(move |mut row| {
            let values = ctx.run_subquery(statement, Some(&row as &dyn RowAccess))?;
            row.set_metadata(name.clone(), Value::List(values));
            Ok(row)
        }))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("LET (for each record) ${} = ({})", self.name, self.statement)
    }
}
