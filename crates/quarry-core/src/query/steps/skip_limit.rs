//! SKIP and LIMIT.

use quarry_sql::{EmptyRow, Expression};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::query::context::CommandContext;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;

/// Resolve a SKIP/LIMIT operand (a literal or a parameter) to an integer.
fn resolve(expr: &Expression, clause: &str, ctx: &CommandContext) -> Result<i64> {
    let value = expr.evaluate(&EmptyRow, ctx)?;
    value.as_i64().ok_or_else(|| {
        Error::InvalidInput(format!(
            "{clause} expects an integer, got {} ({})",
            value,
            value.type_name()
        ))
    })
}

/// Drop the first N rows. A negative N skips nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipExecutionStep {
    skip: Expression,
    #[serde(skip)]
    base: StepBase,
}

impl SkipExecutionStep {
    /// Skip `skip` rows.
    pub fn new(skip: Expression) -> Self {
        Self {
            skip,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for SkipExecutionStep {
    step_common!("SkipExecutionStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let skip = resolve(&self.skip, "SKIP", ctx)?.max(0) as usize;
        let upstream = self.base.start_prev(ctx, "SkipExecutionStep")?;
        Ok(upstream.skip(skip))
    }

    fn close(&mut self) {
        self.base.close_prev();
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("SKIP ({})", self.skip)
    }
}

/// Stop after N rows. A negative N means no limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitExecutionStep {
    limit: Expression,
    #[serde(skip)]
    base: StepBase,
}

impl LimitExecutionStep {
    /// Emit at most `limit` rows.
    pub fn new(limit: Expression) -> Self {
        Self {
            limit,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for LimitExecutionStep {
    step_common!("LimitExecutionStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let limit = resolve(&self.limit, "LIMIT", ctx)?;
        let upstream = self.base.start_prev(ctx, "LimitExecutionStep")?;
        Ok(if limit < 0 {
            upstream
        } else {
            upstream.limit(limit as usize)
        })
    }

    fn close(&mut self) {
        self.base.close_prev();
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("LIMIT ({})", self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{column, map, plan_over_rows, rows_ctx};
    use quarry_sql::Value;

    fn numbers() -> Vec<Value> {
        (0..5).map(|i| map(&[("n", Value::Int(i))])).collect()
    }

    #[test]
    fn test_skip_then_limit() {
        let ctx = rows_ctx(numbers());
        let mut plan = plan_over_rows(vec![
            Box::new(SkipExecutionStep::new(Expression::literal(1))),
            Box::new(LimitExecutionStep::new(Expression::literal(2))),
        ]);
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(column(&rows, "n"), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_negative_values() {
        let ctx = rows_ctx(numbers());
        let mut plan = plan_over_rows(vec![
            Box::new(SkipExecutionStep::new(Expression::literal(-3))),
            Box::new(LimitExecutionStep::new(Expression::literal(-1))),
        ]);
        assert_eq!(plan.fetch_all(&ctx).unwrap().len(), 5);
    }

    #[test]
    fn test_parameter_limit_resolved_per_execution() {
        let mut plan = plan_over_rows(vec![Box::new(LimitExecutionStep::new(
            Expression::param("n"),
        ))]);
        let ctx = rows_ctx(numbers()).with_parameter("n", 3);
        assert_eq!(plan.fetch_all(&ctx).unwrap().len(), 3);
        plan.reset();
        let ctx = rows_ctx(numbers()).with_parameter("n", 1);
        assert_eq!(plan.fetch_all(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_non_integer_limit_fails() {
        let ctx = rows_ctx(numbers()).with_parameter("n", "ten");
        let mut plan = plan_over_rows(vec![Box::new(LimitExecutionStep::new(
            Expression::param("n"),
        ))]);
        assert!(matches!(plan.fetch_all(&ctx), Err(Error::InvalidInput(_))));
    }
}
