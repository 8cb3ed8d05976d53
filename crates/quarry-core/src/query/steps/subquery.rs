//! Nested SELECT as a target.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::context::CommandContext;
use crate::query::plan::SelectExecutionPlan;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;

/// Stream the rows of a nested plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQueryStep {
    plan: SelectExecutionPlan,
    #[serde(skip)]
    base: StepBase,
}

impl SubQueryStep {
    /// Wrap a planned sub-query.
    pub fn new(plan: SelectExecutionPlan) -> Self {
        Self {
            plan,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for SubQueryStep {
    step_common!("SubQueryStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        self.plan.start(ctx)
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
        "FETCH FROM SUBQUERY".to_string()
    }

    fn sub_plans(&self) -> Vec<&SelectExecutionPlan> {
        vec![&self.plan]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::steps::FetchFromRidsStep;
    use crate::testing::{column, ctx, people_db};
    use quarry_sql::{Rid, Value};

    fn inner() -> SelectExecutionPlan {
        let mut plan = SelectExecutionPlan::new();
        plan.chain(Box::new(FetchFromRidsStep::new(vec![Rid::new(0, 4)])));
        plan
    }

    #[test]
    fn test_streams_nested_plan_and_restarts_after_reset() {
        let ctx = ctx(people_db());
        let mut plan = SelectExecutionPlan::new();
        plan.chain(Box::new(SubQueryStep::new(inner())));
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(column(&rows, "name"), vec![Value::from("erin")]);
        assert!(plan.start(&ctx).is_err());
        plan.reset();
        assert_eq!(plan.fetch_all(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_pretty_print_includes_nested_plan() {
        let step = SubQueryStep::new(inner());
        let text = step.pretty_print(0, 2);
        assert!(text.contains("FETCH FROM SUBQUERY"));
        assert!(text.contains("  + FETCH FROM RIDS [#0:4]"));
    }

    #[test]
    fn test_timeout_signal_reaches_nested_source() {
        use crate::query::steps::TimeoutStep;
        use quarry_sql::TimeoutPolicy;

        let ctx = ctx(people_db());
        let mut plan = SelectExecutionPlan::new();
        plan.chain(Box::new(SubQueryStep::new(inner())));
        plan.chain(Box::new(TimeoutStep::new(0, TimeoutPolicy::Exception)));
        assert!(plan.fetch_all(&ctx).is_err());

        let subquery = plan.steps()[0];
        let nested = subquery.sub_plans()[0];
        assert!(nested.steps()[0].base().is_timed_out());
        assert!(subquery.base().is_timed_out());
    }
}
