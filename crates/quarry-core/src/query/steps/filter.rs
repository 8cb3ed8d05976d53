//! Row filters.

use quarry_sql::Condition;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::context::CommandContext;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;

/// Keep rows for which a condition holds (SQL three-valued logic: unknown
/// drops the row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterStep {
    condition: Condition,
    #[serde(skip)]
    base: StepBase,
}

impl FilterStep {
    /// Filter on `condition`.
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            base: StepBase::default(),
        }
    }

    /// The filter condition.
    pub fn condition(&self) -> &Condition {
        &self.condition
    }
}

impl ExecutionStep for FilterStep {
    step_common!("FilterStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let condition = &self.condition;
        let upstream = self.base.start_prev(ctx, "FilterStep")?;
        Ok(upstream
            .filter(move |row| Ok(condition.evaluate(row, ctx)?))
            .interruptible(ctx))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("FILTER ITEMS WHERE {}", self.condition)
    }
}

/// Keep records of a class or its subclasses.
///
/// Follows a fetch through an index defined on a superclass of the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterByClassStep {
    class: String,
    #[serde(skip)]
    base: StepBase,
}

impl FilterByClassStep {
    /// Keep instances of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for FilterByClassStep {
    step_common!("FilterByClassStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let class = self.class.as_str();
        let upstream = self.base.start_prev(ctx, "FilterByClassStep")?;
        let schema = ctx.db().schema();
        Ok(upstream.filter(move |row| {
            Ok(row
                .class()
                .is_some_and(|c| schema.is_subclass_of(c, class)))
        }))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("FILTER ITEMS BY CLASS {}", self.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ClassDef;
    use crate::error::Error;
    use crate::query::steps::FetchFromClassStep;
    use crate::query::SelectExecutionPlan;
    use crate::storage::{Database, MemoryDatabase};
    use crate::testing::{column, ctx, map, people_db, plan_over_rows, rows_ctx};
    use quarry_sql::Value;

    #[test]
    fn test_filter_drops_unknown() {
        let ctx = rows_ctx(vec![
            map(&[("a", Value::Int(1))]),
            map(&[("a", Value::Null)]),
            map(&[("a", Value::Int(3))]),
        ]);
        let mut plan = plan_over_rows(vec![Box::new(FilterStep::new(Condition::gt("a", 1)))]);
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(column(&rows, "a"), vec![Value::Int(3)]);
    }

    #[test]
    fn test_filter_requires_upstream() {
        let ctx = ctx(people_db());
        let mut plan = SelectExecutionPlan::new();
        plan.chain(Box::new(FilterStep::new(Condition::Constant(true))));
        assert!(matches!(
            plan.start(&ctx),
            Err(Error::MissingUpstream("FilterStep"))
        ));
    }

    #[test]
    fn test_filter_by_class_is_polymorphic() {
        let mut db = MemoryDatabase::new();
        db.create_class(ClassDef::new("Animal")).unwrap();
        db.create_class(ClassDef::new("Dog").with_superclass("Animal")).unwrap();
        db.create_class(ClassDef::new("Cat").with_superclass("Animal")).unwrap();
        db.insert("Animal", [("n", 1)]).unwrap();
        db.insert("Dog", [("n", 2)]).unwrap();
        db.insert("Cat", [("n", 3)]).unwrap();
        let clusters = db.schema().polymorphic_clusters("Animal");
        let ctx = ctx(db);

        let mut plan = SelectExecutionPlan::new();
        plan.chain(Box::new(FetchFromClassStep::new("Animal", clusters, true)));
        plan.chain(Box::new(FilterByClassStep::new("Dog")));
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(column(&rows, "n"), vec![Value::Int(2)]);
    }
}
