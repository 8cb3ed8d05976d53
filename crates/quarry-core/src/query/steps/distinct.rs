//! Duplicate elimination.

use std::collections::HashSet;

use quarry_sql::Value;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MAX_HEAP_ELEMENTS_KEY;
use crate::error::{Error, Result};
use crate::query::context::CommandContext;
use crate::query::row::ResultRow;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;
use crate::rid_set::RidSet;

/// Seen-set of a DISTINCT pass.
///
/// Rows backed by a persistent record are compared by identity, computed
/// rows by content. Only the content set counts against the heap budget.
#[derive(Debug, Default)]
pub struct DistinctFilter {
    records: RidSet,
    computed: HashSet<Value>,
    max_heap: Option<usize>,
}

impl DistinctFilter {
    /// Filter holding at most `max_heap` computed rows.
    pub fn new(max_heap: Option<usize>) -> Self {
        Self {
            max_heap,
            ..Self::default()
        }
    }

    /// Whether the row was not seen before. Fails once the computed rows
    /// exceed the budget, after releasing the seen-set.
    pub fn admit(&mut self, row: &ResultRow) -> Result<bool> {
        if let Some(rid) = row.identity().filter(|rid| rid.is_persistent()) {
            return Ok(self.records.insert(rid));
        }
        let fresh = self.computed.insert(row.content_key());
        if let Some(limit) = self.max_heap {
            if fresh && self.computed.len() > limit {
                self.records.clear();
                self.computed.clear();
                warn!(limit, "DISTINCT exceeded the heap element limit");
                return Err(Error::HeapLimitExceeded {
                    operation: "DISTINCT",
                    limit,
                    config_key: MAX_HEAP_ELEMENTS_KEY,
                });
            }
        }
        Ok(fresh)
    }

    /// Number of distinct keys seen.
    pub fn len(&self) -> usize {
        self.records.len() + self.computed.len()
    }

    /// Whether nothing was seen yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// SELECT DISTINCT.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistinctExecutionStep {
    #[serde(skip)]
    base: StepBase,
}

impl DistinctExecutionStep {
    /// Create the step.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionStep for DistinctExecutionStep {
    step_common!("DistinctExecutionStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let upstream = self.base.start_prev(ctx, "DistinctExecutionStep")?;
        let mut seen = DistinctFilter::new(ctx.config().max_heap_elements);
        Ok(upstream.filter(move |row| seen.admit(row)))
    }

    fn close(&mut self) {
        self.base.close_prev();
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "DISTINCT".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::query::steps::FetchFromRidsStep;
    use crate::query::SelectExecutionPlan;
    use crate::testing::{column, ctx, map, people_db, plan_over_rows, rows_ctx};
    use quarry_sql::Rid;

    fn letters(items: &[&str]) -> Vec<Value> {
        items
            .iter()
            .map(|s| map(&[("x", Value::from(*s))]))
            .collect()
    }

    #[test]
    fn test_keeps_first_occurrence_order() {
        let ctx = rows_ctx(letters(&["A", "B", "A", "C", "B"]));
        let mut plan = plan_over_rows(vec![Box::new(DistinctExecutionStep::new())]);
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(
            column(&rows, "x"),
            vec![Value::from("A"), Value::from("B"), Value::from("C")]
        );
    }

    #[test]
    fn test_records_compare_by_identity() {
        let ctx = ctx(people_db());
        let mut plan = SelectExecutionPlan::new();
        plan.chain(Box::new(FetchFromRidsStep::new(vec![
            Rid::new(0, 1),
            Rid::new(0, 3),
            Rid::new(0, 1),
        ])));
        plan.chain(Box::new(DistinctExecutionStep::new()));
        assert_eq!(plan.fetch_all(&ctx).unwrap().len(), 2);
    }

    #[test]
    fn test_heap_limit_names_config_key() {
        let ctx = rows_ctx(letters(&["A", "B", "A", "C"]))
            .with_config(ExecutionConfig::default().max_heap_elements(Some(2)));
        let mut plan = plan_over_rows(vec![Box::new(DistinctExecutionStep::new())]);
        let err = plan.fetch_all(&ctx).unwrap_err();
        assert!(matches!(
            err,
            Error::HeapLimitExceeded {
                operation: "DISTINCT",
                limit: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_filter_releases_memory_on_overflow() {
        let mut filter = DistinctFilter::new(Some(1));
        assert!(filter.admit(&ResultRow::new().with_property("a", 1)).unwrap());
        assert!(!filter.admit(&ResultRow::new().with_property("a", 1)).unwrap());
        assert!(filter.admit(&ResultRow::new().with_property("a", 2)).is_err());
        assert!(filter.is_empty());
    }

    #[test]
    fn test_identities_do_not_count_against_heap_limit() {
        let record = |position| {
            let mut row = ResultRow::new();
            row.set_identity(Some(Rid::new(0, position)));
            row
        };
        let mut filter = DistinctFilter::new(Some(2));
        for position in 0..5 {
            assert!(filter.admit(&record(position)).unwrap());
        }
        assert!(!filter.admit(&record(4)).unwrap());
        assert_eq!(filter.len(), 5);
    }

    #[test]
    fn test_distinct_over_more_records_than_heap_limit() {
        let ctx = ctx(people_db())
            .with_config(ExecutionConfig::default().max_heap_elements(Some(2)));
        let mut plan = SelectExecutionPlan::new();
        plan.chain(Box::new(FetchFromRidsStep::new(
            (0..6).chain(0..6).map(|p| Rid::new(0, p)).collect(),
        )));
        plan.chain(Box::new(DistinctExecutionStep::new()));
        assert_eq!(plan.fetch_all(&ctx).unwrap().len(), 6);
    }
}
