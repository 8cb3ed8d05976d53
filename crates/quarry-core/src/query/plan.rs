//! Execution plans.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use super::context::CommandContext;
use super::row::ResultRow;
use super::step::ExecutionStep;
use super::steps::step_from_record;
use super::stream::ExecutionStream;
use crate::error::{Error, Result};

const PLAN_TYPE: &str = "SelectExecutionPlan";

/// A chain of steps. The plan owns the tail, which owns everything upstream.
#[derive(Debug, Clone, Default)]
pub struct SelectExecutionPlan {
    tail: Option<Box<dyn ExecutionStep>>,
}

impl SelectExecutionPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step; the current tail becomes its upstream.
    pub fn chain(&mut self, mut step: Box<dyn ExecutionStep>) {
        if let Some(prev) = self.tail.take() {
            step.set_prev(prev);
        }
        self.tail = Some(step);
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.tail.is_none()
    }

    /// Start the plan. An empty plan produces no rows.
    pub fn start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        match self.tail.as_mut() {
            Some(tail) => tail.start(ctx),
            None => Ok(ExecutionStream::empty()),
        }
    }

    /// Close every step.
    pub fn close(&mut self) {
        if let Some(tail) = self.tail.as_mut() {
            tail.close();
        }
    }

    /// Make the plan startable again.
    pub fn reset(&mut self) {
        if let Some(tail) = self.tail.as_mut() {
            tail.reset();
        }
    }

    /// Propagate a timeout signal from the tail to the source.
    pub fn send_timeout(&mut self) {
        if let Some(tail) = self.tail.as_mut() {
            tail.send_timeout();
        }
    }

    /// Fresh copy with reset runtime state.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Whether every step may be reused across executions.
    pub fn can_be_cached(&self) -> bool {
        self.steps().iter().all(|s| s.can_be_cached())
    }

    /// Enable or disable profiling on every step.
    pub fn set_profiling(&mut self, profiling: bool) {
        if let Some(tail) = self.tail.as_mut() {
            tail.set_profiling(profiling);
        }
    }

    /// Steps from source to tail.
    pub fn steps(&self) -> Vec<&dyn ExecutionStep> {
        let mut steps = Vec::new();
        let mut current = self.tail.as_deref();
        while let Some(step) = current {
            steps.push(step);
            current = step.base().prev();
        }
        steps.reverse();
        steps
    }

    /// Step names from source to tail.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps().iter().map(|s| s.name()).collect()
    }

    /// Human-readable tree, one step per line, source first.
    pub fn pretty_print(&self, depth: usize, indent: usize) -> String {
        self.steps()
            .iter()
            .map(|s| s.pretty_print(depth, indent))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Generic record: `{"type": "SelectExecutionPlan", "steps": [...]}`.
    pub fn to_record(&self) -> Result<JsonValue> {
        let steps = self
            .steps()
            .iter()
            .map(|s| s.to_record())
            .collect::<Result<Vec<_>>>()?;
        Ok(json!({ "type": PLAN_TYPE, "steps": steps }))
    }

    /// Rebuild a plan from its record.
    pub fn from_record(record: &JsonValue) -> Result<Self> {
        if record.get("type").and_then(JsonValue::as_str) != Some(PLAN_TYPE) {
            return Err(Error::Serialization(format!(
                "expected a {PLAN_TYPE} record"
            )));
        }
        let steps = record
            .get("steps")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| Error::Serialization("plan record has no steps".to_string()))?;
        let mut plan = Self::new();
        for step in steps {
            plan.chain(step_from_record(step)?);
        }
        Ok(plan)
    }

    /// Run the plan to completion and close it.
    ///
    /// A timeout error is raised only after the timeout signal went back
    /// through every step.
    pub fn fetch_all(&mut self, ctx: &CommandContext) -> Result<Vec<ResultRow>> {
        let rows = self.start(ctx).and_then(ExecutionStream::collect_rows);
        if let Err(Error::Timeout { millis }) = &rows {
            debug!(millis, "sending timeout upstream");
            self.send_timeout();
        }
        self.close();
        rows
    }
}

impl Serialize for SelectExecutionPlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_record()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SelectExecutionPlan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let record = JsonValue::deserialize(deserializer)?;
        Self::from_record(&record).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use quarry_sql::{Condition, OrderItem, SelectStatement};

    use super::*;
    use crate::query::SelectPlanner;
    use crate::testing::{ctx, people_db};

    fn names(rows: &[ResultRow]) -> Vec<String> {
        rows.iter()
            .map(|r| r.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string())
            .collect()
    }

    #[test]
    fn test_copy_runs_independently_of_original() {
        let ctx = ctx(people_db());
        let stmt = SelectStatement::from_class("Person")
            .filter(Condition::ge("age", 30))
            .order_by(OrderItem::asc("name"));
        let mut plan = SelectPlanner::new(&stmt).build(&ctx).unwrap();
        {
            let mut stream = plan.start(&ctx).unwrap();
            assert!(stream.next().unwrap().is_some());
        }
        let mut copy = plan.copy();
        assert!(matches!(plan.start(&ctx), Err(Error::StepAlreadyStarted(_))));

        let from_copy = copy.fetch_all(&ctx).unwrap();
        plan.reset();
        let from_original = plan.fetch_all(&ctx).unwrap();
        assert_eq!(names(&from_copy), vec!["alice", "carol", "erin", "frank"]);
        assert_eq!(names(&from_copy), names(&from_original));
    }

    #[test]
    fn test_empty_plan_yields_nothing() {
        let ctx = ctx(people_db());
        let mut plan = SelectExecutionPlan::new();
        assert!(plan.is_empty());
        assert!(plan.fetch_all(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_from_record_rejects_foreign_records() {
        assert!(matches!(
            SelectExecutionPlan::from_record(&json!({ "type": "Other", "steps": [] })),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            SelectExecutionPlan::from_record(&json!({ "type": PLAN_TYPE })),
            Err(Error::Serialization(_))
        ));
    }
}
