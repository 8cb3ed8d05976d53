//! EXPLAIN and PROFILE.
//!
//! EXPLAIN plans a statement without running it; PROFILE runs it with
//! profiling enabled and reports the time spent in every step.

use std::time::Duration;

use quarry_sql::SelectStatement;
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::context::CommandContext;
use super::planner::SelectPlanner;
use super::row::ResultRow;
use crate::error::Result;

/// Plan description returned by EXPLAIN.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResult {
    /// Generic plan record, loadable with `SelectExecutionPlan::from_record`.
    pub execution_plan: JsonValue,
    /// Human-readable plan, one step per line.
    pub execution_plan_as_string: String,
    /// Whether an equivalent plan is currently cached.
    pub plan_cached: bool,
}

/// Time spent in one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepProfile {
    pub step: &'static str,
    #[serde(rename = "costMicros")]
    pub cost_micros: u64,
}

/// Rows and per-step timings of a profiled execution.
#[derive(Debug, Clone)]
pub struct ProfileResult {
    pub explain: ExplainResult,
    pub rows: Vec<ResultRow>,
    /// Steps from source to tail.
    pub steps: Vec<StepProfile>,
}

impl ProfileResult {
    /// Sum of the step costs.
    pub fn total(&self) -> Duration {
        Duration::from_micros(self.steps.iter().map(|s| s.cost_micros).sum())
    }
}

/// Service for explaining and profiling statements.
pub struct ExplainService<'a> {
    ctx: &'a CommandContext,
    indent: usize,
}

impl<'a> ExplainService<'a> {
    /// Create a new explain service over a context.
    pub fn new(ctx: &'a CommandContext) -> Self {
        Self { ctx, indent: 2 }
    }

    /// Indentation of nested plans in the text rendering.
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    /// Explain a statement without executing it. The plan cache is
    /// consulted but never populated.
    pub fn explain(&self, statement: &SelectStatement) -> Result<ExplainResult> {
        let plan_cached = self.ctx.plan_cache().is_some_and(|cache| {
            cache.contains(&statement.to_string(), self.ctx.db().schema().version())
        });
        let plan = SelectPlanner::new(statement).build(self.ctx)?;
        Ok(ExplainResult {
            execution_plan: plan.to_record()?,
            execution_plan_as_string: plan.pretty_print(0, self.indent),
            plan_cached,
        })
    }

    /// Run a statement with profiling enabled.
    pub fn profile(&self, statement: &SelectStatement) -> Result<ProfileResult> {
        let ctx = self.ctx.fork().with_profiling(true);
        let mut plan = SelectPlanner::new(statement).plan(&ctx)?;
        plan.set_profiling(true);
        let rows = plan.fetch_all(&ctx)?;

        let steps = plan
            .steps()
            .iter()
            .map(|step| StepProfile {
                step: step.name(),
                cost_micros: u64::try_from(step.cost().as_micros()).unwrap_or(u64::MAX),
            })
            .collect();
        let explain = ExplainResult {
            execution_plan: plan.to_record()?,
            execution_plan_as_string: plan.pretty_print(0, self.indent),
            plan_cached: false,
        };
        Ok(ProfileResult {
            explain,
            rows,
            steps,
        })
    }
}
