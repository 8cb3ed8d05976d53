//! Per-execution command context.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use quarry_sql::{EvalContext, RowAccess, SelectStatement, TimeoutPolicy, Value};
use tracing::warn;

use super::cache::PlanCache;
use super::planner::SelectPlanner;
use super::statistics::QueryStats;
use crate::config::ExecutionConfig;
use crate::error::{Error, Result};
use crate::storage::Database;

/// Cooperative cancellation flag, shared between the caller and the
/// running pipeline.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken(Arc<AtomicBool>);

impl InterruptToken {
    /// Create a token that is not interrupted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Wall-clock deadline of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Instant after which the execution is late.
    pub at: Instant,
    /// Configured budget, for error messages.
    pub millis: u64,
    /// What to do once late.
    pub policy: TimeoutPolicy,
}

/// State threaded through planning and execution of one statement.
///
/// The context is owned by a single execution and is not shared across
/// threads. Only the database, the statistics table and the plan cache are
/// shared with other executions.
pub struct CommandContext {
    db: Arc<dyn Database>,
    config: ExecutionConfig,
    stats: Arc<QueryStats>,
    plan_cache: Option<Arc<PlanCache>>,
    parameters: HashMap<String, Value>,
    variables: RefCell<HashMap<String, Value>>,
    interrupt: InterruptToken,
    deadline: Cell<Option<Deadline>>,
    profiling: bool,
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("config", &self.config)
            .field("parameters", &self.parameters)
            .field("variables", &self.variables.borrow())
            .field("deadline", &self.deadline.get())
            .field("profiling", &self.profiling)
            .finish_non_exhaustive()
    }
}

impl CommandContext {
    /// Create a context with default configuration and private statistics.
    pub fn new(db: Arc<dyn Database>) -> Self {
        let config = ExecutionConfig::default();
        let stats = Arc::new(QueryStats::new(config.stats_ewma_weight));
        Self {
            db,
            config,
            stats,
            plan_cache: None,
            parameters: HashMap::new(),
            variables: RefCell::new(HashMap::new()),
            interrupt: InterruptToken::new(),
            deadline: Cell::new(None),
            profiling: false,
        }
    }

    /// Use a configuration.
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a statistics table.
    pub fn with_stats(mut self, stats: Arc<QueryStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Share a plan cache.
    pub fn with_plan_cache(mut self, cache: Arc<PlanCache>) -> Self {
        self.plan_cache = Some(cache);
        self
    }

    /// Bind a parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Use an interrupt token supplied by the caller.
    pub fn with_interrupt(mut self, token: InterruptToken) -> Self {
        self.interrupt = token;
        self
    }

    /// Enable per-step profiling.
    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    /// Storage.
    pub fn db(&self) -> &dyn Database {
        self.db.as_ref()
    }

    /// Configuration.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Shared index statistics.
    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    /// Shared plan cache, if any.
    pub fn plan_cache(&self) -> Option<&PlanCache> {
        self.plan_cache.as_deref()
    }

    /// Whether steps should record their cost.
    pub fn is_profiling(&self) -> bool {
        self.profiling
    }

    /// The interrupt token.
    pub fn interrupt_token(&self) -> &InterruptToken {
        &self.interrupt
    }

    /// Bind a context variable.
    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.variables.borrow_mut().insert(name.into(), value);
    }

    /// Fail if the execution was cancelled.
    pub fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.is_interrupted() {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    /// Start the wall-clock budget of one execution. An earlier deadline
    /// already in place wins.
    ///
    /// Returns the deadline that was in place, to be handed back to
    /// [`restore_deadline`](Self::restore_deadline) when the execution ends.
    pub fn set_deadline(&self, millis: u64, policy: TimeoutPolicy) -> Option<Deadline> {
        let previous = self.deadline.get();
        let at = Instant::now() + Duration::from_millis(millis);
        match previous {
            Some(current) if current.at <= at => {}
            _ => self.deadline.set(Some(Deadline { at, millis, policy })),
        }
        previous
    }

    /// Put back the deadline returned by [`set_deadline`](Self::set_deadline).
    pub fn restore_deadline(&self, previous: Option<Deadline>) {
        self.deadline.set(previous);
    }

    /// Current deadline.
    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline.get()
    }

    /// Check the deadline.
    ///
    /// Returns `Ok(true)` when the deadline passed under the RETURN policy
    /// (the caller should stop producing rows) and fails under the
    /// EXCEPTION policy.
    pub fn check_timeout(&self) -> Result<bool> {
        let Some(deadline) = self.deadline.get() else {
            return Ok(false);
        };
        if Instant::now() < deadline.at {
            return Ok(false);
        }
        match deadline.policy {
            TimeoutPolicy::Return => Ok(true),
            TimeoutPolicy::Exception => {
                warn!(millis = deadline.millis, "statement timed out");
                Err(Error::Timeout {
                    millis: deadline.millis,
                })
            }
        }
    }

    /// Child context for a nested query: same database, configuration,
    /// statistics, cache, parameters, token and deadline; a copy of the
    /// variables.
    pub fn fork(&self) -> CommandContext {
        CommandContext {
            db: Arc::clone(&self.db),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
            plan_cache: self.plan_cache.clone(),
            parameters: self.parameters.clone(),
            variables: RefCell::new(self.variables.borrow().clone()),
            interrupt: self.interrupt.clone(),
            deadline: Cell::new(self.deadline.get()),
            profiling: self.profiling,
        }
    }

    /// Plan and run a statement in this context, collecting every row.
    pub fn execute(&self, statement: &SelectStatement) -> Result<Vec<super::row::ResultRow>> {
        let mut plan = SelectPlanner::new(statement).plan(self)?;
        plan.fetch_all(self)
    }
}

impl EvalContext for CommandContext {
    fn parameter(&self, name: &str) -> Option<Value> {
        self.parameters.get(name).cloned()
    }

    fn variable(&self, name: &str) -> Option<Value> {
        self.variables.borrow().get(name).cloned()
    }

    fn run_subquery(
        &self,
        statement: &SelectStatement,
        current: Option<&dyn RowAccess>,
    ) -> quarry_sql::Result<Vec<Value>> {
        let child = self.fork();
        if let Some(row) = current {
            child.set_variable("parent", row.to_value());
        }
        let rows = child
            .execute(statement)
            .map_err(|e| quarry_sql::Error::Subquery(Box::new(e)))?;
        Ok(rows.into_iter().map(super::row::ResultRow::into_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDatabase;

    fn ctx() -> CommandContext {
        CommandContext::new(Arc::new(MemoryDatabase::new()))
    }

    #[test]
    fn test_interrupt() {
        let token = InterruptToken::new();
        let ctx = ctx().with_interrupt(token.clone());
        assert!(ctx.check_interrupt().is_ok());
        token.interrupt();
        assert!(matches!(ctx.check_interrupt(), Err(Error::Interrupted)));
    }

    #[test]
    fn test_timeout_policies() {
        let ctx = ctx();
        assert!(!ctx.check_timeout().unwrap());
        ctx.set_deadline(0, TimeoutPolicy::Return);
        assert!(ctx.check_timeout().unwrap());

        let ctx = self::ctx();
        ctx.set_deadline(0, TimeoutPolicy::Exception);
        assert!(matches!(
            ctx.check_timeout(),
            Err(Error::Timeout { millis: 0 })
        ));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let ctx = ctx();
        ctx.set_deadline(0, TimeoutPolicy::Return);
        ctx.set_deadline(60_000, TimeoutPolicy::Exception);
        assert_eq!(ctx.deadline().unwrap().policy, TimeoutPolicy::Return);
    }

    #[test]
    fn test_restore_deadline_ends_the_budget() {
        let ctx = ctx();
        let outer = ctx.set_deadline(0, TimeoutPolicy::Exception);
        assert!(outer.is_none());
        let inner = ctx.set_deadline(60_000, TimeoutPolicy::Return);
        assert_eq!(inner, ctx.deadline());
        ctx.restore_deadline(inner);
        assert!(ctx.check_timeout().is_err());
        ctx.restore_deadline(outer);
        assert!(ctx.deadline().is_none());
        assert!(!ctx.check_timeout().unwrap());
    }

    #[test]
    fn test_fork_copies_variables() {
        let ctx = ctx().with_parameter("p", 1);
        ctx.set_variable("v", Value::Int(2));
        let child = ctx.fork();
        child.set_variable("w", Value::Int(3));
        assert_eq!(child.parameter("p"), Some(Value::Int(1)));
        assert_eq!(child.variable("v"), Some(Value::Int(2)));
        assert_eq!(ctx.variable("w"), None);
    }
}
