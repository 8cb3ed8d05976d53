//! Execution step abstraction.
//!
//! A plan is an owned chain: every step exclusively owns its predecessor,
//! and the consumer drives the tail. Starting a step recursively starts its
//! upstream and returns one [`ExecutionStream`] per execution. Steps hold
//! only configuration fixed at planning time; everything that changes while
//! rows flow lives inside the streams, which is what makes [`ExecutionStep::copy`]
//! cheap and safe for cached plans.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value as JsonValue;

use super::context::CommandContext;
use super::stream::ExecutionStream;
use crate::error::{Error, Result};

/// Chaining, lifecycle and profiling state shared by every step.
#[derive(Debug, Default)]
pub struct StepBase {
    prev: Option<Box<dyn ExecutionStep>>,
    profiling: bool,
    started: bool,
    closed: bool,
    timed_out: bool,
    cost: Arc<AtomicU64>,
}

/// Cloning a base yields a fresh, unstarted copy of the whole upstream
/// chain with its own cost counter.
impl Clone for StepBase {
    fn clone(&self) -> Self {
        Self {
            prev: self.prev.as_ref().map(|p| p.copy()),
            profiling: self.profiling,
            started: false,
            closed: false,
            timed_out: false,
            cost: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl StepBase {
    /// Upstream step.
    pub fn prev(&self) -> Option<&dyn ExecutionStep> {
        self.prev.as_deref()
    }

    /// Start the upstream step, failing when there is none.
    pub fn start_prev<'a>(
        &'a mut self,
        ctx: &'a CommandContext,
        step: &'static str,
    ) -> Result<ExecutionStream<'a>> {
        match self.prev.as_mut() {
            Some(prev) => prev.start(ctx),
            None => Err(Error::MissingUpstream(step)),
        }
    }

    /// Run the upstream step to completion for its side effects.
    ///
    /// Source steps call this before producing rows: a predecessor of a
    /// source only exists to bind variables (global LET).
    pub fn drain_prev(&mut self, ctx: &CommandContext) -> Result<()> {
        if let Some(prev) = self.prev.as_mut() {
            let mut stream = prev.start(ctx)?;
            while stream.next()?.is_some() {}
            stream.close();
        }
        Ok(())
    }

    /// Close the upstream chain without touching this step's guard.
    pub fn close_prev(&mut self) {
        if let Some(prev) = self.prev.as_mut() {
            prev.close();
        }
    }

    /// Mark the step closed and close its upstream. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.close_prev();
    }

    /// Record that the execution ran out of time and pass the signal
    /// upstream.
    pub fn send_timeout(&mut self) {
        self.timed_out = true;
        if let Some(prev) = self.prev.as_mut() {
            prev.send_timeout();
        }
    }

    /// Whether the last execution was cut short by its timeout.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Make the step and its upstream startable again.
    pub fn reset(&mut self) {
        self.started = false;
        self.closed = false;
        self.timed_out = false;
        if let Some(prev) = self.prev.as_mut() {
            prev.reset();
        }
    }

    /// Set the profiling flag here and upstream.
    pub fn set_profiling(&mut self, profiling: bool) {
        self.profiling = profiling;
        if let Some(prev) = self.prev.as_mut() {
            prev.set_profiling(profiling);
        }
    }

    /// Whether profiling is enabled.
    pub fn is_profiling(&self) -> bool {
        self.profiling
    }

    fn cost_nanos(&self) -> u64 {
        self.cost.load(Ordering::Relaxed)
    }
}

/// A physical operator.
pub trait ExecutionStep: Send + Sync + fmt::Debug {
    /// Operator name, also used as the `type` of its record.
    fn name(&self) -> &'static str;

    /// Shared state.
    fn base(&self) -> &StepBase;

    /// Shared state, mutably.
    fn base_mut(&mut self) -> &mut StepBase;

    /// Operator-specific start logic.
    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>>;

    /// Fresh copy with reset runtime state, upstream included.
    fn copy(&self) -> Box<dyn ExecutionStep>;

    /// Generic key-value record of the step configuration.
    fn to_record(&self) -> Result<JsonValue>;

    /// Start the step.
    ///
    /// Fails when the step was already started and not reset. With profiling
    /// enabled the time spent starting and pulling is added to [`cost`].
    ///
    /// [`cost`]: ExecutionStep::cost
    fn start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        if self.base().started {
            return Err(Error::StepAlreadyStarted(self.name()));
        }
        let base = self.base_mut();
        base.started = true;
        base.closed = false;
        if !base.profiling {
            return self.internal_start(ctx);
        }
        let cost = Arc::clone(&base.cost);
        let begin = Instant::now();
        let stream = self.internal_start(ctx);
        cost.fetch_add(begin.elapsed().as_nanos() as u64, Ordering::Relaxed);
        Ok(stream?.profiled(cost))
    }

    /// Close the step and its upstream. Idempotent.
    fn close(&mut self) {
        self.base_mut().close();
    }

    /// Propagate a timeout signal upstream. Steps holding sub-plans pass
    /// it into them as well.
    fn send_timeout(&mut self) {
        self.base_mut().send_timeout();
    }

    /// Make the step startable again.
    fn reset(&mut self) {
        self.base_mut().reset();
    }

    /// Whether the step's behavior is fully determined at planning time.
    fn can_be_cached(&self) -> bool {
        false
    }

    /// Set the upstream step.
    fn set_prev(&mut self, prev: Box<dyn ExecutionStep>) {
        self.base_mut().prev = Some(prev);
    }

    /// Detach the upstream step.
    fn take_prev(&mut self) -> Option<Box<dyn ExecutionStep>> {
        self.base_mut().prev.take()
    }

    /// Enable or disable profiling for this step and its upstream.
    fn set_profiling(&mut self, profiling: bool) {
        self.base_mut().set_profiling(profiling);
    }

    /// Time spent in this step while profiling.
    fn cost(&self) -> Duration {
        Duration::from_nanos(self.base().cost_nanos())
    }

    /// One-line description used by [`pretty_print`](ExecutionStep::pretty_print).
    fn describe(&self) -> String {
        self.name().to_string()
    }

    /// Nested plans, printed below the step.
    fn sub_plans(&self) -> Vec<&super::plan::SelectExecutionPlan> {
        Vec::new()
    }

    /// Human-readable rendering of this step (not its upstream).
    fn pretty_print(&self, depth: usize, indent: usize) -> String {
        let pad = " ".repeat(depth * indent);
        let mut out = format!("{pad}+ {}", self.describe());
        if self.base().profiling {
            out.push_str(&format!(" ({}μs)", self.cost().as_micros()));
        }
        if self.base().timed_out {
            out.push_str(" [timed out]");
        }
        for plan in self.sub_plans() {
            out.push('\n');
            out.push_str(&plan.pretty_print(depth + 1, indent));
        }
        out
    }
}

impl Clone for Box<dyn ExecutionStep> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

/// Serialize a step's configuration and tag it with its type and cost.
pub fn step_record<S>(step: &S) -> Result<JsonValue>
where
    S: ExecutionStep + Serialize,
{
    let mut record = serde_json::to_value(step)?;
    if let JsonValue::Object(map) = &mut record {
        map.insert("type".to_string(), JsonValue::String(step.name().to_string()));
        if step.base().profiling {
            map.insert("cost".to_string(), JsonValue::from(step.base().cost_nanos()));
        }
    }
    Ok(record)
}

/// Implements the boilerplate methods of [`ExecutionStep`] for a step type
/// with a `base: StepBase` field that derives `Clone` and `Serialize`.
macro_rules! step_common {
    ($name:literal) => {
        fn name(&self) -> &'static str {
            $name
        }

        fn base(&self) -> &$crate::query::step::StepBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut $crate::query::step::StepBase {
            &mut self.base
        }

        fn copy(&self) -> Box<dyn $crate::query::step::ExecutionStep> {
            Box::new(self.clone())
        }

        fn to_record(&self) -> $crate::error::Result<serde_json::Value> {
            $crate::query::step::step_record(self)
        }
    };
}

pub(crate) use step_common;
