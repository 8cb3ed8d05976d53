//! Sequential union and cartesian product of sub-plans.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::context::CommandContext;
use crate::query::plan::SelectExecutionPlan;
use crate::query::row::ResultRow;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::{ExecutionStream, RowSource};

/// Run sub-plans one after the other and concatenate their rows.
///
/// Nothing runs concurrently: a sub-plan is started only once the previous
/// one is exhausted. Branches may overlap, so the planner follows this step
/// with a distinct step when that matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelExecStep {
    plans: Vec<SelectExecutionPlan>,
    #[serde(skip)]
    base: StepBase,
}

impl ParallelExecStep {
    /// Concatenate `plans`.
    pub fn new(plans: Vec<SelectExecutionPlan>) -> Self {
        Self {
            plans,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for ParallelExecStep {
    step_common!("ParallelExecStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        Ok(ExecutionStream::sequence(
            self.plans.iter_mut().map(move |plan| plan.start(ctx)),
        ))
    }

    fn close(&mut self) {
        for plan in &mut self.plans {
            plan.close();
        }
        self.base.close();
    }

    fn reset(&mut self) {
        for plan in &mut self.plans {
            plan.reset();
        }
        self.base.reset();
    }

    fn send_timeout(&mut self) {
        for plan in &mut self.plans {
            plan.send_timeout();
        }
        self.base.send_timeout();
    }

    fn set_profiling(&mut self, profiling: bool) {
        for plan in &mut self.plans {
            plan.set_profiling(profiling);
        }
        self.base.set_profiling(profiling);
    }

    fn can_be_cached(&self) -> bool {
        self.plans.iter().all(SelectExecutionPlan::can_be_cached)
    }

    fn describe(&self) -> String {
        format!("PARALLEL ({} branches)", self.plans.len())
    }

    fn sub_plans(&self) -> Vec<&SelectExecutionPlan> {
        self.plans.iter().collect()
    }
}

/// Cross the rows of several sub-plans.
///
/// The first plan is streamed; the others are buffered once. Each output
/// row merges the properties of one combination, later plans overwriting
/// earlier ones on name clashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartesianProductStep {
    plans: Vec<SelectExecutionPlan>,
    #[serde(skip)]
    base: StepBase,
}

impl CartesianProductStep {
    /// Cross `plans`.
    pub fn new(plans: Vec<SelectExecutionPlan>) -> Self {
        Self {
            plans,
            base: StepBase::default(),
        }
    }
}

struct ProductSource<'a> {
    first: ExecutionStream<'a>,
    buffers: Vec<Vec<ResultRow>>,
    current: Option<ResultRow>,
    // one combination is fully consumed before the next, so a single
    // position vector is enough
    positions: Vec<usize>,
}

impl ProductSource<'_> {
    fn advance(&mut self) {
        for i in (0..self.positions.len()).rev() {
            self.positions[i] += 1;
            if self.positions[i] < self.buffers[i].len() {
                return;
            }
            self.positions[i] = 0;
        }
        self.current = None;
    }
}

impl RowSource for ProductSource<'_> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        if self.current.is_none() {
            match self.first.next()? {
                Some(row) => {
                    self.current = Some(row);
                    self.positions.iter_mut().for_each(|p| *p = 0);
                }
                None => return Ok(None),
            }
        }
        let Some(current) = &self.current else {
            return Ok(None);
        };
        let mut merged = ResultRow::from_map(current.properties().to_vec());
        merged.inherit_metadata(current);
        for (buffer, &position) in self.buffers.iter().zip(&self.positions) {
            for (name, value) in buffer[position].properties() {
                merged.set(name.clone(), value.clone());
            }
        }
        self.advance();
        Ok(Some(merged))
    }

    fn close(&mut self) {
        self.first.close();
    }
}

impl ExecutionStep for CartesianProductStep {
    step_common!("CartesianProductStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        let Some((first, rest)) = self.plans.split_first_mut() else {
            return Ok(ExecutionStream::empty());
        };
        let mut buffers = Vec::with_capacity(rest.len());
        for plan in rest.iter_mut() {
            buffers.push(plan.fetch_all(ctx)?);
        }
        if buffers.iter().any(Vec::is_empty) {
            return Ok(ExecutionStream::empty());
        }
        let positions = vec![0; buffers.len()];
        Ok(ExecutionStream::new(ProductSource {
            first: first.start(ctx)?,
            buffers,
            current: None,
            positions,
        }))
    }

    fn close(&mut self) {
        for plan in &mut self.plans {
            plan.close();
        }
        self.base.close();
    }

    fn reset(&mut self) {
        for plan in &mut self.plans {
            plan.reset();
        }
        self.base.reset();
    }

    fn send_timeout(&mut self) {
        for plan in &mut self.plans {
            plan.send_timeout();
        }
        self.base.send_timeout();
    }

    fn set_profiling(&mut self, profiling: bool) {
        for plan in &mut self.plans {
            plan.set_profiling(profiling);
        }
        self.base.set_profiling(profiling);
    }

    fn can_be_cached(&self) -> bool {
        self.plans.iter().all(SelectExecutionPlan::can_be_cached)
    }

    fn describe(&self) -> String {
        format!("CARTESIAN PRODUCT ({} plans)", self.plans.len())
    }

    fn sub_plans(&self) -> Vec<&SelectExecutionPlan> {
        self.plans.iter().collect()
    }
}
