//! SELECT planning and execution.
//!
//! [`SelectPlanner`] turns a [`quarry_sql::SelectStatement`] into a
//! [`SelectExecutionPlan`]: a chain of [`ExecutionStep`]s, each pulling rows
//! from its upstream through an [`ExecutionStream`]. Plans are cached per
//! statement text in a [`PlanCache`] and invalidated by schema changes.

mod cache;
mod context;
mod explain;
mod index_descriptor;
mod plan;
mod planner;
mod planning_info;
mod row;
mod statistics;
pub mod step;
pub mod steps;
mod stream;

pub use cache::{CacheStats, CachedPlan, PlanCache};
pub use context::{CommandContext, Deadline, InterruptToken};
pub use explain::{ExplainResult, ExplainService, ProfileResult, StepProfile};
pub use index_descriptor::{IndexKeyCondition, IndexSearchDescriptor, KeyScan};
pub use plan::SelectExecutionPlan;
pub use planner::{flatten, SelectPlanner};
pub use planning_info::{AggregatePlan, QueryPlanningInfo};
pub use row::{value_to_json, ResultRow};
pub use statistics::QueryStats;
pub use step::{ExecutionStep, StepBase};
pub use stream::{ExecutionStream, RowSource};
