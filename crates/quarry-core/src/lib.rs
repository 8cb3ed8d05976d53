//! Quarry Core - SELECT planning and pull-based execution.
//!
//! This crate provides the schema catalog, the storage and index interface
//! with an in-memory engine, and the query planner and executor.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod config;
pub mod error;
pub mod query;
pub mod rid_set;
pub mod storage;

#[cfg(test)]
mod testing;

pub use catalog::{ClassDef, IndexDefinition, IndexKind, PropertyDef, PropertyType, Schema};
pub use config::ExecutionConfig;
pub use error::{Error, ErrorCategory, Result};
pub use query::{
    CommandContext, ExecutionStream, ExplainService, PlanCache, QueryStats, ResultRow,
    SelectExecutionPlan, SelectPlanner,
};
pub use rid_set::RidSet;
pub use storage::{Database, Index, MemoryDatabase, MemoryIndex, Record};

/// Re-export the statement AST.
pub use quarry_sql as sql;
