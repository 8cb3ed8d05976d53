//! Physical operators.
//!
//! - [`fetch_class`] - Class and cluster scans, `count(*)` from cluster sizes
//! - [`fetch_rids`] - Explicit identities, variables and the empty target
//! - [`fetch_index`] - Index range scans and record loading
//! - [`subquery`] - Nested SELECT as a target
//! - [`filter`] - WHERE and class filters
//! - [`let_steps`] - Global and per-row LET
//! - [`projection`] - Projection, `expand()` and UNWIND
//! - [`aggregate`] - Hash aggregation
//! - [`order_by`] - Bounded blocking sort
//! - [`distinct`] - Duplicate elimination
//! - [`skip_limit`] - SKIP and LIMIT
//! - [`timeout`] - Statement timeout
//! - [`combine`] - Sequential union and cartesian product of sub-plans

pub mod aggregate;
pub mod combine;
pub mod distinct;
pub mod fetch_class;
pub mod fetch_index;
pub mod fetch_rids;
pub mod filter;
pub mod let_steps;
pub mod order_by;
pub mod projection;
pub mod skip_limit;
pub mod subquery;
pub mod timeout;

pub use aggregate::{AggregateItem, AggregateKind, AggregateStep, GuaranteeEmptyCountStep};
pub use combine::{CartesianProductStep, ParallelExecStep};
pub use distinct::{DistinctExecutionStep, DistinctFilter};
pub use fetch_class::{CountFromClassStep, FetchFromClassStep, FetchFromClustersStep};
pub use fetch_index::{FetchFromIndexStep, FetchFromIndexValuesStep, GetValueFromIndexEntryStep};
pub use fetch_rids::{EmptyDataGeneratorStep, FetchFromRidsStep, FetchFromVariableStep, VariableSource};
pub use filter::{FilterByClassStep, FilterStep};
pub use let_steps::{GlobalLetExpressionStep, GlobalLetQueryStep, LetExpressionStep, LetQueryStep};
pub use order_by::{OrderByStep, SortBuffer};
pub use projection::{ExpandStep, ProjectionCalculationStep, UnwindStep};
pub use skip_limit::{LimitExecutionStep, SkipExecutionStep};
pub use subquery::SubQueryStep;
pub use timeout::TimeoutStep;

use serde_json::Value as JsonValue;

use super::step::ExecutionStep;
use crate::error::{Error, Result};

/// Rebuild a step from its generic record.
///
/// The record carries the step configuration and a `type` tag; runtime
/// state and the upstream link are not part of it.
pub fn step_from_record(record: &JsonValue) -> Result<Box<dyn ExecutionStep>> {
    macro_rules! decode {
        ($($name:literal => $ty:ty),* $(,)?) => {
            match record.get("type").and_then(JsonValue::as_str) {
                $(Some($name) => Ok(Box::new(serde_json::from_value::<$ty>(record.clone())?)),)*
                Some(other) => Err(Error::Serialization(format!("unknown step type '{other}'"))),
                None => Err(Error::Serialization("step record has no type".to_string())),
            }
        };
    }

    decode! {
        "FetchFromClassStep" => FetchFromClassStep,
        "FetchFromClustersStep" => FetchFromClustersStep,
        "CountFromClassStep" => CountFromClassStep,
        "FetchFromRidsStep" => FetchFromRidsStep,
        "FetchFromVariableStep" => FetchFromVariableStep,
        "EmptyDataGeneratorStep" => EmptyDataGeneratorStep,
        "SubQueryStep" => SubQueryStep,
        "FetchFromIndexStep" => FetchFromIndexStep,
        "FetchFromIndexValuesStep" => FetchFromIndexValuesStep,
        "GetValueFromIndexEntryStep" => GetValueFromIndexEntryStep,
        "FilterStep" => FilterStep,
        "FilterByClassStep" => FilterByClassStep,
        "GlobalLetExpressionStep" => GlobalLetExpressionStep,
        "GlobalLetQueryStep" => GlobalLetQueryStep,
        "LetExpressionStep" => LetExpressionStep,
        "LetQueryStep" => LetQueryStep,
        "ProjectionCalculationStep" => ProjectionCalculationStep,
        "ExpandStep" => ExpandStep,
        "UnwindStep" => UnwindStep,
        "AggregateStep" => AggregateStep,
        "GuaranteeEmptyCountStep" => GuaranteeEmptyCountStep,
        "OrderByStep" => OrderByStep,
        "DistinctExecutionStep" => DistinctExecutionStep,
        "SkipExecutionStep" => SkipExecutionStep,
        "LimitExecutionStep" => LimitExecutionStep,
        "TimeoutStep" => TimeoutStep,
        "ParallelExecStep" => ParallelExecStep,
        "CartesianProductStep" => CartesianProductStep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = step_from_record(&serde_json::json!({"type": "Nope"})).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(step_from_record(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_record_round_trip_keeps_configuration() {
        let step = FetchFromClassStep::new("Person", vec![3, 4], false);
        let record = step.to_record().unwrap();
        assert_eq!(record["type"], "FetchFromClassStep");
        let rebuilt = step_from_record(&record).unwrap();
        assert_eq!(rebuilt.to_record().unwrap(), record);
    }
}
