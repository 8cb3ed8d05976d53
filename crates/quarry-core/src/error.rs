//! Core error types.

use thiserror::Error;

/// Broad classes of failure, used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The statement cannot be planned. Never retried.
    Planning,
    /// An operator was driven in a way its contract forbids.
    ExecutionState,
    /// A configured memory bound was hit; adjust configuration and re-run.
    ResourceLimit,
    /// The statement ran past its timeout.
    Timeout,
    /// The execution was cancelled.
    Interruption,
    /// An expression could not be evaluated.
    Evaluation,
    /// Storage or serialization failure.
    Storage,
}

/// Core query errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Target class does not exist.
    #[error("class '{0}' not found")]
    ClassNotFound(String),

    /// Index referenced by a plan does not exist.
    #[error("index '{0}' not found")]
    IndexNotFound(String),

    /// A condition shape the chosen index cannot serve.
    #[error("index '{index}' cannot serve condition '{condition}'")]
    UnsupportedIndexCondition {
        /// Index name.
        index: String,
        /// Offending condition.
        condition: String,
    },

    /// Two range conditions on one field that cannot form a single range.
    #[error("conflicting range conditions on field '{field}': {detail}")]
    ConflictingRange {
        /// Field name.
        field: String,
        /// Conditions involved.
        detail: String,
    },

    /// Statement shape not supported by the planner.
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// A step that needs an upstream step was started without one.
    #[error("{0} requires an upstream step")]
    MissingUpstream(&'static str),

    /// A step was started twice without a reset.
    #[error("{0} was already started; reset it before starting again")]
    StepAlreadyStarted(&'static str),

    /// An operator received input it cannot process.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A blocking operator exceeded its configured element budget.
    #[error(
        "{operation} exceeded the limit of {limit} elements held in memory; \
         raise '{config_key}' to allow more"
    )]
    HeapLimitExceeded {
        /// Operation that hit the limit.
        operation: &'static str,
        /// Configured limit.
        limit: usize,
        /// Configuration key controlling the limit.
        config_key: &'static str,
    },

    /// The statement ran past its timeout.
    #[error("statement timed out after {millis} ms")]
    Timeout {
        /// Configured timeout.
        millis: u64,
    },

    /// The execution was cancelled through its interrupt token.
    #[error("execution interrupted")]
    Interrupted,

    /// Expression evaluation failed.
    #[error("evaluation error: {0}")]
    Evaluation(#[from] quarry_sql::Error),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Plan record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ClassNotFound(_)
            | Error::IndexNotFound(_)
            | Error::UnsupportedIndexCondition { .. }
            | Error::ConflictingRange { .. }
            | Error::InvalidStatement(_) => ErrorCategory::Planning,
            Error::MissingUpstream(_) | Error::StepAlreadyStarted(_) | Error::InvalidInput(_) => {
                ErrorCategory::ExecutionState
            }
            Error::HeapLimitExceeded { .. } => ErrorCategory::ResourceLimit,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Interrupted => ErrorCategory::Interruption,
            Error::Evaluation(_) => ErrorCategory::Evaluation,
            Error::Storage(_) | Error::Serialization(_) => ErrorCategory::Storage,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_limit_message_names_config_key() {
        let err = Error::HeapLimitExceeded {
            operation: "DISTINCT",
            limit: 10,
            config_key: crate::config::MAX_HEAP_ELEMENTS_KEY,
        };
        let message = err.to_string();
        assert!(message.contains("query.maxHeapElementsAllowedPerOp"));
        assert_eq!(err.category(), ErrorCategory::ResourceLimit);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::ClassNotFound("X".into()).category(),
            ErrorCategory::Planning
        );
        assert_eq!(Error::Interrupted.category(), ErrorCategory::Interruption);
        assert_eq!(
            Error::Timeout { millis: 5 }.category(),
            ErrorCategory::Timeout
        );
        assert_eq!(
            Error::from(quarry_sql::Error::DivisionByZero).category(),
            ErrorCategory::Evaluation
        );
    }
}
