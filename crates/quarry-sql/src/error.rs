//! Evaluation error types.

use thiserror::Error;

/// Errors raised while evaluating expressions and conditions.
#[derive(Debug, Error)]
pub enum Error {
    /// A named or positional parameter was referenced but never bound.
    #[error("parameter ':{0}' is not bound")]
    UnboundParameter(String),

    /// An aggregate function was evaluated outside of an aggregation step.
    #[error("aggregate function '{0}' cannot be evaluated on a single row")]
    AggregateOutsideGroup(String),

    /// Function name is not one of the built-ins.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// Function called with the wrong number of arguments.
    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        /// Function name.
        name: String,
        /// Expected argument count.
        expected: usize,
        /// Supplied argument count.
        got: usize,
    },

    /// Operand types do not support the operator.
    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        /// Operator symbol.
        op: &'static str,
        /// Left operand type name.
        left: &'static str,
        /// Right operand type name.
        right: &'static str,
    },

    /// Integer division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// A nested query failed while being evaluated as an expression.
    #[error("subquery failed: {0}")]
    Subquery(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result alias for evaluation.
pub type Result<T> = std::result::Result<T, Error>;
