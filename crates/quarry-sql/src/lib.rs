//! Quarry SQL AST.
//!
//! This crate defines the immutable value objects a parsed SELECT statement
//! is made of, together with their evaluation semantics:
//!
//! - [`value`] - Runtime values and record identities
//! - [`expression`] - Scalar expressions and aggregate calls
//! - [`condition`] - WHERE conditions with SQL NULL semantics
//! - [`statement`] - SELECT statements, projections, ORDER BY, LET, targets
//! - [`eval`] - The row and context traits the engine implements
//! - [`error`] - Evaluation errors
//!
//! Every AST node is `Clone` (cheap copies for cached plans), `PartialEq`
//! (structural equality) and serde-serializable. `Display` renders SQL.

pub mod condition;
pub mod error;
pub mod eval;
pub mod expression;
pub mod statement;
pub mod value;

pub use condition::{like_match, CompareOp, Condition};
pub use error::{Error, Result};
pub use eval::{EmptyRow, EvalContext, RowAccess, StaticContext};
pub use expression::{AggregateCall, AggregateFunction, Expression, RecordAttribute};
pub use statement::{
    Direction, LetItem, LetValue, OrderItem, Projection, ProjectionItem, SelectStatement, Target,
    Timeout, TimeoutPolicy,
};
pub use value::{ArithmeticOp, Rid, Value};
