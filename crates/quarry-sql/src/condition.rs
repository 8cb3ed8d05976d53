//! Boolean conditions (WHERE clauses).
//!
//! Comparisons follow SQL semantics: any comparison involving NULL, or
//! values of incomparable kinds, is false.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::eval::{EvalContext, RowAccess};
use crate::expression::{write_list, Expression};
use crate::value::Value;

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `LIKE`
    Like,
}

impl CompareOp {
    /// SQL symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
        }
    }

    /// Whether this is an ordering comparison usable as a range bound.
    pub fn is_range(&self) -> bool {
        matches!(self, CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge)
    }

    /// Operator with operands swapped: `a < b` is `b > a`.
    pub fn flip(&self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            other => *other,
        }
    }

    /// Apply to two already-evaluated values.
    pub fn apply(&self, left: &Value, right: &Value) -> bool {
        match self {
            CompareOp::Like => match (left, right) {
                (Value::String(s), Value::String(p)) => like_match(s, p),
                _ => false,
            },
            CompareOp::Ne => matches!(left.sql_compare(right), Some(o) if o.is_ne()),
            op => match left.sql_compare(right) {
                Some(ord) => match op {
                    CompareOp::Eq => ord.is_eq(),
                    CompareOp::Lt => ord.is_lt(),
                    CompareOp::Le => ord.is_le(),
                    CompareOp::Gt => ord.is_gt(),
                    CompareOp::Ge => ord.is_ge(),
                    CompareOp::Ne | CompareOp::Like => false,
                },
                None => false,
            },
        }
    }
}

/// A boolean condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Conjunction.
    And(Vec<Condition>),
    /// Disjunction.
    Or(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
    /// Binary comparison.
    Compare {
        /// Left operand.
        left: Expression,
        /// Operator.
        op: CompareOp,
        /// Right operand.
        right: Expression,
    },
    /// `left IN right`; the right side evaluates to a list or a scalar.
    In {
        /// Tested value.
        left: Expression,
        /// Candidate values.
        right: Expression,
    },
    /// `left NOT IN right`.
    NotIn {
        /// Tested value.
        left: Expression,
        /// Candidate values.
        right: Expression,
    },
    /// `value BETWEEN low AND high` (inclusive on both ends).
    Between {
        /// Tested value.
        value: Expression,
        /// Lower bound.
        low: Expression,
        /// Upper bound.
        high: Expression,
    },
    /// `expr IS NULL`.
    IsNull(Expression),
    /// `expr IS NOT NULL`.
    IsNotNull(Expression),
    /// `collection CONTAINS value`.
    Contains {
        /// Collection-valued expression.
        collection: Expression,
        /// Element searched for.
        value: Expression,
    },
    /// `left CONTAINSTEXT text` (substring match).
    ContainsText {
        /// String-valued expression.
        left: Expression,
        /// Text searched for.
        text: Expression,
    },
    /// Constant truth value.
    Constant(bool),
}

impl Condition {
    /// Generic comparison builder.
    pub fn compare(left: Expression, op: CompareOp, right: Expression) -> Self {
        Condition::Compare { left, op, right }
    }

    fn field_cmp(field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Condition::Compare {
            left: Expression::field(field),
            op,
            right: Expression::Literal(value.into()),
        }
    }

    /// `field = value`
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CompareOp::Eq, value)
    }

    /// `field <> value`
    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CompareOp::Ne, value)
    }

    /// `field < value`
    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CompareOp::Lt, value)
    }

    /// `field <= value`
    pub fn le(field: &str, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CompareOp::Le, value)
    }

    /// `field > value`
    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CompareOp::Gt, value)
    }

    /// `field >= value`
    pub fn ge(field: &str, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CompareOp::Ge, value)
    }

    /// `field LIKE pattern`
    pub fn like(field: &str, pattern: impl Into<String>) -> Self {
        Self::field_cmp(field, CompareOp::Like, Value::String(pattern.into()))
    }

    /// `field IN [values]`
    pub fn in_list<V: Into<Value>>(field: &str, values: Vec<V>) -> Self {
        Condition::In {
            left: Expression::field(field),
            right: Expression::Literal(Value::from(values)),
        }
    }

    /// `field BETWEEN low AND high`
    pub fn between(field: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Condition::Between {
            value: Expression::field(field),
            low: Expression::Literal(low.into()),
            high: Expression::Literal(high.into()),
        }
    }

    /// `field IS NULL`
    pub fn is_null(field: &str) -> Self {
        Condition::IsNull(Expression::field(field))
    }

    /// `field IS NOT NULL`
    pub fn is_not_null(field: &str) -> Self {
        Condition::IsNotNull(Expression::field(field))
    }

    /// `field CONTAINS value`
    pub fn contains(field: &str, value: impl Into<Value>) -> Self {
        Condition::Contains {
            collection: Expression::field(field),
            value: Expression::Literal(value.into()),
        }
    }

    /// Conjunction of two conditions, flattening nested ANDs.
    pub fn and(self, other: Condition) -> Self {
        match (self, other) {
            (Condition::And(mut a), Condition::And(b)) => {
                a.extend(b);
                Condition::And(a)
            }
            (Condition::And(mut a), b) => {
                a.push(b);
                Condition::And(a)
            }
            (a, Condition::And(mut b)) => {
                b.insert(0, a);
                Condition::And(b)
            }
            (a, b) => Condition::And(vec![a, b]),
        }
    }

    /// Disjunction of two conditions, flattening nested ORs.
    pub fn or(self, other: Condition) -> Self {
        match (self, other) {
            (Condition::Or(mut a), Condition::Or(b)) => {
                a.extend(b);
                Condition::Or(a)
            }
            (Condition::Or(mut a), b) => {
                a.push(b);
                Condition::Or(a)
            }
            (a, b) => Condition::Or(vec![a, b]),
        }
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Build a conjunction from parts; a single part is returned as is.
    pub fn all(mut parts: Vec<Condition>) -> Condition {
        match parts.len() {
            0 => Condition::Constant(true),
            1 => parts.remove(0),
            _ => Condition::And(parts),
        }
    }

    /// Build a disjunction from parts; a single part is returned as is.
    pub fn any(mut parts: Vec<Condition>) -> Condition {
        match parts.len() {
            0 => Condition::Constant(false),
            1 => parts.remove(0),
            _ => Condition::Or(parts),
        }
    }

    /// Whether this is an equality comparison (`=`, `IN`, `CONTAINS`, `IS NULL`).
    pub fn is_equality(&self) -> bool {
        matches!(
            self,
            Condition::Compare {
                op: CompareOp::Eq,
                ..
            } | Condition::In { .. }
                | Condition::Contains { .. }
                | Condition::IsNull(_)
        )
    }

    /// Collect the top-level property names this condition reads.
    pub fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Condition::And(parts) | Condition::Or(parts) => {
                for p in parts {
                    p.collect_fields(out);
                }
            }
            Condition::Not(inner) => inner.collect_fields(out),
            Condition::Compare { left, right, .. }
            | Condition::In { left, right }
            | Condition::NotIn { left, right }
            | Condition::Contains {
                collection: left,
                value: right,
            }
            | Condition::ContainsText { left, text: right } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Condition::Between { value, low, high } => {
                value.collect_fields(out);
                low.collect_fields(out);
                high.collect_fields(out);
            }
            Condition::IsNull(e) | Condition::IsNotNull(e) => e.collect_fields(out),
            Condition::Constant(_) => {}
        }
    }

    /// Whether `$parent` is referenced anywhere in the condition.
    pub fn refers_to_parent(&self) -> bool {
        self.expressions().iter().any(|e| e.refers_to_parent())
    }

    /// Whether any operand depends on parameters, variables or nested queries.
    pub fn uses_execution_state(&self) -> bool {
        self.expressions().iter().any(|e| e.uses_execution_state())
    }

    fn expressions(&self) -> Vec<&Expression> {
        let mut out = Vec::new();
        self.walk_expressions(&mut out);
        out
    }

    fn walk_expressions<'a>(&'a self, out: &mut Vec<&'a Expression>) {
        match self {
            Condition::And(parts) | Condition::Or(parts) => {
                for p in parts {
                    p.walk_expressions(out);
                }
            }
            Condition::Not(inner) => inner.walk_expressions(out),
            Condition::Compare { left, right, .. }
            | Condition::In { left, right }
            | Condition::NotIn { left, right }
            | Condition::Contains {
                collection: left,
                value: right,
            }
            | Condition::ContainsText { left, text: right } => {
                out.push(left);
                out.push(right);
            }
            Condition::Between { value, low, high } => {
                out.push(value);
                out.push(low);
                out.push(high);
            }
            Condition::IsNull(e) | Condition::IsNotNull(e) => out.push(e),
            Condition::Constant(_) => {}
        }
    }

    /// Evaluate against a row.
    pub fn evaluate(&self, row: &dyn RowAccess, ctx: &dyn EvalContext) -> Result<bool> {
        match self {
            Condition::And(parts) => {
                for p in parts {
                    if !p.evaluate(row, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or(parts) => {
                for p in parts {
                    if p.evaluate(row, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(inner) => Ok(!inner.evaluate(row, ctx)?),
            Condition::Compare { left, op, right } => {
                let l = left.evaluate(row, ctx)?;
                let r = right.evaluate(row, ctx)?;
                Ok(op.apply(&l, &r))
            }
            Condition::In { left, right } => {
                let l = left.evaluate(row, ctx)?;
                let r = right.evaluate(row, ctx)?;
                Ok(in_values(&l, &r))
            }
            Condition::NotIn { left, right } => {
                let l = left.evaluate(row, ctx)?;
                if l.is_null() {
                    return Ok(false);
                }
                let r = right.evaluate(row, ctx)?;
                Ok(!in_values(&l, &r))
            }
            Condition::Between { value, low, high } => {
                let v = value.evaluate(row, ctx)?;
                let lo = low.evaluate(row, ctx)?;
                let hi = high.evaluate(row, ctx)?;
                Ok(CompareOp::Ge.apply(&v, &lo) && CompareOp::Le.apply(&v, &hi))
            }
            Condition::IsNull(e) => Ok(e.evaluate(row, ctx)?.is_null()),
            Condition::IsNotNull(e) => Ok(!e.evaluate(row, ctx)?.is_null()),
            Condition::Contains { collection, value } => {
                let c = collection.evaluate(row, ctx)?;
                let v = value.evaluate(row, ctx)?;
                Ok(match c {
                    Value::List(items) => items.iter().any(|item| item.sql_eq(&v)),
                    Value::Map(map) => map.values().any(|item| item.sql_eq(&v)),
                    _ => false,
                })
            }
            Condition::ContainsText { left, text } => {
                let l = left.evaluate(row, ctx)?;
                let t = text.evaluate(row, ctx)?;
                Ok(match (l, t) {
                    (Value::String(s), Value::String(t)) => s.contains(t.as_str()),
                    _ => false,
                })
            }
            Condition::Constant(b) => Ok(*b),
        }
    }
}

fn in_values(left: &Value, right: &Value) -> bool {
    match right {
        Value::List(items) => items.iter().any(|item| left.sql_eq(item)),
        single => left.sql_eq(single),
    }
}

/// Match a string against a SQL LIKE pattern.
///
/// Supports:
/// - `%` matches zero or more characters
/// - `_` matches exactly one character
/// - `\%` and `\_` match the literal character
pub fn like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_match_at(&value, &pattern)
}

fn like_match_at(value: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => value.is_empty(),
        Some('%') => {
            let rest = &pattern[1..];
            if rest.is_empty() {
                return true;
            }
            (0..=value.len()).any(|skip| like_match_at(&value[skip..], rest))
        }
        Some('_') => !value.is_empty() && like_match_at(&value[1..], &pattern[1..]),
        Some('\\') if pattern.len() > 1 => {
            value.first() == Some(&pattern[1]) && like_match_at(&value[1..], &pattern[2..])
        }
        Some(p) => value.first() == Some(p) && like_match_at(&value[1..], &pattern[1..]),
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::And(parts) => write_joined(f, parts, " AND "),
            Condition::Or(parts) => write_joined(f, parts, " OR "),
            Condition::Not(inner) => write!(f, "NOT ({inner})"),
            Condition::Compare { left, op, right } => write!(f, "{left} {} {right}", op.symbol()),
            Condition::In { left, right } => write!(f, "{left} IN {right}"),
            Condition::NotIn { left, right } => write!(f, "{left} NOT IN {right}"),
            Condition::Between { value, low, high } => {
                write!(f, "{value} BETWEEN {low} AND {high}")
            }
            Condition::IsNull(e) => write!(f, "{e} IS NULL"),
            Condition::IsNotNull(e) => write!(f, "{e} IS NOT NULL"),
            Condition::Contains { collection, value } => write!(f, "{collection} CONTAINS {value}"),
            Condition::ContainsText { left, text } => write!(f, "{left} CONTAINSTEXT {text}"),
            Condition::Constant(b) => write!(f, "{b}"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Condition], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{part}")?;
    }
    write!(f, ")")
}

/// Render a list of conditions separated by commas (used in plan output).
pub fn display_conditions(conditions: &[Condition]) -> String {
    struct Wrapper<'a>(&'a [Condition]);
    impl fmt::Display for Wrapper<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write_list(f, self.0)
        }
    }
    Wrapper(conditions).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::StaticContext;

    fn make_row(fields: Vec<(&str, Value)>) -> Vec<(String, Value)> {
        fields.into_iter().map(|(n, v)| (n.to_string(), v)).collect()
    }

    fn eval(cond: &Condition, row: &Vec<(String, Value)>) -> bool {
        cond.evaluate(row, &StaticContext::new()).unwrap()
    }

    #[test]
    fn test_comparison_conditions() {
        let row = make_row(vec![("score", Value::Int(75))]);

        assert!(eval(&Condition::eq("score", 75), &row));
        assert!(eval(&Condition::ne("score", 70), &row));
        assert!(eval(&Condition::gt("score", 70), &row));
        assert!(!eval(&Condition::gt("score", 75), &row));
        assert!(eval(&Condition::ge("score", 75), &row));
        assert!(eval(&Condition::lt("score", 80.5), &row));
        assert!(eval(&Condition::le("score", 75), &row));
    }

    #[test]
    fn test_null_comparisons_are_false() {
        let row = make_row(vec![("a", Value::Null)]);

        assert!(!eval(&Condition::eq("a", Value::Null), &row));
        assert!(!eval(&Condition::ne("a", 1), &row));
        assert!(!eval(&Condition::gt("missing", 1), &row));
        assert!(!eval(&Condition::in_list("a", vec![1, 2]), &row));
        assert!(!eval(
            &Condition::NotIn {
                left: Expression::field("a"),
                right: Expression::literal(vec![1, 2]),
            },
            &row
        ));
        assert!(eval(&Condition::is_null("a"), &row));
        assert!(eval(&Condition::is_null("missing"), &row));
    }

    #[test]
    fn test_mixed_kinds_never_match() {
        let row = make_row(vec![("a", Value::from("10"))]);
        assert!(!eval(&Condition::eq("a", 10), &row));
        assert!(!eval(&Condition::gt("a", 1), &row));
    }

    #[test]
    fn test_between_inclusive() {
        let cond = Condition::between("x", 10, 20);
        assert!(eval(&cond, &make_row(vec![("x", Value::Int(10))])));
        assert!(eval(&cond, &make_row(vec![("x", Value::Int(20))])));
        assert!(!eval(&cond, &make_row(vec![("x", Value::Int(21))])));
    }

    #[test]
    fn test_in_and_contains() {
        let row = make_row(vec![
            ("city", "Rome".into()),
            ("tags", Value::from(vec!["red", "blue"])),
        ]);
        assert!(eval(&Condition::in_list("city", vec!["Oslo", "Rome"]), &row));
        assert!(!eval(&Condition::in_list("city", vec!["Oslo"]), &row));
        assert!(eval(&Condition::contains("tags", "blue"), &row));
        assert!(!eval(&Condition::contains("tags", "green"), &row));
    }

    #[test]
    fn test_logical_operators() {
        let row = make_row(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        let both = Condition::eq("a", 1).and(Condition::eq("b", 2));
        assert!(eval(&both, &row));
        let either = Condition::eq("a", 5).or(Condition::eq("b", 2));
        assert!(eval(&either, &row));
        assert!(!eval(&either.clone().not(), &row));
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("hello", "hello"));
        assert!(like_match("hello", "h%"));
        assert!(like_match("hello", "%llo"));
        assert!(like_match("hello", "h_llo"));
        assert!(like_match("hello", "%"));
        assert!(like_match("", "%"));
        assert!(!like_match("hello", "h_lo"));
        assert!(like_match("100%", "100\\%"));
        assert!(!like_match("100x", "100\\%"));
        assert!(like_match("a_b", "a\\_b"));
    }

    #[test]
    fn test_compare_op_flip() {
        assert_eq!(CompareOp::Lt.flip(), CompareOp::Gt);
        assert_eq!(CompareOp::Ge.flip(), CompareOp::Le);
        assert_eq!(CompareOp::Eq.flip(), CompareOp::Eq);
        assert!(CompareOp::Le.is_range());
        assert!(!CompareOp::Like.is_range());
    }

    #[test]
    fn test_display() {
        let cond = Condition::eq("a", 1).and(Condition::between("b", 2, 3));
        assert_eq!(cond.to_string(), "(a = 1 AND b BETWEEN 2 AND 3)");
        assert_eq!(Condition::is_null("x").to_string(), "x IS NULL");
    }
}
