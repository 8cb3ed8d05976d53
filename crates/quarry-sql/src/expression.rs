//! Scalar expressions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::eval::{EvalContext, RowAccess};
use crate::statement::SelectStatement;
use crate::value::{ArithmeticOp, Value};

/// Aggregate function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Count of rows or non-null values.
    Count,
    /// Sum of numeric values.
    Sum,
    /// Average of numeric values.
    Avg,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
}

impl AggregateFunction {
    /// SQL function name.
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

/// A single aggregate call such as `count(*)` or `sum(price)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCall {
    /// The aggregation function to apply.
    pub function: AggregateFunction,
    /// Argument (`None` for `count(*)`).
    pub arg: Option<Box<Expression>>,
}

impl AggregateCall {
    /// `count(*)`.
    pub fn count_all() -> Self {
        Self {
            function: AggregateFunction::Count,
            arg: None,
        }
    }

    /// Aggregate over an expression.
    pub fn of(function: AggregateFunction, arg: Expression) -> Self {
        Self {
            function,
            arg: Some(Box::new(arg)),
        }
    }

    /// Whether this is `count(*)`.
    pub fn is_count_all(&self) -> bool {
        self.function == AggregateFunction::Count && self.arg.is_none()
    }
}

impl fmt::Display for AggregateCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}({})", self.function.name(), arg),
            None => write!(f, "{}(*)", self.function.name()),
        }
    }
}

/// Record attributes addressable with `@name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordAttribute {
    /// `@rid`
    Rid,
    /// `@class`
    Class,
    /// `@this`
    This,
}

impl RecordAttribute {
    /// Attribute name including the `@` sigil.
    pub fn name(&self) -> &'static str {
        match self {
            RecordAttribute::Rid => "@rid",
            RecordAttribute::Class => "@class",
            RecordAttribute::This => "@this",
        }
    }
}

/// A scalar expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Constant value.
    Literal(Value),
    /// Property reference; dots navigate embedded maps.
    Field(String),
    /// Record attribute.
    Attribute(RecordAttribute),
    /// Named parameter (`:name`).
    Parameter(String),
    /// Variable (`$name`): `$current`, per-row LET or context variable.
    Variable(String),
    /// Binary arithmetic.
    Arithmetic {
        /// Operator.
        op: ArithmeticOp,
        /// Left operand.
        left: Box<Expression>,
        /// Right operand.
        right: Box<Expression>,
    },
    /// Aggregate call; only valid inside an aggregation step.
    Aggregate(AggregateCall),
    /// Built-in scalar function.
    Function {
        /// Lower-case function name.
        name: String,
        /// Arguments.
        args: Vec<Expression>,
    },
    /// List literal.
    List(Vec<Expression>),
    /// Nested SELECT evaluated to a list of values.
    SubQuery(Arc<SelectStatement>),
}

impl Expression {
    /// Property reference.
    pub fn field(name: impl Into<String>) -> Self {
        Expression::Field(name.into())
    }

    /// Constant.
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    /// Named parameter.
    pub fn param(name: impl Into<String>) -> Self {
        Expression::Parameter(name.into())
    }

    /// Variable reference; the leading `$` is optional.
    pub fn variable(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.strip_prefix('$') {
            Some(stripped) => Expression::Variable(stripped.to_string()),
            None => Expression::Variable(name),
        }
    }

    /// `count(*)`.
    pub fn count_all() -> Self {
        Expression::Aggregate(AggregateCall::count_all())
    }

    /// Aggregate over an expression.
    pub fn aggregate(function: AggregateFunction, arg: Expression) -> Self {
        Expression::Aggregate(AggregateCall::of(function, arg))
    }

    /// Scalar function call.
    pub fn function(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Function {
            name: name.into().to_ascii_lowercase(),
            args,
        }
    }

    /// Arithmetic combination.
    pub fn arithmetic(op: ArithmeticOp, left: Expression, right: Expression) -> Self {
        Expression::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Nested query.
    pub fn subquery(statement: SelectStatement) -> Self {
        Expression::SubQuery(Arc::new(statement))
    }

    /// Name of the referenced property when this is a plain field.
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Expression::Field(name) => Some(name),
            _ => None,
        }
    }

    /// Literal value, if constant.
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expression::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Whether an aggregate call appears anywhere in this expression.
    pub fn is_aggregate(&self) -> bool {
        match self {
            Expression::Aggregate(_) => true,
            Expression::Arithmetic { left, right, .. } => left.is_aggregate() || right.is_aggregate(),
            Expression::Function { args, .. } | Expression::List(args) => {
                args.iter().any(Expression::is_aggregate)
            }
            _ => false,
        }
    }

    /// Whether the value depends on the current row.
    ///
    /// Expressions that do not can be evaluated once per execution, which is
    /// what makes them usable as index keys.
    pub fn depends_on_row(&self) -> bool {
        match self {
            Expression::Literal(_) | Expression::Parameter(_) => false,
            Expression::Field(_) | Expression::Attribute(_) | Expression::Aggregate(_) => true,
            // only $parent is known to be fixed for one execution
            Expression::Variable(name) => !(name == "parent" || name.starts_with("parent.")),
            Expression::Arithmetic { left, right, .. } => {
                left.depends_on_row() || right.depends_on_row()
            }
            Expression::Function { args, .. } | Expression::List(args) => {
                args.iter().any(Expression::depends_on_row)
            }
            Expression::SubQuery(stmt) => stmt.refers_to_parent(),
        }
    }

    /// Whether the value depends on per-execution state (parameters,
    /// variables, nested queries) rather than on literals only.
    pub fn uses_execution_state(&self) -> bool {
        match self {
            Expression::Literal(_) | Expression::Field(_) | Expression::Attribute(_) => false,
            Expression::Parameter(_) | Expression::Variable(_) | Expression::SubQuery(_) => true,
            Expression::Aggregate(call) => call
                .arg
                .as_deref()
                .is_some_and(Expression::uses_execution_state),
            Expression::Arithmetic { left, right, .. } => {
                left.uses_execution_state() || right.uses_execution_state()
            }
            Expression::Function { args, .. } | Expression::List(args) => {
                args.iter().any(Expression::uses_execution_state)
            }
        }
    }

    /// Whether `$parent` is referenced here or in any nested query.
    pub fn refers_to_parent(&self) -> bool {
        match self {
            Expression::Variable(name) => name == "parent" || name.starts_with("parent."),
            Expression::Arithmetic { left, right, .. } => {
                left.refers_to_parent() || right.refers_to_parent()
            }
            Expression::Function { args, .. } | Expression::List(args) => {
                args.iter().any(Expression::refers_to_parent)
            }
            Expression::Aggregate(call) => call
                .arg
                .as_deref()
                .is_some_and(Expression::refers_to_parent),
            Expression::SubQuery(stmt) => stmt.refers_to_parent(),
            _ => false,
        }
    }

    /// Collect the top-level property names this expression reads.
    pub fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Expression::Field(name) => {
                let root = name.split('.').next().unwrap_or(name);
                if !out.iter().any(|f| f == root) {
                    out.push(root.to_string());
                }
            }
            Expression::Arithmetic { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expression::Function { args, .. } | Expression::List(args) => {
                for arg in args {
                    arg.collect_fields(out);
                }
            }
            Expression::Aggregate(call) => {
                if let Some(arg) = &call.arg {
                    arg.collect_fields(out);
                }
            }
            _ => {}
        }
    }

    /// Replace every aggregate call with a reference to a generated alias.
    ///
    /// The extracted calls are appended to `aggregates` with the alias they
    /// were replaced by, so the caller can compute them in an aggregation
    /// step and evaluate the rewritten expression afterwards.
    pub fn split_aggregates(
        &self,
        next_alias: &mut dyn FnMut() -> String,
        aggregates: &mut Vec<(String, AggregateCall)>,
    ) -> Expression {
        match self {
            Expression::Aggregate(call) => {
                let alias = next_alias();
                aggregates.push((alias.clone(), call.clone()));
                Expression::Field(alias)
            }
            Expression::Arithmetic { op, left, right } => Expression::Arithmetic {
                op: *op,
                left: Box::new(left.split_aggregates(next_alias, aggregates)),
                right: Box::new(right.split_aggregates(next_alias, aggregates)),
            },
            Expression::Function { name, args } => Expression::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| a.split_aggregates(next_alias, aggregates))
                    .collect(),
            },
            Expression::List(items) => Expression::List(
                items
                    .iter()
                    .map(|a| a.split_aggregates(next_alias, aggregates))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Column name used when a projection item has no alias.
    pub fn default_alias(&self) -> String {
        match self {
            Expression::Field(name) => name.clone(),
            Expression::Attribute(attr) => attr.name().to_string(),
            Expression::Variable(name) => format!("${name}"),
            other => other.to_string(),
        }
    }

    /// Evaluate against a row.
    pub fn evaluate(&self, row: &dyn RowAccess, ctx: &dyn EvalContext) -> Result<Value> {
        match self {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::Field(path) => Ok(resolve_field(row, path)),
            Expression::Attribute(RecordAttribute::Rid) => {
                Ok(row.identity().map(Value::Link).unwrap_or(Value::Null))
            }
            Expression::Attribute(RecordAttribute::Class) => Ok(row
                .class_name()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null)),
            Expression::Attribute(RecordAttribute::This) => Ok(row.to_value()),
            Expression::Parameter(name) => ctx
                .parameter(name)
                .ok_or_else(|| Error::UnboundParameter(name.clone())),
            Expression::Variable(name) => Ok(resolve_variable(row, ctx, name)),
            Expression::Arithmetic { op, left, right } => {
                let l = left.evaluate(row, ctx)?;
                let r = right.evaluate(row, ctx)?;
                l.arithmetic(*op, &r)
            }
            Expression::Aggregate(call) => Err(Error::AggregateOutsideGroup(call.to_string())),
            Expression::Function { name, args } => call_function(name, args, row, ctx),
            Expression::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|e| e.evaluate(row, ctx))
                    .collect::<Result<_>>()?,
            )),
            Expression::SubQuery(stmt) => Ok(Value::List(ctx.run_subquery(stmt, Some(row))?)),
        }
    }
}

fn navigate(value: &Value, segment: &str) -> Value {
    match value {
        Value::Map(map) => map.get(segment).cloned().unwrap_or(Value::Null),
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| navigate(item, segment))
                .filter(|v| !v.is_null())
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn resolve_field(row: &dyn RowAccess, path: &str) -> Value {
    let mut segments = path.split('.');
    let head = segments.next().unwrap_or(path);
    let mut current = match row.property(head) {
        Some(v) => v.clone(),
        None => return Value::Null,
    };
    for segment in segments {
        current = navigate(&current, segment);
        if current.is_null() {
            break;
        }
    }
    current
}

fn resolve_variable(row: &dyn RowAccess, ctx: &dyn EvalContext, name: &str) -> Value {
    let (head, rest) = match name.split_once('.') {
        Some((h, r)) => (h, Some(r)),
        None => (name, None),
    };
    let base = if head == "current" {
        row.to_value()
    } else if let Some(v) = row.metadata(head) {
        v.clone()
    } else {
        ctx.variable(head).unwrap_or(Value::Null)
    };
    match rest {
        Some(path) => path.split('.').fold(base, |acc, seg| navigate(&acc, seg)),
        None => base,
    }
}

fn expect_args(name: &str, args: &[Expression], expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(Error::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn call_function(
    name: &str,
    args: &[Expression],
    row: &dyn RowAccess,
    ctx: &dyn EvalContext,
) -> Result<Value> {
    match name {
        "coalesce" | "ifnull" => {
            for arg in args {
                let v = arg.evaluate(row, ctx)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        }
        "size" => {
            expect_args(name, args, 1)?;
            let size = match args[0].evaluate(row, ctx)? {
                Value::Null => 0,
                Value::List(items) => items.len(),
                Value::Map(map) => map.len(),
                Value::String(s) => s.chars().count(),
                _ => 1,
            };
            Ok(Value::from(size))
        }
        "upper" | "lower" => {
            expect_args(name, args, 1)?;
            Ok(match args[0].evaluate(row, ctx)? {
                Value::String(s) if name == "upper" => Value::String(s.to_uppercase()),
                Value::String(s) => Value::String(s.to_lowercase()),
                other => other,
            })
        }
        "abs" => {
            expect_args(name, args, 1)?;
            Ok(match args[0].evaluate(row, ctx)? {
                Value::Int(i) => i.checked_abs().map(Value::Int).unwrap_or(Value::Float((i as f64).abs())),
                Value::Float(f) => Value::Float(f.abs()),
                other => other,
            })
        }
        _ => Err(Error::UnknownFunction(name.to_string())),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(v) => write!(f, "{v}"),
            Expression::Field(name) => write!(f, "{name}"),
            Expression::Attribute(attr) => write!(f, "{}", attr.name()),
            Expression::Parameter(name) => write!(f, ":{name}"),
            Expression::Variable(name) => write!(f, "${name}"),
            Expression::Arithmetic { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            Expression::Aggregate(call) => write!(f, "{call}"),
            Expression::Function { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expression::List(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Expression::SubQuery(stmt) => write!(f, "({stmt})"),
        }
    }
}

pub(crate) fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::StaticContext;
    use std::collections::BTreeMap;

    fn make_row(fields: Vec<(&str, Value)>) -> Vec<(String, Value)> {
        fields.into_iter().map(|(n, v)| (n.to_string(), v)).collect()
    }

    #[test]
    fn test_field_and_nested_field() {
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), Value::from("Rome"));
        let row = make_row(vec![("name", "Ann".into()), ("address", Value::Map(address))]);
        let ctx = StaticContext::new();

        assert_eq!(
            Expression::field("name").evaluate(&row, &ctx).unwrap(),
            Value::from("Ann")
        );
        assert_eq!(
            Expression::field("address.city").evaluate(&row, &ctx).unwrap(),
            Value::from("Rome")
        );
        assert!(Expression::field("missing.x").evaluate(&row, &ctx).unwrap().is_null());
    }

    #[test]
    fn test_parameters() {
        let row = make_row(vec![]);
        let ctx = StaticContext::new().with_parameter("min", 10);
        assert_eq!(
            Expression::param("min").evaluate(&row, &ctx).unwrap(),
            Value::Int(10)
        );
        assert!(matches!(
            Expression::param("max").evaluate(&row, &ctx),
            Err(Error::UnboundParameter(_))
        ));
    }

    #[test]
    fn test_functions() {
        let row = make_row(vec![("tags", Value::from(vec!["a", "b"])), ("n", Value::Null)]);
        let ctx = StaticContext::new();
        let size = Expression::function("SIZE", vec![Expression::field("tags")]);
        assert_eq!(size.evaluate(&row, &ctx).unwrap(), Value::Int(2));

        let coalesce = Expression::function(
            "coalesce",
            vec![Expression::field("n"), Expression::literal("x")],
        );
        assert_eq!(coalesce.evaluate(&row, &ctx).unwrap(), Value::from("x"));

        let unknown = Expression::function("nope", vec![]);
        assert!(matches!(
            unknown.evaluate(&row, &ctx),
            Err(Error::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_aggregate_outside_group_fails() {
        let row = make_row(vec![]);
        let ctx = StaticContext::new();
        assert!(matches!(
            Expression::count_all().evaluate(&row, &ctx),
            Err(Error::AggregateOutsideGroup(_))
        ));
    }

    #[test]
    fn test_split_aggregates() {
        let expr = Expression::arithmetic(
            ArithmeticOp::Add,
            Expression::count_all(),
            Expression::literal(1),
        );
        assert!(expr.is_aggregate());

        let mut n = 0;
        let mut next = || {
            n += 1;
            format!("_$$$agg{n}")
        };
        let mut aggregates = Vec::new();
        let rewritten = expr.split_aggregates(&mut next, &mut aggregates);

        assert!(!rewritten.is_aggregate());
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].0, "_$$$agg1");
        assert!(aggregates[0].1.is_count_all());
        assert_eq!(rewritten.to_string(), "(_$$$agg1 + 1)");
    }

    #[test]
    fn test_depends_on_row() {
        assert!(!Expression::literal(1).depends_on_row());
        assert!(!Expression::param("p").depends_on_row());
        assert!(Expression::field("x").depends_on_row());
        assert!(Expression::variable("$current").depends_on_row());
        assert!(!Expression::variable("$parent.x").depends_on_row());
    }

    #[test]
    fn test_default_alias() {
        assert_eq!(Expression::field("name").default_alias(), "name");
        assert_eq!(Expression::count_all().default_alias(), "count(*)");
        assert_eq!(
            Expression::Attribute(RecordAttribute::Rid).default_alias(),
            "@rid"
        );
    }
}
