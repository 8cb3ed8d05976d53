//! SELECT statement AST.
//!
//! Statements are immutable once built; the builder methods consume and
//! return `self`. `Display` renders canonical SQL text, which is also the
//! plan-cache key.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::expression::{write_list, Expression};
use crate::value::{Rid, Value};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl Direction {
    /// Whether this is ascending.
    pub fn is_ascending(&self) -> bool {
        matches!(self, Direction::Asc)
    }
}

/// One ORDER BY item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Sort key.
    pub expr: Expression,
    /// Sort direction.
    pub direction: Direction,
    /// Optional collation name (`COLLATE ci`).
    pub collate: Option<String>,
}

impl OrderItem {
    /// Ascending order on a field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            expr: Expression::field(field),
            direction: Direction::Asc,
            collate: None,
        }
    }

    /// Descending order on a field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            expr: Expression::field(field),
            direction: Direction::Desc,
            collate: None,
        }
    }

    /// Set a collation.
    pub fn with_collate(mut self, collate: impl Into<String>) -> Self {
        self.collate = Some(collate.into());
        self
    }
}

impl fmt::Display for OrderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(c) = &self.collate {
            write!(f, " COLLATE {c}")?;
        }
        match self.direction {
            Direction::Asc => write!(f, " ASC"),
            Direction::Desc => write!(f, " DESC"),
        }
    }
}

/// One projection item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProjectionItem {
    /// `*`
    All,
    /// `expr [AS alias]`
    Expr {
        /// Projected expression.
        expr: Expression,
        /// Output name.
        alias: Option<String>,
    },
    /// `expand(expr)`; must be the only item.
    Expand(Expression),
}

impl ProjectionItem {
    /// Output column name.
    pub fn output_name(&self) -> String {
        match self {
            ProjectionItem::All => "*".to_string(),
            ProjectionItem::Expr { expr, alias } => {
                alias.clone().unwrap_or_else(|| expr.default_alias())
            }
            ProjectionItem::Expand(expr) => format!("expand({expr})"),
        }
    }
}

impl fmt::Display for ProjectionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionItem::All => write!(f, "*"),
            ProjectionItem::Expr { expr, alias: Some(a) } => write!(f, "{expr} AS {a}"),
            ProjectionItem::Expr { expr, alias: None } => write!(f, "{expr}"),
            ProjectionItem::Expand(expr) => write!(f, "expand({expr})"),
        }
    }
}

/// The projection list. An empty list means `SELECT *` semantics without
/// rewriting the rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Projection {
    /// Items in output order.
    pub items: Vec<ProjectionItem>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
}

impl Projection {
    /// Whether any item contains an aggregate call.
    pub fn has_aggregates(&self) -> bool {
        self.items.iter().any(|item| match item {
            ProjectionItem::Expr { expr, .. } | ProjectionItem::Expand(expr) => {
                expr.is_aggregate()
            }
            ProjectionItem::All => false,
        })
    }

    /// The `expand(...)` argument, if the projection is an expansion.
    pub fn expand(&self) -> Option<&Expression> {
        self.items.iter().find_map(|item| match item {
            ProjectionItem::Expand(expr) => Some(expr),
            _ => None,
        })
    }

    /// Whether this projection leaves rows untouched.
    pub fn is_identity(&self) -> bool {
        !self.distinct
            && (self.items.is_empty()
                || (self.items.len() == 1 && self.items[0] == ProjectionItem::All))
    }

    /// Whether the output keeps record identities (`*` present).
    pub fn includes_all(&self) -> bool {
        self.items.is_empty() || self.items.contains(&ProjectionItem::All)
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        if self.items.is_empty() {
            write!(f, "*")
        } else {
            write_list(f, &self.items)
        }
    }
}

/// Value bound by a LET item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LetValue {
    /// Scalar expression.
    Expression(Expression),
    /// Nested query; binds the list of its results.
    Query(Arc<SelectStatement>),
}

/// One `LET $name = ...` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetItem {
    /// Variable name without the `$` sigil.
    pub name: String,
    /// Bound value.
    pub value: LetValue,
}

impl LetItem {
    /// Whether the value changes from row to row.
    pub fn depends_on_row(&self) -> bool {
        match &self.value {
            LetValue::Expression(expr) => expr.depends_on_row(),
            LetValue::Query(stmt) => stmt.refers_to_parent(),
        }
    }
}

impl fmt::Display for LetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            LetValue::Expression(expr) => write!(f, "${} = {expr}", self.name),
            LetValue::Query(stmt) => write!(f, "${} = ({stmt})", self.name),
        }
    }
}

/// The FROM clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    /// A class, including its subclasses.
    Class(String),
    /// Explicit cluster ids.
    Clusters(Vec<i32>),
    /// Explicit record identities.
    Rids(Vec<Rid>),
    /// A context variable (`$name`), typically bound by LET.
    Variable(String),
    /// A parameter holding rows, links or lists.
    Parameter(String),
    /// A nested SELECT.
    SubQuery(Arc<SelectStatement>),
    /// Cartesian product of nested SELECTs.
    Product(Vec<Arc<SelectStatement>>),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Class(name) => write!(f, "{name}"),
            Target::Clusters(ids) => {
                write!(f, "cluster:[")?;
                write_list(f, ids)?;
                write!(f, "]")
            }
            Target::Rids(rids) => {
                write!(f, "[")?;
                write_list(f, rids)?;
                write!(f, "]")
            }
            Target::Variable(name) => write!(f, "${name}"),
            Target::Parameter(name) => write!(f, ":{name}"),
            Target::SubQuery(stmt) => write!(f, "({stmt})"),
            Target::Product(stmts) => {
                for (i, stmt) in stmts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "({stmt})")?;
                }
                Ok(())
            }
        }
    }
}

/// What happens when a statement runs past its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeoutPolicy {
    /// Stop and return the rows produced so far.
    #[default]
    Return,
    /// Abort with a timeout error.
    Exception,
}

/// `TIMEOUT <millis> [RETURN|EXCEPTION]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timeout {
    /// Wall-clock budget in milliseconds.
    pub millis: u64,
    /// Failure policy.
    pub policy: TimeoutPolicy,
}

/// A parsed SELECT statement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectStatement {
    /// Projection list.
    pub projection: Projection,
    /// FROM clause; `None` selects a single computed row.
    pub target: Option<Target>,
    /// LET items in declaration order.
    pub let_clause: Vec<LetItem>,
    /// WHERE clause.
    pub where_clause: Option<Condition>,
    /// GROUP BY expressions.
    pub group_by: Vec<Expression>,
    /// ORDER BY items.
    pub order_by: Vec<OrderItem>,
    /// UNWIND fields.
    pub unwind: Vec<String>,
    /// SKIP: a literal or a parameter.
    pub skip: Option<Expression>,
    /// LIMIT: a literal or a parameter.
    pub limit: Option<Expression>,
    /// TIMEOUT clause.
    pub timeout: Option<Timeout>,
}

impl SelectStatement {
    /// `SELECT FROM <class>`.
    pub fn from_class(class: impl Into<String>) -> Self {
        Self {
            target: Some(Target::Class(class.into())),
            ..Default::default()
        }
    }

    /// `SELECT FROM <target>`.
    pub fn from_target(target: Target) -> Self {
        Self {
            target: Some(target),
            ..Default::default()
        }
    }

    /// Add a projection item with an optional alias.
    pub fn project(mut self, expr: Expression, alias: Option<&str>) -> Self {
        self.projection.items.push(ProjectionItem::Expr {
            expr,
            alias: alias.map(str::to_string),
        });
        self
    }

    /// Project a plain field.
    pub fn project_field(self, field: &str) -> Self {
        self.project(Expression::field(field), None)
    }

    /// Add `*` to the projection.
    pub fn project_all(mut self) -> Self {
        self.projection.items.push(ProjectionItem::All);
        self
    }

    /// Replace the projection with `expand(expr)`.
    pub fn expand(mut self, expr: Expression) -> Self {
        self.projection.items = vec![ProjectionItem::Expand(expr)];
        self
    }

    /// `SELECT DISTINCT`.
    pub fn distinct(mut self) -> Self {
        self.projection.distinct = true;
        self
    }

    /// Set the WHERE clause, AND-ing with an existing one.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    /// Add a GROUP BY expression.
    pub fn group_by(mut self, expr: Expression) -> Self {
        self.group_by.push(expr);
        self
    }

    /// Add an ORDER BY item.
    pub fn order_by(mut self, item: OrderItem) -> Self {
        self.order_by.push(item);
        self
    }

    /// Add an UNWIND field.
    pub fn unwind(mut self, field: impl Into<String>) -> Self {
        self.unwind.push(field.into());
        self
    }

    /// Literal SKIP.
    pub fn skip(mut self, n: i64) -> Self {
        self.skip = Some(Expression::Literal(Value::Int(n)));
        self
    }

    /// Literal LIMIT.
    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(Expression::Literal(Value::Int(n)));
        self
    }

    /// Parameterized LIMIT.
    pub fn limit_param(mut self, name: impl Into<String>) -> Self {
        self.limit = Some(Expression::Parameter(name.into()));
        self
    }

    /// `LET $name = expr`.
    pub fn let_expr(mut self, name: impl Into<String>, expr: Expression) -> Self {
        self.let_clause.push(LetItem {
            name: name.into(),
            value: LetValue::Expression(expr),
        });
        self
    }

    /// `LET $name = (SELECT ...)`.
    pub fn let_query(mut self, name: impl Into<String>, stmt: SelectStatement) -> Self {
        self.let_clause.push(LetItem {
            name: name.into(),
            value: LetValue::Query(Arc::new(stmt)),
        });
        self
    }

    /// TIMEOUT clause.
    pub fn timeout(mut self, millis: u64, policy: TimeoutPolicy) -> Self {
        self.timeout = Some(Timeout { millis, policy });
        self
    }

    /// Whether `$parent` is referenced anywhere in this statement.
    pub fn refers_to_parent(&self) -> bool {
        let in_projection = self.projection.items.iter().any(|item| match item {
            ProjectionItem::Expr { expr, .. } | ProjectionItem::Expand(expr) => {
                expr.refers_to_parent()
            }
            ProjectionItem::All => false,
        });
        let in_let = self.let_clause.iter().any(|item| match &item.value {
            LetValue::Expression(expr) => expr.refers_to_parent(),
            LetValue::Query(stmt) => stmt.refers_to_parent(),
        });
        let in_target = match &self.target {
            Some(Target::SubQuery(stmt)) => stmt.refers_to_parent(),
            Some(Target::Product(stmts)) => stmts.iter().any(|s| s.refers_to_parent()),
            _ => false,
        };
        in_projection
            || in_let
            || in_target
            || self
                .where_clause
                .as_ref()
                .is_some_and(Condition::refers_to_parent)
            || self.group_by.iter().any(Expression::refers_to_parent)
            || self.order_by.iter().any(|o| o.expr.refers_to_parent())
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT")?;
        if !self.projection.items.is_empty() || self.projection.distinct {
            write!(f, " {}", self.projection)?;
        }
        if let Some(target) = &self.target {
            write!(f, " FROM {target}")?;
        }
        if !self.let_clause.is_empty() {
            write!(f, " LET ")?;
            write_list(f, &self.let_clause)?;
        }
        if let Some(cond) = &self.where_clause {
            write!(f, " WHERE {cond}")?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY ")?;
            write_list(f, &self.group_by)?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            write_list(f, &self.order_by)?;
        }
        if !self.unwind.is_empty() {
            write!(f, " UNWIND ")?;
            write_list(f, &self.unwind)?;
        }
        if let Some(skip) = &self.skip {
            write!(f, " SKIP {skip}")?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(t) = &self.timeout {
            let policy = match t.policy {
                TimeoutPolicy::Return => "RETURN",
                TimeoutPolicy::Exception => "EXCEPTION",
            };
            write!(f, " TIMEOUT {} {policy}", t.millis)?;
        }
        Ok(())
    }
}
