//! State accumulated while planning one SELECT.

use quarry_sql::{
    Condition, Expression, LetItem, OrderItem, ProjectionItem, SelectStatement, Target, Timeout,
};

use crate::query::steps::AggregateItem;

/// Aggregation phase of a projection.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePlan {
    /// Items computed per group: plain values from the first row of the
    /// group, aggregates accumulated over every row.
    pub items: Vec<AggregateItem>,
    /// Projection evaluated on aggregated rows, when some output item is
    /// an expression over aggregates.
    pub post_projection: Option<Vec<ProjectionItem>>,
    /// Aliases that must read 0 over empty input (count-only projections
    /// without GROUP BY).
    pub guarantee_count: Vec<String>,
}

/// Planning state threaded through the planner phases.
///
/// Each phase reads what it needs and sets what it consumed to `None` (or
/// empties it) so later phases do not apply it twice.
#[derive(Debug, Clone, Default)]
pub struct QueryPlanningInfo {
    /// FROM clause.
    pub target: Option<Target>,
    /// LET items evaluated once per execution.
    pub global_let: Vec<LetItem>,
    /// LET items evaluated for every row.
    pub per_record_let: Vec<LetItem>,
    /// WHERE clause still to be applied.
    pub where_clause: Option<Condition>,
    /// Plain projection (no aggregates, no expand).
    pub projection: Option<Vec<ProjectionItem>>,
    /// `expand(...)` argument.
    pub expand: Option<Expression>,
    /// Aggregation phase.
    pub aggregate: Option<AggregatePlan>,
    /// SELECT DISTINCT.
    pub distinct: bool,
    /// GROUP BY expressions.
    pub group_by: Vec<Expression>,
    /// ORDER BY still to be applied.
    pub order_by: Option<Vec<OrderItem>>,
    /// Columns added for ORDER BY and removed after sorting.
    pub hidden_aliases: Vec<String>,
    /// UNWIND fields.
    pub unwind: Vec<String>,
    /// SKIP.
    pub skip: Option<Expression>,
    /// LIMIT.
    pub limit: Option<Expression>,
    /// TIMEOUT.
    pub timeout: Option<Timeout>,
    /// Whether ORDER BY was satisfied by fetch order.
    pub order_applied: bool,
}

impl QueryPlanningInfo {
    /// Initial state for a statement.
    pub fn from_statement(statement: &SelectStatement) -> Self {
        let projection = &statement.projection;
        Self {
            target: statement.target.clone(),
            per_record_let: statement.let_clause.clone(),
            where_clause: statement.where_clause.clone(),
            projection: if projection.is_identity() && !projection.distinct {
                None
            } else {
                Some(projection.items.clone())
            },
            distinct: projection.distinct,
            group_by: statement.group_by.clone(),
            order_by: if statement.order_by.is_empty() {
                None
            } else {
                Some(statement.order_by.clone())
            },
            unwind: statement.unwind.clone(),
            skip: statement.skip.clone(),
            limit: statement.limit.clone(),
            timeout: statement.timeout,
            ..Self::default()
        }
    }

    /// Whether the projection keeps whole records (`*` or nothing).
    pub fn projection_is_identity(&self) -> bool {
        match &self.projection {
            None => true,
            Some(items) => {
                items.is_empty() || (items.len() == 1 && items[0] == ProjectionItem::All)
            }
        }
    }
}
