//! Projection-related planning phases: LET placement, aggregate split and
//! hidden ORDER BY columns.

use quarry_sql::{AggregateFunction, Expression, ProjectionItem};

use crate::error::{Error, Result};
use crate::query::planning_info::{AggregatePlan, QueryPlanningInfo};
use crate::query::steps::AggregateItem;

const AGGREGATE_ALIAS_PREFIX: &str = "_$$$agg";
const ORDER_BY_ALIAS_PREFIX: &str = "_$$$ORDER_BY_ALIAS$$$_";

/// Move LET items that do not depend on the row to the global list.
///
/// Postcondition: `per_record_let` only holds row-dependent items; both
/// lists keep declaration order.
pub fn split_let(info: &mut QueryPlanningInfo) {
    let (per_record, global) = std::mem::take(&mut info.per_record_let)
        .into_iter()
        .partition(|item| item.depends_on_row());
    info.per_record_let = per_record;
    info.global_let = global;
}

/// Route the projection to the expand, aggregate or plain phase.
///
/// Postcondition: at most one of `expand`, `aggregate` and `projection` is
/// set.
pub fn split_projection(info: &mut QueryPlanningInfo) -> Result<()> {
    let Some(items) = info.projection.take() else {
        return Ok(());
    };
    let expand = items.iter().find_map(|item| match item {
        ProjectionItem::Expand(expr) => Some(expr.clone()),
        _ => None,
    });
    if let Some(expr) = expand {
        if items.len() > 1 {
            return Err(Error::InvalidStatement(
                "expand() must be the only projection item".to_string(),
            ));
        }
        if expr.is_aggregate() || !info.group_by.is_empty() {
            return Err(Error::InvalidStatement(
                "expand() cannot be combined with aggregation".to_string(),
            ));
        }
        info.expand = Some(expr);
        return Ok(());
    }

    let has_aggregates = items.iter().any(|item| match item {
        ProjectionItem::Expr { expr, .. } => expr.is_aggregate(),
        _ => false,
    });
    if !has_aggregates && info.group_by.is_empty() {
        info.projection = Some(items);
        return Ok(());
    }
    info.aggregate = Some(aggregate_plan(&items, info.group_by.is_empty())?);
    Ok(())
}

/// An expression over aggregates that is not a bare aggregate call.
fn is_compound(expr: &Expression) -> bool {
    expr.is_aggregate() && !matches!(expr, Expression::Aggregate(_))
}

fn aggregate_plan(items: &[ProjectionItem], no_group_by: bool) -> Result<AggregatePlan> {
    let mut exprs = Vec::with_capacity(items.len());
    for item in items {
        match item {
            ProjectionItem::Expr { expr, .. } => exprs.push((item.output_name(), expr)),
            _ => {
                return Err(Error::InvalidStatement(format!(
                    "'{item}' cannot be combined with aggregation"
                )))
            }
        }
    }
    let needs_post = exprs.iter().any(|(_, expr)| is_compound(expr));

    let mut counter = 0usize;
    let mut next_alias = move || {
        counter += 1;
        format!("{AGGREGATE_ALIAS_PREFIX}{}", counter - 1)
    };
    let mut aggregate_items = Vec::new();
    let mut post = Vec::new();
    for (name, expr) in exprs.iter() {
        let rewritten = if is_compound(expr) {
            let mut calls = Vec::new();
            let rewritten = expr.split_aggregates(&mut next_alias, &mut calls);
            aggregate_items.extend(
                calls
                    .into_iter()
                    .map(|(alias, call)| AggregateItem::aggregate(alias, call)),
            );
            rewritten
        } else {
            // with a post projection every column goes through an internal alias
            let alias = if needs_post { next_alias() } else { name.clone() };
            aggregate_items.push(match expr {
                Expression::Aggregate(call) => AggregateItem::aggregate(alias.clone(), call.clone()),
                plain => AggregateItem::plain(alias.clone(), (*plain).clone()),
            });
            Expression::field(alias)
        };
        post.push(ProjectionItem::Expr {
            expr: rewritten,
            alias: Some(name.clone()),
        });
    }

    let count_only = exprs.iter().all(|(_, expr)| {
        matches!(expr, Expression::Aggregate(call) if call.function == AggregateFunction::Count)
    });
    let guarantee_count = if no_group_by && count_only && !needs_post {
        exprs.iter().map(|(name, _)| name.clone()).collect()
    } else {
        Vec::new()
    };
    Ok(AggregatePlan {
        items: aggregate_items,
        post_projection: needs_post.then_some(post),
        guarantee_count,
    })
}

/// Make every ORDER BY key available as an output column.
///
/// Keys that are neither projected nor readable from a `*` row are added
/// under a generated alias, recorded in `hidden_aliases` so they can be
/// removed after sorting. Under DISTINCT this would change which rows are
/// duplicates, so it is rejected.
pub fn add_order_by_aliases(info: &mut QueryPlanningInfo) -> Result<()> {
    if info.order_applied {
        return Ok(());
    }
    let Some(order_by) = info.order_by.as_mut() else {
        return Ok(());
    };
    let (outputs, keeps_all): (Vec<String>, bool) = match (&info.aggregate, &info.projection) {
        (Some(plan), _) => match &plan.post_projection {
            Some(items) => (items.iter().map(ProjectionItem::output_name).collect(), false),
            None => (plan.items.iter().map(|i| i.alias.clone()).collect(), false),
        },
        (None, Some(items)) => (
            items.iter().map(ProjectionItem::output_name).collect(),
            items.contains(&ProjectionItem::All),
        ),
        (None, None) => return Ok(()),
    };

    for (n, item) in order_by.iter_mut().enumerate() {
        let name = item.expr.default_alias();
        if outputs.contains(&name) {
            item.expr = Expression::field(name);
            continue;
        }
        if keeps_all && item.expr.as_field().is_some() {
            continue;
        }
        if info.distinct {
            return Err(Error::InvalidStatement(format!(
                "ORDER BY {} must appear in the DISTINCT projection",
                item.expr
            )));
        }
        let alias = format!("{ORDER_BY_ALIAS_PREFIX}{n}");
        if let Some(plan) = info.aggregate.as_mut() {
            let hidden = match &item.expr {
                Expression::Aggregate(call) => AggregateItem::aggregate(alias.clone(), call.clone()),
                expr if !expr.is_aggregate() => AggregateItem::plain(alias.clone(), expr.clone()),
                expr => {
                    return Err(Error::InvalidStatement(format!(
                        "ORDER BY {expr} must be projected"
                    )))
                }
            };
            plan.items.push(hidden);
            if let Some(post) = plan.post_projection.as_mut() {
                post.push(ProjectionItem::Expr {
                    expr: Expression::field(alias.clone()),
                    alias: Some(alias.clone()),
                });
            }
        } else if let Some(items) = info.projection.as_mut() {
            items.push(ProjectionItem::Expr {
                expr: item.expr.clone(),
                alias: Some(alias.clone()),
            });
        }
        item.expr = Expression::field(alias.clone());
        info.hidden_aliases.push(alias);
    }
    Ok(())
}
