//! SELECT planner.
//!
//! Planning runs a fixed sequence of phases over a [`QueryPlanningInfo`]:
//!
//! 1. LET split and projection split (plain, aggregate or expand)
//! 2. Global LET
//! 3. Fetch: `count(*)` shortcut, index lookup, index-ordered scan or
//!    class scan, followed by per-row LET and the residual WHERE filter
//! 4. Hidden ORDER BY columns and the projection phase
//! 5. UNWIND, DISTINCT, ORDER BY
//! 6. SKIP, LIMIT, TIMEOUT
//!
//! Each phase takes what it applies out of the planning info, so nothing
//! is applied twice.

mod flatten;
mod index_selection;
mod order_by;
mod projections;

pub use flatten::flatten;

use quarry_sql::{Condition, LetItem, LetValue, OrderItem, ProjectionItem, SelectStatement, Target, TimeoutPolicy};
use tracing::{debug, instrument};

use super::context::CommandContext;
use super::index_descriptor::IndexSearchDescriptor;
use super::plan::SelectExecutionPlan;
use super::planning_info::QueryPlanningInfo;
use super::step::ExecutionStep;
use super::steps::{
    AggregateStep, CartesianProductStep, CountFromClassStep, DistinctExecutionStep,
    EmptyDataGeneratorStep, ExpandStep, FetchFromClassStep, FetchFromClustersStep,
    FetchFromIndexStep, FetchFromIndexValuesStep, FetchFromRidsStep, FetchFromVariableStep,
    FilterByClassStep, FilterStep, GetValueFromIndexEntryStep, GlobalLetExpressionStep,
    GlobalLetQueryStep, GuaranteeEmptyCountStep, LetExpressionStep, LetQueryStep,
    LimitExecutionStep, OrderByStep, ParallelExecStep, ProjectionCalculationStep,
    SkipExecutionStep, SubQueryStep, TimeoutStep, UnwindStep, AggregateKind,
};
use crate::catalog::ClassDef;
use crate::error::Result;

type Steps = Vec<Box<dyn ExecutionStep>>;

/// Turns a SELECT statement into an execution plan.
pub struct SelectPlanner<'s> {
    statement: &'s SelectStatement,
}

impl<'s> SelectPlanner<'s> {
    /// Planner for one statement.
    pub fn new(statement: &'s SelectStatement) -> Self {
        Self { statement }
    }

    /// Plan the statement, going through the context's plan cache.
    ///
    /// Profiled executions always get a freshly built plan and never
    /// populate the cache.
    #[instrument(skip_all, fields(sql = %self.statement))]
    pub fn plan(&self, ctx: &CommandContext) -> Result<SelectExecutionPlan> {
        let Some(cache) = ctx.plan_cache().filter(|_| !ctx.is_profiling()) else {
            return self.build(ctx);
        };
        let sql = self.statement.to_string();
        let version = ctx.db().schema().version();
        if let Some(plan) = cache.get(&sql, version) {
            debug!("plan cache hit");
            return Ok(plan);
        }
        let plan = self.build(ctx)?;
        if cache.insert(sql, &plan, version) {
            debug!("plan cached");
        }
        Ok(plan)
    }

    /// Build a new plan without consulting the cache.
    pub fn build(&self, ctx: &CommandContext) -> Result<SelectExecutionPlan> {
        let mut info = QueryPlanningInfo::from_statement(self.statement);
        projections::split_let(&mut info);
        projections::split_projection(&mut info)?;

        let mut plan = SelectExecutionPlan::new();
        plan_global_let(&mut plan, &mut info, ctx)?;
        if !plan_count_from_class(&mut plan, &mut info, ctx)? {
            plan_fetch(&mut plan, &mut info, ctx)?;
            projections::add_order_by_aliases(&mut info)?;
            plan_projection(&mut plan, &mut info);
            plan_unwind_distinct_order(&mut plan, &mut info);
        }
        plan_skip_limit(&mut plan, &mut info);
        plan_timeout(&mut plan, &mut info, ctx);
        debug!(steps = ?plan.step_names(), "plan built");
        Ok(plan)
    }
}

fn plan_global_let(
    plan: &mut SelectExecutionPlan,
    info: &mut QueryPlanningInfo,
    ctx: &CommandContext,
) -> Result<()> {
    for item in std::mem::take(&mut info.global_let) {
        let step: Box<dyn ExecutionStep> = match item.value {
            LetValue::Expression(expr) => Box::new(GlobalLetExpressionStep::new(item.name, expr)),
            LetValue::Query(statement) => Box::new(GlobalLetQueryStep::new(
                item.name,
                SelectPlanner::new(&statement).build(ctx)?,
            )),
        };
        plan.chain(step);
    }
    Ok(())
}

fn let_steps(items: &[LetItem]) -> Steps {
    items
        .iter()
        .map(|item| -> Box<dyn ExecutionStep> {
            match &item.value {
                LetValue::Expression(expr) => {
                    Box::new(LetExpressionStep::new(item.name.clone(), expr.clone()))
                }
                LetValue::Query(statement) => {
                    Box::new(LetQueryStep::new(item.name.clone(), statement.clone()))
                }
            }
        })
        .collect()
}

fn chain_all(plan: &mut SelectExecutionPlan, steps: Steps) {
    for step in steps {
        plan.chain(step);
    }
}

fn branch_plan(steps: Steps) -> SelectExecutionPlan {
    let mut plan = SelectExecutionPlan::new();
    chain_all(&mut plan, steps);
    plan
}

/// `SELECT count(*) FROM Class` with nothing else answered from cluster
/// sizes.
fn plan_count_from_class(
    plan: &mut SelectExecutionPlan,
    info: &mut QueryPlanningInfo,
    ctx: &CommandContext,
) -> Result<bool> {
    let Some(Target::Class(class)) = &info.target else {
        return Ok(false);
    };
    if info.where_clause.is_some()
        || !info.per_record_let.is_empty()
        || !info.group_by.is_empty()
        || !info.unwind.is_empty()
        || info.distinct
    {
        return Ok(false);
    }
    let alias = match &info.aggregate {
        Some(aggregate) if aggregate.post_projection.is_none() => match aggregate.items.as_slice() {
            [item] if matches!(&item.kind, AggregateKind::Aggregate(call) if call.is_count_all()) => {
                item.alias.clone()
            }
            _ => return Ok(false),
        },
        _ => return Ok(false),
    };
    ctx.db().schema().require_class(class)?;
    plan.chain(Box::new(CountFromClassStep::new(class.clone(), alias)));
    // a single row needs no sorting
    info.target = None;
    info.aggregate = None;
    info.order_by = None;
    Ok(true)
}

/// ORDER BY items the fetch phase may serve from index or identity order.
///
/// Anything that reshapes or reorders rows between the fetch and the sort
/// rules it out, as does a projection binding an ORDER BY name to another
/// value.
fn fetch_order(info: &QueryPlanningInfo, ctx: &CommandContext) -> Option<Vec<OrderItem>> {
    if !ctx.config().use_index_for_sort
        || info.aggregate.is_some()
        || info.expand.is_some()
        || !info.unwind.is_empty()
    {
        return None;
    }
    let order_by = info.order_by.as_ref()?;
    if let Some(items) = &info.projection {
        let rebound = order_by.iter().any(|order| {
            let name = order.expr.default_alias();
            items.iter().any(|item| match item {
                ProjectionItem::Expr { expr, .. } => item.output_name() == name && *expr != order.expr,
                _ => false,
            })
        });
        if rebound {
            return None;
        }
    }
    Some(order_by.clone())
}

fn order_served_by_fetch(info: &mut QueryPlanningInfo) {
    info.order_by = None;
    info.order_applied = true;
}

fn plan_fetch(
    plan: &mut SelectExecutionPlan,
    info: &mut QueryPlanningInfo,
    ctx: &CommandContext,
) -> Result<()> {
    let lets = std::mem::take(&mut info.per_record_let);
    match info.target.take() {
        Some(Target::Class(class)) => return plan_class_fetch(plan, info, ctx, &class, &lets),
        Some(Target::Clusters(clusters)) => {
            let direction = fetch_order(info, ctx).and_then(|o| order_by::rid_order(&o));
            plan.chain(Box::new(FetchFromClustersStep::new(
                clusters,
                direction.unwrap_or(true),
            )));
            if direction.is_some() {
                order_served_by_fetch(info);
            }
        }
        Some(Target::Rids(rids)) => plan.chain(Box::new(FetchFromRidsStep::new(rids))),
        Some(Target::Variable(name)) => plan.chain(Box::new(FetchFromVariableStep::variable(name))),
        Some(Target::Parameter(name)) => {
            plan.chain(Box::new(FetchFromVariableStep::parameter(name)))
        }
        Some(Target::SubQuery(statement)) => plan.chain(Box::new(SubQueryStep::new(
            SelectPlanner::new(&statement).build(ctx)?,
        ))),
        Some(Target::Product(statements)) => {
            let plans = statements
                .iter()
                .map(|statement| SelectPlanner::new(statement).build(ctx))
                .collect::<Result<Vec<_>>>()?;
            plan.chain(Box::new(CartesianProductStep::new(plans)));
        }
        None => plan.chain(Box::new(EmptyDataGeneratorStep::new())),
    }
    chain_all(plan, let_steps(&lets));
    if let Some(condition) = info.where_clause.take() {
        plan.chain(Box::new(FilterStep::new(condition)));
    }
    Ok(())
}

fn plan_class_fetch(
    plan: &mut SelectExecutionPlan,
    info: &mut QueryPlanningInfo,
    ctx: &CommandContext,
    name: &str,
    lets: &[LetItem],
) -> Result<()> {
    let schema = ctx.db().schema();
    let class = schema.require_class(name)?;
    let order = fetch_order(info, ctx);
    let config = ctx.config();

    if let Some(condition) = info.where_clause.as_ref().filter(|_| config.use_indexes) {
        match flatten(condition, config.max_flattened_blocks) {
            Some(blocks) => {
                if let Some(fetch) = index_fetch(ctx, class, &blocks, lets, order.as_deref()) {
                    chain_all(plan, fetch.steps);
                    info.where_clause = None;
                    if fetch.ordered {
                        order_served_by_fetch(info);
                    }
                    return Ok(());
                }
            }
            None => debug!(class = name, "WHERE too large to flatten, filtering a scan"),
        }
    }

    let mut ordered = false;
    if info.where_clause.is_none() {
        if let Some((index, ascending)) = order
            .as_deref()
            .and_then(|o| order_by::sort_index(o, schema, name))
        {
            debug!(class = name, index = %index.name, "ORDER BY served by index scan");
            plan.chain(Box::new(FetchFromIndexValuesStep::new(index.name.clone(), ascending)));
            plan.chain(Box::new(GetValueFromIndexEntryStep::new()));
            if index.class != name {
                plan.chain(Box::new(FilterByClassStep::new(name)));
            }
            ordered = true;
        }
    }
    if !ordered {
        let direction = order.as_deref().and_then(order_by::rid_order);
        plan.chain(Box::new(FetchFromClassStep::new(
            name,
            schema.polymorphic_clusters(name),
            direction.unwrap_or(true),
        )));
        ordered = direction.is_some();
    }
    chain_all(plan, let_steps(lets));
    if let Some(condition) = info.where_clause.take() {
        plan.chain(Box::new(FilterStep::new(condition)));
    }
    if ordered {
        order_served_by_fetch(info);
    }
    Ok(())
}

/// Steps of an index-driven fetch.
struct IndexFetch {
    steps: Steps,
    /// Whether the steps already produce ORDER BY order.
    ordered: bool,
}

/// Serve the flattened WHERE of `class` through indexes.
///
/// A single descriptor becomes one lookup; several become a union of
/// lookups with duplicate elimination. An abstract class without a usable
/// index is split into its subclasses when every one of them can be
/// served this way.
fn index_fetch(
    ctx: &CommandContext,
    class: &ClassDef,
    blocks: &[Vec<Condition>],
    lets: &[LetItem],
    order: Option<&[OrderItem]>,
) -> Option<IndexFetch> {
    let schema = ctx.db().schema();
    if let Some(mut descriptors) = index_selection::descriptors_for_blocks(ctx, &class.name, blocks) {
        if descriptors.len() == 1 {
            let descriptor = descriptors.remove(0);
            let direction =
                order.and_then(|o| order_by::index_order(&descriptor, o, schema, &class.name));
            return Some(IndexFetch {
                steps: index_branch(descriptor, direction.unwrap_or(true), &class.name, lets),
                ordered: direction.is_some(),
            });
        }
        let branches = descriptors
            .into_iter()
            .map(|d| branch_plan(index_branch(d, true, &class.name, lets)))
            .collect();
        return Some(union_of(branches));
    }

    if !class.is_abstract {
        return None;
    }
    let subclasses = schema.direct_subclasses(&class.name);
    if subclasses.is_empty() {
        return None;
    }
    let mut branches = Vec::with_capacity(subclasses.len());
    for subclass in subclasses {
        let fetch = index_fetch(ctx, subclass, blocks, lets, None)?;
        branches.push(branch_plan(fetch.steps));
    }
    debug!(class = %class.name, branches = branches.len(), "abstract class split into subclasses");
    Some(union_of(branches))
}

fn union_of(branches: Vec<SelectExecutionPlan>) -> IndexFetch {
    IndexFetch {
        steps: vec![
            Box::new(ParallelExecStep::new(branches)),
            Box::new(DistinctExecutionStep::new()),
        ],
        ordered: false,
    }
}

fn index_branch(
    descriptor: IndexSearchDescriptor,
    ascending: bool,
    class: &str,
    lets: &[LetItem],
) -> Steps {
    let foreign_class = descriptor.index.class != class;
    let remaining = descriptor.remaining.clone();
    let mut steps: Steps = vec![
        Box::new(FetchFromIndexStep::new(descriptor, ascending)),
        Box::new(GetValueFromIndexEntryStep::new()),
    ];
    if foreign_class {
        steps.push(Box::new(FilterByClassStep::new(class)));
    }
    steps.extend(let_steps(lets));
    if let Some(condition) = remaining {
        steps.push(Box::new(FilterStep::new(condition)));
    }
    steps
}

/// SKIP and LIMIT when both are literals (SKIP may be absent).
fn literal_window(info: &QueryPlanningInfo) -> Option<(usize, usize)> {
    let limit = info.limit.as_ref()?.as_literal()?.as_i64()?;
    // a negative LIMIT means no limit
    let limit = usize::try_from(limit).ok()?;
    let skip = match &info.skip {
        None => 0,
        Some(skip) => usize::try_from(skip.as_literal()?.as_i64()?.max(0)).ok()?,
    };
    Some((skip, limit))
}

fn plan_projection(plan: &mut SelectExecutionPlan, info: &mut QueryPlanningInfo) {
    if let Some(aggregate) = info.aggregate.take() {
        // with nothing reordering groups, the first skip + limit groups suffice
        let group_cap = if info.order_by.is_none() && !info.distinct && info.unwind.is_empty() {
            literal_window(info).map(|(skip, limit)| skip.saturating_add(limit))
        } else {
            None
        };
        plan.chain(Box::new(
            AggregateStep::new(std::mem::take(&mut info.group_by), aggregate.items)
                .with_group_cap(group_cap),
        ));
        if !aggregate.guarantee_count.is_empty() {
            plan.chain(Box::new(GuaranteeEmptyCountStep::new(aggregate.guarantee_count)));
        }
        if let Some(post) = aggregate.post_projection {
            plan.chain(Box::new(ProjectionCalculationStep::new(post)));
        }
    } else if let Some(expr) = info.expand.take() {
        plan.chain(Box::new(ExpandStep::new(expr)));
    } else if let Some(items) = info.projection.take() {
        let identity = items.is_empty() || items == [ProjectionItem::All];
        if !identity {
            plan.chain(Box::new(ProjectionCalculationStep::new(items)));
        }
    }
}

fn plan_unwind_distinct_order(plan: &mut SelectExecutionPlan, info: &mut QueryPlanningInfo) {
    if !info.unwind.is_empty() {
        plan.chain(Box::new(UnwindStep::new(std::mem::take(&mut info.unwind))));
    }
    if info.distinct {
        plan.chain(Box::new(DistinctExecutionStep::new()));
    }
    if let Some(order) = info.order_by.take() {
        let window = literal_window(info);
        plan.chain(Box::new(OrderByStep::new(
            order,
            window.map(|(skip, _)| skip),
            window.map(|(_, limit)| limit),
        )));
    }
    if !info.hidden_aliases.is_empty() {
        plan.chain(Box::new(ProjectionCalculationStep::removing(std::mem::take(
            &mut info.hidden_aliases,
        ))));
    }
}

fn plan_skip_limit(plan: &mut SelectExecutionPlan, info: &mut QueryPlanningInfo) {
    if let Some(skip) = info.skip.take() {
        plan.chain(Box::new(SkipExecutionStep::new(skip)));
    }
    if let Some(limit) = info.limit.take() {
        plan.chain(Box::new(LimitExecutionStep::new(limit)));
    }
}

/// The statement's TIMEOUT, or the configured default with the EXCEPTION
/// policy.
fn plan_timeout(plan: &mut SelectExecutionPlan, info: &mut QueryPlanningInfo, ctx: &CommandContext) {
    let timeout = info.timeout.take().map(|t| (t.millis, t.policy)).or_else(|| {
        ctx.config().default_timeout.map(|d| {
            (
                u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
                TimeoutPolicy::Exception,
            )
        })
    });
    if let Some((millis, policy)) = timeout {
        plan.chain(Box::new(TimeoutStep::new(millis, policy)));
    }
}
