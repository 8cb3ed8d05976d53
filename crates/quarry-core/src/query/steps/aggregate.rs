//! Hash aggregation.

use std::collections::HashMap;

use quarry_sql::{AggregateCall, AggregateFunction, ArithmeticOp, Expression, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::query::context::CommandContext;
use crate::query::row::ResultRow;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;

/// What an output column of an aggregation holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregateKind {
    /// Evaluated on the first row of the group.
    Plain(Expression),
    /// Accumulated over every row of the group.
    Aggregate(AggregateCall),
}

/// One output column of an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateItem {
    /// Output column name.
    pub alias: String,
    /// Column content.
    pub kind: AggregateKind,
}

impl AggregateItem {
    /// Plain column.
    pub fn plain(alias: impl Into<String>, expr: Expression) -> Self {
        Self {
            alias: alias.into(),
            kind: AggregateKind::Plain(expr),
        }
    }

    /// Aggregate column.
    pub fn aggregate(alias: impl Into<String>, call: AggregateCall) -> Self {
        Self {
            alias: alias.into(),
            kind: AggregateKind::Aggregate(call),
        }
    }
}

#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Sum(Option<Value>),
    Avg { sum: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Plain(Value),
}

impl Accumulator {
    fn new(kind: &AggregateKind, first: &ResultRow, ctx: &CommandContext) -> Result<Self> {
        Ok(match kind {
            AggregateKind::Plain(expr) => Accumulator::Plain(expr.evaluate(first, ctx)?),
            AggregateKind::Aggregate(call) => match call.function {
                AggregateFunction::Count => Accumulator::Count(0),
                AggregateFunction::Sum => Accumulator::Sum(None),
                AggregateFunction::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
                AggregateFunction::Min => Accumulator::Min(None),
                AggregateFunction::Max => Accumulator::Max(None),
            },
        })
    }

    fn add(&mut self, kind: &AggregateKind, row: &ResultRow, ctx: &CommandContext) -> Result<()> {
        let AggregateKind::Aggregate(call) = kind else {
            return Ok(());
        };
        let value = match &call.arg {
            Some(arg) => arg.evaluate(row, ctx)?,
            None => Value::Bool(true),
        };
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum(total) => {
                *total = Some(match total.take() {
                    Some(current) => current.arithmetic(ArithmeticOp::Add, &value)?,
                    None => value,
                });
            }
            Accumulator::Avg { sum, count } => {
                if let Some(v) = value.as_f64() {
                    *sum += v;
                    *count += 1;
                }
            }
            Accumulator::Min(best) => {
                if best.as_ref().map_or(true, |b| value < *b) {
                    *best = Some(value);
                }
            }
            Accumulator::Max(best) => {
                if best.as_ref().map_or(true, |b| value > *b) {
                    *best = Some(value);
                }
            }
            Accumulator::Plain(_) => {}
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Int(n),
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => Value::Float(sum / count as f64),
            Accumulator::Sum(v) | Accumulator::Min(v) | Accumulator::Max(v) => {
                v.unwrap_or(Value::Null)
            }
            Accumulator::Plain(v) => v,
        }
    }
}

/// Group rows and compute aggregates.
///
/// Blocking: the first pull drains the upstream. Groups are emitted in the
/// order their first row arrived. With a group cap, rows that would open a
/// group beyond the cap are ignored (rows of admitted groups still count).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateStep {
    group_by: Vec<Expression>,
    items: Vec<AggregateItem>,
    group_cap: Option<usize>,
    #[serde(skip)]
    base: StepBase,
}

impl AggregateStep {
    /// Aggregate `items` grouped by `group_by`.
    pub fn new(group_by: Vec<Expression>, items: Vec<AggregateItem>) -> Self {
        Self {
            group_by,
            items,
            group_cap: None,
            base: StepBase::default(),
        }
    }

    /// Stop admitting new groups after `cap` of them.
    pub fn with_group_cap(mut self, cap: Option<usize>) -> Self {
        self.group_cap = cap;
        self
    }
}

fn aggregate(
    mut upstream: ExecutionStream<'_>,
    group_by: &[Expression],
    items: &[AggregateItem],
    group_cap: Option<usize>,
    ctx: &CommandContext,
) -> Result<Vec<ResultRow>> {
    let mut positions: HashMap<Vec<Value>, usize> = HashMap::new();
    let mut groups: Vec<Vec<Accumulator>> = Vec::new();
    let mut consumed = 0u64;
    while let Some(row) = upstream.next()? {
        ctx.check_interrupt()?;
        if ctx.check_timeout()? {
            break;
        }
        consumed += 1;
        let key = group_by
            .iter()
            .map(|e| e.evaluate(&row, ctx))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let position = match positions.get(&key) {
            Some(position) => *position,
            None => {
                if group_cap.is_some_and(|cap| groups.len() >= cap) {
                    continue;
                }
                let accumulators = items
                    .iter()
                    .map(|item| Accumulator::new(&item.kind, &row, ctx))
                    .collect::<Result<Vec<_>>>()?;
                groups.push(accumulators);
                positions.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        for (accumulator, item) in groups[position].iter_mut().zip(items) {
            accumulator.add(&item.kind, &row, ctx)?;
        }
    }
    upstream.close();
    debug!(rows = consumed, groups = groups.len(), "aggregation finished");

    Ok(groups
        .into_iter()
        .map(|accumulators| {
            let mut out = ResultRow::new();
            for (accumulator, item) in accumulators.into_iter().zip(items) {
                out.set(item.alias.clone(), accumulator.finish());
            }
            out
        })
        .collect())
}

impl ExecutionStep for AggregateStep {
    step_common!("AggregateStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let (group_by, items, group_cap) = (&self.group_by, &self.items, self.group_cap);
        let upstream = self.base.start_prev(ctx, "AggregateStep")?;
        Ok(ExecutionStream::deferred(move || {
            let rows = aggregate(upstream, group_by, items, group_cap, ctx)?;
            Ok(ExecutionStream::from_rows(rows))
        }))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        let items: Vec<String> = self
            .items
            .iter()
            .map(|item| match &item.kind {
                AggregateKind::Plain(expr) => format!("{expr} AS {}", item.alias),
                AggregateKind::Aggregate(call) => format!("{call} AS {}", item.alias),
            })
            .collect();
        let mut text = format!("CALCULATE AGGREGATE PROJECTIONS {}", items.join(", "));
        if !self.group_by.is_empty() {
            let keys: Vec<String> = self.group_by.iter().map(ToString::to_string).collect();
            text.push_str(&format!(" GROUP BY {}", keys.join(", ")));
        }
        if let Some(cap) = self.group_cap {
            text.push_str(&format!(" (max {cap} groups)"));
        }
        text
    }
}

/// Emit `{alias: 0, ...}` when the upstream produced no rows.
///
/// Used for count-only projections without GROUP BY, which must answer 0
/// over empty input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuaranteeEmptyCountStep {
    aliases: Vec<String>,
    #[serde(skip)]
    base: StepBase,
}

impl GuaranteeEmptyCountStep {
    /// Guarantee a zero row for `aliases`.
    pub fn new(aliases: Vec<String>) -> Self {
        Self {
            aliases,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for GuaranteeEmptyCountStep {
    step_common!("GuaranteeEmptyCountStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let aliases = &self.aliases;
        let mut upstream = self.base.start_prev(ctx, "GuaranteeEmptyCountStep")?;
        let mut produced = false;
        let mut finished = false;
        Ok(ExecutionStream::from_fn(move || {
            if finished {
                return Ok(None);
            }
            if let Some(row) = upstream.next()? {
                produced = true;
                return Ok(Some(row));
            }
            finished = true;
            upstream.close();
            if produced {
                return Ok(None);
            }
            let mut zero = ResultRow::new();
            for alias in aliases {
                zero.set(alias.clone(), Value::Int(0));
            }
            Ok(Some(zero))
        }))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("GUARANTEE FOR ZERO COUNT {}", self.aliases.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{column, map, plan_over_rows, rows_ctx};

    fn sales() -> Vec<Value> {
        vec![
            map(&[("k", Value::from("X")), ("v", Value::Int(1))]),
            map(&[("k", Value::from("Y")), ("v", Value::Int(5))]),
            map(&[("k", Value::from("X")), ("v", Value::Int(3))]),
            map(&[("k", Value::from("Z")), ("v", Value::Null)]),
        ]
    }

    fn by_key() -> AggregateStep {
        AggregateStep::new(
            vec![Expression::field("k")],
            vec![
                AggregateItem::plain("k", Expression::field("k")),
                AggregateItem::aggregate("n", AggregateCall::count_all()),
                AggregateItem::aggregate(
                    "total",
                    AggregateCall::of(AggregateFunction::Sum, Expression::field("v")),
                ),
                AggregateItem::aggregate(
                    "mean",
                    AggregateCall::of(AggregateFunction::Avg, Expression::field("v")),
                ),
                AggregateItem::aggregate(
                    "top",
                    AggregateCall::of(AggregateFunction::Max, Expression::field("v")),
                ),
            ],
        )
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let ctx = rows_ctx(sales());
        let mut plan = plan_over_rows(vec![Box::new(by_key())]);
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(
            column(&rows, "k"),
            vec![Value::from("X"), Value::from("Y"), Value::from("Z")]
        );
        assert_eq!(
            column(&rows, "n"),
            vec![Value::Int(2), Value::Int(1), Value::Int(1)]
        );
        assert_eq!(
            column(&rows, "total"),
            vec![Value::Int(4), Value::Int(5), Value::Null]
        );
        assert_eq!(rows[0].get("mean"), Some(&Value::Float(2.0)));
        assert_eq!(rows[2].get("mean"), Some(&Value::Null));
        assert_eq!(rows[0].get("top"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_group_cap_keeps_admitted_groups_accumulating() {
        let ctx = rows_ctx(sales());
        let mut plan = plan_over_rows(vec![Box::new(by_key().with_group_cap(Some(1)))]);
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_count_of_expression_skips_nulls() {
        let ctx = rows_ctx(sales());
        let step = AggregateStep::new(
            vec![],
            vec![AggregateItem::aggregate(
                "c",
                AggregateCall::of(AggregateFunction::Count, Expression::field("v")),
            )],
        );
        let mut plan = plan_over_rows(vec![Box::new(step)]);
        assert_eq!(column(&plan.fetch_all(&ctx).unwrap(), "c"), vec![Value::Int(3)]);
    }

    #[test]
    fn test_empty_count_guarantee() {
        let ctx = rows_ctx(vec![]);
        let mut plan = plan_over_rows(vec![
            Box::new(AggregateStep::new(
                vec![],
                vec![AggregateItem::aggregate("count(*)", AggregateCall::count_all())],
            )),
            Box::new(GuaranteeEmptyCountStep::new(vec!["count(*)".into()])),
        ]);
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(column(&rows, "count(*)"), vec![Value::Int(0)]);

        let ctx = rows_ctx(sales());
        plan.reset();
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(column(&rows, "count(*)"), vec![Value::Int(4)]);
    }
}
