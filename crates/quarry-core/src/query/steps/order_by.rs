//! Blocking sort with a bounded buffer.

use std::cmp::Ordering;

use quarry_sql::{OrderItem, Value};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MAX_HEAP_ELEMENTS_KEY;
use crate::error::{Error, Result};
use crate::query::context::CommandContext;
use crate::query::row::ResultRow;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;

/// Sort buffer that keeps at most `2 × keep` rows when only the first
/// `keep` are needed.
///
/// Each time the buffer reaches the threshold it is sorted and truncated to
/// `keep`. The sort is stable, so rows with equal keys keep arrival order
/// and the result equals a full sort cut at `keep`.
#[derive(Debug)]
pub struct SortBuffer {
    ascending: Vec<bool>,
    keep: Option<usize>,
    max_heap: Option<usize>,
    rows: Vec<(Vec<Value>, ResultRow)>,
    peak: usize,
}

impl SortBuffer {
    /// Buffer ordering keys component-wise, ascending where `ascending[i]`.
    pub fn new(ascending: Vec<bool>, keep: Option<usize>, max_heap: Option<usize>) -> Self {
        Self {
            ascending,
            keep,
            max_heap,
            rows: Vec::new(),
            peak: 0,
        }
    }

    /// Add a row with its sort key.
    pub fn push(&mut self, key: Vec<Value>, row: ResultRow) -> Result<()> {
        if self.keep == Some(0) {
            return Ok(());
        }
        self.rows.push((key, row));
        self.peak = self.peak.max(self.rows.len());
        if let Some(keep) = self.keep {
            if self.rows.len() >= keep.saturating_mul(2) {
                self.sort();
                self.rows.truncate(keep);
            }
        }
        if let Some(limit) = self.max_heap {
            if self.rows.len() > limit {
                warn!(limit, "ORDER BY exceeded the heap element limit");
                return Err(Error::HeapLimitExceeded {
                    operation: "ORDER BY",
                    limit,
                    config_key: MAX_HEAP_ELEMENTS_KEY,
                });
            }
        }
        Ok(())
    }

    /// Largest number of rows held at once.
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Rows currently held.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no row is held.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn compare(ascending: &[bool], a: &[Value], b: &[Value]) -> Ordering {
        for ((x, y), asc) in a.iter().zip(b).zip(ascending) {
            let ordering = x.cmp(y);
            if ordering != Ordering::Equal {
                return if *asc { ordering } else { ordering.reverse() };
            }
        }
        Ordering::Equal
    }

    fn sort(&mut self) {
        let ascending = &self.ascending;
        self.rows
            .sort_by(|(a, _), (b, _)| Self::compare(ascending, a, b));
    }

    /// Sorted rows, cut at `keep`.
    pub fn finish(mut self) -> Vec<ResultRow> {
        self.sort();
        if let Some(keep) = self.keep {
            self.rows.truncate(keep);
        }
        self.rows.into_iter().map(|(_, row)| row).collect()
    }
}

/// Sort key of a row. The `ci` collation compares strings case-insensitively.
fn sort_key(items: &[OrderItem], row: &ResultRow, ctx: &CommandContext) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|item| {
            let value = item.expr.evaluate(row, ctx)?;
            Ok(match (item.collate.as_deref(), value) {
                (Some("ci"), Value::String(s)) => Value::String(s.to_lowercase()),
                (_, value) => value,
            })
        })
        .collect()
}

/// ORDER BY. Nulls sort first in ascending order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderByStep {
    items: Vec<OrderItem>,
    skip: Option<usize>,
    limit: Option<usize>,
    #[serde(skip)]
    base: StepBase,
}

impl OrderByStep {
    /// Sort by `items`. With a known `limit` only `skip + limit` rows are kept.
    pub fn new(items: Vec<OrderItem>, skip: Option<usize>, limit: Option<usize>) -> Self {
        Self {
            items,
            skip,
            limit,
            base: StepBase::default(),
        }
    }

    fn keep(&self) -> Option<usize> {
        self.limit
            .map(|limit| limit.saturating_add(self.skip.unwrap_or(0)))
    }
}

impl ExecutionStep for OrderByStep {
    step_common!("OrderByStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let keep = self.keep();
        let items = &self.items;
        let mut upstream = self.base.start_prev(ctx, "OrderByStep")?;
        Ok(ExecutionStream::deferred(move || {
            let ascending = items.iter().map(|i| i.direction.is_ascending()).collect();
            let mut buffer = SortBuffer::new(ascending, keep, ctx.config().max_heap_elements);
            while let Some(row) = upstream.next()? {
                ctx.check_interrupt()?;
                if ctx.check_timeout()? {
                    break;
                }
                let key = sort_key(items, &row, ctx)?;
                buffer.push(key, row)?;
            }
            upstream.close();
            Ok(ExecutionStream::from_rows(buffer.finish()))
        }))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        let items: Vec<String> = self.items.iter().map(ToString::to_string).collect();
        let mut text = format!("ORDER BY {}", items.join(", "));
        if let Some(keep) = self.keep() {
            text.push_str(&format!(" (buffer size: {keep})"));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::testing::{column, map, plan_over_rows, rows_ctx};

    fn letters() -> Vec<Value> {
        ["b", "A", "c", "a"]
            .into_iter()
            .enumerate()
            .map(|(i, s)| map(&[("s", Value::from(s)), ("i", Value::from(i))]))
            .chain(std::iter::once(map(&[("i", Value::Int(4))])))
            .collect()
    }

    #[test]
    fn test_nulls_first_ascending_and_last_descending() {
        let ctx = rows_ctx(letters());
        let mut plan = plan_over_rows(vec![Box::new(OrderByStep::new(
            vec![OrderItem::asc("s")],
            None,
            None,
        ))]);
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(
            column(&rows, "s"),
            vec![
                Value::Null,
                Value::from("A"),
                Value::from("a"),
                Value::from("b"),
                Value::from("c")
            ]
        );

        let mut plan = plan_over_rows(vec![Box::new(OrderByStep::new(
            vec![OrderItem::desc("s")],
            None,
            None,
        ))]);
        let rows = plan.fetch_all(&ctx).unwrap();
        assert_eq!(rows[4].get("s"), None);
    }

    #[test]
    fn test_case_insensitive_collation_is_stable() {
        let ctx = rows_ctx(letters());
        let mut plan = plan_over_rows(vec![Box::new(OrderByStep::new(
            vec![OrderItem::asc("s").with_collate("ci")],
            None,
            None,
        ))]);
        let rows = plan.fetch_all(&ctx).unwrap();
        // "A" (i=1) arrived before "a" (i=3)
        assert_eq!(
            column(&rows, "i"),
            vec![Value::Int(4), Value::Int(1), Value::Int(3), Value::Int(0), Value::Int(2)]
        );
    }

    #[test]
    fn test_bounded_buffer_peak() {
        let mut buffer = SortBuffer::new(vec![true], Some(5), None);
        for i in (0..100).rev() {
            buffer
                .push(vec![Value::Int(i)], ResultRow::new().with_property("i", i))
                .unwrap();
        }
        assert!(buffer.peak() <= 10);
        let rows = buffer.finish();
        assert_eq!(
            column(&rows, "i"),
            (0..5).map(Value::Int).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_heap_limit() {
        let ctx = rows_ctx(letters()).with_config(ExecutionConfig::default().max_heap_elements(Some(3)));
        let mut plan = plan_over_rows(vec![Box::new(OrderByStep::new(
            vec![OrderItem::asc("i")],
            None,
            None,
        ))]);
        let err = plan.fetch_all(&ctx).unwrap_err();
        assert!(err.to_string().contains(MAX_HEAP_ELEMENTS_KEY));

        let mut bounded = plan_over_rows(vec![Box::new(OrderByStep::new(
            vec![OrderItem::asc("i")],
            None,
            Some(1),
        ))]);
        assert_eq!(bounded.fetch_all(&ctx).unwrap().len(), 1);
    }
}
