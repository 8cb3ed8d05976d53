//! How one index serves one AND-block of a WHERE clause.
//!
//! A descriptor pairs an index with the key conditions it consumes (in index
//! field order), an optional second bound for the last field, and the
//! conditions left for a post-fetch filter. At execution time the key
//! conditions are evaluated once and translated into [`KeyScan`]s.

use std::fmt;

use quarry_sql::{CompareOp, Condition, EmptyRow, Expression, Value};
use serde::{Deserialize, Serialize};

use super::context::CommandContext;
use super::statistics::QueryStats;
use crate::catalog::{IndexDefinition, IndexKind};
use crate::error::{Error, Result};
use crate::storage::{EntryIter, Index};

/// A condition on one index field, in a shape an index can serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexKeyCondition {
    /// `field = value`
    Equals {
        /// Indexed field.
        field: String,
        /// Key value.
        value: Expression,
    },
    /// `field IN values`
    In {
        /// Indexed field.
        field: String,
        /// Candidate key values (list or scalar).
        values: Expression,
    },
    /// `field CONTAINS value` on an embedded-list field.
    Contains {
        /// Indexed field.
        field: String,
        /// Element value.
        value: Expression,
    },
    /// `field <op> value` with `<`, `<=`, `>` or `>=`.
    Range {
        /// Indexed field.
        field: String,
        /// Comparison.
        op: CompareOp,
        /// Bound.
        value: Expression,
    },
    /// `field BETWEEN low AND high`
    Between {
        /// Indexed field.
        field: String,
        /// Lower bound (inclusive).
        low: Expression,
        /// Upper bound (inclusive).
        high: Expression,
    },
    /// `field IS NULL`
    IsNull {
        /// Indexed field.
        field: String,
    },
}

impl IndexKeyCondition {
    /// The indexed field.
    pub fn field(&self) -> &str {
        match self {
            IndexKeyCondition::Equals { field, .. }
            | IndexKeyCondition::In { field, .. }
            | IndexKeyCondition::Contains { field, .. }
            | IndexKeyCondition::Range { field, .. }
            | IndexKeyCondition::Between { field, .. }
            | IndexKeyCondition::IsNull { field } => field,
        }
    }

    /// Whether the condition pins the field to one or more exact keys.
    pub fn is_equality(&self) -> bool {
        matches!(
            self,
            IndexKeyCondition::Equals { .. }
                | IndexKeyCondition::In { .. }
                | IndexKeyCondition::Contains { .. }
                | IndexKeyCondition::IsNull { .. }
        )
    }

    /// Whether the condition is a range over the field.
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            IndexKeyCondition::Range { .. } | IndexKeyCondition::Between { .. }
        )
    }

    /// Whether a range bounds the field from below.
    pub(crate) fn is_lower_bound(&self) -> bool {
        matches!(
            self,
            IndexKeyCondition::Range {
                op: CompareOp::Gt | CompareOp::Ge,
                ..
            }
        )
    }

    /// Whether a range bounds the field from above.
    pub(crate) fn is_upper_bound(&self) -> bool {
        matches!(
            self,
            IndexKeyCondition::Range {
                op: CompareOp::Lt | CompareOp::Le,
                ..
            }
        )
    }

    /// The equivalent WHERE condition.
    pub fn to_condition(&self) -> Condition {
        match self {
            IndexKeyCondition::Equals { field, value } => {
                Condition::compare(Expression::field(field.as_str()), CompareOp::Eq, value.clone())
            }
            IndexKeyCondition::In { field, values } => Condition::In {
                left: Expression::field(field.as_str()),
                right: values.clone(),
            },
            IndexKeyCondition::Contains { field, value } => Condition::Contains {
                collection: Expression::field(field.as_str()),
                value: value.clone(),
            },
            IndexKeyCondition::Range { field, op, value } => {
                Condition::compare(Expression::field(field.as_str()), *op, value.clone())
            }
            IndexKeyCondition::Between { field, low, high } => Condition::Between {
                value: Expression::field(field.as_str()),
                low: low.clone(),
                high: high.clone(),
            },
            IndexKeyCondition::IsNull { field } => {
                Condition::IsNull(Expression::field(field.as_str()))
            }
        }
    }
}

impl fmt::Display for IndexKeyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_condition())
    }
}

/// One physical index scan.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyScan {
    /// Entries whose key starts with the given components.
    Point(Vec<Value>),
    /// Entries above the last component.
    Major {
        /// Bound, prefix included.
        key: Vec<Value>,
        /// Whether entries equal to the bound match.
        inclusive: bool,
    },
    /// Entries below the last component.
    Minor {
        /// Bound, prefix included.
        key: Vec<Value>,
        /// Whether entries equal to the bound match.
        inclusive: bool,
    },
    /// Entries between two bounds sharing their prefix.
    Between {
        /// Lower bound.
        low: Vec<Value>,
        /// Whether the lower bound matches.
        low_inclusive: bool,
        /// Upper bound.
        high: Vec<Value>,
        /// Whether the upper bound matches.
        high_inclusive: bool,
    },
    /// Entries with an entirely null key.
    Nulls,
}

impl KeyScan {
    /// Open the scan on an index.
    pub fn open<'a>(&self, index: &'a dyn Index, ascending: bool) -> Result<EntryIter<'a>> {
        match self {
            KeyScan::Point(key) => index.point_lookup(key, ascending),
            KeyScan::Major { key, inclusive } => index.scan_major(key, *inclusive, ascending),
            KeyScan::Minor { key, inclusive } => index.scan_minor(key, *inclusive, ascending),
            KeyScan::Between {
                low,
                low_inclusive,
                high,
                high_inclusive,
            } => index.scan_between(low, *low_inclusive, high, *high_inclusive, ascending),
            KeyScan::Nulls => Ok(index.null_entries()),
        }
    }
}

/// How an index serves one AND-block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSearchDescriptor {
    /// The index.
    pub index: IndexDefinition,
    /// Key conditions in index field order; only the last may be a range.
    pub key: Vec<IndexKeyCondition>,
    /// Second bound for the last key field.
    pub additional_range: Option<IndexKeyCondition>,
    /// Conditions to filter after loading records.
    pub remaining: Option<Condition>,
}

impl IndexSearchDescriptor {
    /// Build a descriptor, rejecting shapes the index cannot serve.
    pub fn new(
        index: IndexDefinition,
        key: Vec<IndexKeyCondition>,
        additional_range: Option<IndexKeyCondition>,
        remaining: Option<Condition>,
    ) -> Result<Self> {
        let unsupported = |condition: &dyn fmt::Display| Error::UnsupportedIndexCondition {
            index: index.name.clone(),
            condition: condition.to_string(),
        };

        if index.kind == IndexKind::FullText {
            return Err(Error::UnsupportedIndexCondition {
                index: index.name.clone(),
                condition: "comparison on a full-text index".to_string(),
            });
        }
        if key.is_empty() || key.len() > index.fields.len() {
            return Err(Error::UnsupportedIndexCondition {
                index: index.name.clone(),
                condition: format!("{} key conditions", key.len()),
            });
        }
        for (position, condition) in key.iter().enumerate() {
            if condition.field() != index.fields[position] {
                return Err(unsupported(condition));
            }
            if condition.is_range() && position + 1 != key.len() {
                return Err(unsupported(condition));
            }
            if condition.is_range() && !index.kind.supports_range() {
                return Err(unsupported(condition));
            }
            if matches!(condition, IndexKeyCondition::IsNull { .. })
                && (index.fields.len() != 1 || index.ignore_nulls)
            {
                return Err(unsupported(condition));
            }
        }
        if index.kind == IndexKind::Hash && key.len() != index.fields.len() {
            return Err(Error::UnsupportedIndexCondition {
                index: index.name.clone(),
                condition: "partial key on a hash index".to_string(),
            });
        }
        if let Some(extra) = &additional_range {
            let last = &key[key.len() - 1];
            let opposite = (last.is_lower_bound() && extra.is_upper_bound())
                || (last.is_upper_bound() && extra.is_lower_bound());
            if extra.field() != last.field() || !opposite {
                return Err(Error::ConflictingRange {
                    field: extra.field().to_string(),
                    detail: format!("{last} and {extra}"),
                });
            }
        }

        Ok(Self {
            index,
            key,
            additional_range,
            remaining,
        })
    }

    /// Key under which fetch cardinality is tracked.
    pub fn cost_key(&self) -> String {
        QueryStats::index_key(
            &self.index.name,
            self.key.len(),
            self.key.last().is_some_and(IndexKeyCondition::is_range),
            self.additional_range.is_some(),
        )
    }

    /// Whether every index field is pinned by a single-valued equality.
    pub fn is_fully_specified(&self) -> bool {
        self.key.len() == self.index.fields.len()
            && self
                .key
                .iter()
                .all(|k| matches!(k, IndexKeyCondition::Equals { .. }))
    }

    /// Estimated number of entries the fetch produces.
    pub fn cost(&self, ctx: &CommandContext) -> i64 {
        if let Some(estimate) = ctx.stats().estimate(&self.cost_key()) {
            return estimate;
        }
        if self.index.kind.is_unique() && self.is_fully_specified() {
            1
        } else {
            i64::MAX
        }
    }

    /// The conditions consumed by the index, as one condition.
    pub fn key_condition(&self) -> Condition {
        let mut parts: Vec<Condition> = self.key.iter().map(IndexKeyCondition::to_condition).collect();
        if let Some(extra) = &self.additional_range {
            parts.push(extra.to_condition());
        }
        Condition::all(parts)
    }

    /// Everything this descriptor selects, as one condition.
    pub fn full_condition(&self) -> Condition {
        match &self.remaining {
            Some(remaining) => self.key_condition().and(remaining.clone()),
            None => self.key_condition(),
        }
    }

    /// Translate the key conditions into scans for one execution.
    ///
    /// Multi-valued positions (IN, CONTAINS) are expanded into one key
    /// combination each, sorted in scan direction. Null or empty values
    /// produce no scans at all since nothing can compare equal to them.
    pub fn scans(&self, ctx: &CommandContext, ascending: bool) -> Result<Vec<KeyScan>> {
        if let [IndexKeyCondition::IsNull { .. }] = self.key.as_slice() {
            return Ok(vec![KeyScan::Nulls]);
        }

        let mut combos: Vec<Vec<Value>> = vec![Vec::new()];
        let mut range: Option<&IndexKeyCondition> = None;
        for condition in &self.key {
            let candidates = match condition {
                IndexKeyCondition::Equals { value, .. }
                | IndexKeyCondition::Contains { value, .. } => vec![evaluate(value, ctx)?],
                IndexKeyCondition::In { values, .. } => match evaluate(values, ctx)? {
                    Value::List(items) => items,
                    single => vec![single],
                },
                IndexKeyCondition::Range { .. } | IndexKeyCondition::Between { .. } => {
                    range = Some(condition);
                    break;
                }
                IndexKeyCondition::IsNull { .. } => vec![Value::Null],
            };
            let mut candidates: Vec<Value> =
                candidates.into_iter().filter(|v| !v.is_null()).collect();
            candidates.sort();
            candidates.dedup();
            if candidates.is_empty() {
                return Ok(Vec::new());
            }
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    candidates.iter().map(move |c| {
                        let mut combo = prefix.clone();
                        combo.push(c.clone());
                        combo
                    })
                })
                .collect();
        }
        combos.sort();
        combos.dedup();
        if !ascending {
            combos.reverse();
        }

        let Some(range) = range else {
            return Ok(combos.into_iter().map(KeyScan::Point).collect());
        };

        let (low, high) = match range {
            IndexKeyCondition::Between { low, high, .. } => (
                Some((evaluate(low, ctx)?, true)),
                Some((evaluate(high, ctx)?, true)),
            ),
            IndexKeyCondition::Range { op, value, .. } => {
                let bound = (evaluate(value, ctx)?, matches!(op, CompareOp::Ge | CompareOp::Le));
                let extra = match &self.additional_range {
                    Some(IndexKeyCondition::Range { op, value, .. }) => Some((
                        evaluate(value, ctx)?,
                        matches!(op, CompareOp::Ge | CompareOp::Le),
                    )),
                    _ => None,
                };
                if range.is_lower_bound() {
                    (Some(bound), extra)
                } else {
                    (extra, Some(bound))
                }
            }
            _ => (None, None),
        };
        if low.as_ref().is_some_and(|(v, _)| v.is_null())
            || high.as_ref().is_some_and(|(v, _)| v.is_null())
        {
            return Ok(Vec::new());
        }

        let with = |prefix: &[Value], value: &Value| {
            let mut key = prefix.to_vec();
            key.push(value.clone());
            key
        };
        Ok(combos
            .iter()
            .map(|prefix| match (&low, &high) {
                (Some((lo, li)), Some((hi, hi_incl))) => KeyScan::Between {
                    low: with(prefix, lo),
                    low_inclusive: *li,
                    high: with(prefix, hi),
                    high_inclusive: *hi_incl,
                },
                (Some((lo, li)), None) => KeyScan::Major {
                    key: with(prefix, lo),
                    inclusive: *li,
                },
                (None, Some((hi, hi_incl))) => KeyScan::Minor {
                    key: with(prefix, hi),
                    inclusive: *hi_incl,
                },
                (None, None) => KeyScan::Point(prefix.clone()),
            })
            .collect())
    }
}

fn evaluate(expr: &Expression, ctx: &CommandContext) -> Result<Value> {
    Ok(expr.evaluate(&EmptyRow, ctx)?)
}

impl fmt::Display for IndexSearchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ON {}", self.index.name, self.key_condition())?;
        if let Some(remaining) = &self.remaining {
            write!(f, " THEN FILTER {remaining}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::MemoryDatabase;

    fn ctx() -> CommandContext {
        CommandContext::new(Arc::new(MemoryDatabase::new())).with_parameter("p", 7)
    }

    fn single() -> IndexDefinition {
        IndexDefinition::new("A.x", "A", vec!["x"], IndexKind::NotUnique)
    }

    fn composite() -> IndexDefinition {
        IndexDefinition::new("A.xy", "A", vec!["x", "y"], IndexKind::NotUnique)
    }

    fn range(field: &str, op: CompareOp, v: i64) -> IndexKeyCondition {
        IndexKeyCondition::Range {
            field: field.into(),
            op,
            value: Expression::literal(v),
        }
    }

    fn equals(field: &str, v: Expression) -> IndexKeyCondition {
        IndexKeyCondition::Equals {
            field: field.into(),
            value: v,
        }
    }

    #[test]
    fn test_greater_than_is_exclusive_major() {
        let d = IndexSearchDescriptor::new(single(), vec![range("x", CompareOp::Gt, 10)], None, None)
            .unwrap();
        assert_eq!(
            d.scans(&ctx(), true).unwrap(),
            vec![KeyScan::Major {
                key: vec![Value::Int(10)],
                inclusive: false
            }]
        );
    }

    #[test]
    fn test_at_most_is_inclusive_minor() {
        let d = IndexSearchDescriptor::new(single(), vec![range("x", CompareOp::Le, 10)], None, None)
            .unwrap();
        assert_eq!(
            d.scans(&ctx(), true).unwrap(),
            vec![KeyScan::Minor {
                key: vec![Value::Int(10)],
                inclusive: true
            }]
        );
    }

    #[test]
    fn test_between_is_inclusive_on_both_sides() {
        let key = IndexKeyCondition::Between {
            field: "x".into(),
            low: Expression::literal(10),
            high: Expression::literal(20),
        };
        let d = IndexSearchDescriptor::new(single(), vec![key], None, None).unwrap();
        assert_eq!(
            d.scans(&ctx(), true).unwrap(),
            vec![KeyScan::Between {
                low: vec![Value::Int(10)],
                low_inclusive: true,
                high: vec![Value::Int(20)],
                high_inclusive: true,
            }]
        );
    }

    #[test]
    fn test_two_sided_range_keeps_flags() {
        let d = IndexSearchDescriptor::new(
            single(),
            vec![range("x", CompareOp::Lt, 20)],
            Some(range("x", CompareOp::Ge, 10)),
            None,
        )
        .unwrap();
        assert_eq!(
            d.scans(&ctx(), true).unwrap(),
            vec![KeyScan::Between {
                low: vec![Value::Int(10)],
                low_inclusive: true,
                high: vec![Value::Int(20)],
                high_inclusive: false,
            }]
        );
    }

    #[test]
    fn test_composite_prefix_with_range() {
        let d = IndexSearchDescriptor::new(
            composite(),
            vec![
                equals("x", Expression::param("p")),
                range("y", CompareOp::Gt, 3),
            ],
            None,
            None,
        )
        .unwrap();
        assert_eq!(
            d.scans(&ctx(), true).unwrap(),
            vec![KeyScan::Major {
                key: vec![Value::Int(7), Value::Int(3)],
                inclusive: false
            }]
        );
    }

    #[test]
    fn test_in_expands_sorted_in_scan_direction() {
        let d = IndexSearchDescriptor::new(
            composite(),
            vec![
                IndexKeyCondition::In {
                    field: "x".into(),
                    values: Expression::Literal(Value::List(vec![
                        Value::Int(3),
                        Value::Int(1),
                        Value::Null,
                        Value::Int(1),
                    ])),
                },
                equals("y", Expression::literal(0)),
            ],
            None,
            None,
        )
        .unwrap();
        assert_eq!(
            d.scans(&ctx(), false).unwrap(),
            vec![
                KeyScan::Point(vec![Value::Int(3), Value::Int(0)]),
                KeyScan::Point(vec![Value::Int(1), Value::Int(0)]),
            ]
        );
    }

    #[test]
    fn test_null_key_yields_no_scan() {
        let d = IndexSearchDescriptor::new(
            single(),
            vec![equals("x", Expression::Literal(Value::Null))],
            None,
            None,
        )
        .unwrap();
        assert!(d.scans(&ctx(), true).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_range_before_last_field() {
        let err = IndexSearchDescriptor::new(
            composite(),
            vec![range("x", CompareOp::Gt, 1), equals("y", Expression::literal(1))],
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedIndexCondition { .. }));
    }

    #[test]
    fn test_rejects_same_side_ranges() {
        let err = IndexSearchDescriptor::new(
            single(),
            vec![range("x", CompareOp::Gt, 1)],
            Some(range("x", CompareOp::Ge, 5)),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConflictingRange { .. }));
    }

    #[test]
    fn test_rejects_partial_hash_key() {
        let hash = IndexDefinition::new("A.xy", "A", vec!["x", "y"], IndexKind::Hash);
        assert!(IndexSearchDescriptor::new(
            hash,
            vec![equals("x", Expression::literal(1))],
            None,
            None
        )
        .is_err());
    }

    #[test]
    fn test_cost_seed() {
        let unique = IndexDefinition::new("A.x", "A", vec!["x"], IndexKind::Unique);
        let d = IndexSearchDescriptor::new(unique, vec![equals("x", Expression::literal(1))], None, None)
            .unwrap();
        let ctx = ctx();
        assert_eq!(d.cost(&ctx), 1);
        ctx.stats().push(&d.cost_key(), 40);
        assert_eq!(d.cost(&ctx), 40);

        let d = IndexSearchDescriptor::new(single(), vec![range("x", CompareOp::Gt, 1)], None, None)
            .unwrap();
        assert_eq!(d.cost(&ctx), i64::MAX);
    }
}
