//! Choosing an index for each AND-block of a flattened WHERE clause.
//!
//! For every block, each usable index is walked field by field, greedily
//! consuming one key condition per field (two when they form a two-sided
//! range). The surviving descriptors are pruned and ranked by the cost
//! table; blocks that end up on the same index key are merged.

use quarry_sql::{CompareOp, Condition, Expression};
use tracing::debug;

use crate::catalog::{IndexDefinition, Schema};
use crate::query::context::CommandContext;
use crate::query::index_descriptor::{IndexKeyCondition, IndexSearchDescriptor};

fn indexable_field(expr: &Expression) -> Option<&str> {
    expr.as_field().filter(|f| !f.contains('.'))
}

fn is_key_value(expr: &Expression) -> bool {
    !expr.depends_on_row() && !expr.is_aggregate()
}

/// The index key condition a WHERE condition maps to, if any.
pub fn key_condition(
    condition: &Condition,
    schema: &Schema,
    class: &str,
) -> Option<IndexKeyCondition> {
    let is_collection = |field: &str| schema.is_collection_property(class, field);
    match condition {
        Condition::Compare { left, op, right } => {
            let (field, op, value) = match (indexable_field(left), indexable_field(right)) {
                (Some(field), _) if is_key_value(right) => (field, *op, right),
                (_, Some(field)) if is_key_value(left) => (field, op.flip(), left),
                _ => return None,
            };
            if is_collection(field) {
                return None;
            }
            match op {
                CompareOp::Eq => Some(IndexKeyCondition::Equals {
                    field: field.to_string(),
                    value: value.clone(),
                }),
                CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
                    Some(IndexKeyCondition::Range {
                        field: field.to_string(),
                        op,
                        value: value.clone(),
                    })
                }
                CompareOp::Ne | CompareOp::Like => None,
            }
        }
        Condition::In { left, right } => {
            let field = indexable_field(left)?;
            (is_key_value(right) && !is_collection(field)).then(|| IndexKeyCondition::In {
                field: field.to_string(),
                values: right.clone(),
            })
        }
        Condition::Contains { collection, value } => {
            let field = indexable_field(collection)?;
            (is_key_value(value) && is_collection(field)).then(|| IndexKeyCondition::Contains {
                field: field.to_string(),
                value: value.clone(),
            })
        }
        Condition::Between { value, low, high } => {
            let field = indexable_field(value)?;
            (is_key_value(low) && is_key_value(high) && !is_collection(field)).then(|| {
                IndexKeyCondition::Between {
                    field: field.to_string(),
                    low: low.clone(),
                    high: high.clone(),
                }
            })
        }
        Condition::IsNull(expr) => {
            let field = indexable_field(expr)?;
            (!is_collection(field)).then(|| IndexKeyCondition::IsNull {
                field: field.to_string(),
            })
        }
        _ => None,
    }
}

/// How `index` serves `block`, or `None` if it cannot.
pub fn descriptor_for(
    index: &IndexDefinition,
    block: &[Condition],
    schema: &Schema,
    class: &str,
) -> Option<IndexSearchDescriptor> {
    let converted: Vec<Option<IndexKeyCondition>> = block
        .iter()
        .map(|c| key_condition(c, schema, class))
        .collect();
    let mut used = vec![false; block.len()];
    let mut key = Vec::new();
    let mut additional_range = None;

    for field in &index.fields {
        let matching: Vec<usize> = converted
            .iter()
            .enumerate()
            .filter(|(_, k)| k.as_ref().is_some_and(|k| k.field() == field))
            .map(|(i, _)| i)
            .collect();
        let (first, second) = match matching.as_slice() {
            [] => break,
            [i] => (*i, None),
            [i, j] => (*i, Some(*j)),
            // more than two conditions on one field
            _ => return None,
        };
        let condition = converted[first].clone()?;
        used[first] = true;
        if let Some(j) = second {
            let other = converted[j].clone()?;
            let opposite = (condition.is_lower_bound() && other.is_upper_bound())
                || (condition.is_upper_bound() && other.is_lower_bound());
            if opposite {
                used[j] = true;
                additional_range = Some(other);
            }
        }
        let stop = condition.is_range();
        key.push(condition);
        if stop {
            break;
        }
    }
    if key.is_empty() {
        return None;
    }
    // a collection field left out of the key would yield every record once
    // per element
    let unconsumed_collection = index.fields.iter().any(|field| {
        schema.is_collection_property(class, field)
            && !key
                .iter()
                .any(|k| matches!(k, IndexKeyCondition::Contains { field: f, .. } if f == field))
    });
    if unconsumed_collection {
        return None;
    }

    let rest: Vec<Condition> = block
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(c, _)| c.clone())
        .collect();
    let remaining = (!rest.is_empty()).then(|| Condition::all(rest));
    match IndexSearchDescriptor::new(index.clone(), key, additional_range, remaining) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            debug!(index = %index.name, error = %e, "index cannot serve block");
            None
        }
    }
}

/// The cheapest descriptor for one AND-block on `class`.
pub fn best_descriptor(
    ctx: &CommandContext,
    class: &str,
    block: &[Condition],
) -> Option<IndexSearchDescriptor> {
    let schema = ctx.db().schema();
    let mut candidates: Vec<IndexSearchDescriptor> = schema
        .indexes_for_class(class)
        .into_iter()
        .filter(|index| index.kind.supports_equality())
        .filter_map(|index| descriptor_for(index, block, schema, class))
        .collect();

    // a key that is a strict prefix of another candidate's key is subsumed
    let keys: Vec<Vec<IndexKeyCondition>> = candidates.iter().map(|d| d.key.clone()).collect();
    candidates.retain(|d| {
        !keys
            .iter()
            .any(|other| other.len() > d.key.len() && other.starts_with(&d.key))
    });

    // same key on a subclass index and a superclass index: keep the subclass one
    let snapshot = candidates.clone();
    candidates.retain(|d| {
        !snapshot.iter().any(|other| {
            other.index.class != d.index.class
                && other.key == d.key
                && other.additional_range == d.additional_range
                && schema.is_subclass_of(&other.index.class, &d.index.class)
        })
    });

    let best = candidates
        .into_iter()
        .map(|d| (d.cost(ctx), d))
        .min_by(|(cost_a, a), (cost_b, b)| {
            cost_a
                .cmp(cost_b)
                .then_with(|| b.key.len().cmp(&a.key.len()))
        });
    if let Some((cost, descriptor)) = &best {
        debug!(class, index = %descriptor.index.name, cost, "index selected");
    }
    best.map(|(_, d)| d)
}

/// One descriptor per distinct index key serving `blocks`, or `None` when
/// some block has no usable index.
pub fn descriptors_for_blocks(
    ctx: &CommandContext,
    class: &str,
    blocks: &[Vec<Condition>],
) -> Option<Vec<IndexSearchDescriptor>> {
    if blocks.is_empty() {
        return None;
    }
    let mut chosen = Vec::with_capacity(blocks.len());
    for block in blocks {
        match best_descriptor(ctx, class, block) {
            Some(descriptor) => chosen.push(descriptor),
            None => {
                debug!(class, "no index for WHERE block");
                return None;
            }
        }
    }
    Some(merge_common_factors(chosen))
}

/// Merge descriptors sharing index, key and additional range, OR-ing
/// their remaining conditions.
///
/// Key values never depend on the row, so structurally equal keys select
/// the same entries in every branch and the merged filter is exact.
pub fn merge_common_factors(descriptors: Vec<IndexSearchDescriptor>) -> Vec<IndexSearchDescriptor> {
    let mut merged: Vec<IndexSearchDescriptor> = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let existing = merged.iter_mut().find(|m| {
            m.index.name == descriptor.index.name
                && m.key == descriptor.key
                && m.additional_range == descriptor.additional_range
        });
        match existing {
            Some(m) => {
                m.remaining = match (m.remaining.take(), descriptor.remaining) {
                    (Some(a), Some(b)) if a == b => Some(a),
                    (Some(a), Some(b)) => Some(a.or(b)),
                    // one branch has no filter, so the key alone decides
                    _ => None,
                };
            }
            None => merged.push(descriptor),
        }
    }
    merged
}
