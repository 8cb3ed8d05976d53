//! Serving ORDER BY from fetch order.

use quarry_sql::{Direction, Expression, OrderItem, RecordAttribute};

use crate::catalog::{IndexDefinition, Schema};
use crate::query::index_descriptor::{IndexKeyCondition, IndexSearchDescriptor};

/// Plain field names of ORDER BY items sharing one direction without
/// collation, with that direction.
fn plain_fields<'o>(
    order_by: &'o [OrderItem],
    schema: &Schema,
    class: &str,
) -> Option<(Vec<&'o str>, bool)> {
    let direction = order_by.first()?.direction;
    let mut fields = Vec::with_capacity(order_by.len());
    for item in order_by {
        if item.direction != direction || item.collate.is_some() {
            return None;
        }
        let field = item.expr.as_field().filter(|f| !f.contains('.'))?;
        if schema.is_collection_property(class, field) {
            return None;
        }
        fields.push(field);
    }
    Some((fields, direction == Direction::Asc))
}

/// Direction in which fetching through `descriptor` already yields
/// `order_by` order, if it does.
///
/// Fields pinned by single-valued equalities are constant in the output,
/// so ORDER BY items on them are ignored; the other items must follow the
/// index fields right after that constant prefix.
pub fn index_order(
    descriptor: &IndexSearchDescriptor,
    order_by: &[OrderItem],
    schema: &Schema,
    class: &str,
) -> Option<bool> {
    if !descriptor.index.kind.supports_range() {
        return None;
    }
    let (fields, ascending) = plain_fields(order_by, schema, class)?;
    let constant = descriptor
        .key
        .iter()
        .take_while(|k| matches!(k, IndexKeyCondition::Equals { .. }))
        .count();
    let index_fields = &descriptor.index.fields;
    let rest: Vec<&str> = fields
        .into_iter()
        .filter(|f| !index_fields[..constant].iter().any(|c| c.as_str() == *f))
        .collect();
    let available = &index_fields[constant..];
    if rest.len() > available.len() {
        return None;
    }
    rest.iter()
        .zip(available)
        .all(|(order, index)| *order == index.as_str())
        .then_some(ascending)
}

/// An index whose full scan yields `order_by` order for `class`, with the
/// scan direction.
///
/// The index must be ordered, store null keys and hold no collection
/// field, so a full scan visits every record exactly once; nulls come first
/// ascending and last descending.
pub fn sort_index<'s>(
    order_by: &[OrderItem],
    schema: &'s Schema,
    class: &str,
) -> Option<(&'s IndexDefinition, bool)> {
    let (fields, ascending) = plain_fields(order_by, schema, class)?;
    let mut candidates: Vec<&IndexDefinition> = schema
        .indexes_for_class(class)
        .into_iter()
        .filter(|index| index.kind.supports_range() && !index.ignore_nulls)
        .filter(|index| {
            !index
                .fields
                .iter()
                .any(|f| schema.is_collection_property(class, f))
        })
        .filter(|index| {
            index.fields.len() >= fields.len()
                && fields.iter().zip(&index.fields).all(|(o, i)| *o == i.as_str())
        })
        .collect();
    // the most specific class first, then the shortest key
    candidates.sort_by_key(|index| (index.class != class, index.fields.len()));
    candidates.first().map(|index| (*index, ascending))
}

/// Direction of an `ORDER BY @rid` clause.
pub fn rid_order(order_by: &[OrderItem]) -> Option<bool> {
    match order_by {
        [item] if item.collate.is_none()
            && item.expr == Expression::Attribute(RecordAttribute::Rid) =>
        {
            Some(item.direction.is_ascending())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ClassDef, IndexKind, PropertyType};

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_class(
                ClassDef::new("P")
                    .with_clusters(vec![0])
                    .with_property("a", PropertyType::Integer)
                    .with_property("b", PropertyType::Integer)
                    .with_property("c", PropertyType::Integer)
                    .with_property("tags", PropertyType::EmbeddedList),
            )
            .unwrap();
        schema
            .add_index(IndexDefinition::new("P.a_b_c", "P", vec!["a", "b", "c"], IndexKind::NotUnique))
            .unwrap();
        schema
            .add_index(IndexDefinition::new("P.c", "P", vec!["c"], IndexKind::NotUnique).ignoring_nulls())
            .unwrap();
        schema
    }

    fn descriptor(schema: &Schema, key: Vec<IndexKeyCondition>) -> IndexSearchDescriptor {
        let index = schema.get_index("P.a_b_c").unwrap().clone();
        IndexSearchDescriptor::new(index, key, None, None).unwrap()
    }

    fn eq(field: &str) -> IndexKeyCondition {
        IndexKeyCondition::Equals {
            field: field.into(),
            value: Expression::literal(1),
        }
    }

    #[test]
    fn test_order_after_constant_prefix() {
        let schema = schema();
        let d = descriptor(&schema, vec![eq("a")]);
        assert_eq!(index_order(&d, &[OrderItem::asc("b")], &schema, "P"), Some(true));
        assert_eq!(
            index_order(&d, &[OrderItem::desc("b"), OrderItem::desc("c")], &schema, "P"),
            Some(false)
        );
        assert_eq!(
            index_order(&d, &[OrderItem::asc("a"), OrderItem::asc("b")], &schema, "P"),
            Some(true)
        );
        assert_eq!(index_order(&d, &[OrderItem::asc("c")], &schema, "P"), None);
        assert_eq!(
            index_order(&d, &[OrderItem::asc("b"), OrderItem::desc("c")], &schema, "P"),
            None
        );
        assert_eq!(
            index_order(&d, &[OrderItem::asc("b").with_collate("ci")], &schema, "P"),
            None
        );
    }

    #[test]
    fn test_in_is_not_a_constant_prefix() {
        let schema = schema();
        let d = descriptor(
            &schema,
            vec![IndexKeyCondition::In {
                field: "a".into(),
                values: Expression::literal(quarry_sql::Value::List(vec![1.into(), 2.into()])),
            }],
        );
        assert_eq!(index_order(&d, &[OrderItem::asc("b")], &schema, "P"), None);
        assert_eq!(index_order(&d, &[OrderItem::asc("a")], &schema, "P"), Some(true));
    }

    #[test]
    fn test_sort_index_requires_nulls() {
        let schema = schema();
        let (index, ascending) = sort_index(&[OrderItem::desc("a")], &schema, "P").unwrap();
        assert_eq!(index.name, "P.a_b_c");
        assert!(!ascending);
        assert!(sort_index(&[OrderItem::asc("c")], &schema, "P").is_none());
        assert!(sort_index(&[OrderItem::asc("tags")], &schema, "P").is_none());
    }

    #[test]
    fn test_sort_index_skips_collection_keys() {
        let mut schema = schema();
        schema
            .add_index(IndexDefinition::new("P.a_tags", "P", vec!["a", "tags"], IndexKind::NotUnique))
            .unwrap();
        let (index, _) = sort_index(&[OrderItem::asc("a")], &schema, "P").unwrap();
        assert_eq!(index.name, "P.a_b_c");
    }

    #[test]
    fn test_rid_order() {
        let by_rid = OrderItem {
            expr: Expression::Attribute(RecordAttribute::Rid),
            direction: Direction::Desc,
            collate: None,
        };
        assert_eq!(rid_order(&[by_rid.clone()]), Some(false));
        assert_eq!(rid_order(&[by_rid, OrderItem::asc("a")]), None);
        assert_eq!(rid_order(&[OrderItem::asc("a")]), None);
    }
}
