//! Property tests: index-driven plans return what a filtered scan returns.

use std::sync::Arc;

use proptest::prelude::*;
use quarry_core::catalog::{ClassDef, IndexDefinition, IndexKind, PropertyType};
use quarry_core::config::ExecutionConfig;
use quarry_core::query::CommandContext;
use quarry_core::storage::MemoryDatabase;
use quarry_sql::{Condition, Expression, OrderItem, Rid, SelectStatement, Value};

type Row = (Option<i64>, Option<i64>, Option<Vec<i64>>);

fn build_db(rows: &[Row]) -> (MemoryDatabase, Vec<Rid>) {
    let mut db = MemoryDatabase::new();
    db.create_class(
        ClassDef::new("T")
            .with_property("a", PropertyType::Integer)
            .with_property("b", PropertyType::Integer)
            .with_property("tags", PropertyType::EmbeddedList),
    )
    .unwrap();
    db.create_index(IndexDefinition::new("T.a", "T", vec!["a"], IndexKind::NotUnique))
        .unwrap();
    db.create_index(IndexDefinition::new(
        "T.a_b",
        "T",
        vec!["a", "b"],
        IndexKind::NotUnique,
    ))
    .unwrap();
    db.create_index(IndexDefinition::new("T.b", "T", vec!["b"], IndexKind::Hash))
        .unwrap();
    db.create_index(IndexDefinition::new(
        "T.a_tags",
        "T",
        vec!["a", "tags"],
        IndexKind::NotUnique,
    ))
    .unwrap();
    db.create_index(IndexDefinition::new(
        "T.tags_b",
        "T",
        vec!["tags", "b"],
        IndexKind::NotUnique,
    ))
    .unwrap();

    let mut rids = Vec::with_capacity(rows.len());
    for (a, b, tags) in rows {
        let mut properties: Vec<(&str, Value)> = Vec::new();
        if let Some(a) = a {
            properties.push(("a", Value::from(*a)));
        }
        if let Some(b) = b {
            properties.push(("b", Value::from(*b)));
        }
        if let Some(tags) = tags {
            let tags = tags.iter().copied().map(Value::from).collect();
            properties.push(("tags", Value::List(tags)));
        }
        rids.push(db.insert("T", properties).unwrap());
    }
    (db, rids)
}

fn arb_rows() -> impl Strategy<Value = Vec<Row>> {
    prop::collection::vec(
        (
            prop::option::weighted(0.9, 0i64..10),
            prop::option::weighted(0.9, 0i64..10),
            prop::option::weighted(0.8, prop::collection::vec(0i64..6, 0..4)),
        ),
        0..40,
    )
}

fn arb_leaf() -> impl Strategy<Value = Condition> {
    (
        prop_oneof![Just("a"), Just("b")],
        0usize..10,
        -1i64..11,
        -1i64..11,
    )
        .prop_map(|(field, kind, x, y)| match kind {
            7 => Condition::contains("tags", x.rem_euclid(6)),
            8 => Condition::in_list("a", vec![x, y, x + 1])
                .and(Condition::contains("tags", y.rem_euclid(6))),
            9 => Condition::contains("tags", x.rem_euclid(6)).and(Condition::eq("b", y)),
            0 => Condition::eq(field, x),
            1 => Condition::lt(field, x),
            2 => Condition::ge(field, x),
            3 => Condition::between(field, x.min(y), x.max(y)),
            4 => Condition::in_list(field, vec![x, y]),
            5 => Condition::gt(field, x).and(Condition::le(field, y)),
            _ => Condition::ne(field, x),
        })
}

fn arb_condition() -> impl Strategy<Value = Condition> {
    arb_leaf().prop_recursive(3, 12, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| l.and(r)),
            (inner.clone(), inner).prop_map(|(l, r)| l.or(r)),
        ]
    })
}

fn identities(ctx: &CommandContext, stmt: &SelectStatement) -> Vec<Rid> {
    let mut rids: Vec<Rid> = ctx
        .execute(stmt)
        .unwrap()
        .iter()
        .filter_map(|row| row.identity())
        .collect();
    rids.sort();
    rids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_index_plan_matches_scan(rows in arb_rows(), condition in arb_condition()) {
        let (db, _) = build_db(&rows);
        let db = Arc::new(db);
        let stmt = SelectStatement::from_class("T").filter(condition);

        let indexed = CommandContext::new(db.clone());
        let scanned = CommandContext::new(db)
            .with_config(ExecutionConfig::default().use_indexes(false));
        prop_assert_eq!(identities(&indexed, &stmt), identities(&scanned, &stmt));
    }

    #[test]
    fn prop_index_order_matches_sort(
        values in prop::collection::vec(0i64..10, 0..30),
        descending in any::<bool>(),
        limit in 0i64..10,
    ) {
        let rows: Vec<Row> = values.iter().map(|v| (Some(*v), None, Some(vec![*v % 3, 5]))).collect();
        let (db, _) = build_db(&rows);
        let db = Arc::new(db);
        let order = if descending { OrderItem::desc("a") } else { OrderItem::asc("a") };
        let stmt = SelectStatement::from_class("T").order_by(order).limit(limit);

        let by_index = CommandContext::new(db.clone()).execute(&stmt).unwrap();
        let by_sort = CommandContext::new(db)
            .with_config(ExecutionConfig::default().use_index_for_sort(false))
            .execute(&stmt)
            .unwrap();
        let column = |rows: &[quarry_core::ResultRow]| -> Vec<Value> {
            rows.iter().map(|r| r.get("a").cloned().unwrap_or(Value::Null)).collect()
        };

        let mut expected = values.clone();
        expected.sort_unstable();
        if descending {
            expected.reverse();
        }
        expected.truncate(limit as usize);
        let expected: Vec<Value> = expected.into_iter().map(Value::from).collect();
        prop_assert_eq!(column(&by_index), expected.clone());
        prop_assert_eq!(column(&by_sort), expected);
    }

    #[test]
    fn prop_count_tracks_deletes(rows in arb_rows(), deletes in prop::collection::vec(any::<prop::sample::Index>(), 0..10)) {
        let (mut db, rids) = build_db(&rows);
        let mut deleted = std::collections::BTreeSet::new();
        if !rids.is_empty() {
            for index in deletes {
                let rid = rids[index.index(rids.len())];
                if db.delete(rid).is_some() {
                    deleted.insert(rid);
                }
            }
        }
        let ctx = CommandContext::new(Arc::new(db));
        let count = SelectStatement::from_class("T").project(Expression::count_all(), Some("n"));
        let rows_left = ctx.execute(&count).unwrap();
        prop_assert_eq!(
            rows_left[0].get("n").cloned(),
            Some(Value::from((rids.len() - deleted.len()) as i64))
        );

        let everything = identities(&ctx, &SelectStatement::from_class("T"));
        prop_assert_eq!(everything.len(), rids.len() - deleted.len());
        prop_assert!(everything.iter().all(|rid| !deleted.contains(rid)));
    }
}
