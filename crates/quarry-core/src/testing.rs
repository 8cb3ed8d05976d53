//! Shared fixtures for unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use quarry_sql::Value;

use crate::catalog::{ClassDef, IndexDefinition, IndexKind, PropertyType};
use crate::query::step::ExecutionStep;
use crate::query::steps::FetchFromVariableStep;
use crate::query::{CommandContext, ResultRow, SelectExecutionPlan};
use crate::storage::MemoryDatabase;

/// `Person(name, age, city, tags)` with an index on `age` and six records.
pub fn people_db() -> MemoryDatabase {
    let mut db = MemoryDatabase::new();
    db.create_class(
        ClassDef::new("Person")
            .with_property("name", PropertyType::String)
            .with_property("age", PropertyType::Integer)
            .with_property("city", PropertyType::String)
            .with_property("tags", PropertyType::EmbeddedList),
    )
    .unwrap();
    db.create_index(IndexDefinition::new(
        "Person.age",
        "Person",
        vec!["age"],
        IndexKind::NotUnique,
    ))
    .unwrap();
    let people: [(&str, i64, &str); 6] = [
        ("alice", 30, "Rome"),
        ("bob", 25, "Oslo"),
        ("carol", 35, "Rome"),
        ("dave", 25, "Lima"),
        ("erin", 40, "Oslo"),
        ("frank", 30, "Rome"),
    ];
    for (name, age, city) in people {
        db.insert(
            "Person",
            [
                ("name", Value::from(name)),
                ("age", Value::from(age)),
                ("city", Value::from(city)),
            ],
        )
        .unwrap();
    }
    db
}

/// Context over a database.
pub fn ctx(db: MemoryDatabase) -> CommandContext {
    CommandContext::new(Arc::new(db))
}

/// A map value built from pairs.
pub fn map(pairs: &[(&str, Value)]) -> Value {
    Value::Map(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<BTreeMap<_, _>>(),
    )
}

/// Context whose `rows` parameter holds computed rows, one per map.
pub fn rows_ctx(rows: Vec<Value>) -> CommandContext {
    ctx(MemoryDatabase::new()).with_parameter("rows", Value::List(rows))
}

/// Plan reading the `rows` parameter, followed by `steps`.
pub fn plan_over_rows(steps: Vec<Box<dyn ExecutionStep>>) -> SelectExecutionPlan {
    let mut plan = SelectExecutionPlan::new();
    plan.chain(Box::new(FetchFromVariableStep::parameter("rows")));
    for step in steps {
        plan.chain(step);
    }
    plan
}

/// Values of one property across rows.
pub fn column(rows: &[ResultRow], name: &str) -> Vec<Value> {
    rows.iter()
        .map(|r| r.get(name).cloned().unwrap_or(Value::Null))
        .collect()
}
