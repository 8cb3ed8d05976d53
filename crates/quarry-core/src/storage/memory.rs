//! In-memory storage engine.
//!
//! Records live in per-cluster ordered maps; indexes are B-trees over key
//! vectors with a separate set for entirely-null keys. Both are built for
//! tests and embedding, not for persistence.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use quarry_sql::{Rid, Value};
use tracing::debug;

use super::{Database, EntryIter, Index, IndexEntry, Record, RecordIter};
use crate::catalog::{ClassDef, IndexDefinition, IndexKind, PropertyType, Schema};
use crate::error::{Error, Result};

/// In-memory secondary index.
#[derive(Debug, Clone)]
pub struct MemoryIndex {
    definition: IndexDefinition,
    /// Per key field: whether the field is a declared embedded list whose
    /// elements are indexed one by one.
    collection_fields: Vec<bool>,
    entries: BTreeMap<Vec<Value>, BTreeSet<Rid>>,
    nulls: BTreeSet<Rid>,
    count: usize,
}

impl MemoryIndex {
    /// Create an empty index. Field types are resolved against the schema.
    pub fn new(definition: IndexDefinition, schema: &Schema) -> Self {
        let collection_fields = definition
            .fields
            .iter()
            .map(|f| {
                schema.property_type(&definition.class, f) == Some(PropertyType::EmbeddedList)
            })
            .collect();
        Self {
            definition,
            collection_fields,
            entries: BTreeMap::new(),
            nulls: BTreeSet::new(),
            count: 0,
        }
    }

    /// Keys a record contributes. Embedded-list fields fan out to one key
    /// per distinct element; an empty list counts as null.
    fn keys_for(&self, record: &Record) -> Vec<Vec<Value>> {
        let mut keys: Vec<Vec<Value>> = vec![Vec::with_capacity(self.definition.fields.len())];
        for (field, is_collection) in self.definition.fields.iter().zip(&self.collection_fields) {
            let value = record.get(field).cloned().unwrap_or(Value::Null);
            let components = match value {
                Value::List(items) if *is_collection => {
                    let mut distinct: Vec<Value> = Vec::new();
                    for item in items {
                        if !distinct.contains(&item) {
                            distinct.push(item);
                        }
                    }
                    if distinct.is_empty() {
                        vec![Value::Null]
                    } else {
                        distinct
                    }
                }
                other => vec![other],
            };
            keys = keys
                .into_iter()
                .flat_map(|prefix| {
                    components.iter().map(move |c| {
                        let mut key = prefix.clone();
                        key.push(c.clone());
                        key
                    })
                })
                .collect();
        }
        keys
    }

    fn check_unique(&self, record: &Record) -> Result<()> {
        if !self.definition.kind.is_unique() {
            return Ok(());
        }
        for key in self.keys_for(record) {
            if key.iter().all(Value::is_null) {
                continue;
            }
            if let Some(rids) = self.entries.get(&key) {
                if rids.iter().any(|r| *r != record.rid) {
                    return Err(Error::Storage(format!(
                        "duplicate key [{}] in unique index '{}'",
                        render_key(&key),
                        self.definition.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Add a record's keys.
    pub fn insert(&mut self, record: &Record) -> Result<()> {
        self.check_unique(record)?;
        for key in self.keys_for(record) {
            if key.iter().all(Value::is_null) {
                if !self.definition.ignore_nulls && self.nulls.insert(record.rid) {
                    self.count += 1;
                }
            } else if self.entries.entry(key).or_default().insert(record.rid) {
                self.count += 1;
            }
        }
        Ok(())
    }

    /// Remove a record's keys.
    pub fn remove(&mut self, record: &Record) {
        for key in self.keys_for(record) {
            if key.iter().all(Value::is_null) {
                if self.nulls.remove(&record.rid) {
                    self.count -= 1;
                }
                continue;
            }
            if let Some(rids) = self.entries.get_mut(&key) {
                if rids.remove(&record.rid) {
                    self.count -= 1;
                }
                if rids.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    fn require_ordered(&self) -> Result<()> {
        if self.definition.kind.supports_range() {
            Ok(())
        } else {
            Err(Error::Storage(format!(
                "index '{}' does not support ordered scans",
                self.definition.name
            )))
        }
    }

    fn check_bound(&self, bound: &[Value]) -> Result<()> {
        if bound.is_empty() || bound.len() > self.definition.fields.len() {
            return Err(Error::Storage(format!(
                "index '{}' cannot be searched with a {}-component key",
                self.definition.name,
                bound.len()
            )));
        }
        Ok(())
    }

    /// Entries whose key starts with `prefix` and whose component right
    /// after the prefix satisfies `accept`.
    fn walk<'a, F>(&'a self, prefix: Vec<Value>, ascending: bool, accept: F) -> EntryIter<'a>
    where
        F: Fn(&Value) -> bool + 'a,
    {
        let position = prefix.len();
        let range = self
            .entries
            .range::<[Value], _>((Bound::Included(prefix.as_slice()), Bound::Unbounded));
        let matching = range
            .take_while(move |(key, _)| key.starts_with(&prefix))
            .filter(move |(key, _)| key.get(position).map_or(true, &accept))
            .flat_map(|(key, rids)| {
                rids.iter().map(move |rid| IndexEntry {
                    key: key.clone(),
                    rid: *rid,
                })
            });
        if ascending {
            Box::new(matching)
        } else {
            let mut collected: Vec<IndexEntry> = matching.collect();
            collected.reverse();
            Box::new(collected.into_iter())
        }
    }
}

fn render_key(key: &[Value]) -> String {
    key.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Index for MemoryIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn point_lookup(&self, key: &[Value], ascending: bool) -> Result<EntryIter<'_>> {
        self.check_bound(key)?;
        if self.definition.kind == IndexKind::Hash && key.len() != self.definition.fields.len() {
            return Err(Error::Storage(format!(
                "hash index '{}' needs a full key",
                self.definition.name
            )));
        }
        Ok(self.walk(key.to_vec(), ascending, |_| true))
    }

    fn scan_major(
        &self,
        key: &[Value],
        inclusive: bool,
        ascending: bool,
    ) -> Result<EntryIter<'_>> {
        self.require_ordered()?;
        self.check_bound(key)?;
        let (bound, prefix) = split_bound(key);
        Ok(self.walk(prefix, ascending, move |v| {
            matches!(
                v.sql_compare(&bound),
                Some(std::cmp::Ordering::Greater)
            ) || (inclusive && v.sql_compare(&bound) == Some(std::cmp::Ordering::Equal))
        }))
    }

    fn scan_minor(
        &self,
        key: &[Value],
        inclusive: bool,
        ascending: bool,
    ) -> Result<EntryIter<'_>> {
        self.require_ordered()?;
        self.check_bound(key)?;
        let (bound, prefix) = split_bound(key);
        Ok(self.walk(prefix, ascending, move |v| {
            matches!(v.sql_compare(&bound), Some(std::cmp::Ordering::Less))
                || (inclusive && v.sql_compare(&bound) == Some(std::cmp::Ordering::Equal))
        }))
    }

    fn scan_between(
        &self,
        low: &[Value],
        low_inclusive: bool,
        high: &[Value],
        high_inclusive: bool,
        ascending: bool,
    ) -> Result<EntryIter<'_>> {
        self.require_ordered()?;
        self.check_bound(low)?;
        self.check_bound(high)?;
        let (low_bound, prefix) = split_bound(low);
        let (high_bound, high_prefix) = split_bound(high);
        if prefix != high_prefix {
            return Err(Error::Storage(format!(
                "index '{}' range bounds [{}] and [{}] differ before the last component",
                self.definition.name,
                render_key(low),
                render_key(high)
            )));
        }
        Ok(self.walk(prefix, ascending, move |v| {
            let above = match v.sql_compare(&low_bound) {
                Some(std::cmp::Ordering::Greater) => true,
                Some(std::cmp::Ordering::Equal) => low_inclusive,
                _ => false,
            };
            let below = match v.sql_compare(&high_bound) {
                Some(std::cmp::Ordering::Less) => true,
                Some(std::cmp::Ordering::Equal) => high_inclusive,
                _ => false,
            };
            above && below
        }))
    }

    fn null_entries(&self) -> EntryIter<'_> {
        let width = self.definition.fields.len();
        Box::new(self.nulls.iter().map(move |rid| IndexEntry {
            key: vec![Value::Null; width],
            rid: *rid,
        }))
    }

    fn scan_all(&self, ascending: bool) -> Result<EntryIter<'_>> {
        self.require_ordered()?;
        Ok(self.walk(Vec::new(), ascending, |_| true))
    }

    fn entry_count(&self) -> usize {
        self.count
    }
}

/// Split a bound into its last component and the equality prefix.
fn split_bound(key: &[Value]) -> (Value, Vec<Value>) {
    match key.split_last() {
        Some((last, prefix)) => (last.clone(), prefix.to_vec()),
        None => (Value::Null, Vec::new()),
    }
}

/// In-memory database: schema, clustered records and indexes.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    schema: Schema,
    clusters: BTreeMap<i32, BTreeMap<i64, Record>>,
    next_positions: HashMap<i32, i64>,
    indexes: HashMap<String, MemoryIndex>,
    next_cluster: i32,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Concrete classes without clusters get one assigned.
    pub fn create_class(&mut self, mut class: ClassDef) -> Result<()> {
        if !class.is_abstract && class.clusters.is_empty() {
            class.clusters.push(self.next_cluster);
        }
        let clusters = class.clusters.clone();
        self.schema.add_class(class)?;
        for cluster in clusters {
            self.clusters.entry(cluster).or_default();
            self.next_cluster = self.next_cluster.max(cluster + 1);
        }
        Ok(())
    }

    /// Give a class one more cluster and return its id.
    pub fn add_cluster(&mut self, class: &str) -> Result<i32> {
        let cluster = self.next_cluster;
        self.schema.add_cluster(class, cluster)?;
        self.clusters.entry(cluster).or_default();
        self.next_cluster += 1;
        Ok(cluster)
    }

    /// Create an index and fill it from existing records.
    pub fn create_index(&mut self, definition: IndexDefinition) -> Result<()> {
        self.schema.require_class(&definition.class)?;
        let mut index = MemoryIndex::new(definition.clone(), &self.schema);
        let mut backfilled = 0usize;
        for record in self.clusters.values().flat_map(BTreeMap::values) {
            if self.schema.is_subclass_of(&record.class, &definition.class) {
                index.insert(record)?;
                backfilled += 1;
            }
        }
        self.schema.add_index(definition.clone())?;
        debug!(index = %definition.name, backfilled, "created index");
        self.indexes.insert(definition.name, index);
        Ok(())
    }

    /// Insert a record into the first cluster of its class.
    pub fn insert<K, V>(&mut self, class: &str, properties: impl IntoIterator<Item = (K, V)>) -> Result<Rid>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let cluster = {
            let def = self.schema.require_class(class)?;
            *def.clusters.first().ok_or_else(|| {
                Error::InvalidInput(format!("class '{class}' has no cluster to store records in"))
            })?
        };
        self.insert_into_cluster(cluster, class, properties)
    }

    /// Insert a record into a specific cluster of its class.
    pub fn insert_into_cluster<K, V>(
        &mut self,
        cluster: i32,
        class: &str,
        properties: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Rid>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let owns_cluster = self
            .schema
            .require_class(class)?
            .clusters
            .contains(&cluster);
        if !owns_cluster {
            return Err(Error::InvalidInput(format!(
                "cluster {cluster} does not belong to class '{class}'"
            )));
        }
        let position = self.next_positions.get(&cluster).copied().unwrap_or(0);
        let rid = Rid::new(cluster, position);
        let record = Record::new(
            rid,
            class,
            properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );

        let index_names: Vec<String> = self
            .schema
            .indexes_for_class(class)
            .iter()
            .map(|d| d.name.clone())
            .collect();
        for name in &index_names {
            if let Some(index) = self.indexes.get(name) {
                index.check_unique(&record)?;
            }
        }
        for name in &index_names {
            if let Some(index) = self.indexes.get_mut(name) {
                index.insert(&record)?;
            }
        }

        self.next_positions.insert(cluster, position + 1);
        self.clusters.entry(cluster).or_default().insert(position, record);
        Ok(rid)
    }

    /// Delete a record, returning it.
    pub fn delete(&mut self, rid: Rid) -> Option<Record> {
        let record = self.clusters.get_mut(&rid.cluster)?.remove(&rid.position)?;
        for index in self.indexes.values_mut() {
            if self.schema.is_subclass_of(&record.class, &index.definition.class) {
                index.remove(&record);
            }
        }
        Some(record)
    }

    /// Mutable access to the schema for callers that manage clusters themselves.
    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }
}

impl Database for MemoryDatabase {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn load(&self, rid: Rid) -> Option<Record> {
        self.clusters.get(&rid.cluster)?.get(&rid.position).cloned()
    }

    fn scan_cluster(&self, cluster: i32, ascending: bool) -> RecordIter<'_> {
        match self.clusters.get(&cluster) {
            Some(records) if ascending => Box::new(records.values().cloned()),
            Some(records) => Box::new(records.values().rev().cloned()),
            None => Box::new(std::iter::empty()),
        }
    }

    fn cluster_count(&self, cluster: i32) -> usize {
        self.clusters.get(&cluster).map_or(0, BTreeMap::len)
    }

    fn index(&self, name: &str) -> Option<&dyn Index> {
        self.indexes.get(name).map(|i| i as &dyn Index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> MemoryDatabase {
        let mut db = MemoryDatabase::new();
        db.create_class(
            ClassDef::new("Person")
                .with_property("name", PropertyType::String)
                .with_property("age", PropertyType::Integer)
                .with_property("tags", PropertyType::EmbeddedList),
        )
        .unwrap();
        for (name, age) in [("ann", 30), ("bob", 25), ("cid", 41), ("dan", 25)] {
            db.insert("Person", [("name", Value::from(name)), ("age", Value::from(age))])
                .unwrap();
        }
        db.insert("Person", [("name", Value::from("eve"))]).unwrap();
        db.create_index(IndexDefinition::new(
            "Person.age",
            "Person",
            vec!["age"],
            IndexKind::NotUnique,
        ))
        .unwrap();
        db
    }

    fn ages(iter: EntryIter<'_>) -> Vec<i64> {
        iter.map(|e| e.key[0].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_backfill_and_nulls() {
        let db = people();
        let index = db.index("Person.age").unwrap();
        assert_eq!(index.entry_count(), 5);
        assert_eq!(index.null_entries().count(), 1);
        assert_eq!(ages(index.scan_all(true).unwrap()), vec![25, 25, 30, 41]);
        assert_eq!(ages(index.scan_all(false).unwrap()), vec![41, 30, 25, 25]);
    }

    #[test]
    fn test_range_inclusivity() {
        let db = people();
        let index = db.index("Person.age").unwrap();
        let key = [Value::from(30)];
        assert_eq!(ages(index.scan_major(&key, false, true).unwrap()), vec![41]);
        assert_eq!(ages(index.scan_major(&key, true, true).unwrap()), vec![30, 41]);
        assert_eq!(ages(index.scan_minor(&key, false, false).unwrap()), vec![25, 25]);
        let between = index
            .scan_between(&[Value::from(25)], true, &[Value::from(30)], false, true)
            .unwrap();
        assert_eq!(ages(between), vec![25, 25]);
    }

    #[test]
    fn test_incomparable_bound_matches_nothing() {
        let db = people();
        let index = db.index("Person.age").unwrap();
        assert_eq!(index.scan_major(&[Value::from("x")], true, true).unwrap().count(), 0);
    }

    #[test]
    fn test_unique_violation_leaves_data_untouched() {
        let mut db = people();
        db.create_index(IndexDefinition::new(
            "Person.name",
            "Person",
            vec!["name"],
            IndexKind::Unique,
        ))
        .unwrap();
        let before = db.cluster_count(0);
        assert!(db.insert("Person", [("name", "ann")]).is_err());
        assert_eq!(db.cluster_count(0), before);
    }

    #[test]
    fn test_collection_field_indexes_elements() {
        let mut db = people();
        db.create_index(IndexDefinition::new(
            "Person.tags",
            "Person",
            vec!["tags"],
            IndexKind::NotUnique,
        ))
        .unwrap();
        let rid = db
            .insert(
                "Person",
                [("tags", Value::from(vec!["a", "b", "a"]))],
            )
            .unwrap();
        let index = db.index("Person.tags").unwrap();
        let hits: Vec<_> = index
            .point_lookup(&[Value::from("a")], true)
            .unwrap()
            .map(|e| e.rid)
            .collect();
        assert_eq!(hits, vec![rid]);
        assert_eq!(index.point_lookup(&[Value::from("b")], true).unwrap().count(), 1);
    }

    #[test]
    fn test_delete_removes_index_entries() {
        let mut db = people();
        let rid = Rid::new(0, 0);
        assert!(db.delete(rid).is_some());
        assert!(db.load(rid).is_none());
        let index = db.index("Person.age").unwrap();
        assert_eq!(ages(index.scan_all(true).unwrap()), vec![25, 25, 41]);
    }

    #[test]
    fn test_hash_index_rejects_ranges() {
        let mut db = people();
        db.create_index(IndexDefinition::new(
            "Person.name.hash",
            "Person",
            vec!["name"],
            IndexKind::Hash,
        ))
        .unwrap();
        let index = db.index("Person.name.hash").unwrap();
        assert!(index.scan_major(&[Value::from("a")], true, true).is_err());
        assert_eq!(index.point_lookup(&[Value::from("bob")], true).unwrap().count(), 1);
    }
}
