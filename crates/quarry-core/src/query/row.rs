//! Result rows flowing through execution streams.

use quarry_sql::{RowAccess, Rid, Value};
use serde_json::{json, Map as JsonMap, Number, Value as JsonValue};

use crate::storage::Record;

/// One row of a result stream.
///
/// A row is either backed by a stored record (it carries the record's
/// identity and class) or purely computed. Properties keep their insertion
/// order; metadata holds per-row LET bindings and is never part of the
/// row's content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    identity: Option<Rid>,
    class: Option<String>,
    properties: Vec<(String, Value)>,
    metadata: Vec<(String, Value)>,
}

impl ResultRow {
    /// Create an empty computed row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Row backed by a stored record.
    pub fn from_record(record: Record) -> Self {
        Self {
            identity: Some(record.rid),
            class: Some(record.class),
            properties: record.properties,
            metadata: Vec::new(),
        }
    }

    /// Computed row built from a map value.
    pub fn from_map(map: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            properties: map.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Add a property (builder style).
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Identity of the backing record.
    pub fn identity(&self) -> Option<Rid> {
        self.identity
    }

    /// Replace the identity.
    pub fn set_identity(&mut self, rid: Option<Rid>) {
        self.identity = rid;
    }

    /// Class of the backing record.
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    /// Whether the row is backed by a persistent record.
    pub fn is_record(&self) -> bool {
        self.identity.is_some_and(|rid| rid.is_persistent())
    }

    /// Get a property.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Set a property, replacing any previous value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.properties.push((name, value)),
        }
    }

    /// Remove a property.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let position = self.properties.iter().position(|(n, _)| n == name)?;
        Some(self.properties.remove(position).1)
    }

    /// Properties in order.
    pub fn properties(&self) -> &[(String, Value)] {
        &self.properties
    }

    /// Property names in order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(n, _)| n.as_str())
    }

    /// Bind a per-row variable.
    pub fn set_metadata(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.metadata.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.metadata.push((name, value)),
        }
    }

    /// Copy per-row variables from another row.
    pub fn inherit_metadata(&mut self, other: &ResultRow) {
        for (name, value) in &other.metadata {
            self.set_metadata(name.clone(), value.clone());
        }
    }

    /// Value used for structural de-duplication: the ordered property list.
    pub fn content_key(&self) -> Value {
        Value::List(
            self.properties
                .iter()
                .map(|(n, v)| Value::List(vec![Value::String(n.clone()), v.clone()]))
                .collect(),
        )
    }

    /// Collapse the row into one value, as seen by nested queries:
    /// a link for records, the single value for one-column rows, a map
    /// otherwise.
    pub fn into_value(self) -> Value {
        if let Some(rid) = self.identity.filter(Rid::is_persistent) {
            return Value::Link(rid);
        }
        if self.properties.len() == 1 {
            if let Some((_, value)) = self.properties.into_iter().next() {
                return value;
            }
            return Value::Null;
        }
        Value::Map(self.properties.into_iter().collect())
    }

    /// JSON rendering with `@rid` and `@class` for records.
    pub fn to_json(&self) -> JsonValue {
        let mut object = JsonMap::new();
        if let Some(rid) = self.identity {
            object.insert("@rid".to_string(), json!(rid.to_string()));
        }
        if let Some(class) = &self.class {
            object.insert("@class".to_string(), json!(class));
        }
        for (name, value) in &self.properties {
            object.insert(name.clone(), value_to_json(value));
        }
        JsonValue::Object(object)
    }
}

/// Convert a value to plain JSON. Links render as `#cluster:position`.
pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => json!(i),
        Value::Float(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Link(rid) => JsonValue::String(rid.to_string()),
        Value::List(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}

impl RowAccess for ResultRow {
    fn property(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }

    fn identity(&self) -> Option<Rid> {
        self.identity
    }

    fn class_name(&self) -> Option<&str> {
        self.class.as_deref()
    }

    fn metadata(&self, name: &str) -> Option<&Value> {
        self.metadata
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    fn to_value(&self) -> Value {
        Value::Map(self.properties.iter().cloned().collect())
    }
}
