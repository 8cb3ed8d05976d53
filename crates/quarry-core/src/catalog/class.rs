//! Class and property definitions.

use serde::{Deserialize, Serialize};

/// Declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// Boolean value.
    Boolean,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit floating point.
    Float,
    /// UTF-8 string.
    String,
    /// Link to another record.
    Link,
    /// Embedded list; indexes store one entry per element.
    EmbeddedList,
    /// Embedded map.
    EmbeddedMap,
    /// Any value.
    Any,
}

impl PropertyType {
    /// Whether values of this type are collections.
    pub fn is_collection(&self) -> bool {
        matches!(self, PropertyType::EmbeddedList | PropertyType::EmbeddedMap)
    }
}

/// A property declared on a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name.
    pub name: String,
    /// Declared type.
    pub property_type: PropertyType,
}

impl PropertyDef {
    /// Create a property definition.
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
        }
    }
}

/// A class definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    /// Class name (unique within the schema).
    pub name: String,
    /// Direct superclass.
    pub superclass: Option<String>,
    /// Clusters holding records of exactly this class.
    pub clusters: Vec<i32>,
    /// Abstract classes have no clusters of their own.
    pub is_abstract: bool,
    /// Declared properties.
    pub properties: Vec<PropertyDef>,
}

impl ClassDef {
    /// Create a concrete class with no clusters assigned yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            clusters: Vec::new(),
            is_abstract: false,
            properties: Vec::new(),
        }
    }

    /// Create an abstract class.
    pub fn new_abstract(name: impl Into<String>) -> Self {
        Self {
            is_abstract: true,
            ..Self::new(name)
        }
    }

    /// Set the superclass.
    pub fn with_superclass(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    /// Set the clusters.
    pub fn with_clusters(mut self, clusters: Vec<i32>) -> Self {
        self.clusters = clusters;
        self
    }

    /// Add a property.
    pub fn with_property(mut self, name: impl Into<String>, property_type: PropertyType) -> Self {
        self.properties.push(PropertyDef::new(name, property_type));
        self
    }

    /// Get a property declared on this class.
    pub fn get_property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}
