//! Schema - versioned snapshot of classes and indexes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{ClassDef, IndexDefinition, PropertyType};
use crate::error::{Error, Result};

/// Classes and indexes of a database.
///
/// Every mutation bumps `version`; cached plans are only reused while the
/// version they were built against is current.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    version: u64,
    classes: HashMap<String, ClassDef>,
    indexes: Vec<IndexDefinition>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current schema version (monotonically increasing).
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Register a class. Its superclass must already exist.
    pub fn add_class(&mut self, class: ClassDef) -> Result<()> {
        if self.classes.contains_key(&class.name) {
            return Err(Error::InvalidInput(format!(
                "class '{}' already exists",
                class.name
            )));
        }
        if let Some(parent) = &class.superclass {
            self.require_class(parent)?;
        }
        self.classes.insert(class.name.clone(), class);
        self.version += 1;
        Ok(())
    }

    /// Register an index. Its class and name must be valid.
    pub fn add_index(&mut self, index: IndexDefinition) -> Result<()> {
        self.require_class(&index.class)?;
        if self.get_index(&index.name).is_some() {
            return Err(Error::InvalidInput(format!(
                "index '{}' already exists",
                index.name
            )));
        }
        if index.fields.is_empty() {
            return Err(Error::InvalidInput(format!(
                "index '{}' has no fields",
                index.name
            )));
        }
        self.indexes.push(index);
        self.version += 1;
        Ok(())
    }

    /// Add a cluster to an existing class.
    pub fn add_cluster(&mut self, class: &str, cluster: i32) -> Result<()> {
        let def = self
            .classes
            .get_mut(class)
            .ok_or_else(|| Error::ClassNotFound(class.to_string()))?;
        def.clusters.push(cluster);
        self.version += 1;
        Ok(())
    }

    /// Get a class by name.
    pub fn get_class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    /// Get a class by name or fail with a planning error.
    pub fn require_class(&self, name: &str) -> Result<&ClassDef> {
        self.get_class(name)
            .ok_or_else(|| Error::ClassNotFound(name.to_string()))
    }

    /// All classes, sorted by name.
    pub fn classes(&self) -> Vec<&ClassDef> {
        let mut classes: Vec<_> = self.classes.values().collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        classes
    }

    /// Direct subclasses, sorted by name.
    pub fn direct_subclasses(&self, name: &str) -> Vec<&ClassDef> {
        let mut subclasses: Vec<_> = self
            .classes
            .values()
            .filter(|c| c.superclass.as_deref() == Some(name))
            .collect();
        subclasses.sort_by(|a, b| a.name.cmp(&b.name));
        subclasses
    }

    /// The class followed by its ancestors, nearest first.
    pub fn ancestors(&self, name: &str) -> Vec<&ClassDef> {
        let mut chain = Vec::new();
        let mut current = self.get_class(name);
        while let Some(class) = current {
            // guard against malformed cycles
            if chain.iter().any(|c: &&ClassDef| c.name == class.name) {
                break;
            }
            chain.push(class);
            current = class.superclass.as_deref().and_then(|p| self.get_class(p));
        }
        chain
    }

    /// Whether `class` is `ancestor` or inherits from it.
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        self.ancestors(class).iter().any(|c| c.name == ancestor)
    }

    /// Clusters of the class and all of its subclasses, sorted.
    pub fn polymorphic_clusters(&self, name: &str) -> Vec<i32> {
        let mut clusters: Vec<i32> = self
            .classes
            .values()
            .filter(|c| self.is_subclass_of(&c.name, name))
            .flat_map(|c| c.clusters.iter().copied())
            .collect();
        clusters.sort_unstable();
        clusters.dedup();
        clusters
    }

    /// The class owning a cluster.
    pub fn class_for_cluster(&self, cluster: i32) -> Option<&ClassDef> {
        self.classes.values().find(|c| c.clusters.contains(&cluster))
    }

    /// Get an index by name.
    pub fn get_index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// All index definitions.
    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    /// Indexes usable for a class: its own and those of its ancestors.
    pub fn indexes_for_class(&self, name: &str) -> Vec<&IndexDefinition> {
        let ancestors = self.ancestors(name);
        self.indexes
            .iter()
            .filter(|i| ancestors.iter().any(|c| c.name == i.class))
            .collect()
    }

    /// Declared type of a property, searching ancestors.
    pub fn property_type(&self, class: &str, property: &str) -> Option<PropertyType> {
        self.ancestors(class)
            .iter()
            .find_map(|c| c.get_property(property))
            .map(|p| p.property_type)
    }

    /// Whether the property holds a list or map, so an index on it has one
    /// entry per element.
    pub fn is_collection_property(&self, class: &str, property: &str) -> bool {
        self.property_type(class, property)
            .is_some_and(|t| t.is_collection())
    }

    /// Whether some index usable for the class has the property as a key field.
    pub fn is_indexed(&self, class: &str, property: &str) -> bool {
        self.indexes_for_class(class)
            .iter()
            .any(|i| i.fields.iter().any(|f| f == property))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexKind, PropertyType};

    fn sample_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_class(
                ClassDef::new_abstract("Animal").with_property("name", PropertyType::String),
            )
            .unwrap();
        schema
            .add_class(
                ClassDef::new("Dog")
                    .with_superclass("Animal")
                    .with_clusters(vec![5, 6])
                    .with_property("tags", PropertyType::EmbeddedList),
            )
            .unwrap();
        schema
            .add_class(
                ClassDef::new("Cat")
                    .with_superclass("Animal")
                    .with_clusters(vec![3]),
            )
            .unwrap();
        schema
            .add_index(IndexDefinition::new(
                "Animal.name",
                "Animal",
                vec!["name"],
                IndexKind::NotUnique,
            ))
            .unwrap();
        schema
    }

    #[test]
    fn test_hierarchy() {
        let schema = sample_schema();
        assert!(schema.is_subclass_of("Dog", "Animal"));
        assert!(schema.is_subclass_of("Dog", "Dog"));
        assert!(!schema.is_subclass_of("Animal", "Dog"));
        let names: Vec<_> = schema
            .direct_subclasses("Animal")
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Cat", "Dog"]);
    }

    #[test]
    fn test_polymorphic_clusters_sorted() {
        let schema = sample_schema();
        assert_eq!(schema.polymorphic_clusters("Animal"), vec![3, 5, 6]);
        assert_eq!(schema.polymorphic_clusters("Dog"), vec![5, 6]);
        assert_eq!(schema.class_for_cluster(3).unwrap().name, "Cat");
    }

    #[test]
    fn test_inherited_indexes_and_properties() {
        let schema = sample_schema();
        assert_eq!(schema.indexes_for_class("Dog").len(), 1);
        assert!(schema.is_indexed("Cat", "name"));
        assert_eq!(
            schema.property_type("Dog", "name"),
            Some(PropertyType::String)
        );
        assert_eq!(
            schema.property_type("Dog", "tags"),
            Some(PropertyType::EmbeddedList)
        );
        assert_eq!(schema.property_type("Cat", "tags"), None);
    }

    #[test]
    fn test_version_bumps_and_validation() {
        let mut schema = sample_schema();
        let before = schema.version();
        assert!(matches!(
            schema.add_class(ClassDef::new("Puppy").with_superclass("Missing")),
            Err(Error::ClassNotFound(_))
        ));
        assert!(schema.add_class(ClassDef::new("Dog")).is_err());
        assert_eq!(schema.version(), before);
        schema.add_cluster("Cat", 9).unwrap();
        assert_eq!(schema.version(), before + 1);
    }
}
