//! Schema catalog.
//!
//! The catalog stores class definitions (with single inheritance and the
//! clusters holding their records), property types and index definitions.

mod class;
mod index;
mod schema;

pub use class::{ClassDef, PropertyDef, PropertyType};
pub use index::{IndexDefinition, IndexKind};
pub use schema::Schema;
