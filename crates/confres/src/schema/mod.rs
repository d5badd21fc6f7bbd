//! Type schemas: attribute definitions, cardinality, inheritance and nesting rules
mod definition;
mod registry;

pub use definition::{
    AttributeDefinition, AttributeOption, AttributeType, DurationUnit, SchemaSource, Substitution,
    TypeSchema, ValidationPattern,
};
pub use registry::{RegistryEntry, SchemaRegistry, SharedSchemaRegistry};
