// ============================================================================
// Entity Schema Registry
// ============================================================================
//
// Pure metadata: which entity types exist, their fields, relations, version
// and delete rules. The store validates writes against it and the
// observation layer resolves relation paths through it.
//
// ============================================================================

pub mod chat;
pub mod entity;
pub mod registry;

pub use chat::{chat_registry, names};
pub use entity::{DeletePolicy, EntitySchema, FieldDef, IdentityScope, Relation, RelationKind};
pub use registry::SchemaRegistry;
