use super::{EntitySchema, Relation, RelationKind};
use crate::core::{MirrorError, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Registry of entity schemas.
///
/// Immutable once built: adding a schema returns a new registry, so clones
/// are cheap and can be handed to readers without locking.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: Arc<HashMap<String, EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: Arc::new(HashMap::new()),
        }
    }

    /// Register a schema, returning the NEW registry.
    pub fn with_schema(self, schema: EntitySchema) -> Result<Self> {
        let name = schema.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(MirrorError::ConstraintViolation(format!(
                "Entity type '{}' is already registered",
                name
            )));
        }

        let mut schemas = (*self.schemas).clone();
        schemas.insert(name, schema);
        Ok(Self {
            schemas: Arc::new(schemas),
        })
    }

    pub fn get(&self, entity_type: &str) -> Result<&EntitySchema> {
        self.schemas
            .get(entity_type)
            .ok_or_else(|| MirrorError::UnknownEntityType(entity_type.to_string()))
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.schemas.contains_key(entity_type)
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn relation(&self, entity_type: &str, relation: &str) -> Result<&Relation> {
        self.get(entity_type)?.get_relation(relation)
    }

    /// Fields of `entity_type` that get a foreign-key index: its own
    /// belongs-to keys plus every key a has-many relation elsewhere points at.
    pub fn indexed_fields(&self, entity_type: &str) -> Result<Vec<String>> {
        let schema = self.get(entity_type)?;
        let mut fields: BTreeSet<String> =
            schema.belongs_to_keys().map(str::to_string).collect();

        for other in self.schemas.values() {
            for relation in other.relations() {
                if relation.kind == RelationKind::HasMany
                    && relation.target == entity_type
                    && relation.key != "id"
                {
                    fields.insert(relation.key.clone());
                }
            }
        }
        Ok(fields.into_iter().collect())
    }

    /// Check that every relation points at a registered type and a declared field.
    pub fn validate(&self) -> Result<()> {
        for schema in self.schemas.values() {
            for relation in schema.relations() {
                let target = self.get(&relation.target)?;
                let (owner, key) = match relation.kind {
                    RelationKind::BelongsTo => (schema, relation.key.as_str()),
                    RelationKind::HasMany => (target, relation.key.as_str()),
                    RelationKind::OneToOne => continue,
                };
                if !owner.has_field(key) {
                    return Err(MirrorError::UnknownField {
                        entity_type: owner.name().to_string(),
                        field: key.to_string(),
                    });
                }
            }
            if let Some(version) = schema.version_field()
                && !schema.has_field(version)
            {
                return Err(MirrorError::UnknownField {
                    entity_type: schema.name().to_string(),
                    field: version.to_string(),
                });
            }
            if let Some(archive) = schema.archive_field()
                && !schema.has_field(archive)
            {
                return Err(MirrorError::UnknownField {
                    entity_type: schema.name().to_string(),
                    field: archive.to_string(),
                });
            }
            if let Some(key) = schema.natural_key_fields() {
                if key.is_empty() {
                    return Err(MirrorError::ConstraintViolation(format!(
                        "Natural key of '{}' names no fields",
                        schema.name()
                    )));
                }
                if let Some(field) = key.iter().find(|f| !schema.has_field(f)) {
                    return Err(MirrorError::UnknownField {
                        entity_type: schema.name().to_string(),
                        field: field.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with_schema(
                EntitySchema::new("channel")
                    .field(FieldDef::text("team_id"))
                    .belongs_to("team", "team", "team_id")
                    .has_many("posts", "post", "channel_id"),
            )
            .unwrap()
            .with_schema(EntitySchema::new("team"))
            .unwrap()
            .with_schema(EntitySchema::new("post").field(FieldDef::text("channel_id")))
            .unwrap()
    }

    #[test]
    fn test_unknown_entity_type() {
        let err = registry().get("emoji").unwrap_err();
        assert!(matches!(err, MirrorError::UnknownEntityType(name) if name == "emoji"));
    }

    #[test]
    fn test_copy_on_write() {
        let base = registry();
        let extended = base.clone().with_schema(EntitySchema::new("user")).unwrap();
        assert!(!base.contains("user"));
        assert!(extended.contains("user"));
        assert!(extended.clone().with_schema(EntitySchema::new("user")).is_err());
    }

    #[test]
    fn test_indexed_fields_follow_relations() {
        let registry = registry();
        assert_eq!(registry.indexed_fields("channel").unwrap(), vec!["team_id"]);
        assert_eq!(registry.indexed_fields("post").unwrap(), vec!["channel_id"]);
        assert!(registry.indexed_fields("team").unwrap().is_empty());
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_dangling_relation() {
        let broken = SchemaRegistry::new()
            .with_schema(EntitySchema::new("post").belongs_to("channel", "channel", "channel_id"))
            .unwrap();
        assert!(matches!(
            broken.validate().unwrap_err(),
            MirrorError::UnknownEntityType(_)
        ));
    }

    #[test]
    fn test_validate_rejects_empty_natural_key() {
        let empty = SchemaRegistry::new()
            .with_schema(EntitySchema::new("draft").natural_key(&[]))
            .unwrap();
        assert!(matches!(
            empty.validate().unwrap_err(),
            MirrorError::ConstraintViolation(_)
        ));

        let undeclared = SchemaRegistry::new()
            .with_schema(EntitySchema::new("draft").natural_key(&["channel_id"]))
            .unwrap();
        assert!(matches!(
            undeclared.validate().unwrap_err(),
            MirrorError::UnknownField { .. }
        ));
    }
}
