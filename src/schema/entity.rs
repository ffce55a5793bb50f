use crate::core::{FieldType, MirrorError, Record, Result, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub default: Option<Value>,
    /// Closed set of accepted values, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            default: None,
            allowed: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Restrict the field to a fixed set of values.
    pub fn one_of<V: Into<Value> + Clone>(mut self, values: &[V]) -> Self {
        self.allowed = Some(values.iter().cloned().map(Into::into).collect());
        self
    }

    /// Value given to the field when a new row arrives without it.
    pub fn initial_value(&self) -> Value {
        match &self.default {
            Some(value) => value.clone(),
            None if self.nullable => Value::Null,
            None => self.field_type.zero(),
        }
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(MirrorError::ConstraintViolation(format!(
                    "Field '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.field_type.is_compatible(value) {
            return Err(MirrorError::TypeMismatch(format!(
                "Field '{}' expects type {}, got {}",
                self.name,
                self.field_type,
                value.type_name()
            )));
        }

        if let Some(allowed) = &self.allowed
            && !allowed.contains(value)
        {
            return Err(MirrorError::ConstraintViolation(format!(
                "Field '{}' does not accept '{}'",
                self.name, value
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// `key` is a local field holding the target's id.
    BelongsTo,
    /// `key` is the foreign key field on the target rows.
    HasMany,
    /// The target row shares this row's id.
    OneToOne,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BelongsTo => write!(f, "belongs-to"),
            Self::HasMany => write!(f, "has-many"),
            Self::OneToOne => write!(f, "one-to-one"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    pub key: String,
}

impl Relation {
    /// Error for observing this relation in a shape its kind does not have.
    pub fn kind_mismatch(&self, entity_type: &str, expected: &str) -> MirrorError {
        MirrorError::RelationKindMismatch {
            entity_type: entity_type.to_string(),
            relation: self.name.clone(),
            kind: self.kind.to_string(),
            expected: expected.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Deletion stamps `field` with the archival time; the row stays readable.
    Archive { field: String },
    /// Deletion removes the row.
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityScope {
    /// Ids are unique across every global entity type.
    Global,
    /// Ids are borrowed from another entity (e.g. a channel's membership row).
    Shared,
}

/// Declaration of one entity type: its fields, relations and write rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    name: String,
    fields: Vec<FieldDef>,
    relations: Vec<Relation>,
    version_field: Option<String>,
    delete_policy: DeletePolicy,
    natural_key: Option<Vec<String>>,
    identity: IdentityScope,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            relations: Vec::new(),
            version_field: None,
            delete_policy: DeletePolicy::Remove,
            natural_key: None,
            identity: IdentityScope::Global,
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn belongs_to(self, name: &str, target: &str, key: &str) -> Self {
        self.relation(name, RelationKind::BelongsTo, target, key)
    }

    pub fn has_many(self, name: &str, target: &str, foreign_key: &str) -> Self {
        self.relation(name, RelationKind::HasMany, target, foreign_key)
    }

    pub fn one_to_one(self, name: &str, target: &str) -> Self {
        self.relation(name, RelationKind::OneToOne, target, "id")
    }

    fn relation(mut self, name: &str, kind: RelationKind, target: &str, key: &str) -> Self {
        self.relations.push(Relation {
            name: name.into(),
            kind,
            target: target.into(),
            key: key.into(),
        });
        self
    }

    /// Field whose value orders writes; older incoming values are discarded.
    pub fn versioned_by(mut self, field: &str) -> Self {
        self.version_field = Some(field.into());
        self
    }

    pub fn archived_by(mut self, field: &str) -> Self {
        self.delete_policy = DeletePolicy::Archive { field: field.into() };
        self
    }

    pub fn natural_key(mut self, fields: &[&str]) -> Self {
        self.natural_key = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn shared_identity(mut self) -> Self {
        self.identity = IdentityScope::Shared;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        name == "id" || self.get_field(name).is_some()
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn get_relation(&self, name: &str) -> Result<&Relation> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| MirrorError::UnknownRelation {
                entity_type: self.name.clone(),
                relation: name.to_string(),
            })
    }

    pub fn version_field(&self) -> Option<&str> {
        self.version_field.as_deref()
    }

    pub fn delete_policy(&self) -> &DeletePolicy {
        &self.delete_policy
    }

    pub fn archive_field(&self) -> Option<&str> {
        match &self.delete_policy {
            DeletePolicy::Archive { field } => Some(field),
            DeletePolicy::Remove => None,
        }
    }

    pub fn natural_key_fields(&self) -> Option<&[String]> {
        self.natural_key.as_deref()
    }

    pub fn identity(&self) -> IdentityScope {
        self.identity
    }

    /// Local belongs-to keys; these are indexed on the table itself.
    pub fn belongs_to_keys(&self) -> impl Iterator<Item = &str> {
        self.relations
            .iter()
            .filter(|r| r.kind == RelationKind::BelongsTo && r.key != "id")
            .map(|r| r.key.as_str())
    }

    pub fn is_archived(&self, record: &Record) -> bool {
        match self.archive_field() {
            Some(field) => record.get_i64(field).is_some_and(|at| at != 0),
            None => false,
        }
    }

    pub fn version_of(&self, record: &Record) -> Option<i64> {
        self.version_field().and_then(|field| record.get_i64(field))
    }

    pub fn natural_key_of(&self, record: &Record) -> Option<Vec<Value>> {
        self.natural_key
            .as_ref()
            .map(|fields| fields.iter().map(|f| record.value(f)).collect())
    }

    /// Check every field of an incoming (possibly partial) record.
    pub fn validate(&self, record: &Record) -> Result<()> {
        if record.id.is_empty() {
            return Err(MirrorError::ConstraintViolation(format!(
                "Record of type '{}' has an empty id",
                self.name
            )));
        }
        for (name, value) in record.fields() {
            let def = self.get_field(name).ok_or_else(|| MirrorError::UnknownField {
                entity_type: self.name.clone(),
                field: name.clone(),
            })?;
            def.validate(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> EntitySchema {
        EntitySchema::new("channel")
            .field(FieldDef::integer("update_at"))
            .field(FieldDef::integer("delete_at"))
            .field(FieldDef::text("team_id").nullable())
            .belongs_to("team", "team", "team_id")
            .versioned_by("update_at")
            .archived_by("delete_at")
    }

    #[test]
    fn test_validate_rejects_undeclared_field() {
        let record = Record::new("c1").with("colour", "red");
        let err = channel().validate(&record).unwrap_err();
        assert!(matches!(err, MirrorError::UnknownField { .. }));
    }

    #[test]
    fn test_validate_rejects_wrong_type_and_null() {
        let schema = channel();
        let wrong = Record::new("c1").with("update_at", "yesterday");
        assert!(matches!(
            schema.validate(&wrong).unwrap_err(),
            MirrorError::TypeMismatch(_)
        ));

        let null = Record::new("c1").with("delete_at", Value::Null);
        assert!(matches!(
            schema.validate(&null).unwrap_err(),
            MirrorError::ConstraintViolation(_)
        ));

        let nullable = Record::new("c1").with("team_id", Value::Null);
        assert!(schema.validate(&nullable).is_ok());
    }

    #[test]
    fn test_archive_and_version_helpers() {
        let schema = channel();
        let active = Record::new("c1").with("delete_at", 0).with("update_at", 5);
        let archived = Record::new("c2").with("delete_at", 99);
        assert!(!schema.is_archived(&active));
        assert!(schema.is_archived(&archived));
        assert_eq!(schema.version_of(&active), Some(5));
        assert_eq!(schema.belongs_to_keys().collect::<Vec<_>>(), vec!["team_id"]);
    }

    #[test]
    fn test_initial_values() {
        assert_eq!(FieldDef::integer("n").initial_value(), Value::Integer(0));
        assert_eq!(FieldDef::text("t").nullable().initial_value(), Value::Null);
        assert_eq!(
            FieldDef::text("t").default_value("O").initial_value(),
            Value::Text("O".into())
        );
    }

    #[test]
    fn test_allowed_values() {
        let kind = FieldDef::text("type").one_of(&["O", "P"]);
        assert!(kind.validate(&Value::from("P")).is_ok());
        assert!(matches!(
            kind.validate(&Value::from("Z")).unwrap_err(),
            MirrorError::ConstraintViolation(_)
        ));
        assert!(matches!(
            kind.validate(&Value::Integer(1)).unwrap_err(),
            MirrorError::TypeMismatch(_)
        ));
        assert!(FieldDef::text("name").validate(&Value::from("Z")).is_ok());
    }
}
