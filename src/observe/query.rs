use crate::core::{MirrorError, Record, Result, Value};
use crate::query::QuerySpec;
use crate::schema::{RelationKind, SchemaRegistry};
use crate::storage::StoreState;
use crate::transaction::ChangeSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Something the hub can re-evaluate after a commit.
///
/// `key` is what consecutive emissions are compared by; an evaluation whose
/// key equals the previous one is not delivered.
pub trait Observable: Send + 'static {
    type Output: Clone + Send + 'static;
    type Key: PartialEq + Send + 'static;

    fn is_relevant(&self, changes: &ChangeSet) -> bool;

    fn evaluate(&self, state: &StoreState) -> Result<Self::Output>;

    fn key(&self, output: &Self::Output) -> Self::Key;
}

/// Value of a single-record observation. Archived rows read as `Absent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordState {
    Present(Record),
    Absent,
}

impl RecordState {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Present(record) => Some(record),
            Self::Absent => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Present(record) => Some(record),
            Self::Absent => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordQuery {
    entity_type: String,
    id: String,
}

impl RecordQuery {
    pub fn new(registry: &SchemaRegistry, entity_type: &str, id: &str) -> Result<Self> {
        registry.get(entity_type)?;
        Ok(Self {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        })
    }
}

impl Observable for RecordQuery {
    type Output = RecordState;
    type Key = RecordState;

    fn is_relevant(&self, changes: &ChangeSet) -> bool {
        changes.touches_row(&self.entity_type, &self.id)
    }

    fn evaluate(&self, state: &StoreState) -> Result<RecordState> {
        let schema = state.registry().get(&self.entity_type)?;
        Ok(match state.get(&self.entity_type, &self.id)? {
            Some(row) if !schema.is_archived(&row) => RecordState::Present(row),
            _ => RecordState::Absent,
        })
    }

    fn key(&self, output: &RecordState) -> RecordState {
        output.clone()
    }
}

/// The row a belongs-to relation currently points at.
///
/// Follows the key: when the source row is repointed the next value is the
/// new target. Archived or missing targets read as `Absent`.
#[derive(Debug, Clone)]
pub struct RelatedRecordQuery {
    entity_type: String,
    id: String,
    relation: String,
    target: String,
}

impl RelatedRecordQuery {
    pub fn new(
        registry: &SchemaRegistry,
        entity_type: &str,
        id: &str,
        relation: &str,
    ) -> Result<Self> {
        let relation = registry.relation(entity_type, relation)?;
        if relation.kind != RelationKind::BelongsTo {
            return Err(relation.kind_mismatch(entity_type, "a followed key"));
        }
        Ok(Self {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            relation: relation.name.clone(),
            target: relation.target.clone(),
        })
    }
}

impl Observable for RelatedRecordQuery {
    type Output = RecordState;
    type Key = RecordState;

    fn is_relevant(&self, changes: &ChangeSet) -> bool {
        changes.touches_row(&self.entity_type, &self.id)
            || changes.for_type(&self.target).next().is_some()
    }

    fn evaluate(&self, state: &StoreState) -> Result<RecordState> {
        let schema = state.registry().get(&self.target)?;
        let target = state
            .related(&self.entity_type, &self.id, &self.relation)?
            .into_iter()
            .next();
        Ok(match target {
            Some(row) if !schema.is_archived(&row) => RecordState::Present(row),
            _ => RecordState::Absent,
        })
    }

    fn key(&self, output: &RecordState) -> RecordState {
        output.clone()
    }
}

/// Extra knobs for collection observations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Re-emit when these fields change on a member row, even if
    /// membership and order stay the same.
    #[serde(default)]
    pub watch_fields: Vec<String>,
}

impl CollectionOptions {
    pub fn watch(mut self, field: &str) -> Self {
        self.watch_fields.push(field.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CollectionQuery {
    entity_type: String,
    spec: QuerySpec,
    watch_fields: Vec<String>,
    relevant_fields: BTreeSet<String>,
}

impl CollectionQuery {
    pub fn new(
        registry: &SchemaRegistry,
        entity_type: &str,
        spec: QuerySpec,
        options: CollectionOptions,
    ) -> Result<Self> {
        let schema = registry.get(entity_type)?;
        spec.validate(schema)?;
        for field in &options.watch_fields {
            if !schema.has_field(field) {
                return Err(MirrorError::UnknownField {
                    entity_type: entity_type.to_string(),
                    field: field.clone(),
                });
            }
        }

        let mut relevant_fields = spec.fields();
        relevant_fields.extend(options.watch_fields.iter().cloned());
        Ok(Self {
            entity_type: entity_type.to_string(),
            spec,
            watch_fields: options.watch_fields,
            relevant_fields,
        })
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }
}

impl Observable for CollectionQuery {
    type Output = Vec<Record>;
    /// Member ids in order, each with its watched field values.
    type Key = Vec<(String, Vec<Value>)>;

    fn is_relevant(&self, changes: &ChangeSet) -> bool {
        changes
            .for_type(&self.entity_type)
            .any(|change| change.touches_any(&self.relevant_fields))
    }

    fn evaluate(&self, state: &StoreState) -> Result<Vec<Record>> {
        state.query(&self.entity_type, &self.spec)
    }

    fn key(&self, rows: &Vec<Record>) -> Self::Key {
        rows.iter()
            .map(|row| {
                let watched = self.watch_fields.iter().map(|f| row.value(f)).collect();
                (row.id.clone(), watched)
            })
            .collect()
    }
}
