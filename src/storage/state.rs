use super::Table;
use crate::core::{MirrorError, Record, Result, Value};
use crate::query::QuerySpec;
use crate::schema::{DeletePolicy, EntitySchema, IdentityScope, RelationKind, SchemaRegistry};
use crate::transaction::{ChangeKind, RowChange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// What to do with a belongs-to key whose target row has not arrived yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyPolicy {
    /// Accept the write; the relation resolves to nothing until the target arrives.
    #[default]
    Optimistic,
    /// Reject the write with a constraint violation.
    Strict,
}

/// Effect of a single upsert or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    /// Same or older data than stored; nothing changed.
    Unchanged,
    /// Incoming version was older than the stored one; the write was dropped.
    Stale,
    Archived,
    Restored,
    Removed,
    /// Delete of a row that does not exist.
    Missing,
}

impl WriteOutcome {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged | Self::Stale | Self::Missing)
    }
}

/// A full, immutable-by-convention view of every entity table.
///
/// Transactions work on their own clone and the committed copy is replaced
/// wholesale on commit; persistent maps keep those clones cheap.
#[derive(Debug, Clone)]
pub struct StoreState {
    registry: SchemaRegistry,
    version: u64,
    tables: im::HashMap<String, Table>,
    /// Owner entity type of every id in a global identity scope.
    identities: im::HashMap<String, String>,
}

impl StoreState {
    pub fn new(registry: SchemaRegistry) -> Result<Self> {
        Self::from_tables(registry, 0, HashMap::new())
    }

    /// Rebuild a state from persisted tables, re-deriving indexes and identities.
    pub fn from_tables(
        registry: SchemaRegistry,
        version: u64,
        mut persisted: HashMap<String, Table>,
    ) -> Result<Self> {
        let mut tables = im::HashMap::new();
        let mut identities = im::HashMap::new();

        for name in registry.list() {
            let indexed = registry.indexed_fields(name)?;
            let mut table = persisted
                .remove(name)
                .unwrap_or_else(|| Table::new(name, Vec::new()));
            table.reindex(indexed);

            if registry.get(name)?.identity() == IdentityScope::Global {
                for row in table.scan() {
                    identities.insert(row.id.clone(), name.to_string());
                }
            }
            tables.insert(name.to_string(), table);
        }

        for orphan in persisted.keys() {
            warn!("Dropping persisted table '{}' with no registered schema", orphan);
        }

        Ok(Self {
            registry,
            version,
            tables,
            identities,
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn table(&self, entity_type: &str) -> Result<&Table> {
        self.tables
            .get(entity_type)
            .ok_or_else(|| MirrorError::UnknownEntityType(entity_type.to_string()))
    }

    fn table_mut(&mut self, entity_type: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(entity_type)
            .ok_or_else(|| MirrorError::UnknownEntityType(entity_type.to_string()))
    }

    pub fn export_tables(&self) -> HashMap<String, Table> {
        self.tables
            .iter()
            .map(|(name, table)| (name.clone(), table.clone()))
            .collect()
    }

    pub fn row_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .tables
            .iter()
            .map(|(name, table)| (name.clone(), table.len()))
            .collect();
        counts.sort();
        counts
    }

    pub fn identity_of(&self, id: &str) -> Option<&str> {
        self.identities.get(id).map(String::as_str)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<Record>> {
        Ok(self.table(entity_type)?.get(id).cloned())
    }

    pub fn query(&self, entity_type: &str, spec: &QuerySpec) -> Result<Vec<Record>> {
        let schema = self.registry.get(entity_type)?;
        spec.validate(schema)?;
        let table = self.table(entity_type)?;

        let indexed = spec
            .predicate
            .equality_terms()
            .into_iter()
            .find_map(|(field, value)| table.lookup(field, value));

        let rows: Vec<Record> = match indexed {
            Some(candidates) => candidates
                .into_iter()
                .filter(|r| spec.predicate.matches(r))
                .cloned()
                .collect(),
            None => table
                .scan()
                .filter(|r| spec.predicate.matches(r))
                .cloned()
                .collect(),
        };
        Ok(spec.finish(rows))
    }

    /// Traverse a declared relation from one row. Missing targets yield nothing.
    pub fn related(&self, entity_type: &str, id: &str, relation: &str) -> Result<Vec<Record>> {
        let relation = self.registry.relation(entity_type, relation)?.clone();
        let target = self.table(&relation.target)?;

        match relation.kind {
            RelationKind::BelongsTo => {
                let Some(row) = self.table(entity_type)?.get(id) else {
                    return Ok(Vec::new());
                };
                let key = row.value(&relation.key);
                Ok(key
                    .as_str()
                    .and_then(|target_id| target.get(target_id))
                    .cloned()
                    .into_iter()
                    .collect())
            }
            RelationKind::HasMany => {
                let key = Value::from(id);
                let rows = match target.lookup(&relation.key, &key) {
                    Some(rows) => rows.into_iter().cloned().collect(),
                    None => target
                        .scan()
                        .filter(|r| r.value(&relation.key) == key)
                        .cloned()
                        .collect(),
                };
                Ok(rows)
            }
            RelationKind::OneToOne => Ok(target.get(id).cloned().into_iter().collect()),
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Merge `incoming` into the table field by field.
    ///
    /// Returns the outcome plus every row change it caused (a natural-key
    /// replacement removes the displaced row as well).
    pub fn upsert(
        &mut self,
        entity_type: &str,
        incoming: Record,
        fk_policy: ForeignKeyPolicy,
    ) -> Result<(WriteOutcome, Vec<RowChange>)> {
        let schema = self.registry.get(entity_type)?.clone();
        schema.validate(&incoming)?;
        self.check_identity(&schema, &incoming.id)?;

        let existing = self.table(entity_type)?.get(&incoming.id).cloned();

        if let (Some(stored), Some(version_field)) = (&existing, schema.version_field())
            && let (Some(offered), Some(current)) =
                (incoming.get_i64(version_field), stored.get_i64(version_field))
            && offered < current
        {
            debug!(
                "Stale {} '{}' dropped ({} {} < {})",
                entity_type, incoming.id, version_field, offered, current
            );
            return Ok((WriteOutcome::Stale, Vec::new()));
        }

        let (merged, changed_fields, kind) = match &existing {
            Some(stored) => {
                let held = Self::held_archive_field(&schema, stored, &incoming);
                let mut merged = stored.clone();
                let mut changed = BTreeSet::new();
                for (field, value) in incoming.fields() {
                    if held == Some(field.as_str()) {
                        continue;
                    }
                    if stored.get(field) != Some(value) {
                        merged.set(field.clone(), value.clone());
                        changed.insert(field.clone());
                    }
                }
                if changed.is_empty() {
                    return Ok((WriteOutcome::Unchanged, Vec::new()));
                }
                let kind = match (schema.is_archived(stored), schema.is_archived(&merged)) {
                    (false, true) => ChangeKind::Archived,
                    (true, false) => ChangeKind::Restored,
                    _ => ChangeKind::Updated,
                };
                (merged, changed, kind)
            }
            None => {
                let mut merged = Record::new(incoming.id.clone());
                for field in schema.fields() {
                    merged.set(field.name.clone(), field.initial_value());
                }
                for (field, value) in incoming.fields() {
                    merged.set(field.clone(), value.clone());
                }
                let changed = merged.field_names().map(str::to_string).collect();
                (merged, changed, ChangeKind::Inserted)
            }
        };

        if fk_policy == ForeignKeyPolicy::Strict {
            self.check_foreign_keys(&schema, &merged, existing.is_none(), &incoming)?;
        }

        let mut changes = self.displace_natural_key(&schema, &merged)?;

        if schema.identity() == IdentityScope::Global {
            self.identities
                .insert(merged.id.clone(), entity_type.to_string());
        }
        self.table_mut(entity_type)?.put(merged.clone());

        let outcome = match kind {
            ChangeKind::Inserted => WriteOutcome::Inserted,
            ChangeKind::Archived => WriteOutcome::Archived,
            ChangeKind::Restored => WriteOutcome::Restored,
            _ => WriteOutcome::Updated,
        };
        debug!("{:?} {} '{}'", outcome, entity_type, merged.id);

        changes.push(RowChange {
            entity_type: entity_type.to_string(),
            id: merged.id.clone(),
            kind,
            changed_fields,
            after: Some(merged),
        });
        Ok((outcome, changes))
    }

    /// Archive field an incoming record may not clear.
    ///
    /// Only a strictly newer version restores an archived row, so replaying
    /// a record the row was archived after leaves the archive stamp alone.
    /// Records without a version are local edits and may restore.
    fn held_archive_field<'a>(
        schema: &'a EntitySchema,
        stored: &Record,
        incoming: &Record,
    ) -> Option<&'a str> {
        let field = schema.archive_field()?;
        if !schema.is_archived(stored) || incoming.get_i64(field) != Some(0) {
            return None;
        }
        let offered = schema.version_of(incoming)?;
        let current = schema.version_of(stored)?;
        if offered > current {
            return None;
        }
        debug!(
            "{} '{}' stays archived: version {} is not newer",
            schema.name(), incoming.id, offered
        );
        Some(field)
    }

    /// Archive (soft delete) or remove a row according to its schema.
    ///
    /// `at` is the archival timestamp; `None` or zero means "now".
    pub fn delete(
        &mut self,
        entity_type: &str,
        id: &str,
        at: Option<i64>,
    ) -> Result<(WriteOutcome, Vec<RowChange>)> {
        let schema = self.registry.get(entity_type)?.clone();
        let Some(existing) = self.table(entity_type)?.get(id).cloned() else {
            return Ok((WriteOutcome::Missing, Vec::new()));
        };

        match schema.delete_policy() {
            DeletePolicy::Archive { field } => {
                if schema.is_archived(&existing) {
                    return Ok((WriteOutcome::Unchanged, Vec::new()));
                }
                let stamp = at
                    .filter(|t| *t != 0)
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
                let mut archived = existing;
                archived.set(field.clone(), stamp);
                self.table_mut(entity_type)?.put(archived.clone());
                debug!("Archived {} '{}' at {}", entity_type, id, stamp);

                Ok((
                    WriteOutcome::Archived,
                    vec![RowChange {
                        entity_type: entity_type.to_string(),
                        id: id.to_string(),
                        kind: ChangeKind::Archived,
                        changed_fields: [field.clone()].into(),
                        after: Some(archived),
                    }],
                ))
            }
            DeletePolicy::Remove => {
                self.remove_row(&schema, id)?;
                debug!("Removed {} '{}'", entity_type, id);
                Ok((
                    WriteOutcome::Removed,
                    vec![RowChange::removed(entity_type, id)],
                ))
            }
        }
    }

    /// Re-apply a committed row image during recovery.
    pub fn replay(&mut self, change: &RowChange) -> Result<()> {
        let schema = self.registry.get(&change.entity_type)?.clone();
        match &change.after {
            Some(row) => {
                if schema.identity() == IdentityScope::Global {
                    self.identities
                        .insert(row.id.clone(), change.entity_type.clone());
                }
                self.table_mut(&change.entity_type)?.put(row.clone());
            }
            None => self.remove_row(&schema, &change.id)?,
        }
        Ok(())
    }

    fn remove_row(&mut self, schema: &EntitySchema, id: &str) -> Result<()> {
        self.table_mut(schema.name())?.remove(id);
        if schema.identity() == IdentityScope::Global
            && self.identities.get(id).map(String::as_str) == Some(schema.name())
        {
            self.identities.remove(id);
        }
        Ok(())
    }

    fn check_identity(&self, schema: &EntitySchema, id: &str) -> Result<()> {
        if schema.identity() != IdentityScope::Global {
            return Ok(());
        }
        match self.identities.get(id) {
            Some(stored) if stored != schema.name() => Err(MirrorError::SyncConflict {
                id: id.to_string(),
                stored_type: stored.clone(),
                incoming_type: schema.name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn check_foreign_keys(
        &self,
        schema: &EntitySchema,
        merged: &Record,
        is_insert: bool,
        incoming: &Record,
    ) -> Result<()> {
        for relation in schema.relations() {
            if relation.kind != RelationKind::BelongsTo {
                continue;
            }
            if !is_insert && (relation.key == "id" || !incoming.contains(&relation.key)) {
                continue;
            }
            let target_id = merged.value(&relation.key);
            let Some(target_id) = target_id.as_str().filter(|s| !s.is_empty()) else {
                continue;
            };
            if !self.table(&relation.target)?.contains(target_id) {
                return Err(MirrorError::ConstraintViolation(format!(
                    "{} '{}' references missing {} '{}' via '{}'",
                    schema.name(),
                    merged.id,
                    relation.target,
                    target_id,
                    relation.key
                )));
            }
        }
        Ok(())
    }

    /// Remove rows that share `merged`'s natural key under a different id.
    fn displace_natural_key(
        &mut self,
        schema: &EntitySchema,
        merged: &Record,
    ) -> Result<Vec<RowChange>> {
        let (Some(fields), Some(key)) = (schema.natural_key_fields(), schema.natural_key_of(merged))
        else {
            return Ok(Vec::new());
        };
        let Some((first_field, first_value)) = fields.first().zip(key.first()) else {
            return Ok(Vec::new());
        };

        let table = self.table(schema.name())?;
        let candidates: Vec<&Record> = match table.lookup(first_field, first_value) {
            Some(rows) => rows,
            None => table.scan().collect(),
        };
        let displaced: Vec<String> = candidates
            .into_iter()
            .filter(|row| row.id != merged.id)
            .filter(|row| schema.natural_key_of(row).as_ref() == Some(&key))
            .map(|row| row.id.clone())
            .collect();

        let mut changes = Vec::with_capacity(displaced.len());
        for id in displaced {
            debug!("{} '{}' replaced by '{}'", schema.name(), id, merged.id);
            self.remove_row(schema, &id)?;
            changes.push(RowChange::removed(schema.name(), &id));
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Predicate;
    use crate::schema::{chat_registry, names};

    fn state() -> StoreState {
        StoreState::new(chat_registry().unwrap()).unwrap()
    }

    fn channel(id: &str, update_at: i64) -> Record {
        Record::new(id)
            .with("update_at", update_at)
            .with("display_name", format!("Channel {}", id))
    }

    #[test]
    fn test_insert_fills_defaults() {
        let mut state = state();
        let (outcome, changes) = state
            .upsert(names::CHANNEL, channel("c1", 1), ForeignKeyPolicy::Optimistic)
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Inserted);
        assert_eq!(changes.len(), 1);

        let row = state.get(names::CHANNEL, "c1").unwrap().unwrap();
        assert_eq!(row.get_i64("delete_at"), Some(0));
        assert_eq!(row.get_str("type"), Some("O"));
        assert_eq!(row.value("team_id"), Value::Null);
    }

    #[test]
    fn test_stale_and_unchanged_writes() {
        let mut state = state();
        let fk = ForeignKeyPolicy::Optimistic;
        state.upsert(names::CHANNEL, channel("c1", 10), fk).unwrap();

        let stale = channel("c1", 5).with("display_name", "Old");
        assert_eq!(state.upsert(names::CHANNEL, stale, fk).unwrap().0, WriteOutcome::Stale);
        assert_eq!(
            state.upsert(names::CHANNEL, channel("c1", 10), fk).unwrap().0,
            WriteOutcome::Unchanged
        );

        let partial = Record::new("c1").with("update_at", 11).with("name", "general");
        let (outcome, changes) = state.upsert(names::CHANNEL, partial, fk).unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);
        assert_eq!(
            changes[0].changed_fields.iter().collect::<Vec<_>>(),
            vec!["name", "update_at"]
        );
        let row = state.get(names::CHANNEL, "c1").unwrap().unwrap();
        assert_eq!(row.get_str("display_name"), Some("Channel c1"));
    }

    #[test]
    fn test_archive_keeps_row() {
        let mut state = state();
        state
            .upsert(names::CHANNEL, channel("c1", 1), ForeignKeyPolicy::Optimistic)
            .unwrap();
        let (outcome, _) = state.delete(names::CHANNEL, "c1", Some(500)).unwrap();
        assert_eq!(outcome, WriteOutcome::Archived);
        assert_eq!(
            state.delete(names::CHANNEL, "c1", None).unwrap().0,
            WriteOutcome::Unchanged
        );
        let row = state.get(names::CHANNEL, "c1").unwrap().unwrap();
        assert_eq!(row.get_i64("delete_at"), Some(500));
        assert_eq!(state.delete(names::CHANNEL, "nope", None).unwrap().0, WriteOutcome::Missing);
    }

    #[test]
    fn test_replayed_version_does_not_restore() {
        let mut state = state();
        let fk = ForeignKeyPolicy::Optimistic;
        let synced = channel("c1", 5).with("delete_at", 0);
        state.upsert(names::CHANNEL, synced.clone(), fk).unwrap();
        state.delete(names::CHANNEL, "c1", Some(100)).unwrap();

        let (outcome, changes) = state.upsert(names::CHANNEL, synced, fk).unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert!(changes.is_empty());
        let row = state.get(names::CHANNEL, "c1").unwrap().unwrap();
        assert_eq!(row.get_i64("delete_at"), Some(100));

        // Other fields at the same version still merge
        let renamed = channel("c1", 5).with("delete_at", 0).with("name", "renamed");
        assert_eq!(state.upsert(names::CHANNEL, renamed, fk).unwrap().0, WriteOutcome::Updated);
        let row = state.get(names::CHANNEL, "c1").unwrap().unwrap();
        assert_eq!(row.get_i64("delete_at"), Some(100));
        assert_eq!(row.get_str("name"), Some("renamed"));
    }

    #[test]
    fn test_newer_version_or_local_edit_restores() {
        let mut state = state();
        let fk = ForeignKeyPolicy::Optimistic;
        state.upsert(names::CHANNEL, channel("c1", 5), fk).unwrap();
        state.upsert(names::CHANNEL, channel("c2", 5), fk).unwrap();
        state.delete(names::CHANNEL, "c1", Some(100)).unwrap();
        state.delete(names::CHANNEL, "c2", Some(100)).unwrap();

        let newer = Record::new("c1").with("update_at", 6).with("delete_at", 0);
        assert_eq!(state.upsert(names::CHANNEL, newer, fk).unwrap().0, WriteOutcome::Restored);

        let local = Record::new("c2").with("delete_at", 0);
        assert_eq!(state.upsert(names::CHANNEL, local, fk).unwrap().0, WriteOutcome::Restored);
    }

    #[test]
    fn test_identity_conflict_leaves_state_untouched() {
        let mut state = state();
        let fk = ForeignKeyPolicy::Optimistic;
        state.upsert(names::CHANNEL, channel("x1", 1), fk).unwrap();
        let err = state
            .upsert(names::POST, Record::new("x1").with("message", "hi"), fk)
            .unwrap_err();
        assert!(err.is_sync_conflict());
        assert!(state.get(names::POST, "x1").unwrap().is_none());

        // Shared-identity rows may reuse the channel id.
        let membership = Record::new("x1").with("mentions_count", 2);
        assert!(state.upsert(names::MY_CHANNEL, membership, fk).is_ok());
    }

    #[test]
    fn test_strict_foreign_keys() {
        let mut state = state();
        let membership = Record::new("c9").with("mentions_count", 1);
        let err = state
            .upsert(names::MY_CHANNEL, membership.clone(), ForeignKeyPolicy::Strict)
            .unwrap_err();
        assert!(matches!(err, MirrorError::ConstraintViolation(_)));

        state
            .upsert(names::CHANNEL, channel("c9", 1), ForeignKeyPolicy::Strict)
            .unwrap();
        assert!(state
            .upsert(names::MY_CHANNEL, membership, ForeignKeyPolicy::Strict)
            .is_ok());
    }

    #[test]
    fn test_empty_natural_key_displaces_nothing() {
        let registry = SchemaRegistry::new()
            .with_schema(
                EntitySchema::new("note")
                    .field(crate::schema::FieldDef::text("body"))
                    .natural_key(&[]),
            )
            .unwrap();
        let mut state = StoreState::new(registry).unwrap();
        let fk = ForeignKeyPolicy::Optimistic;
        state.upsert("note", Record::new("n1").with("body", "a"), fk).unwrap();
        let (outcome, changes) = state
            .upsert("note", Record::new("n2").with("body", "a"), fk)
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Inserted);
        assert_eq!(changes.len(), 1);
        assert!(state.get("note", "n1").unwrap().is_some());
    }

    #[test]
    fn test_natural_key_replaces_draft() {
        let mut state = state();
        let fk = ForeignKeyPolicy::Optimistic;
        let first = Record::new("d1").with("channel_id", "c1").with("message", "hel");
        let second = Record::new("d2").with("channel_id", "c1").with("message", "hello");
        let reply = Record::new("d3")
            .with("channel_id", "c1")
            .with("root_id", "p1")
            .with("message", "re");
        state.upsert(names::DRAFT, first, fk).unwrap();
        state.upsert(names::DRAFT, reply, fk).unwrap();
        let (_, changes) = state.upsert(names::DRAFT, second, fk).unwrap();

        assert_eq!(changes[0].kind, ChangeKind::Removed);
        assert_eq!(changes[0].id, "d1");
        let drafts = state
            .query(names::DRAFT, &QuerySpec::filter(Predicate::eq("channel_id", "c1")))
            .unwrap();
        let ids: Vec<&str> = drafts.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d2", "d3"]);
    }

    #[test]
    fn test_related_traversal() {
        let mut state = state();
        let fk = ForeignKeyPolicy::Optimistic;
        state
            .upsert(names::CHANNEL, channel("c1", 1).with("team_id", "t1"), fk)
            .unwrap();
        state
            .upsert(names::POST, Record::new("p1").with("channel_id", "c1"), fk)
            .unwrap();

        assert!(state.related(names::CHANNEL, "c1", "team").unwrap().is_empty());
        state
            .upsert(names::TEAM, Record::new("t1").with("name", "core"), fk)
            .unwrap();
        assert_eq!(state.related(names::CHANNEL, "c1", "team").unwrap()[0].id, "t1");
        assert_eq!(state.related(names::CHANNEL, "c1", "posts").unwrap().len(), 1);
        assert!(state.related(names::CHANNEL, "c1", "membership").unwrap().is_empty());
        assert!(matches!(
            state.related(names::CHANNEL, "c1", "emoji").unwrap_err(),
            MirrorError::UnknownRelation { .. }
        ));
    }
}
