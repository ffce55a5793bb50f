// ============================================================================
// Change Tracking
// ============================================================================
//
// Every mutation a transaction applies is recorded as a RowChange. The list
// serves three consumers: the commit log (row images are replayed on
// recovery), the observation layer (which subscriptions are affected) and
// the caller (what a write actually did).
//
// ============================================================================

use crate::core::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Inserted,
    Updated,
    /// Archive field went from zero to non-zero.
    Archived,
    /// Archive field went back to zero.
    Restored,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowChange {
    pub entity_type: String,
    pub id: String,
    pub kind: ChangeKind,
    pub changed_fields: BTreeSet<String>,
    /// Row image after the change; `None` once removed.
    pub after: Option<Record>,
}

impl RowChange {
    pub fn removed(entity_type: &str, id: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            kind: ChangeKind::Removed,
            changed_fields: BTreeSet::new(),
            after: None,
        }
    }

    /// Whether the row entered or left the table (as opposed to being edited).
    pub fn is_structural(&self) -> bool {
        matches!(self.kind, ChangeKind::Inserted | ChangeKind::Removed)
    }

    pub fn touches_any(&self, fields: &BTreeSet<String>) -> bool {
        self.is_structural() || self.changed_fields.iter().any(|f| fields.contains(f))
    }
}

/// All row changes of one committed transaction, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub version: u64,
    pub changes: Vec<RowChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn for_type<'a>(&'a self, entity_type: &'a str) -> impl Iterator<Item = &'a RowChange> {
        self.changes
            .iter()
            .filter(move |c| c.entity_type == entity_type)
    }

    pub fn touches_row(&self, entity_type: &str, id: &str) -> bool {
        self.changes
            .iter()
            .any(|c| c.entity_type == entity_type && c.id == id)
    }

    pub fn entity_types(&self) -> BTreeSet<&str> {
        self.changes.iter().map(|c| c.entity_type.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updated(entity_type: &str, id: &str, fields: &[&str]) -> RowChange {
        RowChange {
            entity_type: entity_type.into(),
            id: id.into(),
            kind: ChangeKind::Updated,
            changed_fields: fields.iter().map(|f| f.to_string()).collect(),
            after: Some(Record::new(id)),
        }
    }

    #[test]
    fn test_touches_any() {
        let watched: BTreeSet<String> = ["delete_at".to_string()].into();
        assert!(!updated("channel", "c1", &["display_name"]).touches_any(&watched));
        assert!(updated("channel", "c1", &["delete_at"]).touches_any(&watched));
        assert!(RowChange::removed("channel", "c1").touches_any(&watched));
    }

    #[test]
    fn test_change_set_filters() {
        let set = ChangeSet {
            version: 3,
            changes: vec![
                updated("post", "p1", &["message"]),
                updated("channel", "c1", &["name"]),
            ],
        };
        assert_eq!(set.for_type("post").count(), 1);
        assert!(set.touches_row("channel", "c1"));
        assert!(!set.touches_row("channel", "p1"));
        assert_eq!(set.entity_types().into_iter().collect::<Vec<_>>(), vec!["channel", "post"]);
    }
}
