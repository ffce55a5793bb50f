use crate::core::{Record, Result};
use crate::models::Entity;
use serde::{Deserialize, Serialize};

/// One already-decoded instruction from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchItem {
    Upsert {
        entity_type: String,
        record: Record,
    },
    Delete {
        entity_type: String,
        id: String,
        /// Server archival timestamp; local clock when absent.
        #[serde(default)]
        at: Option<i64>,
    },
    /// A fully loaded window of channel history.
    PostsRange {
        channel_id: String,
        earliest: i64,
        latest: i64,
    },
    ThreadRange {
        root_id: String,
        earliest: i64,
        latest: i64,
    },
    /// A page of channel posts; the window it spans is merged too.
    PostsPage {
        channel_id: String,
        posts: Vec<Record>,
    },
}

impl BatchItem {
    /// Entity type and id used when reporting a failure of this item.
    pub fn subject(&self) -> (&str, &str) {
        use crate::schema::names;
        match self {
            Self::Upsert {
                entity_type,
                record,
            } => (entity_type.as_str(), record.id.as_str()),
            Self::Delete {
                entity_type, id, ..
            } => (entity_type.as_str(), id.as_str()),
            Self::PostsRange { channel_id, .. } => (names::POSTS_IN_CHANNEL, channel_id.as_str()),
            Self::ThreadRange { root_id, .. } => (names::POSTS_IN_THREAD, root_id.as_str()),
            Self::PostsPage { channel_id, .. } => (names::POSTS_IN_CHANNEL, channel_id.as_str()),
        }
    }
}

/// An ordered batch applied in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub items: Vec<BatchItem>,
}

impl SyncBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn push(mut self, item: BatchItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn upsert(self, entity_type: &str, record: Record) -> Self {
        self.push(BatchItem::Upsert {
            entity_type: entity_type.to_string(),
            record,
        })
    }

    pub fn upsert_entity<E: Entity>(self, entity: &E) -> Result<Self> {
        Ok(self.upsert(E::ENTITY_TYPE, entity.to_record()?))
    }

    pub fn delete(self, entity_type: &str, id: &str) -> Self {
        self.push(BatchItem::Delete {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            at: None,
        })
    }

    pub fn delete_at(self, entity_type: &str, id: &str, at: i64) -> Self {
        self.push(BatchItem::Delete {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            at: Some(at),
        })
    }

    pub fn posts_range(self, channel_id: &str, earliest: i64, latest: i64) -> Self {
        self.push(BatchItem::PostsRange {
            channel_id: channel_id.to_string(),
            earliest,
            latest,
        })
    }

    pub fn thread_range(self, root_id: &str, earliest: i64, latest: i64) -> Self {
        self.push(BatchItem::ThreadRange {
            root_id: root_id.to_string(),
            earliest,
            latest,
        })
    }

    pub fn posts_page(self, channel_id: &str, posts: Vec<Record>) -> Self {
        self.push(BatchItem::PostsPage {
            channel_id: channel_id.to_string(),
            posts,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A record skipped because its id belongs to another entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub index: usize,
    pub id: String,
    pub stored_type: String,
    pub incoming_type: String,
}

/// What a reconciled batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub stale: usize,
    /// Archived or removed rows.
    pub deleted: usize,
    /// Upserts dropped in favour of a newer copy of the same record.
    pub deduplicated: usize,
    pub ranges_merged: usize,
    pub conflicts: Vec<ConflictReport>,
    /// Committed version; unchanged when the batch changed nothing.
    pub version: u64,
}

impl BatchReport {
    /// Rows written (inserted, updated, archived, restored or removed).
    pub fn applied(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}
