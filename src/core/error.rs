use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("Field '{field}' is not declared on entity type '{entity_type}'")]
    UnknownField { entity_type: String, field: String },

    #[error("Relation '{relation}' is not declared on entity type '{entity_type}'")]
    UnknownRelation { entity_type: String, relation: String },

    #[error("Relation '{relation}' of '{entity_type}' is {kind} and cannot be observed as {expected}")]
    RelationKindMismatch {
        entity_type: String,
        relation: String,
        kind: String,
        expected: String,
    },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Sync conflict: id '{id}' is stored as '{stored_type}', received as '{incoming_type}'")]
    SyncConflict {
        id: String,
        stored_type: String,
        incoming_type: String,
    },

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Transaction {0} is no longer active")]
    TransactionClosed(String),

    #[error("Store is closed")]
    StoreClosed,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MirrorError {
    /// Conflicts are data-quality issues the reconciler skips instead of aborting on.
    pub fn is_sync_conflict(&self) -> bool {
        matches!(self, MirrorError::SyncConflict { .. })
    }
}

/// A batch item that could not be reconciled. The batch it belonged to was rolled back.
#[derive(Error, Debug)]
#[error("Failed to reconcile batch item {index} ({entity_type} '{id}'): {source}")]
pub struct ReconcileError {
    pub index: usize,
    pub entity_type: String,
    pub id: String,
    #[source]
    pub source: Box<MirrorError>,
}

pub type Result<T> = std::result::Result<T, MirrorError>;

impl<T> From<std::sync::PoisonError<T>> for MirrorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
