// ============================================================================
// mirrordb Library
// ============================================================================
//
// Offline-first local mirror of team-chat data: a schema-driven relational
// store with soft delete and last-writer-wins merging, a reconciler for
// server batches, and reactive record/collection observations.
//
// ============================================================================

pub mod core;
pub mod facade;
pub mod models;
pub mod observe;
pub mod prelude;
pub mod query;
pub mod schema;
pub mod storage;
pub mod sync;
pub mod transaction;

// Re-export main types for convenience
pub use core::{MirrorError, ReconcileError, Record, Result, Value};
pub use facade::{MirrorStore, StoreConfig, StoreStats};
pub use models::Entity;
pub use observe::{CollectionOptions, Event, RecordState, Subscription};
pub use query::{Predicate, QuerySpec};
pub use schema::{EntitySchema, FieldDef, SchemaRegistry, names};
pub use storage::{DurabilityMode, ForeignKeyPolicy, WriteOutcome};
pub use sync::{BatchItem, BatchReport, Reconciler, SyncBatch};
pub use transaction::{ChangeKind, ChangeSet, RowChange, Transaction};
