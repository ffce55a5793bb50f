// ============================================================================
// Sync Reconciler
// ============================================================================
//
// Turns batches of server data into one store transaction each: duplicate
// records are collapsed, stale versions dropped, loaded-history windows
// coalesced, and cross-type id conflicts skipped with a report entry.
//
// ============================================================================

pub mod batch;
pub mod ranges;
pub mod reconciler;

pub use batch::{BatchItem, BatchReport, ConflictReport, SyncBatch};
pub use ranges::{RangeMerge, Span};
pub use reconciler::Reconciler;
