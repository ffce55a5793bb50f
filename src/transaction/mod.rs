// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Single-writer transactions over copy-on-write store state.
//
// Design Patterns Used:
// - State Pattern: Transaction state management (Active, Committed, Aborted)
// - Command Pattern: every mutation is recorded as a RowChange
// - Copy-on-Write: the committed state is an immutable Arc swapped on commit
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::{ChangeKind, ChangeSet, RowChange};
pub use manager::{CommitNotice, TransactionManager};
pub use state::{Transaction, TransactionId, TransactionState};
