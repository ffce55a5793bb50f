// ============================================================================
// Transaction State Management
// ============================================================================
//
// A transaction owns a private copy of the committed store state. Reads see
// its own writes; nothing is visible to other readers until commit swaps the
// copy in. The writer lock is held for the whole lifetime of the guard, so
// commits are totally ordered.
//
// State transitions:
//   Active ──commit──> Committed
//     │
//     └──rollback / drop──> Aborted
//
// ============================================================================

use super::{ChangeSet, RowChange, TransactionManager};
use crate::core::{MirrorError, Record, Result};
use crate::models::Entity;
use crate::query::QuerySpec;
use crate::storage::{StoreState, WriteOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Write guard over the store.
///
/// Dropping an uncommitted transaction rolls it back.
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    working: StoreState,
    changes: Vec<RowChange>,
    manager: Arc<TransactionManager>,
    start_time: std::time::Instant,
    _writer: OwnedMutexGuard<()>,
}

impl Transaction {
    pub(crate) fn new(
        working: StoreState,
        manager: Arc<TransactionManager>,
        writer: OwnedMutexGuard<()>,
    ) -> Self {
        let id = TransactionId::new();
        debug!("Begin {} at version {}", id, working.version());
        Self {
            id,
            state: TransactionState::Active,
            working,
            changes: Vec::new(),
            manager,
            start_time: std::time::Instant::now(),
            _writer: writer,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Committed version this transaction started from.
    pub fn base_version(&self) -> u64 {
        self.working.version()
    }

    /// Row changes recorded so far, in application order.
    pub fn changes(&self) -> &[RowChange] {
        &self.changes
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(MirrorError::TransactionClosed(format!(
                "{} ({})",
                self.id, self.state
            )));
        }
        Ok(())
    }

    fn record(&mut self, outcome: WriteOutcome, changes: Vec<RowChange>) -> WriteOutcome {
        self.changes.extend(changes);
        outcome
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub fn upsert(&mut self, entity_type: &str, record: Record) -> Result<WriteOutcome> {
        self.ensure_active()?;
        let (outcome, changes) =
            self.working
                .upsert(entity_type, record, self.manager.foreign_key_policy())?;
        Ok(self.record(outcome, changes))
    }

    pub fn save<E: Entity>(&mut self, entity: &E) -> Result<WriteOutcome> {
        self.upsert(E::ENTITY_TYPE, entity.to_record()?)
    }

    pub fn delete(&mut self, entity_type: &str, id: &str) -> Result<WriteOutcome> {
        self.ensure_active()?;
        let (outcome, changes) = self.working.delete(entity_type, id, None)?;
        Ok(self.record(outcome, changes))
    }

    /// Archive with an explicit timestamp (server-side `delete_at`).
    pub fn delete_at(&mut self, entity_type: &str, id: &str, at: i64) -> Result<WriteOutcome> {
        self.ensure_active()?;
        let (outcome, changes) = self.working.delete(entity_type, id, Some(at))?;
        Ok(self.record(outcome, changes))
    }

    // ------------------------------------------------------------------
    // Reads (see this transaction's own writes)
    // ------------------------------------------------------------------

    pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<Record>> {
        self.working.get(entity_type, id)
    }

    pub fn query(&self, entity_type: &str, spec: &QuerySpec) -> Result<Vec<Record>> {
        self.working.query(entity_type, spec)
    }

    pub fn related(&self, entity_type: &str, id: &str, relation: &str) -> Result<Vec<Record>> {
        self.working.related(entity_type, id, relation)
    }

    pub fn state_view(&self) -> &StoreState {
        &self.working
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Publish every write atomically. An empty transaction commits nothing
    /// and reports the unchanged base version.
    pub fn commit(mut self) -> Result<ChangeSet> {
        self.ensure_active()?;
        let changes = std::mem::take(&mut self.changes);
        let result = self.manager.publish(self.working.clone(), changes);
        self.state = match result {
            Ok(_) => TransactionState::Committed,
            Err(_) => TransactionState::Aborted,
        };
        debug!("{} {} after {:?}", self.id, self.state, self.duration());
        result
    }

    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        self.abort();
        Ok(())
    }

    fn abort(&mut self) {
        debug!(
            "Rollback {} ({} changes discarded)",
            self.id,
            self.changes.len()
        );
        self.changes.clear();
        self.state = TransactionState::Aborted;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state.is_active() {
            self.abort();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("base_version", &self.working.version())
            .field("changes", &self.changes.len())
            .finish()
    }
}
