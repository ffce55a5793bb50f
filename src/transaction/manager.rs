// ============================================================================
// Transaction Manager
// ============================================================================
//
// Owns the committed state, the single-writer lock and the durability
// backend. Commit order: append to the backend, swap the committed state,
// then hand a notice to the observation dispatcher. The backend lock is held
// across append and swap so a concurrent checkpoint always captures a state
// that matches the truncated log.
//
// ============================================================================

use super::{ChangeSet, RowChange, Transaction};
use crate::core::{MirrorError, Result};
use crate::storage::{DurabilityBackend, ForeignKeyPolicy, StoreState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// What the dispatcher receives after every non-empty commit.
#[derive(Debug, Clone)]
pub struct CommitNotice {
    pub changes: Arc<ChangeSet>,
    pub state: Arc<StoreState>,
}

pub struct TransactionManager {
    committed: RwLock<Arc<StoreState>>,
    writer: Arc<tokio::sync::Mutex<()>>,
    durability: Mutex<Box<dyn DurabilityBackend>>,
    notices: Mutex<Option<mpsc::UnboundedSender<CommitNotice>>>,
    foreign_key_policy: ForeignKeyPolicy,
    closed: AtomicBool,
}

impl TransactionManager {
    pub fn new(
        state: StoreState,
        durability: Box<dyn DurabilityBackend>,
        foreign_key_policy: ForeignKeyPolicy,
        notices: mpsc::UnboundedSender<CommitNotice>,
    ) -> Self {
        Self {
            committed: RwLock::new(Arc::new(state)),
            writer: Arc::new(tokio::sync::Mutex::new(())),
            durability: Mutex::new(durability),
            notices: Mutex::new(Some(notices)),
            foreign_key_policy,
            closed: AtomicBool::new(false),
        }
    }

    pub fn foreign_key_policy(&self) -> ForeignKeyPolicy {
        self.foreign_key_policy
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MirrorError::StoreClosed);
        }
        Ok(())
    }

    /// The latest committed state. Never blocks on writers.
    pub fn snapshot(&self) -> Result<Arc<StoreState>> {
        self.ensure_open()?;
        Ok(self.committed.read()?.clone())
    }

    pub fn version(&self) -> Result<u64> {
        Ok(self.committed.read()?.version())
    }

    /// Wait for the writer lock and start a transaction on a private copy.
    pub async fn begin(self: &Arc<Self>) -> Result<Transaction> {
        self.ensure_open()?;
        let guard = self.writer.clone().lock_owned().await;
        // The store may have closed while we waited.
        self.ensure_open()?;
        let working = StoreState::clone(&**self.committed.read()?);
        Ok(Transaction::new(working, self.clone(), guard))
    }

    /// Called by `Transaction::commit` while it still holds the writer lock.
    pub(crate) fn publish(
        &self,
        mut working: StoreState,
        changes: Vec<RowChange>,
    ) -> Result<ChangeSet> {
        self.ensure_open()?;
        if changes.is_empty() {
            return Ok(ChangeSet {
                version: working.version(),
                changes,
            });
        }

        let version = working.version() + 1;
        working.set_version(version);
        let change_set = ChangeSet { version, changes };
        let state = Arc::new(working);

        {
            let mut durability = self.durability.lock()?;
            durability.append(&change_set)?;
            *self.committed.write()? = state.clone();

            if durability.needs_checkpoint()
                && let Err(e) = durability.checkpoint(&state)
            {
                warn!("Automatic checkpoint at version {} failed: {}", version, e);
            }
        }

        info!(
            "Committed version {} ({} row changes)",
            version,
            change_set.len()
        );

        let change_set = Arc::new(change_set);
        if let Some(sender) = self.notices.lock()?.as_ref() {
            let notice = CommitNotice {
                changes: change_set.clone(),
                state,
            };
            if sender.send(notice).is_err() {
                warn!("Observation dispatcher is gone; commit {} not announced", version);
            }
        }
        Ok(Arc::unwrap_or_clone(change_set))
    }

    /// Write a snapshot of the committed state and truncate the log.
    pub fn checkpoint(&self) -> Result<()> {
        self.ensure_open()?;
        self.checkpoint_inner()
    }

    fn checkpoint_inner(&self) -> Result<()> {
        let mut durability = self.durability.lock()?;
        let state = self.committed.read()?.clone();
        durability.checkpoint(&state)?;
        info!("Checkpoint written at version {}", state.version());
        Ok(())
    }

    pub fn entries_since_checkpoint(&self) -> Result<usize> {
        Ok(self.durability.lock()?.entries_since_checkpoint())
    }

    /// Wait for the in-flight writer, checkpoint, and stop announcing commits.
    ///
    /// Returns `false` if the manager was already closed.
    pub async fn close(&self) -> Result<bool> {
        let _guard = self.writer.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let pending = self.durability.lock()?.entries_since_checkpoint();
        if pending > 0 {
            self.checkpoint_inner()?;
        }
        self.notices.lock()?.take();
        Ok(true)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("foreign_key_policy", &self.foreign_key_policy)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Record;
    use crate::schema::{chat_registry, names};
    use crate::storage::NoDurability;

    fn manager() -> (Arc<TransactionManager>, mpsc::UnboundedReceiver<CommitNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = StoreState::new(chat_registry().unwrap()).unwrap();
        let manager = TransactionManager::new(
            state,
            Box::new(NoDurability),
            ForeignKeyPolicy::Optimistic,
            tx,
        );
        (Arc::new(manager), rx)
    }

    #[tokio::test]
    async fn test_commit_publishes_and_announces() {
        let (manager, mut rx) = manager();
        let mut txn = manager.begin().await.unwrap();
        txn.upsert(names::TEAM, Record::new("t1").with("name", "core"))
            .unwrap();
        assert!(manager.snapshot().unwrap().get(names::TEAM, "t1").unwrap().is_none());

        let committed = txn.commit().unwrap();
        assert_eq!(committed.version, 1);
        assert!(manager.snapshot().unwrap().get(names::TEAM, "t1").unwrap().is_some());

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.changes.version, 1);
        assert_eq!(notice.state.version(), 1);
    }

    #[tokio::test]
    async fn test_empty_commit_keeps_version() {
        let (manager, mut rx) = manager();
        let txn = manager.begin().await.unwrap();
        let committed = txn.commit().unwrap();
        assert_eq!(committed.version, 0);
        assert!(committed.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_rolls_back_and_releases_writer() {
        let (manager, _rx) = manager();
        {
            let mut txn = manager.begin().await.unwrap();
            txn.upsert(names::TEAM, Record::new("t1")).unwrap();
        }
        let txn = manager.begin().await.unwrap();
        assert!(txn.get(names::TEAM, "t1").unwrap().is_none());
        assert_eq!(manager.version().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_manager_rejects_work() {
        let (manager, _rx) = manager();
        assert!(manager.close().await.unwrap());
        assert!(!manager.close().await.unwrap());
        assert!(matches!(manager.begin().await, Err(MirrorError::StoreClosed)));
        assert!(matches!(manager.snapshot(), Err(MirrorError::StoreClosed)));
    }
}
