//! Subscription registry and commit dispatcher.
//!
//! Commits never wait for subscribers: the transaction manager pushes a
//! notice onto an unbounded channel and a single dispatcher task
//! re-evaluates the relevant subscriptions against the committed state the
//! notice carries, in commit order.

use super::query::Observable;
use super::subscription::{Event, Subscription};
use crate::core::{MirrorError, Result};
use crate::transaction::{CommitNotice, TransactionManager};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Type-erased registry entry.
trait Watcher: Send {
    /// Returns `false` once the subscriber is gone.
    fn notify(&mut self, notice: &CommitNotice) -> bool;

    fn terminate(&mut self);
}

struct Entry<Q: Observable> {
    query: Q,
    last: Q::Key,
    /// Commits at or below this version are already reflected in `last`.
    seen_version: u64,
    sender: mpsc::UnboundedSender<Event<Q::Output>>,
}

impl<Q: Observable> Watcher for Entry<Q> {
    fn notify(&mut self, notice: &CommitNotice) -> bool {
        if self.sender.is_closed() {
            return false;
        }
        let version = notice.changes.version;
        if version <= self.seen_version {
            return true;
        }
        self.seen_version = version;
        if !self.query.is_relevant(&notice.changes) {
            return true;
        }

        match self.query.evaluate(&notice.state) {
            Ok(output) => {
                let key = self.query.key(&output);
                if key == self.last {
                    return true;
                }
                self.last = key;
                self.sender.send(Event::Value(output)).is_ok()
            }
            Err(e) => {
                warn!("Observation re-evaluation at version {} failed: {}", version, e);
                true
            }
        }
    }

    fn terminate(&mut self) {
        let _ = self.sender.send(Event::Unsubscribed);
    }
}

pub struct ObservationHub {
    entries: Mutex<HashMap<SubscriptionId, Box<dyn Watcher>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    dispatched: watch::Sender<u64>,
}

impl ObservationHub {
    pub fn new(initial_version: u64) -> Arc<Self> {
        let (dispatched, _) = watch::channel(initial_version);
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            dispatched,
        })
    }

    /// Run the dispatcher until every notice sender is dropped.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        mut notices: mpsc::UnboundedReceiver<CommitNotice>,
    ) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                hub.dispatch(&notice);
            }
            debug!("Observation dispatcher stopped");
        })
    }

    /// Register an observation and queue its current value.
    ///
    /// The registry lock is held while the committed state is read, so the
    /// dispatcher either sees the entry with an older `seen_version` or
    /// skips a notice the initial value already reflects.
    pub fn subscribe<Q: Observable>(
        self: &Arc<Self>,
        query: Q,
        source: &TransactionManager,
    ) -> Result<Subscription<Q::Output>> {
        let mut entries = self.entries.lock()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(MirrorError::StoreClosed);
        }
        let state = source.snapshot()?;
        let initial = query.evaluate(&state)?;
        let last = query.key(&initial);

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(Event::Value(initial));

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        entries.insert(
            id,
            Box::new(Entry {
                query,
                last,
                seen_version: state.version(),
                sender,
            }),
        );
        debug!("Registered {} at version {}", id, state.version());
        Ok(Subscription::new(id, receiver, Arc::downgrade(self)))
    }

    fn dispatch(&self, notice: &CommitNotice) {
        match self.entries.lock() {
            Ok(mut entries) => entries.retain(|id, watcher| {
                let alive = watcher.notify(notice);
                if !alive {
                    warn!("Dropping {}: subscriber went away", id);
                }
                alive
            }),
            Err(e) => warn!("Subscription registry poisoned: {}", e),
        }
        self.dispatched.send_replace(notice.changes.version);
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        match self.entries.lock() {
            Ok(mut entries) => entries.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every commit up to `version` has been dispatched.
    pub async fn wait_dispatched(&self, version: u64) {
        let mut rx = self.dispatched.subscribe();
        let _ = rx.wait_for(|dispatched| *dispatched >= version).await;
    }

    /// Terminate every subscription and refuse new ones.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.entries.lock()?.drain().collect();
        for (id, mut watcher) in drained {
            debug!("Closing {}", id);
            watcher.terminate();
        }
        Ok(())
    }
}
