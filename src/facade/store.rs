use super::StoreConfig;
use crate::core::{MirrorError, Record, Result};
use crate::models::Entity;
use crate::observe::{
    CollectionOptions, CollectionQuery, ObservationHub, RecordQuery, RecordState,
    RelatedRecordQuery, Subscription,
};
use crate::query::{Predicate, QuerySpec};
use crate::schema::{RelationKind, SchemaRegistry};
use crate::storage::{
    DurabilityBackend, DurabilityMode, FileDurability, NoDurability, WriteOutcome,
};
use crate::transaction::{Transaction, TransactionManager};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

/// Row counts and bookkeeping for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub version: u64,
    pub tables: Vec<TableStats>,
    pub subscriptions: usize,
    pub entries_since_checkpoint: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub name: String,
    pub rows: usize,
}

struct StoreInner {
    registry: SchemaRegistry,
    manager: Arc<TransactionManager>,
    hub: Arc<ObservationHub>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    config: StoreConfig,
}

/// The local mirror of remote chat data.
///
/// Cheap to clone; all clones share one committed state, one writer lock
/// and one subscription registry. Must be opened inside a tokio runtime.
#[derive(Clone)]
pub struct MirrorStore {
    inner: Arc<StoreInner>,
}

impl MirrorStore {
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let registry = config.resolve_registry()?;

        let backend: Box<dyn DurabilityBackend> = match (&config.data_dir, config.durability) {
            (Some(dir), mode) if mode != DurabilityMode::None => Box::new(FileDurability::open(
                dir,
                mode,
                config.checkpoint_threshold,
            )?),
            _ => Box::new(NoDurability),
        };
        let state = backend.load(registry.clone())?;
        let version = state.version();

        let (notices, receiver) = mpsc::unbounded_channel();
        let hub = ObservationHub::new(version);
        let manager = Arc::new(TransactionManager::new(
            state,
            backend,
            config.foreign_key_policy,
            notices,
        ));
        let dispatcher = hub.spawn_dispatcher(receiver);

        info!(
            "Opened store at version {} ({:?} durability, {} entity types)",
            version,
            config.durability,
            registry.list().len()
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                registry,
                manager,
                hub,
                dispatcher: Mutex::new(Some(dispatcher)),
                config,
            }),
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::in_memory()).await
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn version(&self) -> Result<u64> {
        self.inner.manager.version()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.manager.is_closed()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Start a transaction; waits for any other writer to finish.
    pub async fn begin(&self) -> Result<Transaction> {
        self.inner.manager.begin().await
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut txn = self.begin().await?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback()?;
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Single-write helpers
    // ------------------------------------------------------------------

    pub async fn upsert(&self, entity_type: &str, record: Record) -> Result<WriteOutcome> {
        self.transaction(|txn| txn.upsert(entity_type, record)).await
    }

    pub async fn save<E: Entity>(&self, entity: &E) -> Result<WriteOutcome> {
        self.transaction(|txn| txn.save(entity)).await
    }

    pub async fn delete(&self, entity_type: &str, id: &str) -> Result<WriteOutcome> {
        self.transaction(|txn| txn.delete(entity_type, id)).await
    }

    pub async fn delete_at(&self, entity_type: &str, id: &str, at: i64) -> Result<WriteOutcome> {
        self.transaction(|txn| txn.delete_at(entity_type, id, at)).await
    }

    // ------------------------------------------------------------------
    // Reads against committed state
    // ------------------------------------------------------------------

    pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<Record>> {
        self.inner.manager.snapshot()?.get(entity_type, id)
    }

    pub fn fetch<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        self.get(E::ENTITY_TYPE, id)?
            .map(|record| E::from_record(&record))
            .transpose()
    }

    pub fn query(&self, entity_type: &str, spec: &QuerySpec) -> Result<Vec<Record>> {
        self.inner.manager.snapshot()?.query(entity_type, spec)
    }

    /// Rows that are not archived, in id order.
    pub fn active(&self, entity_type: &str) -> Result<Vec<Record>> {
        self.query(entity_type, &self.active_spec(entity_type)?)
    }

    fn active_spec(&self, entity_type: &str) -> Result<QuerySpec> {
        let schema = self.inner.registry.get(entity_type)?;
        Ok(match schema.archive_field() {
            Some(field) => QuerySpec::filter(Predicate::eq(field, 0)),
            None => QuerySpec::all(),
        })
    }

    pub fn related(&self, entity_type: &str, id: &str, relation: &str) -> Result<Vec<Record>> {
        self.inner
            .manager
            .snapshot()?
            .related(entity_type, id, relation)
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn observe_record(&self, entity_type: &str, id: &str) -> Result<Subscription<RecordState>> {
        let query = RecordQuery::new(&self.inner.registry, entity_type, id)?;
        self.inner.hub.subscribe(query, &self.inner.manager)
    }

    pub fn observe_collection(
        &self,
        entity_type: &str,
        spec: QuerySpec,
        options: CollectionOptions,
    ) -> Result<Subscription<Vec<Record>>> {
        let query = CollectionQuery::new(&self.inner.registry, entity_type, spec, options)?;
        self.inner.hub.subscribe(query, &self.inner.manager)
    }

    /// Observe the non-archived rows of a type, ordered by `order_by`.
    pub fn observe_active(
        &self,
        entity_type: &str,
        order_by: &str,
        options: CollectionOptions,
    ) -> Result<Subscription<Vec<Record>>> {
        let spec = self.active_spec(entity_type)?.order_by(order_by);
        self.observe_collection(entity_type, spec, options)
    }

    /// Observe the rows reached through a has-many relation of one row.
    pub fn observe_related(
        &self,
        entity_type: &str,
        id: &str,
        relation: &str,
        options: CollectionOptions,
    ) -> Result<Subscription<Vec<Record>>> {
        let relation = self.inner.registry.relation(entity_type, relation)?;
        if relation.kind != RelationKind::HasMany {
            return Err(relation.kind_mismatch(entity_type, "a collection"));
        }
        let spec = QuerySpec::filter(Predicate::eq(&relation.key, id));
        self.observe_collection(&relation.target, spec, options)
    }

    /// Observe the single row reached through a belongs-to or one-to-one
    /// relation of one row.
    pub fn observe_related_record(
        &self,
        entity_type: &str,
        id: &str,
        relation: &str,
    ) -> Result<Subscription<RecordState>> {
        let relation = self.inner.registry.relation(entity_type, relation)?;
        match relation.kind {
            RelationKind::OneToOne => self.observe_record(&relation.target, id),
            RelationKind::BelongsTo => {
                let query =
                    RelatedRecordQuery::new(&self.inner.registry, entity_type, id, &relation.name)?;
                self.inner.hub.subscribe(query, &self.inner.manager)
            }
            RelationKind::HasMany => Err(relation.kind_mismatch(entity_type, "a record")),
        }
    }

    /// Wait until observers have seen every commit made so far.
    pub async fn settled(&self) -> Result<()> {
        let version = self.inner.manager.version()?;
        self.inner.hub.wait_dispatched(version).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub fn checkpoint(&self) -> Result<()> {
        self.inner.manager.checkpoint()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let state = self.inner.manager.snapshot()?;
        Ok(StoreStats {
            version: state.version(),
            tables: state
                .row_counts()
                .into_iter()
                .map(|(name, rows)| TableStats { name, rows })
                .collect(),
            subscriptions: self.inner.hub.len(),
            entries_since_checkpoint: self.inner.manager.entries_since_checkpoint()?,
        })
    }

    /// Checkpoint, deliver pending notifications, then end every subscription.
    pub async fn close(&self) -> Result<()> {
        if !self.inner.manager.close().await? {
            return Ok(());
        }
        if let Some(dispatcher) = self.inner.dispatcher.lock().await.take() {
            dispatcher
                .await
                .map_err(|e| MirrorError::Persistence(format!("Dispatcher task failed: {}", e)))?;
        }
        self.inner.hub.close()?;
        info!("Store closed");
        Ok(())
    }
}

impl std::fmt::Debug for MirrorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorStore")
            .field("manager", &self.inner.manager)
            .field("subscriptions", &self.inner.hub.len())
            .finish()
    }
}
