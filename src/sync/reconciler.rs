use super::batch::{BatchItem, BatchReport, ConflictReport, SyncBatch};
use super::ranges::{RangeMerge, Span, StoredRange, coalesce, range_id};
use crate::core::{MirrorError, Record, ReconcileError, Result};
use crate::facade::MirrorStore;
use crate::query::{Predicate, QuerySpec};
use crate::schema::{SchemaRegistry, names};
use crate::storage::WriteOutcome;
use crate::transaction::Transaction;
use std::collections::HashMap;
use tracing::{debug, info, info_span, warn};

/// Applies server batches to the store, one transaction per batch.
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: MirrorStore,
}

impl Reconciler {
    pub fn new(store: MirrorStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    /// Apply every item of `batch` atomically.
    ///
    /// Id conflicts between entity types are reported and skipped. Any other
    /// failure rolls the whole batch back and names the offending item.
    pub async fn apply(&self, batch: SyncBatch) -> Result<BatchReport> {
        let mut txn = self.store.begin().await?;
        let span = info_span!("reconcile", txn = %txn.id(), items = batch.len());
        let _entered = span.enter();

        let keep = dedupe(self.store.registry(), &batch.items);
        let mut report = BatchReport {
            deduplicated: keep.iter().filter(|k| !**k).count(),
            ..BatchReport::default()
        };

        for (index, item) in batch.items.into_iter().enumerate() {
            if !keep[index] {
                continue;
            }
            // An error here drops `txn`, which rolls the batch back.
            apply_item(&mut txn, index, item, &mut report)?;
        }

        let committed = txn.commit()?;
        report.version = committed.version;
        info!(
            "Reconciled batch: {} applied, {} stale, {} unchanged, {} conflicts, version {}",
            report.applied(),
            report.stale,
            report.unchanged,
            report.conflicts.len(),
            report.version
        );
        Ok(report)
    }
}

/// Mark which upserts survive deduplication.
///
/// Per (entity_type, id) the copy with the highest version wins, the later
/// one on ties; types without a version field keep the last copy.
fn dedupe(registry: &SchemaRegistry, items: &[BatchItem]) -> Vec<bool> {
    let mut winners: HashMap<(&str, &str), (usize, Option<i64>)> = HashMap::new();
    for (index, item) in items.iter().enumerate() {
        let BatchItem::Upsert {
            entity_type,
            record,
        } = item
        else {
            continue;
        };
        let version = registry
            .get(entity_type)
            .ok()
            .and_then(|schema| schema.version_of(record));
        let key = (entity_type.as_str(), record.id.as_str());
        let replace = match winners.get(&key) {
            Some((_, Some(best))) => version.is_some_and(|v| v >= *best),
            Some((_, None)) | None => true,
        };
        if replace {
            winners.insert(key, (index, version));
        }
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            BatchItem::Upsert {
                entity_type,
                record,
            } => winners
                .get(&(entity_type.as_str(), record.id.as_str()))
                .is_some_and(|(winner, _)| *winner == index),
            _ => true,
        })
        .collect()
}

fn failure(index: usize, entity_type: &str, id: &str, source: MirrorError) -> MirrorError {
    warn!(
        "Batch item {} ({} '{}') failed, rolling back: {}",
        index, entity_type, id, source
    );
    MirrorError::Reconcile(ReconcileError {
        index,
        entity_type: entity_type.to_string(),
        id: id.to_string(),
        source: Box::new(source),
    })
}

fn apply_item(
    txn: &mut Transaction,
    index: usize,
    item: BatchItem,
    report: &mut BatchReport,
) -> Result<()> {
    let (entity_type, id) = item.subject();
    let (entity_type, id) = (entity_type.to_string(), id.to_string());

    match item {
        BatchItem::Upsert {
            entity_type,
            record,
        } => upsert(txn, index, &entity_type, record, report),
        BatchItem::Delete {
            entity_type,
            id,
            at,
        } => {
            let outcome = match at {
                Some(at) => txn.delete_at(&entity_type, &id, at),
                None => txn.delete(&entity_type, &id),
            }
            .map_err(|e| failure(index, &entity_type, &id, e))?;
            count(report, outcome);
            Ok(())
        }
        BatchItem::PostsRange {
            channel_id,
            earliest,
            latest,
        } => merge_range(
            txn,
            names::POSTS_IN_CHANNEL,
            "channel_id",
            &channel_id,
            earliest,
            latest,
            report,
        )
        .map_err(|e| failure(index, &entity_type, &id, e)),
        BatchItem::ThreadRange {
            root_id,
            earliest,
            latest,
        } => merge_range(
            txn,
            names::POSTS_IN_THREAD,
            "root_id",
            &root_id,
            earliest,
            latest,
            report,
        )
        .map_err(|e| failure(index, &entity_type, &id, e)),
        BatchItem::PostsPage { channel_id, posts } => {
            let mut window: Option<(i64, i64)> = None;
            for mut post in posts {
                if !post.contains("channel_id") {
                    post.set("channel_id", channel_id.clone());
                }
                if let Some(at) = post.get_i64("create_at") {
                    window = Some(match window {
                        Some((lo, hi)) => (lo.min(at), hi.max(at)),
                        None => (at, at),
                    });
                }
                upsert(txn, index, names::POST, post, report)?;
            }
            if let Some((earliest, latest)) = window {
                merge_range(
                    txn,
                    names::POSTS_IN_CHANNEL,
                    "channel_id",
                    &channel_id,
                    earliest,
                    latest,
                    report,
                )
                .map_err(|e| failure(index, &entity_type, &id, e))?;
            }
            Ok(())
        }
    }
}

fn upsert(
    txn: &mut Transaction,
    index: usize,
    entity_type: &str,
    record: Record,
    report: &mut BatchReport,
) -> Result<()> {
    let id = record.id.clone();
    match txn.upsert(entity_type, record) {
        Ok(outcome) => {
            count(report, outcome);
            Ok(())
        }
        Err(MirrorError::SyncConflict {
            id,
            stored_type,
            incoming_type,
        }) => {
            warn!(
                "Skipping batch item {}: id '{}' is a {} locally but arrived as {}",
                index, id, stored_type, incoming_type
            );
            report.conflicts.push(ConflictReport {
                index,
                id,
                stored_type,
                incoming_type,
            });
            Ok(())
        }
        Err(e) => Err(failure(index, entity_type, &id, e)),
    }
}

fn count(report: &mut BatchReport, outcome: WriteOutcome) {
    match outcome {
        WriteOutcome::Inserted => report.inserted += 1,
        WriteOutcome::Updated | WriteOutcome::Restored => report.updated += 1,
        WriteOutcome::Archived | WriteOutcome::Removed => report.deleted += 1,
        WriteOutcome::Stale => report.stale += 1,
        WriteOutcome::Unchanged | WriteOutcome::Missing => report.unchanged += 1,
    }
}

/// Fold `[earliest, latest]` into the stored windows of `owner`.
fn merge_range(
    txn: &mut Transaction,
    entity_type: &str,
    owner_field: &str,
    owner: &str,
    earliest: i64,
    latest: i64,
    report: &mut BatchReport,
) -> Result<()> {
    let incoming = Span::new(earliest, latest)?;
    let spec = QuerySpec::filter(Predicate::eq(owner_field, owner)).order_by("earliest");
    let stored: Vec<StoredRange> = txn
        .query(entity_type, &spec)?
        .into_iter()
        .filter_map(|row| {
            let span = Span::new(row.get_i64("earliest")?, row.get_i64("latest")?).ok()?;
            Some(StoredRange { id: row.id, span })
        })
        .collect();

    let (id, span) = match coalesce(&stored, incoming, || range_id(entity_type, owner, incoming)) {
        RangeMerge::Covered { id } => {
            debug!("{} [{}, {}] already covered by '{}'", entity_type, earliest, latest, id);
            report.unchanged += 1;
            return Ok(());
        }
        RangeMerge::Insert { id, span } => (id, span),
        RangeMerge::Merge {
            keep,
            span,
            removed,
        } => {
            for id in &removed {
                txn.delete(entity_type, id)?;
            }
            report.ranges_merged += 1 + removed.len();
            (keep, span)
        }
    };

    let row = Record::new(id)
        .with(owner_field, owner)
        .with("earliest", span.earliest)
        .with("latest", span.latest);
    let outcome = txn.upsert(entity_type, row)?;
    count(report, outcome);
    Ok(())
}
