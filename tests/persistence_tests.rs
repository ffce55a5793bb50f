//! Durability: commit log replay, checkpoints and reopen

use mirrordb::{DurabilityMode, MirrorStore, Reconciler, Record, StoreConfig, SyncBatch, names};
use tempfile::TempDir;

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig::persistent(dir.path()).durability(DurabilityMode::Sync)
}

#[tokio::test]
async fn test_reopen_replays_commit_log() {
    let dir = TempDir::new().unwrap();
    {
        let store = MirrorStore::open(config(&dir)).await.unwrap();
        store
            .upsert(names::CHANNEL, Record::new("c1").with("display_name", "Alpha"))
            .await
            .unwrap();
        store.delete_at(names::CHANNEL, "c1", 55).await.unwrap();
        // Dropped without close: nothing but the log survives
    }
    assert!(dir.path().join("mirrordb.log").exists());

    let store = MirrorStore::open(config(&dir)).await.unwrap();
    assert_eq!(store.version().unwrap(), 2);
    let row = store.get(names::CHANNEL, "c1").unwrap().unwrap();
    assert_eq!(row.get_str("display_name"), Some("Alpha"));
    assert_eq!(row.get_i64("delete_at"), Some(55));
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_checkpoint_writes_snapshot_and_resets_log() {
    let dir = TempDir::new().unwrap();
    let store = MirrorStore::open(config(&dir)).await.unwrap();
    store.upsert(names::CHANNEL, Record::new("c1")).await.unwrap();
    store.upsert(names::CHANNEL, Record::new("c2")).await.unwrap();
    assert_eq!(store.stats().unwrap().entries_since_checkpoint, 2);

    store.checkpoint().unwrap();
    assert!(dir.path().join("mirrordb.snapshot").exists());
    assert_eq!(store.stats().unwrap().entries_since_checkpoint, 0);

    store.upsert(names::CHANNEL, Record::new("c3")).await.unwrap();
    drop(store);

    let store = MirrorStore::open(config(&dir)).await.unwrap();
    assert_eq!(store.version().unwrap(), 3);
    assert_eq!(store.active(names::CHANNEL).unwrap().len(), 3);
}

#[tokio::test]
async fn test_close_checkpoints() {
    let dir = TempDir::new().unwrap();
    let store = MirrorStore::open(config(&dir)).await.unwrap();
    store.upsert(names::CHANNEL, Record::new("c1")).await.unwrap();
    store.close().await.unwrap();
    assert!(dir.path().join("mirrordb.snapshot").exists());

    let store = MirrorStore::open(config(&dir)).await.unwrap();
    assert_eq!(store.stats().unwrap().entries_since_checkpoint, 0);
    assert!(store.get(names::CHANNEL, "c1").unwrap().is_some());
}

#[tokio::test]
async fn test_automatic_checkpoint_threshold() {
    let dir = TempDir::new().unwrap();
    let store = MirrorStore::open(config(&dir).checkpoint_threshold(3))
        .await
        .unwrap();
    for i in 0..4 {
        store
            .upsert(names::POST, Record::new(format!("p{}", i)))
            .await
            .unwrap();
    }
    assert!(dir.path().join("mirrordb.snapshot").exists());
    assert_eq!(store.stats().unwrap().entries_since_checkpoint, 1);
}

#[tokio::test]
async fn test_recovered_state_keeps_identity_and_ranges() {
    let dir = TempDir::new().unwrap();
    {
        let store = MirrorStore::open(config(&dir)).await.unwrap();
        Reconciler::new(store.clone())
            .apply(
                SyncBatch::new()
                    .upsert(names::CHANNEL, Record::new("x1"))
                    .posts_range("x1", 10, 20),
            )
            .await
            .unwrap();
        store.close().await.unwrap();
    }

    let store = MirrorStore::open(config(&dir)).await.unwrap();
    let err = store.upsert(names::POST, Record::new("x1")).await.unwrap_err();
    assert!(err.is_sync_conflict());

    let report = Reconciler::new(store.clone())
        .apply(SyncBatch::new().posts_range("x1", 20, 30))
        .await
        .unwrap();
    assert_eq!(report.ranges_merged, 1);
    let ranges = store.related(names::CHANNEL, "x1", "posts_in_channel").unwrap();
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].get_i64("latest"), Some(30));
}

#[tokio::test]
async fn test_in_memory_store_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = MirrorStore::open(StoreConfig::in_memory()).await.unwrap();
    store.upsert(names::CHANNEL, Record::new("c1")).await.unwrap();
    store.checkpoint().unwrap();
    store.close().await.unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
