//! Applying server batches: merging, dedupe, conflicts and loaded ranges

use mirrordb::models::{Channel, ChannelType};
use mirrordb::{
    MirrorError, MirrorStore, Predicate, QuerySpec, Reconciler, Record, SyncBatch, names,
};

async fn reconciler() -> Reconciler {
    Reconciler::new(MirrorStore::in_memory().await.unwrap())
}

fn channel(id: &str, update_at: i64) -> Record {
    Record::new(id)
        .with("update_at", update_at)
        .with("display_name", format!("Channel {}", id))
}

fn ranges(store: &MirrorStore, entity_type: &str, owner_field: &str, owner: &str) -> Vec<(i64, i64)> {
    store
        .query(
            entity_type,
            &QuerySpec::filter(Predicate::eq(owner_field, owner)).order_by("earliest"),
        )
        .unwrap()
        .into_iter()
        .map(|r| (r.get_i64("earliest").unwrap(), r.get_i64("latest").unwrap()))
        .collect()
}

#[tokio::test]
async fn test_apply_inserts_and_reports() {
    let reconciler = reconciler().await;
    let batch = SyncBatch::new()
        .upsert(names::CHANNEL, channel("c1", 1))
        .upsert(names::CHANNEL, channel("c2", 1))
        .upsert(names::MY_CHANNEL, Record::new("c1").with("mentions_count", 3));

    let report = reconciler.apply(batch).await.unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.version, 1);
    assert!(report.conflicts.is_empty());

    let store = reconciler.store();
    assert_eq!(store.active(names::CHANNEL).unwrap().len(), 2);
    let membership = store.get(names::MY_CHANNEL, "c1").unwrap().unwrap();
    assert_eq!(membership.get_i64("mentions_count"), Some(3));
}

#[tokio::test]
async fn test_reapplying_batch_is_a_noop() {
    let reconciler = reconciler().await;
    let batch = || {
        SyncBatch::new()
            .upsert(names::CHANNEL, channel("c1", 4))
            .posts_range("c1", 10, 20)
    };

    let first = reconciler.apply(batch()).await.unwrap();
    assert_eq!(first.version, 1);

    let second = reconciler.apply(batch()).await.unwrap();
    assert_eq!(second.applied(), 0);
    assert_eq!(second.version, 1);
    assert_eq!(reconciler.store().version().unwrap(), 1);
}

#[tokio::test]
async fn test_reapplying_upsert_then_delete_keeps_archive() {
    let reconciler = reconciler().await;
    let batch = || {
        SyncBatch::new()
            .upsert(names::CHANNEL, channel("c1", 5).with("delete_at", 0))
            .delete(names::CHANNEL, "c1")
    };

    let first = reconciler.apply(batch()).await.unwrap();
    let once = reconciler.store().get(names::CHANNEL, "c1").unwrap().unwrap();
    assert_ne!(once.get_i64("delete_at"), Some(0));

    let second = reconciler.apply(batch()).await.unwrap();
    let twice = reconciler.store().get(names::CHANNEL, "c1").unwrap().unwrap();
    assert_eq!(once, twice);
    assert_eq!(second.applied(), 0);
    assert_eq!(second.version, first.version);
}

#[tokio::test]
async fn test_replayed_batch_after_local_delete_keeps_stamp() {
    let reconciler = reconciler().await;
    let batch = || SyncBatch::new().upsert(names::CHANNEL, channel("c1", 5).with("delete_at", 0));
    reconciler.apply(batch()).await.unwrap();

    let store = reconciler.store();
    store.delete_at(names::CHANNEL, "c1", 100).await.unwrap();
    reconciler.apply(batch()).await.unwrap();

    let row = store.get(names::CHANNEL, "c1").unwrap().unwrap();
    assert_eq!(row.get_i64("delete_at"), Some(100));
    assert!(store.active(names::CHANNEL).unwrap().is_empty());

    // The server restores by sending a newer version
    reconciler
        .apply(SyncBatch::new().upsert(
            names::CHANNEL,
            Record::new("c1").with("update_at", 6).with("delete_at", 0),
        ))
        .await
        .unwrap();
    assert_eq!(store.active(names::CHANNEL).unwrap().len(), 1);
}

#[tokio::test]
async fn test_versions_only_move_forward() {
    let reconciler = reconciler().await;
    reconciler
        .apply(SyncBatch::new().upsert(names::CHANNEL, channel("c1", 10).with("name", "current")))
        .await
        .unwrap();

    let report = reconciler
        .apply(SyncBatch::new().upsert(names::CHANNEL, channel("c1", 3).with("name", "older")))
        .await
        .unwrap();
    assert_eq!(report.stale, 1);

    let row = reconciler.store().get(names::CHANNEL, "c1").unwrap().unwrap();
    assert_eq!(row.get_str("name"), Some("current"));
}

#[tokio::test]
async fn test_duplicates_in_one_batch_keep_newest() {
    let reconciler = reconciler().await;
    let batch = SyncBatch::new()
        .upsert(names::CHANNEL, channel("c1", 5).with("name", "five"))
        .upsert(names::CHANNEL, channel("c1", 9).with("name", "nine"))
        .upsert(names::CHANNEL, channel("c1", 7).with("name", "seven"));

    let report = reconciler.apply(batch).await.unwrap();
    assert_eq!(report.deduplicated, 2);
    assert_eq!(report.inserted, 1);

    let row = reconciler.store().get(names::CHANNEL, "c1").unwrap().unwrap();
    assert_eq!(row.get_str("name"), Some("nine"));
}

#[tokio::test]
async fn test_touching_ranges_merge() {
    let reconciler = reconciler().await;
    reconciler
        .apply(SyncBatch::new().posts_range("c1", 10, 20))
        .await
        .unwrap();
    let report = reconciler
        .apply(SyncBatch::new().posts_range("c1", 20, 30))
        .await
        .unwrap();

    assert_eq!(report.ranges_merged, 1);
    assert_eq!(
        ranges(reconciler.store(), names::POSTS_IN_CHANNEL, "channel_id", "c1"),
        vec![(10, 30)]
    );
}

#[tokio::test]
async fn test_disjoint_ranges_stay_apart() {
    let reconciler = reconciler().await;
    let batch = SyncBatch::new()
        .posts_range("c1", 10, 20)
        .posts_range("c1", 40, 50)
        .posts_range("c2", 15, 45);
    reconciler.apply(batch).await.unwrap();

    let store = reconciler.store();
    assert_eq!(
        ranges(store, names::POSTS_IN_CHANNEL, "channel_id", "c1"),
        vec![(10, 20), (40, 50)]
    );

    // A window spanning both collapses them into one row
    reconciler
        .apply(SyncBatch::new().posts_range("c1", 15, 45))
        .await
        .unwrap();
    assert_eq!(
        ranges(store, names::POSTS_IN_CHANNEL, "channel_id", "c1"),
        vec![(10, 50)]
    );
    assert_eq!(
        ranges(store, names::POSTS_IN_CHANNEL, "channel_id", "c2"),
        vec![(15, 45)]
    );
}

#[tokio::test]
async fn test_thread_ranges() {
    let reconciler = reconciler().await;
    let batch = SyncBatch::new()
        .thread_range("root1", 100, 200)
        .thread_range("root1", 150, 300);
    reconciler.apply(batch).await.unwrap();

    assert_eq!(
        ranges(reconciler.store(), names::POSTS_IN_THREAD, "root_id", "root1"),
        vec![(100, 300)]
    );
}

#[tokio::test]
async fn test_posts_page_records_window() {
    let reconciler = reconciler().await;
    let posts = vec![
        Record::new("p1").with("create_at", 30).with("message", "a"),
        Record::new("p2").with("create_at", 10).with("message", "b"),
        Record::new("p3").with("create_at", 20).with("message", "c"),
    ];
    let report = reconciler
        .apply(SyncBatch::new().posts_page("c1", posts))
        .await
        .unwrap();
    assert_eq!(report.inserted, 4);

    let store = reconciler.store();
    let related = store.related(names::CHANNEL, "c1", "posts").unwrap();
    assert_eq!(related.len(), 3);
    assert_eq!(
        ranges(store, names::POSTS_IN_CHANNEL, "channel_id", "c1"),
        vec![(10, 30)]
    );
}

#[tokio::test]
async fn test_conflicting_id_is_skipped_and_reported() {
    let reconciler = reconciler().await;
    reconciler
        .apply(SyncBatch::new().upsert(names::CHANNEL, channel("x1", 1)))
        .await
        .unwrap();

    let batch = SyncBatch::new()
        .upsert(names::POST, Record::new("x1").with("message", "clash"))
        .upsert(names::POST, Record::new("p1").with("message", "fine"));
    let report = reconciler.apply(batch).await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.index, 0);
    assert_eq!(conflict.stored_type, names::CHANNEL);
    assert_eq!(conflict.incoming_type, names::POST);

    let store = reconciler.store();
    assert!(store.get(names::POST, "x1").unwrap().is_none());
    assert!(store.get(names::CHANNEL, "x1").unwrap().is_some());
    assert!(store.get(names::POST, "p1").unwrap().is_some());
}

#[tokio::test]
async fn test_invalid_item_rolls_back_batch() {
    let reconciler = reconciler().await;
    let batch = SyncBatch::new()
        .upsert(names::CHANNEL, channel("c1", 1))
        .upsert(names::CHANNEL, Record::new("c2").with("colour", "red"))
        .upsert(names::CHANNEL, channel("c3", 1));

    let err = reconciler.apply(batch).await.unwrap_err();
    match err {
        MirrorError::Reconcile(failure) => {
            assert_eq!(failure.index, 1);
            assert_eq!(failure.id, "c2");
            assert!(matches!(*failure.source, MirrorError::UnknownField { .. }));
        }
        other => panic!("unexpected error: {}", other),
    }

    let store = reconciler.store();
    assert!(store.get(names::CHANNEL, "c1").unwrap().is_none());
    assert_eq!(store.version().unwrap(), 0);

    // The writer is released after the failed batch
    reconciler
        .apply(SyncBatch::new().upsert(names::CHANNEL, channel("c1", 1)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_server_deletes_archive_with_timestamp() {
    let reconciler = reconciler().await;
    let batch = SyncBatch::new()
        .upsert_entity(&Channel::new("c1", "Town Square", ChannelType::Open))
        .unwrap()
        .upsert(names::DRAFT, Record::new("d1").with("channel_id", "c1"));
    reconciler.apply(batch).await.unwrap();

    let report = reconciler
        .apply(
            SyncBatch::new()
                .delete_at(names::CHANNEL, "c1", 777)
                .delete(names::DRAFT, "d1")
                .delete(names::POST, "never-seen"),
        )
        .await
        .unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(report.unchanged, 1);

    let store = reconciler.store();
    let channel = store.get(names::CHANNEL, "c1").unwrap().unwrap();
    assert_eq!(channel.get_i64("delete_at"), Some(777));
    assert!(store.get(names::DRAFT, "d1").unwrap().is_none());
}

#[tokio::test]
async fn test_batch_from_json_file_contents() {
    let reconciler = reconciler().await;
    let batch = SyncBatch::from_json(
        r#"{"items": [
            {"op": "upsert", "entity_type": "team", "record": {"id": "t1", "display_name": "Core", "update_at": 2}},
            {"op": "upsert", "entity_type": "channel", "record": {"id": "c1", "team_id": "t1", "update_at": 2}},
            {"op": "posts_range", "channel_id": "c1", "earliest": 1, "latest": 5}
        ]}"#,
    )
    .unwrap();
    let report = reconciler.apply(batch).await.unwrap();
    assert_eq!(report.inserted, 3);

    let channels = reconciler.store().related(names::TEAM, "t1", "channels").unwrap();
    assert_eq!(channels.len(), 1);
}
