//! Transaction scoping and writer serialization

use mirrordb::transaction::TransactionState;
use mirrordb::{MirrorError, MirrorStore, Record, names};
use std::sync::Arc;

#[tokio::test]
async fn test_closure_error_rolls_back() {
    let store = MirrorStore::in_memory().await.unwrap();

    let result: mirrordb::Result<()> = store
        .transaction(|txn| {
            txn.upsert(names::CHANNEL, Record::new("c1"))?;
            txn.upsert(names::CHANNEL, Record::new("c2").with("update_at", "bad"))?;
            Ok(())
        })
        .await;

    assert!(result.is_err());
    assert!(store.get(names::CHANNEL, "c1").unwrap().is_none());
    assert_eq!(store.version().unwrap(), 0);
}

#[tokio::test]
async fn test_uncommitted_writes_are_invisible() {
    let store = MirrorStore::in_memory().await.unwrap();
    let mut txn = store.begin().await.unwrap();
    txn.upsert(names::CHANNEL, Record::new("c1")).unwrap();

    assert!(txn.get(names::CHANNEL, "c1").unwrap().is_some());
    assert!(store.get(names::CHANNEL, "c1").unwrap().is_none());

    let changes = txn.commit().unwrap();
    assert_eq!(changes.version, 1);
    assert_eq!(changes.len(), 1);
    assert!(store.get(names::CHANNEL, "c1").unwrap().is_some());
}

#[tokio::test]
async fn test_dropped_transaction_aborts() {
    let store = MirrorStore::in_memory().await.unwrap();
    {
        let mut txn = store.begin().await.unwrap();
        assert_eq!(txn.state(), TransactionState::Active);
        txn.upsert(names::CHANNEL, Record::new("c1")).unwrap();
    }
    assert!(store.get(names::CHANNEL, "c1").unwrap().is_none());

    // The writer slot is free again
    store.upsert(names::CHANNEL, Record::new("c2")).await.unwrap();
    assert_eq!(store.version().unwrap(), 1);
}

#[tokio::test]
async fn test_empty_commit_keeps_version() {
    let store = MirrorStore::in_memory().await.unwrap();
    let txn = store.begin().await.unwrap();
    let changes = txn.commit().unwrap();
    assert!(changes.is_empty());
    assert_eq!(store.version().unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_writers_are_serialized() {
    let store = Arc::new(MirrorStore::in_memory().await.unwrap());
    let mut handles = Vec::new();

    for i in 0..10 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .upsert(names::POST, Record::new(format!("p{}", i)).with("channel_id", "c1"))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.version().unwrap(), 10);
    let posts = store
        .query(
            names::POST,
            &mirrordb::QuerySpec::filter(mirrordb::Predicate::eq("channel_id", "c1")),
        )
        .unwrap();
    assert_eq!(posts.len(), 10);
}

#[tokio::test]
async fn test_begin_after_close_fails() {
    let store = MirrorStore::in_memory().await.unwrap();
    store.close().await.unwrap();
    assert!(store.is_closed());

    let err = store.begin().await.unwrap_err();
    assert!(matches!(err, MirrorError::StoreClosed));
    assert!(matches!(
        store.get(names::CHANNEL, "c1").unwrap_err(),
        MirrorError::StoreClosed
    ));
}
