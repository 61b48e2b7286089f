//! Integration tests for the record store
//!
//! Exercises per-record locking under contention, time-range queries, and
//! change notifications through the public crate surface.

use std::sync::Arc;

use chrono::{Duration, Utc};
use engram::config::StoreConfig;
use futures::StreamExt;
use engram::record::{MemoryRecord, RecordKind};
use engram::store::{ChangeAction, RecordStore};

fn create_test_store() -> Arc<RecordStore> {
    Arc::new(RecordStore::new(&StoreConfig::default()))
}

/// Test helper: insert a conversation record with a fixed creation time
async fn seed_at(store: &RecordStore, id: &str, created_offset_secs: i64) {
    seed_at_time(store, id, Utc::now() + Duration::seconds(created_offset_secs)).await;
}

/// Test helper: insert a conversation record created at an exact instant
async fn seed_at_time(store: &RecordStore, id: &str, created_at: chrono::DateTime<Utc>) {
    let id_owned = id.to_string();
    store
        .upsert(RecordKind::Conversation, id, move |_| {
            let mut r = MemoryRecord::new(RecordKind::Conversation, &id_owned, "seeded");
            r.created_at = created_at;
            r.last_accessed_at = r.created_at;
            r
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_writers_to_same_id_serialize_without_lost_updates() {
    let store = create_test_store();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .upsert(RecordKind::Conversation, "contended", |old| {
                    let mut r = old.unwrap_or_else(|| {
                        MemoryRecord::new(RecordKind::Conversation, "contended", "0")
                    });
                    let n: u64 = r.content.parse().unwrap_or(0);
                    r.content = (n + 1).to_string();
                    r
                })
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let record = store.get(RecordKind::Conversation, "contended").unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(record.content, "2");
}

#[tokio::test]
async fn test_many_concurrent_writers_all_land() {
    let store = create_test_store();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .upsert(RecordKind::WorkContext, "counter", |old| {
                    let mut r = old.unwrap_or_else(|| {
                        MemoryRecord::new(RecordKind::WorkContext, "counter", "0")
                    });
                    let n: u64 = r.content.parse().unwrap_or(0);
                    r.content = (n + 1).to_string();
                    r
                })
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let record = store.get(RecordKind::WorkContext, "counter").unwrap();
    assert_eq!(record.content, "16");
    assert_eq!(record.version, 16);
}

#[tokio::test]
async fn test_distinct_ids_do_not_block_each_other() {
    let store = create_test_store();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        let id = format!("r{i}");
        handles.push(tokio::spawn(async move {
            let captured = id.clone();
            store
                .upsert(RecordKind::Conversation, &id, move |_| {
                    MemoryRecord::new(RecordKind::Conversation, &captured, "x")
                })
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 1);
    }
    assert_eq!(store.count(RecordKind::Conversation), 8);
}

#[tokio::test]
async fn test_store_pins_identity_fields() {
    let store = create_test_store();
    seed_at(&store, "pinned", 0).await;
    let original = store.get(RecordKind::Conversation, "pinned").unwrap();

    store
        .upsert(RecordKind::Conversation, "pinned", |old| {
            let mut r = old.unwrap();
            r.id = "hijacked".to_string();
            r.created_at = Utc::now() + Duration::days(99);
            r.version = 0;
            r
        })
        .await
        .unwrap();

    let after = store.get(RecordKind::Conversation, "pinned").unwrap();
    assert_eq!(after.id, "pinned");
    assert_eq!(after.created_at, original.created_at);
    assert_eq!(after.version, 2);
}

#[tokio::test]
async fn test_range_by_time_is_inclusive_and_ascending() {
    let store = create_test_store();
    let base = Utc::now();
    seed_at_time(&store, "a", base - Duration::seconds(300)).await;
    seed_at_time(&store, "b", base - Duration::seconds(200)).await;
    seed_at_time(&store, "c", base - Duration::seconds(100)).await;
    seed_at_time(&store, "outside", base + Duration::seconds(100)).await;

    let start = base - Duration::seconds(300);
    let end = base;
    let hits = store
        .range_by_time(RecordKind::Conversation, start, end)
        .await;

    let ids: Vec<&str> = hits.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    for pair in hits.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
}

#[tokio::test]
async fn test_delete_removes_record_and_index_entry() {
    let store = create_test_store();
    seed_at(&store, "doomed", -10).await;

    assert!(store.delete(RecordKind::Conversation, "doomed").await.unwrap());
    assert!(store.get(RecordKind::Conversation, "doomed").is_none());

    let hits = store
        .range_by_time(
            RecordKind::Conversation,
            Utc::now() - Duration::hours(1),
            Utc::now(),
        )
        .await;
    assert!(hits.is_empty());

    // Second delete is a no-op, not an error.
    assert!(!store.delete(RecordKind::Conversation, "doomed").await.unwrap());
}

#[tokio::test]
async fn test_change_events_for_upsert_and_delete() {
    let store = create_test_store();
    let mut events = store.subscribe();

    seed_at(&store, "watched", 0).await;
    store
        .delete(RecordKind::Conversation, "watched")
        .await
        .unwrap();

    let first = events.recv().await.unwrap();
    assert_eq!(first.action, ChangeAction::Upsert);
    assert_eq!(first.id, "watched");

    let second = events.recv().await.unwrap();
    assert_eq!(second.action, ChangeAction::Delete);
    assert_eq!(second.kind, RecordKind::Conversation);
}

#[tokio::test]
async fn test_change_stream_tails_live_writes() {
    let store = create_test_store();
    let stream = store.change_stream();
    tokio::pin!(stream);

    seed_at(&store, "tailed", 0).await;

    let event = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
        .await
        .expect("no event within deadline")
        .expect("stream ended");
    assert_eq!(event.id, "tailed");
    assert_eq!(event.action, ChangeAction::Upsert);
}

#[tokio::test]
async fn test_kinds_are_separate_namespaces() {
    let store = create_test_store();
    seed_at(&store, "shared-id", 0).await;

    store
        .upsert(RecordKind::EntityState, "shared-id", |_| {
            MemoryRecord::new(RecordKind::EntityState, "shared-id", "entity")
        })
        .await
        .unwrap();

    assert_eq!(
        store
            .get(RecordKind::Conversation, "shared-id")
            .unwrap()
            .content,
        "seeded"
    );
    assert_eq!(
        store
            .get(RecordKind::EntityState, "shared-id")
            .unwrap()
            .content,
        "entity"
    );
    assert_eq!(store.list_by_kind(RecordKind::EntityState).len(), 1);
}
