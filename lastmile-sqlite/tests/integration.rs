use lastmile::store::{DurableQueueStore, QueueBackend, StoredRecord};
use lastmile::testing::sample_event;
use lastmile::{EngineConfig, ManualClock};
use lastmile_sqlite::SqliteBackend;
use std::sync::Arc;
use std::time::Duration;

fn record(id: &str, enqueued_at: u64) -> StoredRecord {
    StoredRecord {
        id: id.into(),
        event: sample_event(id),
        enqueued_at,
        attempt_count: 0,
        last_attempt_at: None,
    }
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let backend = SqliteBackend::open_in(dir.path()).unwrap();
        backend.insert_capped(record("a", 1), 10).await.unwrap();
        backend.increment_attempt("a", 50, 5).await.unwrap();
    }

    let reopened = SqliteBackend::open_in(dir.path()).unwrap();
    let records = reopened.list_eligible(10, 5).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "a");
    assert_eq!(records[0].attempt_count, 1);
    assert_eq!(records[0].last_attempt_at, Some(50));
    assert_eq!(records[0].event, sample_event("a"));
    assert!(reopened.path().unwrap().ends_with("analytics_events_db.sqlite3"));
}

#[tokio::test]
async fn capacity_evicts_oldest_by_enqueue_time() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend.insert_capped(record("t2", 20), 3).await.unwrap();
    backend.insert_capped(record("t1", 10), 3).await.unwrap();
    backend.insert_capped(record("t3", 30), 3).await.unwrap();

    let evicted = backend.insert_capped(record("t4", 40), 3).await.unwrap();

    assert_eq!(evicted, 1);
    let ids: Vec<_> =
        backend.list_eligible(10, 5).await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["t2", "t3", "t4"]);
}

#[tokio::test]
async fn attempts_cap_and_exhausted_records_are_swept() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend.insert_capped(record("spent", 1), 10).await.unwrap();
    backend.insert_capped(record("fresh", 2), 10).await.unwrap();

    for at in 0..8 {
        assert!(backend.increment_attempt("spent", at, 5).await.unwrap());
    }
    assert!(!backend.increment_attempt("missing", 0, 5).await.unwrap());

    let eligible = backend.list_eligible(10, 5).await.unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].id, "fresh");

    assert_eq!(backend.remove_exhausted(5).await.unwrap(), 1);
    assert_eq!(backend.count().await.unwrap(), 1);
    assert!(backend.remove("fresh").await.unwrap());
    assert_eq!(backend.count().await.unwrap(), 0);
}

#[tokio::test]
async fn store_on_sqlite_keeps_its_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn QueueBackend> = Arc::new(SqliteBackend::open_in(dir.path()).unwrap());
    let config = EngineConfig { max_records: 3, ..EngineConfig::default() };
    let clock = ManualClock::new(1_000);
    let store = DurableQueueStore::new(backend, &config).with_clock(Arc::new(clock.clone()));

    let mut ids = Vec::new();
    for i in 0..4 {
        clock.advance(Duration::from_millis(10));
        ids.push(store.enqueue(sample_event(&format!("e{}", i))).await.unwrap());
    }

    assert_eq!(store.count().await, 3);
    let listed: Vec<_> = store.list_eligible(10).await.into_iter().map(|r| r.id).collect();
    assert_eq!(listed, ids[1..].to_vec());
}

#[test]
fn unopenable_path_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such-dir").join("db.sqlite3");
    let err = SqliteBackend::open(missing).unwrap_err();
    assert!(matches!(err, lastmile::StoreError::Unavailable(_)), "got {err:?}");
}
