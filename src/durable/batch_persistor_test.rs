use std::sync::Arc;

use tokio::runtime::Handle;
use tracing_test::traced_test;
use uuid::Uuid;

use super::*;
use crate::test_utils::data_value;
use crate::test_utils::event;
use crate::test_utils::wait_until;
use crate::DataChangeEntry;
use crate::EventFieldList;
use crate::ServiceResult;
use crate::StatusCode;

struct TestContext {
    _dir: tempfile::TempDir,
    persistor: FileBatchPersistor,
}

fn setup() -> TestContext {
    let dir = tempfile::tempdir().unwrap();
    let persistor = FileBatchPersistor::new(dir.path(), Handle::current());
    TestContext { _dir: dir, persistor }
}

fn data_batch(
    monitored_item_id: u32,
    values: std::ops::RangeInclusive<i32>,
) -> Arc<Batch<DataChangeEntry>> {
    let entries = values
        .map(|i| {
            let error = (i % 2 == 0).then(|| ServiceResult::new(StatusCode::BAD_NO_COMMUNICATION));
            DataChangeEntry::new(data_value(i), error)
        })
        .collect();
    Arc::new(Batch::resident(monitored_item_id, Uuid::new_v4(), entries))
}

#[tokio::test]
async fn persist_then_restore_round_trips_entries() {
    let ctx = setup();
    let batch = data_batch(5, 1..=4);
    let original = batch.entries();
    let path = ctx.persistor.batch_file(5, batch.id());

    ctx.persistor.persist_batch(batch.clone()).await;

    assert_eq!(batch.state(), BatchState::Persisted);
    assert!(!batch.is_resident());
    assert!(batch.entries().is_empty());
    assert_eq!(batch.len(), 4);
    assert!(path.exists());

    ctx.persistor.restore_batch(batch.clone()).await;

    assert_eq!(batch.state(), BatchState::Idle);
    assert_eq!(batch.entries(), original);
    assert!(!path.exists());
    assert_eq!(ctx.persistor.in_flight_persists(), 0);
    assert_eq!(ctx.persistor.in_flight_restores(), 0);

    let stats = ctx.persistor.stats();
    assert_eq!(stats.persists_completed, 1);
    assert_eq!(stats.restores_completed, 1);
}

#[tokio::test]
async fn requests_run_in_background() {
    let ctx = setup();
    let batch = Arc::new(Batch::resident(8, Uuid::new_v4(), vec![event(1), event(2)]));

    ctx.persistor.request_batch_persist(batch.clone());

    assert_eq!(batch.state(), BatchState::Persisting);
    assert_eq!(ctx.persistor.in_flight_persists(), 1);
    wait_until(|| batch.state() == BatchState::Persisted).await;
    assert_eq!(ctx.persistor.in_flight_persists(), 0);

    ctx.persistor.request_batch_restore(batch.clone());

    assert_eq!(batch.state(), BatchState::Restoring);
    wait_until(|| batch.state() == BatchState::Idle).await;
    assert_eq!(batch.entries(), vec![event(1), event(2)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_persist_requests_write_once() {
    let ctx = setup();
    let batch = data_batch(3, 1..=100);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let persistor = ctx.persistor.clone();
        let batch = batch.clone();
        tasks.push(tokio::spawn(async move {
            persistor.request_batch_persist(batch);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    wait_until(|| batch.state() == BatchState::Persisted).await;
    let stats = ctx.persistor.stats();
    assert_eq!(stats.persists_started, 1);
    assert_eq!(stats.persists_completed, 1);
    assert_eq!(ctx.persistor.in_flight_persists(), 0);
}

#[tokio::test]
async fn restore_request_cancels_persist_in_flight() {
    let ctx = setup();
    let batch = data_batch(4, 1..=3);
    let original = batch.entries();
    let path = ctx.persistor.batch_file(4, batch.id());

    // the spawned persist cannot start before this task yields
    ctx.persistor.request_batch_persist(batch.clone());
    ctx.persistor.request_batch_restore(batch.clone());

    assert_eq!(batch.state(), BatchState::Persisting);
    assert!(batch.is_resident());

    wait_until(|| batch.state() == BatchState::Idle).await;
    assert!(!path.exists());
    assert_eq!(batch.entries(), original);

    let stats = ctx.persistor.stats();
    assert_eq!(stats.persists_cancelled, 1);
    assert_eq!(stats.persists_completed, 0);
    assert_eq!(stats.restores_started, 0);
    assert_eq!(ctx.persistor.in_flight_persists(), 0);
}

#[tokio::test]
async fn cancelled_batch_can_be_persisted_again() {
    let ctx = setup();
    let batch = data_batch(4, 1..=3);

    ctx.persistor.request_batch_persist(batch.clone());
    ctx.persistor.request_batch_restore(batch.clone());
    wait_until(|| batch.state() == BatchState::Idle).await;

    ctx.persistor.persist_batch(batch.clone()).await;

    assert_eq!(batch.state(), BatchState::Persisted);
    assert!(ctx.persistor.batch_file(4, batch.id()).exists());
}

#[tokio::test]
async fn requests_outside_their_source_state_are_ignored() {
    let ctx = setup();
    let offloaded: Arc<Batch<EventFieldList>> = Arc::new(Batch::offloaded(2, Uuid::new_v4(), 10));
    let resident = Arc::new(Batch::resident(2, Uuid::new_v4(), vec![event(1)]));

    ctx.persistor.request_batch_persist(offloaded.clone());
    ctx.persistor.request_batch_restore(resident.clone());

    assert_eq!(offloaded.state(), BatchState::Persisted);
    assert_eq!(resident.state(), BatchState::Idle);
    assert_eq!(ctx.persistor.stats(), PersistorStats::default());
}

#[tokio::test]
#[traced_test]
async fn corrupt_batch_file_fails_restore_and_is_kept() {
    let ctx = setup();
    let batch = data_batch(6, 1..=2);
    ctx.persistor.persist_batch(batch.clone()).await;
    let path = ctx.persistor.batch_file(6, batch.id());
    std::fs::write(&path, b"{ not json").unwrap();

    ctx.persistor.restore_batch(batch.clone()).await;

    assert_eq!(batch.state(), BatchState::RestoreFailed);
    assert!(path.exists());
    assert_eq!(ctx.persistor.stats().restores_failed, 1);
    assert_eq!(ctx.persistor.in_flight_restores(), 0);
    assert!(logs_contain("Failed to restore batch"));
}

#[tokio::test]
async fn restore_rejects_file_of_another_batch() {
    let ctx = setup();
    let source = data_batch(6, 1..=2);
    ctx.persistor.persist_batch(source.clone()).await;

    let target: Arc<Batch<DataChangeEntry>> = Arc::new(Batch::offloaded(6, Uuid::new_v4(), 2));
    std::fs::copy(
        ctx.persistor.batch_file(6, source.id()),
        ctx.persistor.batch_file(6, target.id()),
    )
    .unwrap();

    ctx.persistor.restore_batch(target.clone()).await;

    assert_eq!(target.state(), BatchState::RestoreFailed);
    assert!(target.entries().is_empty());
}

#[tokio::test]
async fn restore_rejects_other_notification_kind() {
    let ctx = setup();
    let source = data_batch(6, 1..=2);
    ctx.persistor.persist_batch(source.clone()).await;

    let target: Arc<Batch<EventFieldList>> = Arc::new(Batch::offloaded(6, source.id(), 2));
    ctx.persistor.restore_batch(target.clone()).await;

    assert_eq!(target.state(), BatchState::RestoreFailed);
    assert!(ctx.persistor.batch_file(6, source.id()).exists());
}

#[tokio::test]
async fn delete_batches_keeps_listed_monitored_items() {
    let ctx = setup();
    let batches: Vec<_> = (1..=3).map(|id| data_batch(id, 1..=2)).collect();
    for batch in &batches {
        ctx.persistor.persist_batch(batch.clone()).await;
    }
    let foreign = ctx.persistor.storage_root().join("Batches").join("notes.txt");
    std::fs::write(&foreign, b"keep me").unwrap();

    ctx.persistor.delete_batches(&[2]);

    assert!(!ctx.persistor.batch_file(1, batches[0].id()).exists());
    assert!(ctx.persistor.batch_file(2, batches[1].id()).exists());
    assert!(!ctx.persistor.batch_file(3, batches[2].id()).exists());
    assert!(foreign.exists());
}

#[tokio::test]
async fn delete_batch_removes_only_the_named_file() {
    let ctx = setup();
    let first = data_batch(9, 1..=2);
    let second = data_batch(9, 3..=4);
    ctx.persistor.persist_batch(first.clone()).await;
    ctx.persistor.persist_batch(second.clone()).await;

    ctx.persistor.delete_batch(9, first.id());
    ctx.persistor.delete_batch(9, first.id());

    assert!(!ctx.persistor.batch_file(9, first.id()).exists());
    assert!(ctx.persistor.batch_file(9, second.id()).exists());
}

#[test]
fn batch_file_is_self_describing() {
    let file = BatchFile {
        monitored_item_id: 1,
        batch_id: Uuid::nil(),
        payload: BatchEntries::Event(vec![event(7)]),
    };

    let json: serde_json::Value = serde_json::to_value(&file).unwrap();

    assert_eq!(json["payload"]["kind"], "Event");
    assert_eq!(
        json["payload"]["entries"][0]["event_fields"][0],
        serde_json::json!({"type": "UInt32", "value": 7})
    );
}
