//! Helpers shared by the unit tests
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::BatchFile;
use crate::BatchId;
use crate::BatchPersistor;
use crate::BatchState;
use crate::DataValue;
use crate::EventFieldList;
use crate::MockBatchPersistor;
use crate::PersistableBatch;
use crate::Variant;

pub(crate) fn data_value(i: i32) -> DataValue {
    DataValue::new(i)
}

/// Event whose first field carries `i`
pub(crate) fn event(i: u32) -> EventFieldList {
    EventFieldList::new(1, vec![Variant::UInt32(i), format!("event-{i}").into()])
}

pub(crate) fn event_ids(events: &[EventFieldList]) -> Vec<u32> {
    events
        .iter()
        .map(|e| match e.event_fields.first() {
            Some(Variant::UInt32(id)) => *id,
            other => panic!("unexpected first event field {other:?}"),
        })
        .collect()
}

/// Polls `condition` until it holds, yielding to spawned tasks in between
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

type Requests = Arc<Mutex<Vec<Arc<dyn PersistableBatch>>>>;

/// Captures the requests a durable queue sends to its persistor
#[derive(Default)]
pub(crate) struct Recorder {
    pub(crate) persists: Requests,
    pub(crate) restores: Requests,
    pub(crate) deleted: Arc<Mutex<Vec<(u32, BatchId)>>>,
}

impl Recorder {
    pub(crate) fn persistor(&self) -> Arc<dyn BatchPersistor> {
        let mut mock = self.mock();
        mock.expect_delete_batches().never();
        Arc::new(mock)
    }

    /// Like [`persistor`](Self::persistor), also accepting batch file cleanup
    pub(crate) fn cleaning_persistor(&self) -> Arc<dyn BatchPersistor> {
        let mut mock = self.mock();
        mock.expect_delete_batches().returning(|_| ());
        Arc::new(mock)
    }

    fn mock(&self) -> MockBatchPersistor {
        let mut mock = MockBatchPersistor::new();
        let persists = self.persists.clone();
        mock.expect_request_batch_persist()
            .returning(move |batch| persists.lock().push(batch));
        let restores = self.restores.clone();
        mock.expect_request_batch_restore()
            .returning(move |batch| restores.lock().push(batch));
        let deleted = self.deleted.clone();
        mock.expect_delete_batch()
            .returning(move |monitored_item_id, batch_id| deleted.lock().push((monitored_item_id, batch_id)));
        mock
    }

    pub(crate) fn persist_request(
        &self,
        index: usize,
    ) -> Arc<dyn PersistableBatch> {
        self.persists.lock()[index].clone()
    }

    pub(crate) fn restore_ids(&self) -> Vec<BatchId> {
        self.restores.lock().iter().map(|b| b.control().id()).collect()
    }
}

/// Does what a persistor would do once the batch file is written
pub(crate) fn complete_persist(batch: &Arc<dyn PersistableBatch>) -> BatchFile {
    let file = batch.snapshot();
    let _token = batch.control().lock();
    batch.release_entries();
    batch.control().set_state(BatchState::Persisted);
    file
}

/// Does what a persistor does when it starts reading a batch back
pub(crate) fn begin_restore(batch: &Arc<dyn PersistableBatch>) {
    let _token = batch.control().lock();
    batch.control().set_state(BatchState::Restoring);
}

pub(crate) fn complete_restore(
    batch: &Arc<dyn PersistableBatch>,
    file: BatchFile,
) {
    let _token = batch.control().lock();
    batch.install_entries(file.payload).unwrap();
    batch.control().set_state(BatchState::Idle);
}

pub(crate) fn fail_restore(batch: &Arc<dyn PersistableBatch>) {
    let _token = batch.control().lock();
    batch.control().set_state(BatchState::RestoreFailed);
}
