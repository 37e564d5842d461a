//! Queue factory with durable queues and queue-level persistence.
//!
//! Every durable queue created here stays tracked until its handle is dropped,
//! so a server shutting down can persist the queues of its durable
//! subscriptions and recreate them after a restart:
//!
//! ```text
//! shutdown:  persist_queues(ids) -> Queues/<id>_queue.txt, delete_batches(ids)
//! restart:   restore_*_queue(id) -> queue rebuilt, offloaded batches stay on
//!            disk and are restored on demand
//! ```

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::BatchPathManager;
use super::BatchPersistor;
use super::DurableDataChangeQueue;
use super::DurableEventQueue;
use super::FileBatchPersistor;
use super::StoredDataChangeQueue;
use super::StoredEventQueue;
use crate::constants::QUEUE_SNAPSHOT_POLL_INTERVAL;
use crate::constants::QUEUE_SNAPSHOT_TIMEOUT;
use crate::utils::file_io;
use crate::DataChangeEntry;
use crate::DataChangeMonitoredItemQueue;
use crate::DataValue;
use crate::EventFieldList;
use crate::EventMonitoredItemQueue;
use crate::InMemoryDataChangeQueue;
use crate::InMemoryEventQueue;
use crate::MonitoredItemQueueFactory;
use crate::PersistenceConfig;
use crate::Result;
use crate::ServiceResult;
use crate::StorageError;

/// Content of a queue file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "queue")]
enum StoredQueue {
    DataChange(StoredDataChangeQueue),
    Event(StoredEventQueue),
}

impl StoredQueue {
    fn kind(&self) -> &'static str {
        match self {
            StoredQueue::DataChange(_) => "data change",
            StoredQueue::Event(_) => "event",
        }
    }
}

enum Snapshot {
    Missing,
    Restoring,
    Taken(StoredQueue),
}

struct FactoryInner {
    persistor: Arc<dyn BatchPersistor>,
    paths: BatchPathManager,
    batch_size: usize,
    data_change_queues: DashMap<u32, Arc<Mutex<DurableDataChangeQueue>>>,
    event_queues: DashMap<u32, Arc<Mutex<DurableEventQueue>>>,
}

/// Durable queues tracked by the factory, keyed by monitored item id
trait TrackedQueue: Sized + Send + 'static {
    fn registry(factory: &FactoryInner) -> &DashMap<u32, Arc<Mutex<Self>>>;
}

impl TrackedQueue for DurableDataChangeQueue {
    fn registry(factory: &FactoryInner) -> &DashMap<u32, Arc<Mutex<Self>>> {
        &factory.data_change_queues
    }
}

impl TrackedQueue for DurableEventQueue {
    fn registry(factory: &FactoryInner) -> &DashMap<u32, Arc<Mutex<Self>>> {
        &factory.event_queues
    }
}

/// Handed out for every durable queue; untracks the queue when dropped
struct RegisteredQueue<Q: TrackedQueue> {
    monitored_item_id: u32,
    queue: Arc<Mutex<Q>>,
    factory: Arc<FactoryInner>,
}

impl<Q: TrackedQueue> RegisteredQueue<Q> {
    fn register(
        factory: &Arc<FactoryInner>,
        monitored_item_id: u32,
        queue: Q,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue));
        if Q::registry(factory)
            .insert(monitored_item_id, queue.clone())
            .is_some()
        {
            warn!(
                monitored_item_id,
                "Durable queue replaced an existing queue of the same monitored item"
            );
        }
        Self {
            monitored_item_id,
            queue,
            factory: factory.clone(),
        }
    }
}

impl<Q: TrackedQueue> Drop for RegisteredQueue<Q> {
    fn drop(&mut self) {
        Q::registry(&self.factory).remove_if(&self.monitored_item_id, |_, queue| {
            Arc::ptr_eq(queue, &self.queue)
        });
        trace!(monitored_item_id = self.monitored_item_id, "Durable queue untracked");
    }
}

impl DataChangeMonitoredItemQueue for RegisteredQueue<DurableDataChangeQueue> {
    fn monitored_item_id(&self) -> u32 {
        self.monitored_item_id
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn queue_size(&self) -> u32 {
        self.queue.lock().queue_size()
    }

    fn items_in_queue(&self) -> usize {
        self.queue.lock().items_in_queue()
    }

    fn reset_queue(
        &mut self,
        queue_size: u32,
        queue_errors: bool,
    ) {
        self.queue.lock().reset_queue(queue_size, queue_errors);
    }

    fn resize_queue(
        &mut self,
        queue_size: u32,
        queue_errors: bool,
        discard_oldest: bool,
    ) -> bool {
        self.queue
            .lock()
            .resize_queue(queue_size, queue_errors, discard_oldest)
    }

    fn enqueue(
        &mut self,
        value: DataValue,
        error: Option<ServiceResult>,
    ) -> Result<()> {
        self.queue.lock().enqueue(value, error)
    }

    fn dequeue(&mut self) -> Option<DataChangeEntry> {
        self.queue.lock().dequeue()
    }

    fn peek_oldest_value(&self) -> Option<DataValue> {
        self.queue.lock().peek_oldest_value()
    }

    fn peek_last_value(&self) -> Option<DataValue> {
        self.queue.lock().peek_last_value()
    }

    fn overwrite_last_value(
        &mut self,
        value: DataValue,
        error: Option<ServiceResult>,
    ) -> Result<()> {
        self.queue.lock().overwrite_last_value(value, error)
    }

    fn update_oldest_value(
        &mut self,
        update: &mut dyn FnMut(&mut DataValue),
    ) -> bool {
        self.queue.lock().update_oldest_value(update)
    }

    fn update_last_value(
        &mut self,
        update: &mut dyn FnMut(&mut DataValue),
    ) -> bool {
        self.queue.lock().update_last_value(update)
    }
}

impl EventMonitoredItemQueue for RegisteredQueue<DurableEventQueue> {
    fn monitored_item_id(&self) -> u32 {
        self.monitored_item_id
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn queue_size(&self) -> u32 {
        self.queue.lock().queue_size()
    }

    fn items_in_queue(&self) -> usize {
        self.queue.lock().items_in_queue()
    }

    fn set_queue_size(
        &mut self,
        queue_size: u32,
        discard_oldest: bool,
    ) {
        self.queue.lock().set_queue_size(queue_size, discard_oldest);
    }

    fn enqueue(
        &mut self,
        event: EventFieldList,
    ) -> Result<()> {
        self.queue.lock().enqueue(event)
    }

    fn dequeue(&mut self) -> Option<EventFieldList> {
        self.queue.lock().dequeue()
    }

    fn is_event_contained_in_queue(
        &self,
        matches: &dyn Fn(&EventFieldList) -> bool,
        limit: usize,
    ) -> bool {
        self.queue.lock().is_event_contained_in_queue(matches, limit)
    }
}

/// [`MonitoredItemQueueFactory`] creating batched durable queues on request
/// and plain in-memory queues otherwise
#[derive(Clone)]
pub struct DurableMonitoredItemQueueFactory {
    inner: Arc<FactoryInner>,
}

impl std::fmt::Debug for DurableMonitoredItemQueueFactory {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DurableMonitoredItemQueueFactory")
            .field("storage_root", &self.inner.paths.storage_root())
            .field("batch_size", &self.inner.batch_size)
            .field("data_change_queues", &self.inner.data_change_queues.len())
            .field("event_queues", &self.inner.event_queues.len())
            .finish_non_exhaustive()
    }
}

impl DurableMonitoredItemQueueFactory {
    pub fn new(
        persistor: Arc<dyn BatchPersistor>,
        storage_root: impl Into<PathBuf>,
        batch_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                persistor,
                paths: BatchPathManager::new(storage_root.into()),
                batch_size,
                data_change_queues: DashMap::new(),
                event_queues: DashMap::new(),
            }),
        }
    }

    /// Builds the factory with a [`FileBatchPersistor`] spawning on `runtime`
    pub fn from_config(
        config: &PersistenceConfig,
        runtime: Handle,
    ) -> Self {
        let persistor = Arc::new(FileBatchPersistor::from_config(config, runtime));
        Self::new(persistor, config.storage_root.clone(), config.batch_size as usize)
    }

    pub fn storage_root(&self) -> &Path {
        self.inner.paths.storage_root()
    }

    pub fn persistor(&self) -> Arc<dyn BatchPersistor> {
        self.inner.persistor.clone()
    }

    /// Number of live durable queues
    pub fn tracked_queues(&self) -> usize {
        self.inner.data_change_queues.len() + self.inner.event_queues.len()
    }

    /// Writes the listed durable queues to storage.
    ///
    /// Unknown ids and failed writes are logged and skipped. Batch files of
    /// monitored items not in `monitored_item_ids` are removed afterwards.
    /// Returns the number of queues written.
    ///
    /// The written queues must not be dequeued from afterwards: a restore
    /// started later removes batch files the stored queue refers to.
    pub async fn persist_queues(
        &self,
        monitored_item_ids: &[u32],
    ) -> usize {
        let mut persisted = 0;
        for &monitored_item_id in monitored_item_ids {
            let Some(stored) = self.snapshot_queue(monitored_item_id).await else {
                warn!(monitored_item_id, "No durable queue to persist");
                continue;
            };

            match self.write_queue(monitored_item_id, &stored).await {
                Ok(()) => {
                    persisted += 1;
                    debug!(monitored_item_id, kind = stored.kind(), "Queue persisted");
                }
                Err(e) => warn!(monitored_item_id, "Failed to persist queue: {:?}", e),
            }
        }

        self.inner.persistor.delete_batches(monitored_item_ids);
        info!(persisted, requested = monitored_item_ids.len(), "Durable queues persisted");
        persisted
    }

    /// Recreates a persisted data-change queue.
    ///
    /// Returns `None` if nothing was stored for the monitored item or the
    /// stored queue cannot be read.
    pub async fn restore_data_change_queue(
        &self,
        monitored_item_id: u32,
    ) -> Option<Box<dyn DataChangeMonitoredItemQueue>> {
        let StoredQueue::DataChange(stored) = self.take_queue(monitored_item_id, "data change").await? else {
            return None;
        };

        let queue = DurableDataChangeQueue::from_stored(stored, self.inner.batch_size, self.inner.persistor.clone());
        debug!(
            monitored_item_id,
            items = queue.items_in_queue(),
            "Data change queue restored"
        );
        Some(Box::new(RegisteredQueue::register(&self.inner, monitored_item_id, queue)))
    }

    /// Recreates a persisted event queue.
    ///
    /// Returns `None` if nothing was stored for the monitored item or the
    /// stored queue cannot be read.
    pub async fn restore_event_queue(
        &self,
        monitored_item_id: u32,
    ) -> Option<Box<dyn EventMonitoredItemQueue>> {
        let StoredQueue::Event(stored) = self.take_queue(monitored_item_id, "event").await? else {
            return None;
        };

        let queue = DurableEventQueue::from_stored(stored, self.inner.batch_size, self.inner.persistor.clone());
        debug!(
            monitored_item_id,
            items = queue.items_in_queue(),
            "Event queue restored"
        );
        Some(Box::new(RegisteredQueue::register(&self.inner, monitored_item_id, queue)))
    }

    /// Removes all queue files and the batch files of monitored items not in
    /// `monitored_item_ids_to_keep`
    pub async fn clean_stored_queues(
        &self,
        monitored_item_ids_to_keep: &[u32],
    ) {
        let queue_dir = self.inner.paths.queue_dir();
        if let Err(e) = file_io::delete_dir_all(&queue_dir).await {
            warn!(dir = ?queue_dir, "Failed to delete stored queues: {:?}", e);
        }
        self.inner.persistor.delete_batches(monitored_item_ids_to_keep);
    }

    /// Takes the stored form of a tracked queue once none of its batches is
    /// being restored. A restoring batch is about to lose its file, so its
    /// entries have to be stored inline.
    async fn snapshot_queue(
        &self,
        monitored_item_id: u32,
    ) -> Option<StoredQueue> {
        let deadline = Instant::now() + QUEUE_SNAPSHOT_TIMEOUT;
        loop {
            match self.try_snapshot(monitored_item_id, Instant::now() >= deadline) {
                Snapshot::Missing => return None,
                Snapshot::Taken(stored) => return Some(stored),
                Snapshot::Restoring => tokio::time::sleep(QUEUE_SNAPSHOT_POLL_INTERVAL).await,
            }
        }
    }

    fn try_snapshot(
        &self,
        monitored_item_id: u32,
        timed_out: bool,
    ) -> Snapshot {
        if let Some(queue) = self.inner.data_change_queues.get(&monitored_item_id) {
            let queue = queue.lock();
            if must_wait(monitored_item_id, queue.is_restoring(), timed_out) {
                return Snapshot::Restoring;
            }
            return Snapshot::Taken(StoredQueue::DataChange(queue.to_stored()));
        }
        if let Some(queue) = self.inner.event_queues.get(&monitored_item_id) {
            let queue = queue.lock();
            if must_wait(monitored_item_id, queue.is_restoring(), timed_out) {
                return Snapshot::Restoring;
            }
            return Snapshot::Taken(StoredQueue::Event(queue.to_stored()));
        }
        Snapshot::Missing
    }

    async fn write_queue(
        &self,
        monitored_item_id: u32,
        stored: &StoredQueue,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(stored).map_err(StorageError::from)?;
        file_io::write_file_atomic(&self.inner.paths.queue_file(monitored_item_id), &bytes).await
    }

    /// Reads a queue file of the expected kind and removes it
    async fn take_queue(
        &self,
        monitored_item_id: u32,
        expected: &'static str,
    ) -> Option<StoredQueue> {
        let path = self.inner.paths.queue_file(monitored_item_id);
        let stored = match self.read_queue(&path).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                trace!(monitored_item_id, "No stored queue");
                return None;
            }
            Err(e) => {
                error!(monitored_item_id, ?path, "Failed to read stored queue: {:?}", e);
                return None;
            }
        };

        if stored.kind() != expected {
            error!(
                monitored_item_id,
                expected,
                found = stored.kind(),
                "Stored queue holds another notification kind"
            );
            return None;
        }

        if let Err(e) = file_io::delete_file(&path).await {
            warn!(monitored_item_id, "Failed to delete restored queue file: {:?}", e);
        }
        Some(stored)
    }

    async fn read_queue(
        &self,
        path: &Path,
    ) -> Result<Option<StoredQueue>> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| StorageError::at_path(path, e))?;
        if !exists {
            return Ok(None);
        }

        let bytes = file_io::read_file(path).await?;
        let stored = serde_json::from_slice(&bytes).map_err(StorageError::from)?;
        Ok(Some(stored))
    }
}

fn must_wait(
    monitored_item_id: u32,
    restoring: bool,
    timed_out: bool,
) -> bool {
    if restoring && timed_out {
        warn!(
            monitored_item_id,
            "Restore still running, stored queue may refer to a deleted batch file"
        );
    }
    restoring && !timed_out
}

impl MonitoredItemQueueFactory for DurableMonitoredItemQueueFactory {
    fn create_data_change_queue(
        &self,
        is_durable: bool,
        monitored_item_id: u32,
    ) -> Result<Box<dyn DataChangeMonitoredItemQueue>> {
        if !is_durable {
            return Ok(Box::new(InMemoryDataChangeQueue::new(monitored_item_id)));
        }

        let queue = DurableDataChangeQueue::new(monitored_item_id, self.inner.batch_size, self.inner.persistor.clone());
        Ok(Box::new(RegisteredQueue::register(&self.inner, monitored_item_id, queue)))
    }

    fn create_event_queue(
        &self,
        is_durable: bool,
        monitored_item_id: u32,
    ) -> Result<Box<dyn EventMonitoredItemQueue>> {
        if !is_durable {
            return Ok(Box::new(InMemoryEventQueue::new(monitored_item_id)));
        }

        let queue = DurableEventQueue::new(monitored_item_id, self.inner.batch_size, self.inner.persistor.clone());
        Ok(Box::new(RegisteredQueue::register(&self.inner, monitored_item_id, queue)))
    }

    fn supports_durable_queues(&self) -> bool {
        true
    }
}
