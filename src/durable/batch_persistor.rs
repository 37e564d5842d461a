//! Offloading of batches to durable storage.
//!
//! [`FileBatchPersistor`] runs every persist and restore as an independent
//! task on the runtime it was created with. Requests never block the caller:
//! they only take the batch's transition lock to flip its state and register
//! the batch in an in-flight map, then return.
//!
//! At most one persist and one restore is in flight per batch id. The in-flight
//! maps are the gate across batches (insert-if-absent), the transition lock is
//! the gate within one batch.

use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::BatchFile;
use super::BatchPathManager;
use super::BatchState;
use super::PersistableBatch;
use crate::utils::file_io;
use crate::BatchId;
use crate::PersistenceConfig;
use crate::Result;
use crate::StorageError;

/// Moves batches between memory and durable storage.
///
/// All operations are fire-and-forget or best-effort; failures are logged and
/// only ever affect the batch involved.
#[cfg_attr(test, automock)]
pub trait BatchPersistor: Send + Sync {
    /// Starts writing `batch` to storage unless it is already persisted,
    /// persisting or restoring.
    fn request_batch_persist(
        &self,
        batch: Arc<dyn PersistableBatch>,
    );

    /// Starts loading `batch` back from storage.
    ///
    /// If a persist of the batch is still in flight it is cancelled instead;
    /// the batch then stays resident.
    fn request_batch_restore(
        &self,
        batch: Arc<dyn PersistableBatch>,
    );

    /// Removes every batch file whose monitored item is not in `monitored_item_ids_to_keep`
    fn delete_batches(
        &self,
        monitored_item_ids_to_keep: &[u32],
    );

    /// Removes the file of one batch
    fn delete_batch(
        &self,
        monitored_item_id: u32,
        batch_id: BatchId,
    );
}

/// Counters of a [`FileBatchPersistor`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistorStats {
    pub persists_started: u64,
    pub persists_completed: u64,
    pub persists_cancelled: u64,
    pub persists_failed: u64,
    pub restores_started: u64,
    pub restores_completed: u64,
    pub restores_failed: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    persists_started: AtomicU64,
    persists_completed: AtomicU64,
    persists_cancelled: AtomicU64,
    persists_failed: AtomicU64,
    restores_started: AtomicU64,
    restores_completed: AtomicU64,
    restores_failed: AtomicU64,
}

impl StatsCounters {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PersistorStats {
        PersistorStats {
            persists_started: self.persists_started.load(Ordering::Relaxed),
            persists_completed: self.persists_completed.load(Ordering::Relaxed),
            persists_cancelled: self.persists_cancelled.load(Ordering::Relaxed),
            persists_failed: self.persists_failed.load(Ordering::Relaxed),
            restores_started: self.restores_started.load(Ordering::Relaxed),
            restores_completed: self.restores_completed.load(Ordering::Relaxed),
            restores_failed: self.restores_failed.load(Ordering::Relaxed),
        }
    }
}

enum PersistOutcome {
    Committed,
    Cancelled { written: bool },
}

struct PersistorInner {
    runtime: Handle,
    paths: BatchPathManager,
    to_persist: DashMap<BatchId, Arc<dyn PersistableBatch>>,
    to_restore: DashMap<BatchId, Arc<dyn PersistableBatch>>,
    stats: StatsCounters,
}

/// [`BatchPersistor`] writing one JSON file per batch below
/// `<storage_root>/Batches/`
#[derive(Clone)]
pub struct FileBatchPersistor {
    inner: Arc<PersistorInner>,
}

impl std::fmt::Debug for FileBatchPersistor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FileBatchPersistor")
            .field("storage_root", &self.inner.paths.storage_root())
            .field("in_flight_persists", &self.inner.to_persist.len())
            .field("in_flight_restores", &self.inner.to_restore.len())
            .finish_non_exhaustive()
    }
}

impl FileBatchPersistor {
    /// Background tasks are spawned on `runtime`
    pub fn new(
        storage_root: impl Into<PathBuf>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(PersistorInner {
                runtime,
                paths: BatchPathManager::new(storage_root.into()),
                to_persist: DashMap::new(),
                to_restore: DashMap::new(),
                stats: StatsCounters::default(),
            }),
        }
    }

    pub fn from_config(
        config: &PersistenceConfig,
        runtime: Handle,
    ) -> Self {
        Self::new(config.storage_root.clone(), runtime)
    }

    pub fn storage_root(&self) -> &Path {
        self.inner.paths.storage_root()
    }

    /// Location of the file a batch is persisted to
    pub fn batch_file(
        &self,
        monitored_item_id: u32,
        batch_id: BatchId,
    ) -> PathBuf {
        self.inner.paths.batch_file(monitored_item_id, batch_id)
    }

    pub fn stats(&self) -> PersistorStats {
        self.inner.stats.snapshot()
    }

    pub fn in_flight_persists(&self) -> usize {
        self.inner.to_persist.len()
    }

    pub fn in_flight_restores(&self) -> usize {
        self.inner.to_restore.len()
    }

    /// Persists `batch` on the calling task.
    ///
    /// Same transition rules as [`BatchPersistor::request_batch_persist`];
    /// returns once the batch left the `Persisting` state.
    pub async fn persist_batch(
        &self,
        batch: Arc<dyn PersistableBatch>,
    ) {
        if let Some(token) = self.inner.begin_persist(&batch) {
            self.inner.run_persist(batch, token).await;
        }
    }

    /// Restores `batch` on the calling task.
    ///
    /// Same transition rules as [`BatchPersistor::request_batch_restore`].
    pub async fn restore_batch(
        &self,
        batch: Arc<dyn PersistableBatch>,
    ) {
        if self.inner.begin_restore(&batch) {
            self.inner.run_restore(batch).await;
        }
    }
}

impl BatchPersistor for FileBatchPersistor {
    fn request_batch_persist(
        &self,
        batch: Arc<dyn PersistableBatch>,
    ) {
        let Some(token) = self.inner.begin_persist(&batch) else {
            return;
        };

        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            inner.run_persist(batch, token).await;
        });
    }

    fn request_batch_restore(
        &self,
        batch: Arc<dyn PersistableBatch>,
    ) {
        if !self.inner.begin_restore(&batch) {
            return;
        }

        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            inner.run_restore(batch).await;
        });
    }

    fn delete_batches(
        &self,
        monitored_item_ids_to_keep: &[u32],
    ) {
        let batch_dir = self.inner.paths.batch_dir();
        let files = match file_io::list_files(&batch_dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = ?batch_dir, "Failed to list batch files: {:?}", e);
                return;
            }
        };

        for path in files {
            let owner = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(BatchPathManager::parse_monitored_item_id);
            let Some(monitored_item_id) = owner else {
                trace!(?path, "Skipping foreign file in batch directory");
                continue;
            };
            if monitored_item_ids_to_keep.contains(&monitored_item_id) {
                continue;
            }

            match file_io::delete_file_sync(&path) {
                Ok(_) => debug!(monitored_item_id, ?path, "Deleted batch file"),
                Err(e) => warn!(monitored_item_id, ?path, "Failed to delete batch file: {:?}", e),
            }
        }
    }

    fn delete_batch(
        &self,
        monitored_item_id: u32,
        batch_id: BatchId,
    ) {
        let path = self.inner.paths.batch_file(monitored_item_id, batch_id);
        match file_io::delete_file_sync(&path) {
            Ok(true) => debug!(monitored_item_id, %batch_id, "Deleted batch file"),
            Ok(false) => trace!(monitored_item_id, %batch_id, "No batch file to delete"),
            Err(e) => warn!(monitored_item_id, %batch_id, "Failed to delete batch file: {:?}", e),
        }
    }
}

impl PersistorInner {
    /// Idle -> Persisting. Returns the token the persist task must observe.
    fn begin_persist(
        &self,
        batch: &Arc<dyn PersistableBatch>,
    ) -> Option<CancellationToken> {
        let control = batch.control();
        let mut token = control.lock();

        let state = control.state();
        if state != BatchState::Idle {
            trace!(batch_id = %control.id(), ?state, "Persist request ignored");
            return None;
        }

        match self.to_persist.entry(control.id()) {
            Entry::Occupied(_) => {
                trace!(batch_id = %control.id(), "Persist already queued");
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(batch.clone());
            }
        }

        let cancel = CancellationToken::new();
        *token = Some(cancel.clone());
        control.set_state(BatchState::Persisting);
        StatsCounters::incr(&self.stats.persists_started);

        debug!(
            monitored_item_id = control.monitored_item_id(),
            batch_id = %control.id(),
            "Batch persist requested"
        );
        Some(cancel)
    }

    /// Persisted -> Restoring, or cancels an in-flight persist.
    ///
    /// Returns true if a restore task must run.
    fn begin_restore(
        &self,
        batch: &Arc<dyn PersistableBatch>,
    ) -> bool {
        let control = batch.control();
        let token = control.lock();

        match control.state() {
            BatchState::Persisting => {
                if let Some(cancel) = token.as_ref() {
                    if !cancel.is_cancelled() {
                        cancel.cancel();
                        debug!(
                            monitored_item_id = control.monitored_item_id(),
                            batch_id = %control.id(),
                            "Restore requested while persisting, persist cancelled"
                        );
                    }
                }
                false
            }
            BatchState::Persisted => match self.to_restore.entry(control.id()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(batch.clone());
                    control.set_state(BatchState::Restoring);
                    StatsCounters::incr(&self.stats.restores_started);
                    debug!(
                        monitored_item_id = control.monitored_item_id(),
                        batch_id = %control.id(),
                        "Batch restore requested"
                    );
                    true
                }
            },
            state => {
                trace!(batch_id = %control.id(), ?state, "Restore request ignored");
                false
            }
        }
    }

    async fn run_persist(
        &self,
        batch: Arc<dyn PersistableBatch>,
        cancel: CancellationToken,
    ) {
        let control = batch.control();
        let monitored_item_id = control.monitored_item_id();
        let batch_id = control.id();
        let path = self.paths.batch_file(monitored_item_id, batch_id);

        match self.write_batch(batch.as_ref(), &path, &cancel).await {
            Ok(PersistOutcome::Committed) => {
                StatsCounters::incr(&self.stats.persists_completed);
                debug!(monitored_item_id, %batch_id, "Batch persisted");
            }
            Ok(PersistOutcome::Cancelled { written }) => {
                // the file goes before the batch is idle again, a new persist
                // would write to the same path
                if written {
                    if let Err(e) = file_io::delete_file(&path).await {
                        warn!(monitored_item_id, %batch_id, "Failed to delete cancelled batch file: {:?}", e);
                    }
                }
                self.settle_persist(control);
                StatsCounters::incr(&self.stats.persists_cancelled);
                debug!(monitored_item_id, %batch_id, written, "Batch persist cancelled");
            }
            Err(e) => {
                let _ = file_io::delete_file(&file_io::temp_path(&path)).await;
                self.settle_persist(control);
                StatsCounters::incr(&self.stats.persists_failed);
                warn!(
                    monitored_item_id,
                    %batch_id,
                    "Failed to persist batch, entries stay in memory: {:?}",
                    e
                );
            }
        }
    }

    async fn write_batch(
        &self,
        batch: &dyn PersistableBatch,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PersistOutcome> {
        let file: BatchFile = batch.snapshot();
        let bytes = serde_json::to_vec(&file).map_err(StorageError::from)?;

        if cancel.is_cancelled() {
            return Ok(PersistOutcome::Cancelled { written: false });
        }
        file_io::write_file_atomic(path, &bytes).await?;

        let control = batch.control();
        let mut token = control.lock();
        if cancel.is_cancelled() {
            return Ok(PersistOutcome::Cancelled { written: true });
        }
        batch.release_entries();
        token.take();
        self.to_persist.remove(&control.id());
        control.set_state(BatchState::Persisted);
        Ok(PersistOutcome::Committed)
    }

    /// Persisting -> Idle
    fn settle_persist(
        &self,
        control: &super::BatchControl,
    ) {
        let mut token = control.lock();
        token.take();
        self.to_persist.remove(&control.id());
        control.set_state(BatchState::Idle);
    }

    async fn run_restore(
        &self,
        batch: Arc<dyn PersistableBatch>,
    ) {
        let control = batch.control();
        let monitored_item_id = control.monitored_item_id();
        let batch_id = control.id();
        let path = self.paths.batch_file(monitored_item_id, batch_id);

        match self.read_batch(batch.as_ref(), &path).await {
            Ok(len) => {
                // delete before the batch is idle, a new persist would write
                // to the same path
                if let Err(e) = file_io::delete_file(&path).await {
                    warn!(monitored_item_id, %batch_id, "Failed to delete restored batch file: {:?}", e);
                }

                let _token = control.lock();
                self.to_restore.remove(&batch_id);
                control.set_state(BatchState::Idle);
                StatsCounters::incr(&self.stats.restores_completed);
                debug!(monitored_item_id, %batch_id, len, "Batch restored");
            }
            Err(e) => {
                let _token = control.lock();
                self.to_restore.remove(&batch_id);
                control.set_state(BatchState::RestoreFailed);
                StatsCounters::incr(&self.stats.restores_failed);
                error!(
                    monitored_item_id,
                    %batch_id,
                    ?path,
                    "Failed to restore batch, file kept for recovery: {:?}",
                    e
                );
            }
        }
    }

    /// Loads the batch file and installs its entries; returns the entry count
    async fn read_batch(
        &self,
        batch: &dyn PersistableBatch,
        path: &Path,
    ) -> Result<usize> {
        let bytes = file_io::read_file(path).await?;
        let file: BatchFile = serde_json::from_slice(&bytes).map_err(StorageError::from)?;

        let control = batch.control();
        if file.monitored_item_id != control.monitored_item_id() || file.batch_id != control.id() {
            return Err(StorageError::BatchMismatch {
                expected_item: control.monitored_item_id(),
                expected_batch: control.id(),
                found_item: file.monitored_item_id,
                found_batch: file.batch_id,
            }
            .into());
        }

        let len = file.payload.len();
        let _token = control.lock();
        batch.install_entries(file.payload)?;
        Ok(len)
    }
}
