use std::path::Path;
use std::path::PathBuf;

use crate::constants::BATCH_DIR;
use crate::constants::BATCH_FILE_SUFFIX;
use crate::constants::QUEUE_DIR;
use crate::constants::QUEUE_FILE_SUFFIX;
use crate::constants::TEMP_FILE_SUFFIX;
use crate::BatchId;

/// Centralized manager for the naming of durable files.
///
/// Layout below the storage root:
/// - `Batches/<monitored_item_id>_<batch_id>_batch.txt`
/// - `Queues/<monitored_item_id>_queue.txt`
///
/// The monitored item id always leads the file name so cleanup can select
/// files by owner without decoding them.
#[derive(Debug, Clone)]
pub(crate) struct BatchPathManager {
    storage_root: PathBuf,
}

impl BatchPathManager {
    pub(crate) fn new(storage_root: PathBuf) -> Self {
        Self { storage_root }
    }

    pub(crate) fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub(crate) fn batch_dir(&self) -> PathBuf {
        self.storage_root.join(BATCH_DIR)
    }

    pub(crate) fn queue_dir(&self) -> PathBuf {
        self.storage_root.join(QUEUE_DIR)
    }

    pub(crate) fn batch_file(
        &self,
        monitored_item_id: u32,
        batch_id: BatchId,
    ) -> PathBuf {
        self.batch_dir()
            .join(format!("{monitored_item_id}_{batch_id}{BATCH_FILE_SUFFIX}"))
    }

    pub(crate) fn queue_file(
        &self,
        monitored_item_id: u32,
    ) -> PathBuf {
        self.queue_dir()
            .join(format!("{monitored_item_id}{QUEUE_FILE_SUFFIX}"))
    }

    /// Extracts the owning monitored item id from a batch or queue file name,
    /// including files left behind by an interrupted write
    pub(crate) fn parse_monitored_item_id(filename: &str) -> Option<u32> {
        let filename = filename.strip_suffix(TEMP_FILE_SUFFIX).unwrap_or(filename);
        let stem = filename
            .strip_suffix(BATCH_FILE_SUFFIX)
            .or_else(|| filename.strip_suffix(QUEUE_FILE_SUFFIX))?;
        stem.split('_').next()?.parse().ok()
    }
}
