//! Monitored Item Queue Error Hierarchy
//!
//! Defines the error types surfaced by the notification queues, the durable
//! batch persistence layer and the configuration loader.
//!
//! Only [`QueueError`] is ever returned from the enqueue/publish path. Storage
//! failures inside background persist/restore tasks are logged and isolated to
//! the batch involved.

use std::path::PathBuf;

use config::ConfigError;

use crate::BatchId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Queue capacity and policy violations
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Durable storage failures (file I/O, serialization)
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue is at capacity and discarding of old entries is not allowed
    #[error("Queue of monitored item {monitored_item_id} is full and no discarding of old values is allowed")]
    QueueFull { monitored_item_id: u32 },

    /// Enqueue attempted before a queue size was configured
    #[error("Cannot enqueue into queue of monitored item {monitored_item_id}: queue size not set")]
    QueueSizeNotSet { monitored_item_id: u32 },

    /// Operation requires at least one queued entry
    #[error("Queue of monitored item {monitored_item_id} is empty")]
    QueueEmpty { monitored_item_id: u32 },

    /// The addressed entry lives in a batch that is currently offloaded to disk
    #[error("Newest value of monitored item {monitored_item_id} is not resident in memory")]
    ValueNotResident { monitored_item_id: u32 },

    /// Durable queue requested from a factory without durability support
    #[error("Queue factory does not support durable queues (monitored item {monitored_item_id})")]
    DurableNotSupported { monitored_item_id: u32 },

    /// No factory registered under the requested name
    #[error("No queue factory registered under name '{0}'")]
    UnknownFactory(String),

    /// A factory with the same name is already registered
    #[error("Queue factory '{0}' is already registered")]
    FactoryAlreadyRegistered(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during batch/queue operations
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// I/O failure tied to a specific path
    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serialization failures for persisted data
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Persisted batch does not belong to the batch being restored
    #[error("Batch file {found_item}_{found_batch} does not match batch {expected_item}_{expected_batch}")]
    BatchMismatch {
        expected_item: u32,
        expected_batch: BatchId,
        found_item: u32,
        found_batch: BatchId,
    },

    /// Persisted payload carries a different notification kind than the target
    #[error("Expected {expected} entries but persisted payload holds {found} entries")]
    QueueKindMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl StorageError {
    pub(crate) fn at_path(
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        StorageError::PathError {
            path: path.into(),
            source,
        }
    }
}
