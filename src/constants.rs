use std::time::Duration;

// -
// Queue limits

/// Number of most recent entries inspected when looking for a duplicate event
pub(crate) const DEFAULT_DUPLICATE_SCAN_LIMIT: usize = 1000;

/// Number of notifications grouped into one persistable batch
pub(crate) const DEFAULT_BATCH_SIZE: u32 = 1000;

// -
// Durable storage layout

/// Directory below the storage root holding offloaded batches
pub(crate) const BATCH_DIR: &str = "Batches";
/// Directory below the storage root holding persisted queues
pub(crate) const QUEUE_DIR: &str = "Queues";

pub(crate) const BATCH_FILE_SUFFIX: &str = "_batch.txt";
pub(crate) const QUEUE_FILE_SUFFIX: &str = "_queue.txt";
/// Staging suffix of a file that is being written
pub(crate) const TEMP_FILE_SUFFIX: &str = ".tmp";

pub(crate) const DEFAULT_STORAGE_ROOT: &str = "./durable_subscriptions";

// -
// Queue persistence

/// How long a queue snapshot waits for batches that are being restored
pub(crate) const QUEUE_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const QUEUE_SNAPSHOT_POLL_INTERVAL: Duration = Duration::from_millis(5);

// -
// Registry names

pub const IN_MEMORY_QUEUE_FACTORY: &str = "in_memory";
pub const DURABLE_QUEUE_FACTORY: &str = "durable";
