use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::constants::DEFAULT_BATCH_SIZE;
use crate::constants::DEFAULT_STORAGE_ROOT;
use crate::Error;
use crate::Result;

/// Durable storage settings
///
/// ```toml
/// [persistence]
/// storage_root = "./durable_subscriptions"
/// batch_size = 1000
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PersistenceConfig {
    /// Root directory holding the `Batches/` and `Queues/` folders
    ///
    /// Default: `./durable_subscriptions`
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Number of notifications grouped into one batch of a durable queue
    ///
    /// A batch is the unit that is offloaded to and restored from storage.
    /// Must be at least 2 so a half-drained batch can trigger the prefetch of
    /// the next one.
    ///
    /// Default: 1000
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_ROOT)
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            batch_size: default_batch_size(),
        }
    }
}

impl PersistenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size < 2 {
            return Err(Error::Config(ConfigError::Message(format!(
                "persistence batch_size must be at least 2, got {}",
                self.batch_size
            ))));
        }

        validate_directory(&self.storage_root, "storage_root")
    }
}
