use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_DUPLICATE_SCAN_LIMIT;
use crate::constants::DURABLE_QUEUE_FACTORY;
use crate::Error;
use crate::Result;

/// Queue construction settings
///
/// ```toml
/// [queue]
/// factory = "durable"
/// duplicate_scan_limit = 1000
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueConfig {
    /// Name of the registered queue factory to build at start-up
    ///
    /// Default: `durable`
    #[serde(default = "default_factory")]
    pub factory: String,

    /// How many of the most recent events are checked when suppressing
    /// duplicate events
    ///
    /// Default: 1000
    #[serde(default = "default_duplicate_scan_limit")]
    pub duplicate_scan_limit: usize,
}

fn default_factory() -> String {
    DURABLE_QUEUE_FACTORY.to_string()
}

fn default_duplicate_scan_limit() -> usize {
    DEFAULT_DUPLICATE_SCAN_LIMIT
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            factory: default_factory(),
            duplicate_scan_limit: default_duplicate_scan_limit(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.factory.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "queue factory name cannot be empty".to_string(),
            )));
        }

        if self.duplicate_scan_limit == 0 {
            return Err(Error::Config(ConfigError::Message(
                "queue duplicate_scan_limit must be greater than 0".to_string(),
            )));
        }

        Ok(())
    }
}
