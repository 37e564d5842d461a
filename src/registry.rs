//! Named queue factories.
//!
//! The enclosing server builds one [`QueueFactoryRegistry`] at start-up and
//! picks the factory named by `queue.factory` in its configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::debug;
use tracing::info;

use crate::constants::DURABLE_QUEUE_FACTORY;
use crate::constants::IN_MEMORY_QUEUE_FACTORY;
use crate::DurableMonitoredItemQueueFactory;
use crate::InMemoryQueueFactory;
use crate::MonitoredItemQueueFactory;
use crate::QueueError;
use crate::QueueServiceConfig;
use crate::Result;

/// Builds a factory from the service configuration
pub type FactoryConstructor =
    Box<dyn Fn(&QueueServiceConfig) -> Result<Arc<dyn MonitoredItemQueueFactory>> + Send + Sync>;

/// Factory constructors keyed by name
#[derive(Default)]
pub struct QueueFactoryRegistry {
    constructors: BTreeMap<String, FactoryConstructor>,
}

impl std::fmt::Debug for QueueFactoryRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("QueueFactoryRegistry")
            .field("factories", &self.names())
            .finish()
    }
}

impl QueueFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `in_memory` factory and the `durable` factory,
    /// whose persist and restore tasks are spawned on `runtime`
    pub fn with_builtin_factories(runtime: Handle) -> Self {
        let mut registry = Self::new();
        registry.insert(IN_MEMORY_QUEUE_FACTORY, |_| Ok(Arc::new(InMemoryQueueFactory)));
        registry.insert(DURABLE_QUEUE_FACTORY, move |config| {
            Ok(Arc::new(DurableMonitoredItemQueueFactory::from_config(
                &config.persistence,
                runtime.clone(),
            )))
        });
        registry
    }

    /// # Errors
    /// `FactoryAlreadyRegistered` if `name` is taken.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        constructor: F,
    ) -> Result<()>
    where
        F: Fn(&QueueServiceConfig) -> Result<Arc<dyn MonitoredItemQueueFactory>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            return Err(QueueError::FactoryAlreadyRegistered(name).into());
        }

        debug!(factory = %name, "Queue factory registered");
        self.insert(name, constructor);
        Ok(())
    }

    fn insert<F>(
        &mut self,
        name: impl Into<String>,
        constructor: F,
    ) where
        F: Fn(&QueueServiceConfig) -> Result<Arc<dyn MonitoredItemQueueFactory>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// # Errors
    /// `UnknownFactory` if nothing is registered under `name`, or whatever the
    /// constructor fails with.
    pub fn build(
        &self,
        name: &str,
        config: &QueueServiceConfig,
    ) -> Result<Arc<dyn MonitoredItemQueueFactory>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| QueueError::UnknownFactory(name.to_string()))?;

        let factory = constructor(config)?;
        info!(
            factory = name,
            durable = factory.supports_durable_queues(),
            "Queue factory built"
        );
        Ok(factory)
    }

    /// Builds the factory named by `config.queue.factory`
    pub fn build_configured(
        &self,
        config: &QueueServiceConfig,
    ) -> Result<Arc<dyn MonitoredItemQueueFactory>> {
        self.build(&config.queue.factory, config)
    }
}
