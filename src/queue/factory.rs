use tracing::error;

use super::DataChangeMonitoredItemQueue;
use super::EventMonitoredItemQueue;
use super::InMemoryDataChangeQueue;
use super::InMemoryEventQueue;
use crate::QueueError;
use crate::Result;

/// Creates the queues of monitored items.
///
/// Supplied by the enclosing server; the queue handlers never instantiate a
/// queue themselves.
pub trait MonitoredItemQueueFactory: Send + Sync {
    /// # Errors
    /// `DurableNotSupported` if `is_durable` is requested from a factory
    /// without durability.
    fn create_data_change_queue(
        &self,
        is_durable: bool,
        monitored_item_id: u32,
    ) -> Result<Box<dyn DataChangeMonitoredItemQueue>>;

    /// # Errors
    /// `DurableNotSupported` if `is_durable` is requested from a factory
    /// without durability.
    fn create_event_queue(
        &self,
        is_durable: bool,
        monitored_item_id: u32,
    ) -> Result<Box<dyn EventMonitoredItemQueue>>;

    fn supports_durable_queues(&self) -> bool;
}

/// Factory for plain in-memory queues
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryQueueFactory;

impl InMemoryQueueFactory {
    fn reject_durable(monitored_item_id: u32) -> crate::Error {
        error!(
            monitored_item_id,
            "In-memory queue factory does not support durable queues, register a durable factory instead"
        );
        QueueError::DurableNotSupported { monitored_item_id }.into()
    }
}

impl MonitoredItemQueueFactory for InMemoryQueueFactory {
    fn create_data_change_queue(
        &self,
        is_durable: bool,
        monitored_item_id: u32,
    ) -> Result<Box<dyn DataChangeMonitoredItemQueue>> {
        if is_durable {
            return Err(Self::reject_durable(monitored_item_id));
        }
        Ok(Box::new(InMemoryDataChangeQueue::new(monitored_item_id)))
    }

    fn create_event_queue(
        &self,
        is_durable: bool,
        monitored_item_id: u32,
    ) -> Result<Box<dyn EventMonitoredItemQueue>> {
        if is_durable {
            return Err(Self::reject_durable(monitored_item_id));
        }
        Ok(Box::new(InMemoryEventQueue::new(monitored_item_id)))
    }

    fn supports_durable_queues(&self) -> bool {
        false
    }
}
