use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;

use super::BatchPersistor;
use super::BatchedQueue;
use super::StoredBacklog;
use crate::EventFieldList;
use crate::EventMonitoredItemQueue;
use crate::QueueError;
use crate::Result;

/// Event queue whose backlog is offloaded to storage in batches
#[derive(Debug)]
pub struct DurableEventQueue {
    monitored_item_id: u32,
    queue_size: u32,
    backlog: BatchedQueue<EventFieldList>,
}

/// Queue-file form of a [`DurableEventQueue`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredEventQueue {
    pub(crate) monitored_item_id: u32,
    pub(crate) queue_size: u32,
    pub(crate) backlog: StoredBacklog<EventFieldList>,
}

impl DurableEventQueue {
    pub fn new(
        monitored_item_id: u32,
        batch_size: usize,
        persistor: Arc<dyn BatchPersistor>,
    ) -> Self {
        Self {
            monitored_item_id,
            queue_size: 0,
            backlog: BatchedQueue::new(monitored_item_id, batch_size, persistor),
        }
    }

    pub(crate) fn is_restoring(&self) -> bool {
        self.backlog.is_restoring()
    }

    pub(crate) fn to_stored(&self) -> StoredEventQueue {
        StoredEventQueue {
            monitored_item_id: self.monitored_item_id,
            queue_size: self.queue_size,
            backlog: self.backlog.to_stored(),
        }
    }

    pub(crate) fn from_stored(
        stored: StoredEventQueue,
        batch_size: usize,
        persistor: Arc<dyn BatchPersistor>,
    ) -> Self {
        Self {
            monitored_item_id: stored.monitored_item_id,
            queue_size: stored.queue_size,
            backlog: BatchedQueue::from_stored(stored.monitored_item_id, batch_size, persistor, stored.backlog),
        }
    }

    #[cfg(test)]
    pub(crate) fn backlog(&self) -> &BatchedQueue<EventFieldList> {
        &self.backlog
    }
}

impl EventMonitoredItemQueue for DurableEventQueue {
    fn monitored_item_id(&self) -> u32 {
        self.monitored_item_id
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn queue_size(&self) -> u32 {
        self.queue_size
    }

    fn items_in_queue(&self) -> usize {
        self.backlog.len()
    }

    fn set_queue_size(
        &mut self,
        queue_size: u32,
        discard_oldest: bool,
    ) {
        self.queue_size = queue_size;
        if !discard_oldest {
            return;
        }

        let excess = self.backlog.len().saturating_sub(queue_size as usize);
        for _ in 0..excess {
            self.backlog.discard_oldest();
        }
        if excess > 0 {
            debug!(
                monitored_item_id = self.monitored_item_id,
                excess, "Discarded oldest events after resize"
            );
        }
    }

    fn enqueue(
        &mut self,
        event: EventFieldList,
    ) -> Result<()> {
        if self.queue_size == 0 {
            error!(
                monitored_item_id = self.monitored_item_id,
                "Cannot enqueue event, queue size not set"
            );
            return Err(QueueError::QueueSizeNotSet {
                monitored_item_id: self.monitored_item_id,
            }
            .into());
        }

        if self.backlog.len() >= self.queue_size as usize {
            self.backlog.discard_oldest();
        }
        self.backlog.push(event);
        Ok(())
    }

    fn dequeue(&mut self) -> Option<EventFieldList> {
        self.backlog.pop()
    }

    fn is_event_contained_in_queue(
        &self,
        matches: &dyn Fn(&EventFieldList) -> bool,
        limit: usize,
    ) -> bool {
        self.backlog.any_recent(matches, limit)
    }
}
