use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tracing::error;
use tracing::warn;

use super::BatchPersistor;
use super::BatchedQueue;
use super::StoredBacklog;
use crate::DataChangeEntry;
use crate::DataChangeMonitoredItemQueue;
use crate::DataValue;
use crate::QueueError;
use crate::Result;
use crate::ServiceResult;

/// Data-change queue whose backlog is offloaded to storage in batches
#[derive(Debug)]
pub struct DurableDataChangeQueue {
    monitored_item_id: u32,
    queue_size: u32,
    queue_errors: bool,
    backlog: BatchedQueue<DataChangeEntry>,
}

/// Queue-file form of a [`DurableDataChangeQueue`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredDataChangeQueue {
    pub(crate) monitored_item_id: u32,
    pub(crate) queue_size: u32,
    pub(crate) queue_errors: bool,
    pub(crate) backlog: StoredBacklog<DataChangeEntry>,
}

impl DurableDataChangeQueue {
    pub fn new(
        monitored_item_id: u32,
        batch_size: usize,
        persistor: Arc<dyn BatchPersistor>,
    ) -> Self {
        Self {
            monitored_item_id,
            queue_size: 0,
            queue_errors: false,
            backlog: BatchedQueue::new(monitored_item_id, batch_size, persistor),
        }
    }

    pub(crate) fn is_restoring(&self) -> bool {
        self.backlog.is_restoring()
    }

    pub(crate) fn to_stored(&self) -> StoredDataChangeQueue {
        StoredDataChangeQueue {
            monitored_item_id: self.monitored_item_id,
            queue_size: self.queue_size,
            queue_errors: self.queue_errors,
            backlog: self.backlog.to_stored(),
        }
    }

    pub(crate) fn from_stored(
        stored: StoredDataChangeQueue,
        batch_size: usize,
        persistor: Arc<dyn BatchPersistor>,
    ) -> Self {
        Self {
            monitored_item_id: stored.monitored_item_id,
            queue_size: stored.queue_size,
            queue_errors: stored.queue_errors,
            backlog: BatchedQueue::from_stored(stored.monitored_item_id, batch_size, persistor, stored.backlog),
        }
    }

    #[cfg(test)]
    pub(crate) fn backlog(&self) -> &BatchedQueue<DataChangeEntry> {
        &self.backlog
    }
}

impl DataChangeMonitoredItemQueue for DurableDataChangeQueue {
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

    fn reset_queue(
        &mut self,
        queue_size: u32,
        queue_errors: bool,
    ) {
        self.backlog.clear();
        self.queue_size = queue_size;
        self.queue_errors = queue_errors;
    }

    fn resize_queue(
        &mut self,
        queue_size: u32,
        queue_errors: bool,
        discard_oldest: bool,
    ) -> bool {
        self.queue_size = queue_size;
        self.queue_errors = queue_errors;

        let mut trimmed = false;
        while self.backlog.len() > queue_size as usize {
            let discarded = if discard_oldest {
                self.backlog.discard_oldest()
            } else {
                self.backlog.discard_newest()
            };
            if !discarded {
                warn!(
                    monitored_item_id = self.monitored_item_id,
                    items = self.backlog.len(),
                    queue_size,
                    "Newest values are offloaded, queue stays above its size"
                );
                break;
            }
            trimmed = true;
        }
        trimmed
    }

    fn enqueue(
        &mut self,
        value: DataValue,
        error: Option<ServiceResult>,
    ) -> Result<()> {
        if self.queue_size == 0 {
            error!(
                monitored_item_id = self.monitored_item_id,
                "Cannot enqueue value, queue size not set"
            );
            return Err(QueueError::QueueSizeNotSet {
                monitored_item_id: self.monitored_item_id,
            }
            .into());
        }

        if self.backlog.len() >= self.queue_size as usize {
            self.backlog.discard_oldest();
        }

        let error = if self.queue_errors { error } else { None };
        self.backlog.push(DataChangeEntry::new(value, error));
        Ok(())
    }

    fn dequeue(&mut self) -> Option<DataChangeEntry> {
        let mut entry = self.backlog.pop()?;
        if !self.queue_errors {
            entry.error = None;
        }
        Some(entry)
    }

    fn peek_oldest_value(&self) -> Option<DataValue> {
        self.backlog.front(|entry| entry.value.clone())
    }

    fn peek_last_value(&self) -> Option<DataValue> {
        self.backlog.back(|entry| entry.value.clone())
    }

    fn overwrite_last_value(
        &mut self,
        value: DataValue,
        error: Option<ServiceResult>,
    ) -> Result<()> {
        let error = if self.queue_errors { error } else { None };
        match self.backlog.update_back(|last| *last = DataChangeEntry::new(value, error)) {
            Some(true) => Ok(()),
            Some(false) => Err(QueueError::ValueNotResident {
                monitored_item_id: self.monitored_item_id,
            }
            .into()),
            None => Err(QueueError::QueueEmpty {
                monitored_item_id: self.monitored_item_id,
            }
            .into()),
        }
    }

    fn update_oldest_value(
        &mut self,
        update: &mut dyn FnMut(&mut DataValue),
    ) -> bool {
        self.backlog.update_front(|entry| update(&mut entry.value))
    }
    fn update_last_value(
        &mut self,
        update: &mut dyn FnMut(&mut DataValue),
    ) -> bool {
        self.backlog.update_back(|entry| update(&mut entry.value)) == Some(true)
    }
}
