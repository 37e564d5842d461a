use std::collections::VecDeque;

use tracing::error;

use super::DataChangeMonitoredItemQueue;
use crate::DataChangeEntry;
use crate::DataValue;
use crate::QueueError;
use crate::Result;
use crate::ServiceResult;

/// Bounded in-memory data-change queue
#[derive(Debug)]
pub struct InMemoryDataChangeQueue {
    monitored_item_id: u32,
    queue_size: u32,
    queue_errors: bool,
    values: VecDeque<DataChangeEntry>,
}

impl InMemoryDataChangeQueue {
    pub fn new(monitored_item_id: u32) -> Self {
        Self {
            monitored_item_id,
            queue_size: 0,
            queue_errors: false,
            values: VecDeque::new(),
        }
    }
}

impl DataChangeMonitoredItemQueue for InMemoryDataChangeQueue {
    fn monitored_item_id(&self) -> u32 {
        self.monitored_item_id
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn queue_size(&self) -> u32 {
        self.queue_size
    }

    fn items_in_queue(&self) -> usize {
        self.values.len()
    }

    fn reset_queue(
        &mut self,
        queue_size: u32,
        queue_errors: bool,
    ) {
        self.values = VecDeque::with_capacity(queue_size as usize);
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

        let excess = self.values.len().saturating_sub(queue_size as usize);
        if discard_oldest {
            self.values.drain(..excess);
        } else {
            self.values.truncate(queue_size as usize);
        }
        excess > 0
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

        if self.values.len() >= self.queue_size as usize {
            self.values.pop_front();
        }

        let error = if self.queue_errors { error } else { None };
        self.values.push_back(DataChangeEntry::new(value, error));
        Ok(())
    }

    fn dequeue(&mut self) -> Option<DataChangeEntry> {
        let mut entry = self.values.pop_front()?;
        if !self.queue_errors {
            entry.error = None;
        }
        Some(entry)
    }

    fn peek_oldest_value(&self) -> Option<DataValue> {
        self.values.front().map(|e| e.value.clone())
    }

    fn peek_last_value(&self) -> Option<DataValue> {
        self.values.back().map(|e| e.value.clone())
    }

    fn overwrite_last_value(
        &mut self,
        value: DataValue,
        error: Option<ServiceResult>,
    ) -> Result<()> {
        let queue_errors = self.queue_errors;
        match self.values.back_mut() {
            Some(last) => {
                last.value = value;
                last.error = if queue_errors { error } else { None };
                Ok(())
            }
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
        match self.values.front_mut() {
            Some(oldest) => {
                update(&mut oldest.value);
                true
            }
            None => false,
        }
    }
    fn update_last_value(
        &mut self,
        update: &mut dyn FnMut(&mut DataValue),
    ) -> bool {
        match self.values.back_mut() {
            Some(last) => {
                update(&mut last.value);
                true
            }
            None => false,
        }
    }
}
