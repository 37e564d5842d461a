use std::collections::VecDeque;

use tracing::debug;
use tracing::error;

use super::EventMonitoredItemQueue;
use crate::EventFieldList;
use crate::QueueError;
use crate::Result;

/// Bounded in-memory event queue
#[derive(Debug)]
pub struct InMemoryEventQueue {
    monitored_item_id: u32,
    queue_size: u32,
    events: VecDeque<EventFieldList>,
}

impl InMemoryEventQueue {
    pub fn new(monitored_item_id: u32) -> Self {
        Self {
            monitored_item_id,
            queue_size: 0,
            events: VecDeque::new(),
        }
    }
}

impl EventMonitoredItemQueue for InMemoryEventQueue {
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
        self.events.len()
    }

    fn set_queue_size(
        &mut self,
        queue_size: u32,
        discard_oldest: bool,
    ) {
        self.queue_size = queue_size;

        let excess = self.events.len().saturating_sub(queue_size as usize);
        if excess > 0 && discard_oldest {
            debug!(
                monitored_item_id = self.monitored_item_id,
                excess, "Queue shrunk, discarding oldest events"
            );
            self.events.drain(..excess);
        }
    }

    fn enqueue(
        &mut self,
        event: EventFieldList,
    ) -> Result<()> {
        if self.queue_size == 0 {
            error!(
                monitored_item_id = self.monitored_item_id,
                "Error queueing event, queue size is set to 0"
            );
            return Err(QueueError::QueueSizeNotSet {
                monitored_item_id: self.monitored_item_id,
            }
            .into());
        }

        if self.events.len() >= self.queue_size as usize {
            self.events.pop_front();
        }

        self.events.push_back(event);
        Ok(())
    }

    fn dequeue(&mut self) -> Option<EventFieldList> {
        self.events.pop_front()
    }

    fn is_event_contained_in_queue(
        &self,
        matches: &dyn Fn(&EventFieldList) -> bool,
        limit: usize,
    ) -> bool {
        self.events.iter().rev().take(limit).any(|event| matches(event))
    }
}
