use std::collections::VecDeque;

use tracing::debug;
use tracing::trace;

use crate::constants::DEFAULT_DUPLICATE_SCAN_LIMIT;
use crate::DiagnosticsContext;
use crate::EventFieldList;
use crate::EventMonitoredItemQueue;
use crate::MonitoredItemQueueFactory;
use crate::QueueError;
use crate::Result;

/// Manages the event queue of one monitored item.
///
/// Applies the overflow policy on enqueue and implements the batch-drain
/// publish protocol. The overflow flag is sticky: once set it survives until
/// a publish proves the overflow condition has been reported.
pub struct EventQueueHandler {
    queue: Box<dyn EventMonitoredItemQueue>,
    discard_oldest: bool,
    overflow: bool,
    duplicate_scan_limit: usize,
}

impl std::fmt::Debug for EventQueueHandler {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventQueueHandler")
            .field("monitored_item_id", &self.queue.monitored_item_id())
            .field("items_in_queue", &self.queue.items_in_queue())
            .field("discard_oldest", &self.discard_oldest)
            .field("overflow", &self.overflow)
            .finish_non_exhaustive()
    }
}

impl EventQueueHandler {
    /// Creates a handler around a fresh queue from `queue_factory`
    ///
    /// # Errors
    /// Propagates factory failures (e.g. durable queue not supported).
    pub fn new(
        create_durable: bool,
        queue_factory: &dyn MonitoredItemQueueFactory,
        monitored_item_id: u32,
    ) -> Result<Self> {
        let queue = queue_factory.create_event_queue(create_durable, monitored_item_id)?;
        Ok(Self::from_queue(queue, false))
    }

    /// Wraps an existing queue, used when a queue is restored after a restart
    pub fn from_queue(
        queue: Box<dyn EventMonitoredItemQueue>,
        discard_oldest: bool,
    ) -> Self {
        Self {
            queue,
            discard_oldest,
            overflow: false,
            duplicate_scan_limit: DEFAULT_DUPLICATE_SCAN_LIMIT,
        }
    }

    /// Overrides how many recent entries [`is_event_contained_in_queue`](Self::is_event_contained_in_queue) inspects
    pub fn with_duplicate_scan_limit(
        mut self,
        limit: usize,
    ) -> Self {
        self.duplicate_scan_limit = limit;
        self
    }

    pub fn set_queue_size(
        &mut self,
        queue_size: u32,
        discard_oldest: bool,
    ) {
        self.discard_oldest = discard_oldest;
        self.queue.set_queue_size(queue_size, discard_oldest);
    }

    pub fn monitored_item_id(&self) -> u32 {
        self.queue.monitored_item_id()
    }

    pub fn items_in_queue(&self) -> usize {
        self.queue.items_in_queue()
    }

    pub fn overflow(&self) -> bool {
        self.overflow
    }

    pub fn discard_oldest(&self) -> bool {
        self.discard_oldest
    }

    /// Checks the most recent queue entries for an event matching `matches`
    pub fn is_event_contained_in_queue(
        &self,
        matches: &dyn Fn(&EventFieldList) -> bool,
    ) -> bool {
        self.queue.is_event_contained_in_queue(matches, self.duplicate_scan_limit)
    }

    /// Flags overflow if the queue is full and discarding is not allowed.
    ///
    /// Returns true in exactly that case; the queue content is not touched.
    pub fn set_queue_overflow_if_full(&mut self) -> bool {
        if self.is_full() && !self.discard_oldest {
            self.overflow = true;
            return true;
        }
        false
    }

    /// Adds an event to the queue.
    ///
    /// # Errors
    /// `QueueSizeNotSet` before the first [`set_queue_size`](Self::set_queue_size);
    /// `QueueFull` if the queue is at capacity and discarding is not allowed,
    /// the queue is left unchanged.
    pub fn queue_event(
        &mut self,
        fields: EventFieldList,
    ) -> Result<()> {
        // make space in the queue.
        if self.is_full() {
            self.overflow = true;
            if !self.discard_oldest {
                debug!(
                    monitored_item_id = self.queue.monitored_item_id(),
                    "Event rejected, queue is full"
                );
                return Err(QueueError::QueueFull {
                    monitored_item_id: self.queue.monitored_item_id(),
                }
                .into());
            }
            // a durable queue may not have its head resident; it then records
            // the discard itself when the enqueue overflows
            self.queue.dequeue();
        }

        self.queue.enqueue(fields)
    }

    /// Moves up to `max_notifications_per_publish` events into `notifications`.
    ///
    /// Returns the number of events moved.
    pub fn publish(
        &mut self,
        context: &DiagnosticsContext,
        notifications: &mut VecDeque<EventFieldList>,
        max_notifications_per_publish: u32,
    ) -> u32 {
        let mut notification_count = 0;
        while notification_count < max_notifications_per_publish {
            let Some(mut fields) = self.queue.dequeue() else {
                break;
            };
            fields.apply_diagnostic_masks(context);
            notifications.push_back(fields);
            notification_count += 1;
        }

        // the overflow event sits behind the queued events: keep the flag while
        // the publish was cut off by the limit. With discard oldest it is at the
        // front and was just delivered.
        self.overflow = self.overflow
            && notification_count == max_notifications_per_publish
            && !self.discard_oldest;

        trace!(
            monitored_item_id = self.queue.monitored_item_id(),
            notification_count,
            overflow = self.overflow,
            "Published events"
        );
        notification_count
    }

    /// A queue without a size is not full, enqueue reports the missing size
    fn is_full(&self) -> bool {
        let queue_size = self.queue.queue_size();
        queue_size > 0 && self.queue.items_in_queue() >= queue_size as usize
    }
}
