//! Monitored item queues.
//!
//! A queue is a bounded FIFO owned by exactly one monitored item. The traits in
//! this module are the seam between the queue handlers (overflow policy,
//! publish protocol) and the storage strategy: the in-memory implementations
//! here, or the batched durable queues in [`crate::durable`].
//!
//! Queues are only ever constructed through a [`MonitoredItemQueueFactory`]
//! supplied by the enclosing server.

mod data_change_queue;
mod event_queue;
mod factory;

pub use data_change_queue::*;
pub use event_queue::*;
pub use factory::*;

#[cfg(test)]
mod data_change_queue_test;

use crate::DataChangeEntry;
use crate::DataValue;
use crate::EventFieldList;
use crate::Result;
use crate::ServiceResult;

/// Storage for the data-change notifications of one monitored item
pub trait DataChangeMonitoredItemQueue: Send + Sync {
    fn monitored_item_id(&self) -> u32;

    fn is_durable(&self) -> bool;

    /// Configured capacity (0 until [`reset_queue`](Self::reset_queue) is called)
    fn queue_size(&self) -> u32;

    fn items_in_queue(&self) -> usize;

    /// Drops all content and reconfigures the capacity.
    ///
    /// Errors passed to [`enqueue`](Self::enqueue) are only retained when
    /// `queue_errors` is set.
    fn reset_queue(
        &mut self,
        queue_size: u32,
        queue_errors: bool,
    );

    /// Reconfigures capacity and error retention, keeping the content.
    ///
    /// When the queue holds more than `queue_size` entries the excess oldest
    /// entries are dropped if `discard_oldest` is set, the excess newest
    /// otherwise. Returns true if anything was dropped.
    fn resize_queue(
        &mut self,
        queue_size: u32,
        queue_errors: bool,
        discard_oldest: bool,
    ) -> bool;

    /// Appends a value, discarding the oldest one if the queue is full
    ///
    /// # Errors
    /// `QueueSizeNotSet` if the capacity is 0.
    fn enqueue(
        &mut self,
        value: DataValue,
        error: Option<ServiceResult>,
    ) -> Result<()>;

    /// Removes the oldest entry. Its error is dropped unless errors are
    /// currently retained.
    ///
    /// Returns `None` if the queue is empty or, for durable queues, if the
    /// head entries are not resident yet.
    fn dequeue(&mut self) -> Option<DataChangeEntry>;

    fn peek_oldest_value(&self) -> Option<DataValue>;

    fn peek_last_value(&self) -> Option<DataValue>;

    /// Replaces the newest entry
    ///
    /// # Errors
    /// `QueueEmpty` if nothing is queued.
    fn overwrite_last_value(
        &mut self,
        value: DataValue,
        error: Option<ServiceResult>,
    ) -> Result<()>;

    /// Mutates the oldest value in place. Returns false if there is none.
    fn update_oldest_value(
        &mut self,
        update: &mut dyn FnMut(&mut DataValue),
    ) -> bool;

    /// Mutates the newest value in place. Returns false if there is none.
    fn update_last_value(
        &mut self,
        update: &mut dyn FnMut(&mut DataValue),
    ) -> bool;
}

/// Storage for the event notifications of one monitored item
pub trait EventMonitoredItemQueue: Send + Sync {
    fn monitored_item_id(&self) -> u32;

    fn is_durable(&self) -> bool;

    fn queue_size(&self) -> u32;

    fn items_in_queue(&self) -> usize;

    /// Reconfigures the capacity.
    ///
    /// When shrinking below the current fill level the excess oldest entries
    /// are dropped if `discard_oldest` is set; otherwise existing entries are
    /// kept and the caller is expected to reject new events until drained.
    fn set_queue_size(
        &mut self,
        queue_size: u32,
        discard_oldest: bool,
    );

    /// Appends an event, discarding the oldest one if the queue is full
    ///
    /// # Errors
    /// `QueueSizeNotSet` if the capacity is 0.
    fn enqueue(
        &mut self,
        event: EventFieldList,
    ) -> Result<()>;

    fn dequeue(&mut self) -> Option<EventFieldList>;

    /// Scans at most the `limit` most recent entries for one matching `matches`
    fn is_event_contained_in_queue(
        &self,
        matches: &dyn Fn(&EventFieldList) -> bool,
        limit: usize,
    ) -> bool;
}
