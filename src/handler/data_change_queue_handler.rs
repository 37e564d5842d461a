use std::time::Duration;

use tracing::debug;
use tracing::trace;

use crate::DataChangeEntry;
use crate::DataChangeMonitoredItemQueue;
use crate::DataValue;
use crate::DiagnosticsMask;
use crate::MonitoredItemQueueFactory;
use crate::Result;
use crate::ServiceResult;

/// Manages the data-change queue of one monitored item.
///
/// A full queue never rejects a sample. With `discard_oldest` the oldest value
/// is evicted and the new oldest carries the overflow bit; otherwise the newest
/// queued value is replaced by the incoming one, which carries the overflow bit.
/// A queue of size one never reports overflow bits.
pub struct DataChangeQueueHandler {
    queue: Box<dyn DataChangeMonitoredItemQueue>,
    discard_oldest: bool,
    diagnostics_mask: DiagnosticsMask,
    queue_errors: bool,
    sampling_interval: Duration,
    overflow: bool,
}

impl std::fmt::Debug for DataChangeQueueHandler {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DataChangeQueueHandler")
            .field("monitored_item_id", &self.queue.monitored_item_id())
            .field("queue_size", &self.queue.queue_size())
            .field("items_in_queue", &self.queue.items_in_queue())
            .field("discard_oldest", &self.discard_oldest)
            .field("overflow", &self.overflow)
            .finish_non_exhaustive()
    }
}

impl DataChangeQueueHandler {
    /// Creates a handler around a fresh queue from `queue_factory`.
    ///
    /// The queue has no capacity until [`set_queue_size`](Self::set_queue_size) is called.
    pub fn new(
        create_durable: bool,
        queue_factory: &dyn MonitoredItemQueueFactory,
        monitored_item_id: u32,
    ) -> Result<Self> {
        let queue = queue_factory.create_data_change_queue(create_durable, monitored_item_id)?;
        Ok(Self::from_queue(queue, true))
    }

    /// Wraps an existing queue, keeping its content and capacity
    pub fn from_queue(
        queue: Box<dyn DataChangeMonitoredItemQueue>,
        discard_oldest: bool,
    ) -> Self {
        Self {
            queue,
            discard_oldest,
            diagnostics_mask: DiagnosticsMask::NONE,
            queue_errors: false,
            sampling_interval: Duration::ZERO,
            overflow: false,
        }
    }

    /// Reconfigures capacity, discard policy and retained diagnostics.
    ///
    /// A size of 0 is treated as 1. Errors are only retained if `diagnostics_mask`
    /// requests any operation level diagnostics. Queued values survive the
    /// resize; the excess is trimmed according to `discard_oldest` and the
    /// value next to the gap gets the overflow bit.
    pub fn set_queue_size(
        &mut self,
        queue_size: u32,
        discard_oldest: bool,
        diagnostics_mask: DiagnosticsMask,
    ) {
        let queue_size = queue_size.max(1);
        let queue_errors = diagnostics_mask.intersects(DiagnosticsMask::OPERATION_ALL);

        self.discard_oldest = discard_oldest;
        self.diagnostics_mask = diagnostics_mask;
        if self.queue.queue_size() == queue_size && self.queue_errors == queue_errors {
            return;
        }
        self.queue_errors = queue_errors;

        if !self.queue.resize_queue(queue_size, queue_errors, discard_oldest) {
            return;
        }
        debug!(
            monitored_item_id = self.queue.monitored_item_id(),
            queue_size,
            "Trimmed queued values after resize"
        );

        if queue_size > 1 {
            // the boundary value tells the client where values were lost
            let mut mark = |value: &mut DataValue| value.status = value.status.with_overflow(true);
            let marked = if discard_oldest {
                self.queue.update_oldest_value(&mut mark)
            } else {
                self.queue.update_last_value(&mut mark)
            };
            if !marked {
                trace!(
                    monitored_item_id = self.queue.monitored_item_id(),
                    "Boundary value is offloaded, overflow bit not set"
                );
            }
        }
    }

    /// Stores the sampling interval; rate enforcement is up to the producer
    pub fn set_sampling_interval(
        &mut self,
        sampling_interval: Duration,
    ) {
        self.sampling_interval = sampling_interval;
    }

    pub fn sampling_interval(&self) -> Duration {
        self.sampling_interval
    }

    pub fn monitored_item_id(&self) -> u32 {
        self.queue.monitored_item_id()
    }

    pub fn queue_size(&self) -> u32 {
        self.queue.queue_size()
    }

    pub fn items_in_queue(&self) -> usize {
        self.queue.items_in_queue()
    }

    pub fn discard_oldest(&self) -> bool {
        self.discard_oldest
    }

    pub fn overflow(&self) -> bool {
        self.overflow
    }

    pub fn is_durable(&self) -> bool {
        self.queue.is_durable()
    }

    /// Queues a sample.
    ///
    /// # Errors
    /// `QueueSizeNotSet` before the first [`set_queue_size`](Self::set_queue_size);
    /// `ValueNotResident` if the newest value of a durable queue is offloaded.
    pub fn queue_value(
        &mut self,
        mut value: DataValue,
        mut error: Option<ServiceResult>,
    ) -> Result<()> {
        if let Some(error) = error.as_mut() {
            error.apply_diagnostic_masks(self.diagnostics_mask);
        }

        let queue_size = self.queue.queue_size();
        if queue_size == 0 || self.queue.items_in_queue() < queue_size as usize {
            return self.queue.enqueue(value, error);
        }

        self.overflow = true;
        let report_overflow = queue_size > 1;

        if self.discard_oldest {
            self.queue.enqueue(value, error)?;
            if report_overflow {
                self.queue
                    .update_oldest_value(&mut |oldest| oldest.status = oldest.status.with_overflow(true));
            }
        } else {
            if report_overflow {
                value.status = value.status.with_overflow(true);
            }
            self.queue.overwrite_last_value(value, error)?;
        }

        trace!(
            monitored_item_id = self.queue.monitored_item_id(),
            discard_oldest = self.discard_oldest,
            "Queue overflow"
        );
        Ok(())
    }

    /// Dequeues the oldest value.
    ///
    /// Returns `None` when nothing is available in this cycle. The overflow
    /// flag is cleared once the queue has been emptied.
    pub fn publish_single_value(
        &mut self,
        no_event_log: bool,
    ) -> Option<DataChangeEntry> {
        let entry = self.queue.dequeue();

        if self.queue.items_in_queue() == 0 {
            self.overflow = false;
        }

        if let Some(entry) = entry.as_ref() {
            if !no_event_log {
                trace!(
                    monitored_item_id = self.queue.monitored_item_id(),
                    status = %entry.value.status,
                    remaining = self.queue.items_in_queue(),
                    "Dequeued value"
                );
            }
        }
        entry
    }
}
