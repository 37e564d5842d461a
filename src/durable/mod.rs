//! Durable monitored item queues.
//!
//! A durable queue keeps its backlog in [`Batch`]es. Sealed batches are
//! offloaded to storage by a [`BatchPersistor`] and restored ahead of the
//! dequeue position, so a suspended durable subscription can accumulate far
//! more notifications than fit in memory. The
//! [`DurableMonitoredItemQueueFactory`] additionally persists whole queues
//! across a server restart.

mod batch;
mod batch_persistor;
mod batched_queue;
mod durable_data_change_queue;
mod durable_event_queue;
mod durable_factory;
mod path_manager;

pub use batch::*;
pub use batch_persistor::*;
pub(crate) use batched_queue::*;
pub use durable_data_change_queue::*;
pub use durable_event_queue::*;
pub use durable_factory::*;
pub(crate) use path_manager::*;

#[cfg(test)]
mod batch_persistor_test;
#[cfg(test)]
mod batched_queue_test;
