//! Notification queues of OPC UA monitored items.
//!
//! - [`EventQueueHandler`] and [`DataChangeQueueHandler`] implement the
//!   overflow and publish semantics on top of a queue.
//! - Queues come from a [`MonitoredItemQueueFactory`]: plain in-memory queues,
//!   or the batched durable queues of [`DurableMonitoredItemQueueFactory`]
//!   whose backlog is offloaded through a [`BatchPersistor`].
//! - [`QueueFactoryRegistry`] maps configured factory names to constructors.

mod config;
mod constants;
mod durable;
mod errors;
mod handler;
mod queue;
mod registry;
mod types;
pub(crate) mod utils;

pub use config::*;
pub use constants::*;
pub use durable::*;
pub use errors::*;
pub use handler::*;
pub use queue::*;
pub use registry::*;
pub use types::*;


//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
