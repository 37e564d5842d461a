//! Queue handlers: the operational facade around one monitored item queue.
//!
//! A handler applies the overflow policy on the producer side and implements
//! the publish protocol on the consumer side. Both operations are synchronous
//! and never wait on durable storage.

mod data_change_queue_handler;
mod event_queue_handler;

pub use data_change_queue_handler::*;
pub use event_queue_handler::*;

#[cfg(test)]
mod event_queue_handler_test;
