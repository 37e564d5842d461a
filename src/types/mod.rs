//! Notification payload types.
//!
//! A queued notification is either a [`DataChangeEntry`] (value + error pair)
//! or an [`EventFieldList`] (ordered event fields). Both are plain data and
//! serialize with enough type tagging to be restored from durable storage.

mod diagnostics;
mod event;
mod status;
mod value;

pub use diagnostics::*;
pub use event::*;
pub use status::*;
pub use value::*;
