use serde::Deserialize;
use serde::Serialize;

use super::DiagnosticsContext;
use super::Variant;

/// Identity of the event instance a field list was produced from.
///
/// Used to recognise an event that is already queued for a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventHandle(pub u64);

/// One queued event notification: the selected fields in select-clause order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFieldList {
    pub client_handle: u32,
    pub event_fields: Vec<Variant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<EventHandle>,
}

impl EventFieldList {
    pub fn new(
        client_handle: u32,
        event_fields: Vec<Variant>,
    ) -> Self {
        Self {
            client_handle,
            event_fields,
            handle: None,
        }
    }

    pub fn with_handle(
        mut self,
        handle: EventHandle,
    ) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Redacts the diagnostics of every status result field per `context`
    pub fn apply_diagnostic_masks(
        &mut self,
        context: &DiagnosticsContext,
    ) {
        for field in self.event_fields.iter_mut() {
            if let Variant::StatusResult(result) = field {
                result.apply_diagnostic_masks(context.diagnostics_mask);
            }
        }
    }
}
