use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use super::DiagnosticsMask;

/// OPC UA style 32-bit status code.
///
/// The top two bits carry the severity, bits 10..=11 the info type and the
/// low bits the info flags. Only the data-value info flags used by the queue
/// handlers (overflow) get dedicated accessors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(u32);

const SEVERITY_MASK: u32 = 0xC000_0000;
const SEVERITY_BAD: u32 = 0x8000_0000;
const SEVERITY_UNCERTAIN: u32 = 0x4000_0000;
const INFO_TYPE_DATA_VALUE: u32 = 0x0000_0400;
const INFO_BITS_MASK: u32 = 0x0000_03FF;
const INFO_OVERFLOW: u32 = 0x0000_0080;

impl StatusCode {
    pub const GOOD: Self = Self(0);
    pub const UNCERTAIN: Self = Self(SEVERITY_UNCERTAIN);
    pub const BAD: Self = Self(SEVERITY_BAD);
    pub const BAD_INTERNAL_ERROR: Self = Self(0x8002_0000);
    pub const BAD_OUT_OF_MEMORY: Self = Self(0x8003_0000);
    pub const BAD_NO_COMMUNICATION: Self = Self(0x8031_0000);
    pub const BAD_WAITING_FOR_INITIAL_DATA: Self = Self(0x8032_0000);
    pub const BAD_NODE_ID_UNKNOWN: Self = Self(0x8034_0000);

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_good(self) -> bool {
        self.0 & SEVERITY_MASK == 0
    }

    pub const fn is_bad(self) -> bool {
        self.0 & SEVERITY_BAD != 0
    }

    pub const fn is_uncertain(self) -> bool {
        self.0 & SEVERITY_MASK == SEVERITY_UNCERTAIN
    }

    /// True if the data-value overflow info bit is set
    pub const fn overflow(self) -> bool {
        self.0 & (INFO_TYPE_DATA_VALUE | INFO_OVERFLOW) == (INFO_TYPE_DATA_VALUE | INFO_OVERFLOW)
    }

    /// Returns a copy with the overflow info bit set or cleared.
    ///
    /// Clearing the last info bit also clears the data-value info type.
    pub const fn with_overflow(
        self,
        overflow: bool,
    ) -> Self {
        if overflow {
            Self(self.0 | INFO_TYPE_DATA_VALUE | INFO_OVERFLOW)
        } else {
            let bits = self.0 & !INFO_OVERFLOW;
            if bits & INFO_BITS_MASK == 0 {
                Self(bits & !INFO_TYPE_DATA_VALUE)
            } else {
                Self(bits)
            }
        }
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "StatusCode(0x{:08X})", self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Outcome of an operation, optionally carrying diagnostic detail.
///
/// Paired with a [`DataValue`](super::DataValue) in data-change queues and
/// embedded in event fields as [`Variant::StatusResult`](super::Variant).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceResult {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbolic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localized_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_result: Option<Box<ServiceResult>>,
}

impl ServiceResult {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_symbolic_id(
        mut self,
        symbolic_id: impl Into<String>,
    ) -> Self {
        self.symbolic_id = Some(symbolic_id.into());
        self
    }

    pub fn with_localized_text(
        mut self,
        text: impl Into<String>,
    ) -> Self {
        self.localized_text = Some(text.into());
        self
    }

    pub fn with_additional_info(
        mut self,
        info: impl Into<String>,
    ) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    pub fn with_inner_result(
        mut self,
        inner: ServiceResult,
    ) -> Self {
        self.inner_result = Some(Box::new(inner));
        self
    }

    /// Strips the operation level diagnostics the client did not ask for.
    pub fn apply_diagnostic_masks(
        &mut self,
        mask: DiagnosticsMask,
    ) {
        if !mask.contains(DiagnosticsMask::OPERATION_SYMBOLIC_ID) {
            self.symbolic_id = None;
        }
        if !mask.contains(DiagnosticsMask::OPERATION_LOCALIZED_TEXT) {
            self.localized_text = None;
        }
        if !mask.contains(DiagnosticsMask::OPERATION_ADDITIONAL_INFO) {
            self.additional_info = None;
        }

        if !mask.contains(DiagnosticsMask::OPERATION_INNER_STATUS_CODE) {
            self.inner_result = None;
        } else if let Some(inner) = self.inner_result.as_mut() {
            if mask.contains(DiagnosticsMask::OPERATION_INNER_DIAGNOSTICS) {
                inner.apply_diagnostic_masks(mask);
            } else {
                // keep only the inner status chain
                inner.apply_diagnostic_masks(DiagnosticsMask::OPERATION_INNER_STATUS_CODE);
            }
        }
    }
}

impl From<StatusCode> for ServiceResult {
    fn from(status: StatusCode) -> Self {
        ServiceResult::new(status)
    }
}
