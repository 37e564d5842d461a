use std::ops::BitOr;

use serde::Deserialize;
use serde::Serialize;

/// Selects which diagnostic fields are returned to (and retained for) a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagnosticsMask(u32);

impl DiagnosticsMask {
    pub const NONE: Self = Self(0);
    pub const SERVICE_SYMBOLIC_ID: Self = Self(0x0001);
    pub const SERVICE_LOCALIZED_TEXT: Self = Self(0x0002);
    pub const SERVICE_ADDITIONAL_INFO: Self = Self(0x0004);
    pub const SERVICE_INNER_STATUS_CODE: Self = Self(0x0008);
    pub const SERVICE_INNER_DIAGNOSTICS: Self = Self(0x0010);
    pub const OPERATION_SYMBOLIC_ID: Self = Self(0x0020);
    pub const OPERATION_LOCALIZED_TEXT: Self = Self(0x0040);
    pub const OPERATION_ADDITIONAL_INFO: Self = Self(0x0080);
    pub const OPERATION_INNER_STATUS_CODE: Self = Self(0x0100);
    pub const OPERATION_INNER_DIAGNOSTICS: Self = Self(0x0200);
    pub const SERVICE_ALL: Self = Self(0x001F);
    pub const OPERATION_ALL: Self = Self(0x03E0);
    pub const ALL: Self = Self(0x03FF);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set
    pub const fn contains(
        self,
        other: Self,
    ) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set
    pub const fn intersects(
        self,
        other: Self,
    ) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for DiagnosticsMask {
    type Output = Self;

    fn bitor(
        self,
        rhs: Self,
    ) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Per-request diagnostics policy handed in by the publish loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticsContext {
    pub diagnostics_mask: DiagnosticsMask,
}

impl DiagnosticsContext {
    pub fn new(diagnostics_mask: DiagnosticsMask) -> Self {
        Self { diagnostics_mask }
    }
}
