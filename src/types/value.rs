use std::time::SystemTime;

use serde::Deserialize;
use serde::Serialize;

use super::ServiceResult;
use super::StatusCode;

/// Tagged scalar/array value carried by data values and event fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Variant {
    #[default]
    Null,
    Boolean(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Double(f64),
    String(String),
    ByteString(Vec<u8>),
    DateTime(SystemTime),
    StatusCode(StatusCode),
    StatusResult(ServiceResult),
    Array(Vec<Variant>),
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int32(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Self {
        Variant::UInt32(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int64(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

impl From<ServiceResult> for Variant {
    fn from(v: ServiceResult) -> Self {
        Variant::StatusResult(v)
    }
}

/// A sampled value with its quality and timestamps
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<SystemTime>,
}

impl DataValue {
    pub fn new(value: impl Into<Variant>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_status(
        mut self,
        status: StatusCode,
    ) -> Self {
        self.status = status;
        self
    }

    pub fn with_source_timestamp(
        mut self,
        timestamp: SystemTime,
    ) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }

    pub fn with_server_timestamp(
        mut self,
        timestamp: SystemTime,
    ) -> Self {
        self.server_timestamp = Some(timestamp);
        self
    }
}

/// One queued data-change notification: the value and the operation error
/// recorded for it (only kept when the queue retains errors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeEntry {
    pub value: DataValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceResult>,
}

impl DataChangeEntry {
    pub fn new(
        value: DataValue,
        error: Option<ServiceResult>,
    ) -> Self {
        Self { value, error }
    }
}
