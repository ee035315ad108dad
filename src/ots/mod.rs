//! Object Transfer Service value store boundary
//!
//! The OTS characteristic value store is a passive key/value collaborator:
//! it holds the Feature bitset and the currently exposed object's metadata,
//! and it can indicate control-point responses and Object Changed
//! notifications back to the connected client. The engine drives it through
//! the [`ObjectStore`] trait; `memory` provides an in-process
//! implementation for servers and tests.

pub mod memory;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::transport::gatt::sig_uuid16;
use self::types::{ObjectChanged, ObjectId, ObjectProperties, ObjectSize, OtsDateTime, OtsFeature};

/// OTS service UUID (0x1825).
pub fn service_uuid() -> Uuid {
    sig_uuid16(0x1825)
}

/// OTS Feature characteristic UUID (0x2ABD).
pub fn feature_uuid() -> Uuid {
    sig_uuid16(0x2ABD)
}

/// Object Name characteristic UUID (0x2ABE).
pub fn object_name_uuid() -> Uuid {
    sig_uuid16(0x2ABE)
}

/// Object Type characteristic UUID (0x2ABF).
pub fn object_type_uuid() -> Uuid {
    sig_uuid16(0x2ABF)
}

/// Object Size characteristic UUID (0x2AC0).
pub fn object_size_uuid() -> Uuid {
    sig_uuid16(0x2AC0)
}

/// Object First-Created characteristic UUID (0x2AC1).
pub fn first_created_uuid() -> Uuid {
    sig_uuid16(0x2AC1)
}

/// Object Last-Modified characteristic UUID (0x2AC2).
pub fn last_modified_uuid() -> Uuid {
    sig_uuid16(0x2AC2)
}

/// Object ID characteristic UUID (0x2AC3).
pub fn object_id_uuid() -> Uuid {
    sig_uuid16(0x2AC3)
}

/// Object Properties characteristic UUID (0x2AC4).
pub fn object_properties_uuid() -> Uuid {
    sig_uuid16(0x2AC4)
}

/// Object Action Control Point characteristic UUID (0x2AC5).
pub fn oacp_uuid() -> Uuid {
    sig_uuid16(0x2AC5)
}

/// Object List Control Point characteristic UUID (0x2AC6).
pub fn olcp_uuid() -> Uuid {
    sig_uuid16(0x2AC6)
}

/// Object List Filter characteristic UUID (0x2AC7).
pub fn list_filter_uuid() -> Uuid {
    sig_uuid16(0x2AC7)
}

/// Object Changed characteristic UUID (0x2AC8).
pub fn object_changed_uuid() -> Uuid {
    sig_uuid16(0x2AC8)
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Characteristic value not set: {0}")]
    ValueUnset(&'static str),

    #[error("Indication failed: {0}")]
    IndicationFailed(String),
}

/// The OTS characteristic value store, as seen by the server-side engine.
///
/// Get/set pairs cover the exposed object's metadata; the indicate calls
/// push control-point response PDUs (already wire-encoded by the engine)
/// and Object Changed notifications to the connected client.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn feature(&self) -> Result<OtsFeature, StoreError>;
    async fn set_feature(&self, feature: OtsFeature) -> Result<(), StoreError>;

    async fn name(&self) -> Result<String, StoreError>;
    async fn set_name(&self, name: &str) -> Result<(), StoreError>;

    async fn object_type(&self) -> Result<u16, StoreError>;
    async fn set_object_type(&self, object_type: u16) -> Result<(), StoreError>;

    async fn size(&self) -> Result<ObjectSize, StoreError>;
    async fn set_size(&self, size: ObjectSize) -> Result<(), StoreError>;

    async fn id(&self) -> Result<ObjectId, StoreError>;
    async fn set_id(&self, id: ObjectId) -> Result<(), StoreError>;

    async fn properties(&self) -> Result<ObjectProperties, StoreError>;
    async fn set_properties(&self, properties: ObjectProperties) -> Result<(), StoreError>;

    async fn first_created(&self) -> Result<Option<OtsDateTime>, StoreError>;
    async fn set_first_created(&self, utc: OtsDateTime) -> Result<(), StoreError>;

    async fn last_modified(&self) -> Result<Option<OtsDateTime>, StoreError>;
    async fn set_last_modified(&self, utc: OtsDateTime) -> Result<(), StoreError>;

    /// Indicate a wire-encoded OACP response PDU to the connected client.
    async fn indicate_oacp_response(&self, value: &[u8]) -> Result<(), StoreError>;

    /// Indicate a wire-encoded OLCP response PDU to the connected client.
    async fn indicate_olcp_response(&self, value: &[u8]) -> Result<(), StoreError>;

    /// Notify the connected client of an object change.
    async fn notify_object_changed(&self, change: ObjectChanged) -> Result<(), StoreError>;
}
