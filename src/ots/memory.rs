//! In-memory OTS value store
//!
//! Holds one exposed object's metadata plus the Feature bitset, and
//! records outbound indications so tests can assert on them. Servers
//! without a persistent metadata backend can use it directly.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::types::{ObjectChanged, ObjectId, ObjectProperties, ObjectSize, OtsDateTime, OtsFeature};
use super::{ObjectStore, StoreError};

#[derive(Default)]
struct StoreState {
    feature: OtsFeature,
    name: Option<String>,
    object_type: Option<u16>,
    size: Option<ObjectSize>,
    id: Option<ObjectId>,
    properties: Option<ObjectProperties>,
    first_created: Option<OtsDateTime>,
    last_modified: Option<OtsDateTime>,
}

/// In-memory [`ObjectStore`] implementation.
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<StoreState>,
    oacp_indications: Mutex<Vec<Vec<u8>>>,
    olcp_indications: Mutex<Vec<Vec<u8>>>,
    changes: Mutex<Vec<ObjectChanged>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured OACP response indications, oldest first.
    pub async fn oacp_indications(&self) -> Vec<Vec<u8>> {
        self.oacp_indications.lock().await.clone()
    }

    /// Captured OLCP response indications, oldest first.
    pub async fn olcp_indications(&self) -> Vec<Vec<u8>> {
        self.olcp_indications.lock().await.clone()
    }

    /// Captured Object Changed notifications, oldest first.
    pub async fn changes(&self) -> Vec<ObjectChanged> {
        self.changes.lock().await.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn feature(&self) -> Result<OtsFeature, StoreError> {
        Ok(self.state.lock().await.feature)
    }

    async fn set_feature(&self, feature: OtsFeature) -> Result<(), StoreError> {
        self.state.lock().await.feature = feature;
        Ok(())
    }

    async fn name(&self) -> Result<String, StoreError> {
        self.state
            .lock()
            .await
            .name
            .clone()
            .ok_or(StoreError::ValueUnset("Object Name"))
    }

    async fn set_name(&self, name: &str) -> Result<(), StoreError> {
        self.state.lock().await.name = Some(name.to_string());
        Ok(())
    }

    async fn object_type(&self) -> Result<u16, StoreError> {
        self.state
            .lock()
            .await
            .object_type
            .ok_or(StoreError::ValueUnset("Object Type"))
    }

    async fn set_object_type(&self, object_type: u16) -> Result<(), StoreError> {
        self.state.lock().await.object_type = Some(object_type);
        Ok(())
    }

    async fn size(&self) -> Result<ObjectSize, StoreError> {
        self.state
            .lock()
            .await
            .size
            .ok_or(StoreError::ValueUnset("Object Size"))
    }

    async fn set_size(&self, size: ObjectSize) -> Result<(), StoreError> {
        self.state.lock().await.size = Some(size);
        Ok(())
    }

    async fn id(&self) -> Result<ObjectId, StoreError> {
        self.state
            .lock()
            .await
            .id
            .ok_or(StoreError::ValueUnset("Object ID"))
    }

    async fn set_id(&self, id: ObjectId) -> Result<(), StoreError> {
        self.state.lock().await.id = Some(id);
        Ok(())
    }

    async fn properties(&self) -> Result<ObjectProperties, StoreError> {
        self.state
            .lock()
            .await
            .properties
            .ok_or(StoreError::ValueUnset("Object Properties"))
    }

    async fn set_properties(&self, properties: ObjectProperties) -> Result<(), StoreError> {
        self.state.lock().await.properties = Some(properties);
        Ok(())
    }

    async fn first_created(&self) -> Result<Option<OtsDateTime>, StoreError> {
        Ok(self.state.lock().await.first_created)
    }

    async fn set_first_created(&self, utc: OtsDateTime) -> Result<(), StoreError> {
        self.state.lock().await.first_created = Some(utc);
        Ok(())
    }

    async fn last_modified(&self) -> Result<Option<OtsDateTime>, StoreError> {
        Ok(self.state.lock().await.last_modified)
    }

    async fn set_last_modified(&self, utc: OtsDateTime) -> Result<(), StoreError> {
        self.state.lock().await.last_modified = Some(utc);
        Ok(())
    }

    async fn indicate_oacp_response(&self, value: &[u8]) -> Result<(), StoreError> {
        self.oacp_indications.lock().await.push(value.to_vec());
        Ok(())
    }

    async fn indicate_olcp_response(&self, value: &[u8]) -> Result<(), StoreError> {
        self.olcp_indications.lock().await.push(value.to_vec());
        Ok(())
    }

    async fn notify_object_changed(&self, change: ObjectChanged) -> Result<(), StoreError> {
        self.changes.lock().await.push(change);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unset_values_error() {
        let store = MemoryObjectStore::new();
        assert!(store.name().await.is_err());
        assert!(store.size().await.is_err());
        // Feature defaults to all-unsupported rather than erroring.
        assert_eq!(store.feature().await.unwrap(), OtsFeature::default());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryObjectStore::new();
        store
            .set_size(ObjectSize {
                current: 10,
                allocated: 32,
            })
            .await
            .unwrap();
        assert_eq!(store.size().await.unwrap().allocated, 32);

        store.set_name("fw.bin").await.unwrap();
        assert_eq!(store.name().await.unwrap(), "fw.bin");
    }

    #[tokio::test]
    async fn test_indications_recorded() {
        let store = MemoryObjectStore::new();
        store.indicate_oacp_response(&[0x60, 0x05, 0x01]).await.unwrap();
        assert_eq!(store.oacp_indications().await, vec![vec![0x60, 0x05, 0x01]]);
    }
}
