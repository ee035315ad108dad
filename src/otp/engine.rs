//! OTP procedure engine and role façade
//!
//! One `OtpEngine` drives a client or a server. Client operations
//! validate their preconditions against the connection's transfer
//! context, put the control-point request on the wire and return; the
//! asynchronous response advances the state machine and, for Read/Write,
//! hands off to the transfer-channel choreography. Server-side, inbound
//! control-point writes are decoded, armed into the context and judged
//! by a host-supplied decision capability whose verdict goes back as the
//! response.
//!
//! The engine spawns no tasks: every entry point runs inside the
//! caller's context, takes the session lock at most once at a time, and
//! publishes events only after the lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, RwLock};

use crate::ots::types::{
    ObjectChanged, ObjectFilter, ObjectId, ObjectInfo, ObjectProperties, ObjectSize, OtsDateTime,
    OtsFeature, SortOrder, ATT_VALUE_LEN, OBJECT_SIZE_UNKNOWN,
};
use crate::ots::{self, ObjectStore};
use crate::transport::channel::{ChannelEvent, ChannelHandle, ChannelTransport};
use crate::transport::gatt::{ConnHandle, ConnectionEvent, GattTransport};

use super::config::{OtpConfig, Role};
use super::context::{
    ChannelState, DiscoveryState, EofReason, EofStatus, MetadataState, SelectState, SessionState,
    TransferContext, TransferDirection, TransferInfo, TransferState,
};
use super::error::{OtpError, TransferFault};
use super::events::{EventSink, OtpEvent, EVENT_DATA_MAX_LEN};
use super::oacp::{
    OacpOpcode, OacpRequest, OacpResponse, OacpResultCode, WriteMode, EXECUTE_PARAM_MAX,
    RESPONSE_PARAM_MAX,
};
use super::olcp::{OlcpOpcode, OlcpRequest, OlcpResponse, OlcpResultCode};
use super::table::{SessionGuard, DEFAULT_CAPACITY};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Verdict returned by a server's OACP decision capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OacpVerdict {
    pub result: OacpResultCode,
    pub parameter: Vec<u8>,
}

impl OacpVerdict {
    pub fn success() -> Self {
        Self {
            result: OacpResultCode::Success,
            parameter: Vec::new(),
        }
    }

    /// Success carrying a response parameter (e.g. a checksum).
    pub fn success_with(parameter: Vec<u8>) -> Self {
        Self {
            result: OacpResultCode::Success,
            parameter,
        }
    }

    pub fn reject(result: OacpResultCode) -> Self {
        Self {
            result,
            parameter: Vec::new(),
        }
    }
}

/// Verdict returned by a server's OLCP decision capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OlcpVerdict {
    pub result: OlcpResultCode,
    pub parameter: Vec<u8>,
}

impl OlcpVerdict {
    pub fn success() -> Self {
        Self {
            result: OlcpResultCode::Success,
            parameter: Vec::new(),
        }
    }

    /// Success carrying the object count for Request-Number-Of-Objects.
    pub fn success_with_count(count: u32) -> Self {
        Self {
            result: OlcpResultCode::Success,
            parameter: count.to_le_bytes().to_vec(),
        }
    }

    pub fn reject(result: OlcpResultCode) -> Self {
        Self {
            result,
            parameter: Vec::new(),
        }
    }
}

/// Host decision capability for inbound OACP requests (server role).
///
/// The engine performs structural validation and context arming; the
/// accept/reject call is the host's.
#[async_trait]
pub trait OacpDecision: Send + Sync {
    async fn decide(&self, conn: ConnHandle, request: &OacpRequest) -> OacpVerdict;
}

/// Host decision capability for inbound OLCP requests (server role).
#[async_trait]
pub trait OlcpDecision: Send + Sync {
    async fn decide(&self, conn: ConnHandle, request: &OlcpRequest) -> OlcpVerdict;
}

/// The Object Transfer Profile engine.
pub struct OtpEngine {
    config: OtpConfig,
    gatt: Arc<dyn GattTransport>,
    channel: Arc<dyn ChannelTransport>,
    store: Option<Arc<dyn ObjectStore>>,
    sessions: SessionGuard,
    events: EventSink,
    oacp_decision: RwLock<Option<Arc<dyn OacpDecision>>>,
    olcp_decision: RwLock<Option<Arc<dyn OlcpDecision>>>,
    channel_listening: AtomicBool,
}

impl OtpEngine {
    /// Build a client-role engine.
    pub fn client(
        config: OtpConfig,
        gatt: Arc<dyn GattTransport>,
        channel: Arc<dyn ChannelTransport>,
    ) -> Result<Arc<Self>, OtpError> {
        if config.role != Role::Client {
            return Err(OtpError::InvalidArgument("configuration is not client role"));
        }
        Ok(Self::build(config, gatt, channel, None))
    }

    /// Build a server-role engine over an object store.
    pub fn server(
        config: OtpConfig,
        gatt: Arc<dyn GattTransport>,
        channel: Arc<dyn ChannelTransport>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Arc<Self>, OtpError> {
        if config.role != Role::Server {
            return Err(OtpError::InvalidArgument("configuration is not server role"));
        }
        Ok(Self::build(config, gatt, channel, Some(store)))
    }

    fn build(
        config: OtpConfig,
        gatt: Arc<dyn GattTransport>,
        channel: Arc<dyn ChannelTransport>,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Arc<Self> {
        let config = config.normalized();
        let lock_timeout = config.lock_timeout;
        Arc::new(Self {
            config,
            gatt,
            channel,
            store,
            sessions: SessionGuard::new(DEFAULT_CAPACITY, lock_timeout),
            events: EventSink::new(EVENT_CHANNEL_CAPACITY),
            oacp_decision: RwLock::new(None),
            olcp_decision: RwLock::new(None),
            channel_listening: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Subscribe to procedure outcome events.
    pub fn subscribe(&self) -> broadcast::Receiver<OtpEvent> {
        self.events.subscribe()
    }

    fn client_ready(&self) -> Result<(), OtpError> {
        if self.config.role == Role::Client {
            Ok(())
        } else {
            Err(OtpError::InvalidState("not in client role"))
        }
    }

    fn server_ready(&self) -> Result<(), OtpError> {
        if self.config.role == Role::Server {
            Ok(())
        } else {
            Err(OtpError::InvalidState("not in server role"))
        }
    }

    fn object_store(&self) -> Result<&Arc<dyn ObjectStore>, OtpError> {
        self.store
            .as_ref()
            .ok_or(OtpError::InvalidState("no object store attached"))
    }

    // ------------------------------------------------------------------
    // Characteristic helpers
    // ------------------------------------------------------------------

    async fn read_size_characteristic(&self, conn: ConnHandle) -> Result<ObjectSize, OtpError> {
        let raw = self.gatt.read(conn, ots::object_size_uuid()).await?;
        ObjectSize::from_bytes(&raw)
            .ok_or(OtpError::ProtocolViolation("short Object Size value"))
    }

    async fn read_properties_characteristic(
        &self,
        conn: ConnHandle,
    ) -> Result<ObjectProperties, OtpError> {
        let raw = self.gatt.read(conn, ots::object_properties_uuid()).await?;
        ObjectProperties::from_bytes(&raw)
            .ok_or(OtpError::ProtocolViolation("short Object Properties value"))
    }

    // ------------------------------------------------------------------
    // Client: discovery and metadata
    // ------------------------------------------------------------------

    /// Discover the OTS service: arm control-point and Object Changed
    /// indications, read and cache the Feature bitset. The outcome is
    /// reported via `OtsDiscovered` / `OtsDiscoveryFailed`.
    pub async fn discover_ots(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.client_ready()?;
        {
            let mut table = self.sessions.lock().await?;
            table.get_or_create(conn)?.discovery_state = DiscoveryState::Discovering;
        }

        // Indications must be armed before the first control-point write
        // so no response can be missed.
        for characteristic in [ots::oacp_uuid(), ots::olcp_uuid(), ots::object_changed_uuid()] {
            if let Err(err) = self.gatt.subscribe(conn, characteristic).await {
                log::warn!("subscribe failed for {characteristic}: {err}");
            }
        }

        match self.read_feature(conn).await {
            Ok(feature) => {
                {
                    let mut table = self.sessions.lock().await?;
                    let ctx = table.get_or_create(conn)?;
                    ctx.feature = Some(feature);
                    ctx.discovery_state = DiscoveryState::Discovered;
                }
                self.events.publish(OtpEvent::OtsDiscovered { conn, feature });
            }
            Err(err) => {
                log::warn!("OTS discovery failed on conn {conn}: {err}");
                {
                    let mut table = self.sessions.lock().await?;
                    table.get_or_create(conn)?.discovery_state = DiscoveryState::Failed;
                }
                self.events.publish(OtpEvent::OtsDiscoveryFailed { conn });
            }
        }
        Ok(())
    }

    /// Read the OTS Feature characteristic.
    pub async fn read_feature(&self, conn: ConnHandle) -> Result<OtsFeature, OtpError> {
        self.client_ready()?;
        let raw = self.gatt.read(conn, ots::feature_uuid()).await?;
        OtsFeature::from_bytes(&raw)
            .ok_or(OtpError::ProtocolViolation("short OTS Feature value"))
    }

    /// Read the selected object's metadata characteristics and mark the
    /// metadata Valid. Emits `ObjectSelected` with the snapshot.
    pub async fn read_object_info(&self, conn: ConnHandle) -> Result<ObjectInfo, OtpError> {
        self.client_ready()?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            require_selected(ctx)?;
        }

        let name_raw = self.gatt.read(conn, ots::object_name_uuid()).await?;
        let name = String::from_utf8(name_raw)
            .map_err(|_| OtpError::ProtocolViolation("object name is not valid UTF-8"))?;
        let type_raw = self.gatt.read(conn, ots::object_type_uuid()).await?;
        let object_type = type_raw
            .get(..2)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_le_bytes)
            .ok_or(OtpError::ProtocolViolation("short Object Type value"))?;
        let size = self.read_size_characteristic(conn).await?;
        let id_raw = self.gatt.read(conn, ots::object_id_uuid()).await?;
        let object_id = ObjectId::from_bytes(&id_raw)
            .ok_or(OtpError::ProtocolViolation("short Object ID value"))?;
        let properties = self.read_properties_characteristic(conn).await?;

        // First-Created and Last-Modified are optional characteristics.
        let first_created = match self.gatt.read(conn, ots::first_created_uuid()).await {
            Ok(raw) => OtsDateTime::from_bytes(&raw),
            Err(_) => None,
        };
        let last_modified = match self.gatt.read(conn, ots::last_modified_uuid()).await {
            Ok(raw) => OtsDateTime::from_bytes(&raw),
            Err(_) => None,
        };

        let info = ObjectInfo {
            object_id,
            name,
            object_type,
            size,
            properties,
            first_created,
            last_modified,
        };

        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.object_id = object_id;
            ctx.object_size = size.current;
            ctx.metadata_state = MetadataState::Valid;
        }
        self.events.publish(OtpEvent::ObjectSelected {
            conn,
            info: info.clone(),
        });
        Ok(info)
    }

    /// Write the Object Name metadata. Long writes are not supported.
    pub async fn write_name(&self, conn: ConnHandle, name: &str) -> Result<(), OtpError> {
        self.client_ready()?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            require_selected(ctx)?;
        }
        if name.is_empty() || name.bytes().any(|b| b < 0x20 || b == 0x7F) {
            return Err(OtpError::InvalidArgument(
                "object name must be non-empty and free of control characters",
            ));
        }
        if name.len() > ATT_VALUE_LEN {
            return Err(OtpError::NotSupported("long name writes"));
        }
        self.gatt
            .write(conn, ots::object_name_uuid(), name.as_bytes())
            .await?;
        self.mark_metadata_valid(conn).await
    }

    /// Write the Object Properties metadata.
    pub async fn write_properties(
        &self,
        conn: ConnHandle,
        properties: ObjectProperties,
    ) -> Result<(), OtpError> {
        self.write_metadata(conn, ots::object_properties_uuid(), &properties.to_bytes())
            .await
    }

    /// Write the First-Created metadata. Intended to be written once.
    pub async fn write_first_created(
        &self,
        conn: ConnHandle,
        utc: OtsDateTime,
    ) -> Result<(), OtpError> {
        self.write_metadata(conn, ots::first_created_uuid(), &utc.to_bytes())
            .await
    }

    /// Write the Last-Modified metadata.
    pub async fn write_last_modified(
        &self,
        conn: ConnHandle,
        utc: OtsDateTime,
    ) -> Result<(), OtpError> {
        self.write_metadata(conn, ots::last_modified_uuid(), &utc.to_bytes())
            .await
    }

    async fn write_metadata(
        &self,
        conn: ConnHandle,
        characteristic: uuid::Uuid,
        value: &[u8],
    ) -> Result<(), OtpError> {
        self.client_ready()?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            require_selected(ctx)?;
        }
        self.gatt.write(conn, characteristic, value).await?;
        self.mark_metadata_valid(conn).await
    }

    async fn mark_metadata_valid(&self, conn: ConnHandle) -> Result<(), OtpError> {
        let mut table = self.sessions.lock().await?;
        table.get_or_create(conn)?.metadata_state = MetadataState::Valid;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Client: OLCP procedures
    // ------------------------------------------------------------------

    pub async fn select_first(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.select(conn, OlcpRequest::First, false).await
    }

    pub async fn select_last(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.select(conn, OlcpRequest::Last, false).await
    }

    pub async fn select_previous(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.select(conn, OlcpRequest::Previous, false).await
    }

    pub async fn select_next(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.select(conn, OlcpRequest::Next, false).await
    }

    /// Select an object by ID (OLCP Go-To). Resets any active list
    /// filter to No Filter as a documented side effect.
    pub async fn select_by_id(&self, conn: ConnHandle, id: ObjectId) -> Result<(), OtpError> {
        self.select(conn, OlcpRequest::GoTo(id), false).await
    }

    /// Selection by list index is not part of the profile.
    pub async fn select_by_index(&self, _conn: ConnHandle, _index: u32) -> Result<(), OtpError> {
        self.client_ready()?;
        Err(OtpError::NotSupported("selection by index"))
    }

    async fn select(
        &self,
        conn: ConnHandle,
        request: OlcpRequest,
        directory_listing: bool,
    ) -> Result<(), OtpError> {
        self.client_ready()?;
        let go_to = matches!(request, OlcpRequest::GoTo(_));
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            require_session_free(ctx)?;
            if go_to && !require_feature(ctx)?.olcp.go_to {
                return Err(OtpError::NotSupported("OLCP Go-To"));
            }
        }
        if go_to {
            // Go-To ignores the active filter and resets it to No Filter.
            self.gatt
                .write(conn, ots::list_filter_uuid(), &ObjectFilter::NoFilter.to_bytes())
                .await?;
        }
        self.gatt
            .write(conn, ots::olcp_uuid(), &request.encode())
            .await?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.select_state = SelectState::Selecting { directory_listing };
            if go_to {
                ctx.metadata_state = MetadataState::Unknown;
            }
        }
        Ok(())
    }

    pub async fn set_sort_order(&self, conn: ConnHandle, order: SortOrder) -> Result<(), OtpError> {
        self.olcp_utility(conn, OlcpRequest::Order(order)).await
    }

    pub async fn request_number_of_objects(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.olcp_utility(conn, OlcpRequest::RequestNumberOfObjects)
            .await
    }

    pub async fn clear_marking(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.olcp_utility(conn, OlcpRequest::ClearMarking).await
    }

    async fn olcp_utility(&self, conn: ConnHandle, request: OlcpRequest) -> Result<(), OtpError> {
        self.client_ready()?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            require_session_free(ctx)?;
            let feature = require_feature(ctx)?;
            let supported = match request.opcode() {
                OlcpOpcode::Order => feature.olcp.order,
                OlcpOpcode::RequestNumberOfObjects => feature.olcp.request_number,
                OlcpOpcode::ClearMarking => feature.olcp.clear_marking,
                _ => true,
            };
            if !supported {
                return Err(OtpError::NotSupported("OLCP opcode"));
            }
        }
        self.gatt
            .write(conn, ots::olcp_uuid(), &request.encode())
            .await?;
        Ok(())
    }

    /// Write the Object List Filter characteristic directly.
    pub async fn set_filter(&self, conn: ConnHandle, filter: &ObjectFilter) -> Result<(), OtpError> {
        self.client_ready()?;
        {
            let mut table = self.sessions.lock().await?;
            require_discovered(table.get_or_create(conn)?)?;
        }
        self.gatt
            .write(conn, ots::list_filter_uuid(), &filter.to_bytes())
            .await?;
        Ok(())
    }

    /// Start iterating all objects: reset the filter, then First.
    pub async fn discover_all_start(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.require_olcp_supported(conn).await?;
        self.set_filter(conn, &ObjectFilter::NoFilter).await?;
        self.select_first(conn).await
    }

    /// Step object iteration (OLCP Next).
    pub async fn discover_next(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.require_olcp_supported(conn).await?;
        self.select_next(conn).await
    }

    /// Apply a filter, then select the first match.
    pub async fn discover_by_filter(
        &self,
        conn: ConnHandle,
        filter: &ObjectFilter,
    ) -> Result<(), OtpError> {
        self.require_olcp_supported(conn).await?;
        self.set_filter(conn, filter).await?;
        self.select_first(conn).await
    }

    /// Select the Directory Listing Object (the all-zero reserved ID).
    pub async fn select_directory_listing(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.require_olcp_supported(conn).await?;
        self.select_by_id(conn, ObjectId::DIRECTORY_LISTING).await
    }

    /// Composite: select the Directory Listing Object, and on selection
    /// success read its current size and issue a full Read. The latch is
    /// one-shot and consumed by the next selection success.
    pub async fn read_directory_listing(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.require_olcp_supported(conn).await?;
        self.select(conn, OlcpRequest::GoTo(ObjectId::DIRECTORY_LISTING), true)
            .await
    }

    async fn require_olcp_supported(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.client_ready()?;
        let mut table = self.sessions.lock().await?;
        let ctx = table.get_or_create(conn)?;
        require_discovered(ctx)?;
        if !require_feature(ctx)?.olcp_supported() {
            return Err(OtpError::NotSupported("OLCP"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Client: OACP procedures
    // ------------------------------------------------------------------

    /// Create a new object of the given type and allocated size.
    pub async fn create_object(
        &self,
        conn: ConnHandle,
        object_type: u16,
        size: u32,
    ) -> Result<(), OtpError> {
        self.client_ready()?;
        if size == 0 {
            return Err(OtpError::InvalidArgument("created object size must be nonzero"));
        }
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            require_session_free(ctx)?;
            if !require_feature(ctx)?.oacp.create {
                return Err(OtpError::NotSupported("OACP Create"));
            }
        }
        self.send_oacp_request(conn, &OacpRequest::Create { object_type, size })
            .await
    }

    /// Delete the selected object. Requires the per-object delete
    /// property in addition to the global feature bit.
    pub async fn delete_object(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.client_ready()?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            require_session_free(ctx)?;
            if !require_feature(ctx)?.oacp.delete {
                return Err(OtpError::NotSupported("OACP Delete"));
            }
            require_selected(ctx)?;
            require_metadata_valid(ctx)?;
        }
        let properties = self.read_properties_characteristic(conn).await?;
        if !properties.delete {
            return Err(OtpError::NotSupported("object delete property"));
        }
        self.send_oacp_request(conn, &OacpRequest::Delete).await
    }

    /// Start reading the selected object over the transfer channel.
    /// `length == 0` means "to end of object".
    pub async fn read_object(
        &self,
        conn: ConnHandle,
        offset: u32,
        length: u32,
    ) -> Result<(), OtpError> {
        self.client_ready()?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            require_session_free(ctx)?;
            if !require_feature(ctx)?.oacp.read {
                return Err(OtpError::NotSupported("OACP Read"));
            }
            require_selected(ctx)?;
            require_metadata_valid(ctx)?;
        }

        let request = OacpRequest::Read { offset, length };
        self.gatt
            .write(conn, ots::oacp_uuid(), &request.encode())
            .await?;

        // Zero length reads to the end of the object: resolve the local
        // expected size from the Size characteristic.
        let expected = if length != 0 {
            length
        } else {
            match self.read_size_characteristic(conn).await {
                Ok(size) => size.current,
                Err(_) => OBJECT_SIZE_UNKNOWN,
            }
        };

        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.arm_transfer(TransferDirection::Read, offset);
            ctx.oacp_opcode = Some(OacpOpcode::Read);
            ctx.object_size = expected;
            ctx.session_state = SessionState::Busy;
        }
        self.events.publish(OtpEvent::OacpStarted {
            conn,
            opcode: OacpOpcode::Read,
        });
        Ok(())
    }

    /// Start writing the selected object over the transfer channel.
    /// Mode legality is checked against properties and sizes fetched
    /// fresh at call time, before any control-point traffic.
    pub async fn write_object(
        &self,
        conn: ConnHandle,
        offset: u32,
        length: u32,
        mode: WriteMode,
    ) -> Result<(), OtpError> {
        self.client_ready()?;
        if length == 0 {
            return Err(OtpError::InvalidArgument("write length must be nonzero"));
        }
        let feature = {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            require_session_free(ctx)?;
            let feature = require_feature(ctx)?;
            if !feature.oacp.write {
                return Err(OtpError::NotSupported("OACP Write"));
            }
            require_selected(ctx)?;
            require_metadata_valid(ctx)?;
            feature
        };

        let properties = self.read_properties_characteristic(conn).await?;
        if !properties.write {
            return Err(OtpError::NotSupported("object write property"));
        }
        let size = self.read_size_characteristic(conn).await?;
        if offset > size.current {
            return Err(OtpError::InvalidArgument("write offset beyond current size"));
        }
        let end = offset
            .checked_add(length)
            .ok_or(OtpError::InvalidArgument("write range overflows"))?;
        match mode {
            WriteMode::Append => {
                if !feature.oacp.append {
                    return Err(OtpError::NotSupported("append mode"));
                }
            }
            WriteMode::Truncate => {
                if !feature.oacp.truncate {
                    return Err(OtpError::NotSupported("truncate mode"));
                }
                if end >= size.current {
                    return Err(OtpError::InvalidArgument(
                        "truncate write must land within existing content",
                    ));
                }
            }
            WriteMode::Patch => {
                if !feature.oacp.patch {
                    return Err(OtpError::NotSupported("patch mode"));
                }
                if end >= size.current {
                    return Err(OtpError::InvalidArgument(
                        "patch write must land within existing content",
                    ));
                }
            }
            WriteMode::Overwrite => {
                if end > size.allocated {
                    return Err(OtpError::InvalidArgument("write exceeds allocated size"));
                }
            }
        }

        let request = OacpRequest::Write {
            offset,
            length,
            mode,
        };
        self.gatt
            .write(conn, ots::oacp_uuid(), &request.encode())
            .await?;

        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.arm_transfer(TransferDirection::Write, offset);
            ctx.oacp_opcode = Some(OacpOpcode::Write);
            ctx.object_size = length;
            ctx.session_state = SessionState::Busy;
        }
        self.events.publish(OtpEvent::OacpStarted {
            conn,
            opcode: OacpOpcode::Write,
        });
        Ok(())
    }

    /// Request a checksum over a range of the current object. Used by
    /// the resume procedures to verify partial data.
    pub async fn calculate_checksum(
        &self,
        conn: ConnHandle,
        offset: u32,
        length: u32,
    ) -> Result<(), OtpError> {
        self.client_ready()?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            require_session_free(ctx)?;
            if !require_feature(ctx)?.oacp.calculate_checksum {
                return Err(OtpError::NotSupported("OACP Calculate Checksum"));
            }
        }
        self.send_oacp_request(conn, &OacpRequest::CalculateChecksum { offset, length })
            .await
    }

    /// Resume-read verification step: checksum the already received
    /// range, then continue with `read_object` at the verified offset.
    pub async fn resume_read_checksum(
        &self,
        conn: ConnHandle,
        offset: u32,
        length: u32,
    ) -> Result<(), OtpError> {
        self.calculate_checksum(conn, offset, length).await
    }

    /// Resume-write verification step: checksum the already written
    /// range, then continue with `write_object` for failed regions.
    pub async fn resume_write_checksum(
        &self,
        conn: ConnHandle,
        offset: u32,
        length: u32,
    ) -> Result<(), OtpError> {
        self.calculate_checksum(conn, offset, length).await
    }

    /// Resume a write by the Current Size method: query the current
    /// size and write the remainder from there.
    pub async fn resume_write_current_size(
        &self,
        conn: ConnHandle,
        total_size: u32,
        mode: WriteMode,
    ) -> Result<(), OtpError> {
        self.client_ready()?;
        if total_size == 0 {
            return Err(OtpError::InvalidArgument("total size must be nonzero"));
        }
        {
            let mut table = self.sessions.lock().await?;
            require_discovered(table.get_or_create(conn)?)?;
        }
        let size = self.read_size_characteristic(conn).await?;
        if size.current >= total_size {
            return Err(OtpError::InvalidState("nothing left to resume"));
        }
        self.write_object(conn, size.current, total_size - size.current, mode)
            .await
    }

    /// Execute the selected object. Also used to commit a write after
    /// EOF, which is the one case allowed while the session is busy.
    pub async fn execute_object(
        &self,
        conn: ConnHandle,
        parameters: &[u8],
    ) -> Result<(), OtpError> {
        self.client_ready()?;
        if parameters.len() > EXECUTE_PARAM_MAX {
            return Err(OtpError::InvalidArgument("execute parameters exceed 20 bytes"));
        }
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            require_discovered(ctx)?;
            if !require_feature(ctx)?.oacp.execute {
                return Err(OtpError::NotSupported("OACP Execute"));
            }
            require_selected(ctx)?;
            require_metadata_valid(ctx)?;
            let post_eof_commit = ctx.direction == TransferDirection::Write
                && ctx.transfer_state == TransferState::Eof;
            if ctx.session_state == SessionState::Busy && !post_eof_commit {
                return Err(OtpError::InvalidState("session busy"));
            }
        }
        let properties = self.read_properties_characteristic(conn).await?;
        if !properties.execute {
            return Err(OtpError::NotSupported("object execute property"));
        }
        let request = OacpRequest::Execute {
            parameters: parameters.to_vec(),
        };
        self.gatt
            .write(conn, ots::oacp_uuid(), &request.encode())
            .await?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.transfer_state = TransferState::Executing;
            ctx.oacp_opcode = Some(OacpOpcode::Execute);
        }
        self.events.publish(OtpEvent::OacpStarted {
            conn,
            opcode: OacpOpcode::Execute,
        });
        Ok(())
    }

    /// Abort the current object operation. The `OacpAborted` event fires
    /// only once the Abort response arrives with success.
    pub async fn abort(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.client_ready()?;
        self.gatt
            .write(conn, ots::oacp_uuid(), &OacpRequest::Abort.encode())
            .await?;
        let mut table = self.sessions.lock().await?;
        let ctx = table.get_or_create(conn)?;
        ctx.transfer_state = TransferState::Aborting;
        ctx.oacp_opcode = Some(OacpOpcode::Abort);
        Ok(())
    }

    /// Put a simple OACP request on the wire and mark the exchange
    /// pending. Shared by Create/Delete/Checksum.
    async fn send_oacp_request(
        &self,
        conn: ConnHandle,
        request: &OacpRequest,
    ) -> Result<(), OtpError> {
        let opcode = request.opcode();
        self.gatt
            .write(conn, ots::oacp_uuid(), &request.encode())
            .await?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.transfer_state = TransferState::OacpPending;
            ctx.oacp_opcode = Some(opcode);
            ctx.oacp_result = None;
        }
        self.events.publish(OtpEvent::OacpStarted { conn, opcode });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data plane (both roles)
    // ------------------------------------------------------------------

    /// Send one SDU on an open transfer channel. For a Read in
    /// progress, reaching the object size triggers EOF.
    pub async fn send_data(&self, info: &TransferInfo, data: &[u8]) -> Result<(), OtpError> {
        if data.is_empty() {
            return Err(OtpError::InvalidArgument("empty data"));
        }
        let channel = info
            .channel
            .ok_or(OtpError::InvalidState("transfer channel not open"))?;
        self.channel.send(channel, data).await?;

        let mut events = Vec::new();
        {
            let mut table = self.sessions.lock().await?;
            if let Some(ctx) = table.get(info.conn) {
                ctx.tx_len = ctx.tx_len.saturating_add(data.len() as u32);
                events.push(OtpEvent::DataSent {
                    info: self.info_of(ctx),
                    len: data.len() as u16,
                });
                if ctx.direction == TransferDirection::Read
                    && ctx.size_known()
                    && ctx.tx_len >= ctx.object_size
                    && !ctx.eof.reported()
                {
                    self.mark_eof(ctx, EofReason::BySize, &mut events);
                    self.try_complete(ctx, &mut events);
                }
            }
        }
        self.events.publish_all(events);
        Ok(())
    }

    /// Disconnect the transfer channel. For a Write without a prior
    /// EOF this is the application's end-of-transfer signal.
    pub async fn disconnect_transfer_channel(&self, info: &TransferInfo) -> Result<(), OtpError> {
        let channel = info
            .channel
            .ok_or(OtpError::InvalidArgument("transfer info carries no channel"))?;
        let mut events = Vec::new();
        {
            let mut table = self.sessions.lock().await?;
            if let Some(ctx) = table.get(info.conn) {
                if ctx.direction == TransferDirection::Write && !ctx.eof.reported() {
                    self.mark_eof(ctx, EofReason::ByApp, &mut events);
                    self.try_complete(ctx, &mut events);
                }
                ctx.channel_state = ChannelState::Disconnecting;
            }
        }
        self.events.publish_all(events);
        self.channel.disconnect(channel).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Server operations
    // ------------------------------------------------------------------

    /// Set the OTS Feature bitset exposed by the store.
    pub async fn set_feature(&self, feature: OtsFeature) -> Result<(), OtpError> {
        self.server_ready()?;
        self.object_store()?.set_feature(feature).await?;
        Ok(())
    }

    /// Register the OACP decision capability.
    pub async fn register_oacp_decision(
        &self,
        decision: Arc<dyn OacpDecision>,
    ) -> Result<(), OtpError> {
        self.server_ready()?;
        *self.oacp_decision.write().await = Some(decision);
        Ok(())
    }

    /// Register the OLCP decision capability.
    pub async fn register_olcp_decision(
        &self,
        decision: Arc<dyn OlcpDecision>,
    ) -> Result<(), OtpError> {
        self.server_ready()?;
        *self.olcp_decision.write().await = Some(decision);
        Ok(())
    }

    /// Send an OACP response on behalf of the application.
    pub async fn send_oacp_response(
        &self,
        conn: ConnHandle,
        response: &OacpResponse,
    ) -> Result<(), OtpError> {
        self.server_ready()?;
        if response.parameter.len() > RESPONSE_PARAM_MAX {
            return Err(OtpError::InvalidArgument("oversized OACP response parameter"));
        }
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.oacp_opcode = Some(response.request_opcode);
            ctx.oacp_result = Some(response.result);
        }
        self.object_store()?
            .indicate_oacp_response(&response.encode())
            .await?;
        Ok(())
    }

    /// Send an OLCP response on behalf of the application.
    pub async fn send_olcp_response(
        &self,
        _conn: ConnHandle,
        request_opcode: OlcpOpcode,
        result: OlcpResultCode,
        parameter: &[u8],
    ) -> Result<(), OtpError> {
        self.server_ready()?;
        if parameter.len() > super::olcp::RESPONSE_PARAM_MAX {
            return Err(OtpError::InvalidArgument("oversized OLCP response parameter"));
        }
        self.object_store()?
            .indicate_olcp_response(&OlcpResponse::encode(request_opcode, result, parameter))
            .await?;
        Ok(())
    }

    /// Classify and judge an inbound control-point write (server role).
    ///
    /// Read/Write requests arm direction and byte counters before the
    /// decision capability runs; the verdict is indicated back as the
    /// response.
    pub async fn handle_control_write(
        &self,
        conn: ConnHandle,
        characteristic: uuid::Uuid,
        value: &[u8],
    ) -> Result<(), OtpError> {
        self.server_ready()?;
        if characteristic == ots::oacp_uuid() {
            self.handle_oacp_write(conn, value).await
        } else if characteristic == ots::olcp_uuid() {
            self.handle_olcp_write(conn, value).await
        } else {
            Err(OtpError::InvalidArgument("not a control point characteristic"))
        }
    }

    async fn handle_oacp_write(&self, conn: ConnHandle, value: &[u8]) -> Result<(), OtpError> {
        let request = OacpRequest::decode(value)?;

        // A zero-length Read means "to end of object": resolve against
        // the store's current size before arming the counters.
        let resolved_read_size = match &request {
            OacpRequest::Read { length: 0, .. } => match self.object_store()?.size().await {
                Ok(size) => Some(size.current),
                Err(_) => None,
            },
            _ => None,
        };

        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.oacp_opcode = Some(request.opcode());
            ctx.transfer_state = TransferState::OacpPending;
            match &request {
                OacpRequest::Read { offset, length } => {
                    ctx.arm_transfer(TransferDirection::Read, *offset);
                    ctx.object_size = if *length != 0 {
                        *length
                    } else {
                        resolved_read_size.unwrap_or(OBJECT_SIZE_UNKNOWN)
                    };
                }
                OacpRequest::Write { offset, length, .. } => {
                    ctx.arm_transfer(TransferDirection::Write, *offset);
                    ctx.object_size = *length;
                }
                _ => {}
            }
        }

        let decision = self.oacp_decision.read().await.clone();
        let verdict = match decision {
            Some(decision) => decision.decide(conn, &request).await,
            None => OacpVerdict::reject(OacpResultCode::OpCodeNotSupported),
        };

        {
            let mut table = self.sessions.lock().await?;
            table.get_or_create(conn)?.oacp_result = Some(verdict.result);
        }
        let response = OacpResponse {
            request_opcode: request.opcode(),
            result: verdict.result,
            parameter: verdict.parameter,
        };
        self.object_store()?
            .indicate_oacp_response(&response.encode())
            .await?;
        Ok(())
    }

    async fn handle_olcp_write(&self, conn: ConnHandle, value: &[u8]) -> Result<(), OtpError> {
        let request = OlcpRequest::decode(value)?;
        let decision = self.olcp_decision.read().await.clone();
        let verdict = match decision {
            Some(decision) => decision.decide(conn, &request).await,
            None => OlcpVerdict::reject(OlcpResultCode::OpCodeNotSupported),
        };
        self.object_store()?
            .indicate_olcp_response(&OlcpResponse::encode(
                request.opcode(),
                verdict.result,
                &verdict.parameter,
            ))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connection lifecycle and notifications
    // ------------------------------------------------------------------

    /// Feed a connection-level transport event into the engine.
    pub async fn handle_connection_event(&self, event: ConnectionEvent) -> Result<(), OtpError> {
        match event {
            ConnectionEvent::Connected { conn } => {
                if self.config.role == Role::Server
                    && !self.channel_listening.swap(true, Ordering::SeqCst)
                {
                    if let Err(err) = self
                        .channel
                        .listen(self.config.psm, self.config.channel_mtu)
                        .await
                    {
                        self.channel_listening.store(false, Ordering::SeqCst);
                        log::warn!("transfer channel listen failed: {err}");
                    }
                }
                if self.config.role == Role::Client {
                    let mut table = self.sessions.lock().await?;
                    let ctx = table.get_or_create(conn)?;
                    ctx.select_state = SelectState::None;
                    ctx.metadata_state = MetadataState::Unknown;
                }
                Ok(())
            }
            ConnectionEvent::DiscoveryComplete { conn } => {
                if self.config.role == Role::Client && self.config.auto_discover {
                    self.discover_ots(conn).await?;
                }
                Ok(())
            }
            ConnectionEvent::Disconnected { conn } => {
                let mut table = self.sessions.lock().await?;
                table.remove(conn);
                Ok(())
            }
            ConnectionEvent::Notification {
                conn,
                characteristic,
                value,
            } => self.handle_notification(conn, characteristic, &value).await,
        }
    }

    async fn handle_notification(
        &self,
        conn: ConnHandle,
        characteristic: uuid::Uuid,
        value: &[u8],
    ) -> Result<(), OtpError> {
        if self.config.role != Role::Client {
            return Ok(());
        }
        if characteristic == ots::oacp_uuid() {
            self.handle_oacp_response(conn, value).await
        } else if characteristic == ots::olcp_uuid() {
            self.handle_olcp_response(conn, value).await
        } else if characteristic == ots::object_changed_uuid() {
            self.handle_object_changed(conn, value).await
        } else {
            Ok(())
        }
    }

    async fn handle_object_changed(
        &self,
        conn: ConnHandle,
        value: &[u8],
    ) -> Result<(), OtpError> {
        let Some(change) = ObjectChanged::from_bytes(value) else {
            return Ok(());
        };
        {
            let mut table = self.sessions.lock().await?;
            if let Some(ctx) = table.get(conn) {
                ctx.metadata_state = MetadataState::Stale;
            }
        }
        log::info!(
            "object changed on conn {conn}: id {}",
            change.object_id
        );
        self.events.publish(OtpEvent::ObjectChanged { conn, change });
        Ok(())
    }

    async fn handle_oacp_response(&self, conn: ConnHandle, value: &[u8]) -> Result<(), OtpError> {
        let Some(response) = OacpResponse::decode(value) else {
            return Ok(());
        };
        let mut events = vec![OtpEvent::OacpResponse {
            conn,
            response: response.clone(),
        }];
        let mut start_transfer = false;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.oacp_opcode = Some(response.request_opcode);
            ctx.oacp_result = Some(response.result);
            let success = response.result == OacpResultCode::Success;
            match (response.request_opcode, success) {
                (OacpOpcode::Abort, true) => {
                    ctx.transfer_state = TransferState::Error;
                    ctx.session_state = SessionState::Error;
                    events.push(OtpEvent::OacpAborted {
                        conn,
                        opcode: OacpOpcode::Abort,
                    });
                }
                (OacpOpcode::Read, true) | (OacpOpcode::Write, true) => {
                    ctx.transfer_state = TransferState::OacpAccepted;
                    start_transfer = true;
                }
                (OacpOpcode::Create, true) => {
                    ctx.select_state = SelectState::Selected;
                    ctx.metadata_state = MetadataState::Unknown;
                    ctx.object_id = response.created_id().unwrap_or_default();
                    ctx.object_size = OBJECT_SIZE_UNKNOWN;
                    ctx.session_state = SessionState::Idle;
                }
                (OacpOpcode::Delete, true) => {
                    ctx.select_state = SelectState::None;
                    ctx.metadata_state = MetadataState::Unknown;
                    ctx.object_id = ObjectId::default();
                    ctx.object_size = OBJECT_SIZE_UNKNOWN;
                    ctx.session_state = SessionState::Idle;
                }
                (OacpOpcode::Execute, success) => {
                    ctx.transfer_state = if success {
                        TransferState::Completed
                    } else {
                        TransferState::Error
                    };
                    ctx.session_state = if success {
                        SessionState::Idle
                    } else {
                        SessionState::Error
                    };
                }
                (_, false) => {
                    ctx.transfer_state = TransferState::OacpRejected;
                    self.fail_transfer(ctx, TransferFault::Rejected, &mut events);
                }
                (_, true) => {}
            }
        }
        self.events.publish_all(events);

        if start_transfer {
            if let Err(err) = self.start_transfer(conn).await {
                log::warn!("transfer channel open failed on conn {conn}: {err}");
                let mut events = Vec::new();
                {
                    let mut table = self.sessions.lock().await?;
                    if let Some(ctx) = table.get(conn) {
                        self.fail_transfer(ctx, TransferFault::ChannelFailed, &mut events);
                    }
                }
                self.events.publish_all(events);
            }
        }
        Ok(())
    }

    async fn handle_olcp_response(&self, conn: ConnHandle, value: &[u8]) -> Result<(), OtpError> {
        let Some(response) = OlcpResponse::decode(value) else {
            return Ok(());
        };
        let events = vec![OtpEvent::OlcpResponse {
            conn,
            response: response.clone(),
        }];
        let mut continue_directory_read = false;
        if response.request_opcode.is_selection() {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            if response.result == OlcpResultCode::Success {
                // A success consumes the one-shot directory-listing latch.
                continue_directory_read = matches!(
                    ctx.select_state,
                    SelectState::Selecting {
                        directory_listing: true
                    }
                );
                ctx.select_state = SelectState::Selected;
                ctx.metadata_state = MetadataState::Unknown;
            } else {
                ctx.select_state = SelectState::Error;
            }
        }
        self.events.publish_all(events);

        if continue_directory_read {
            match self.read_size_characteristic(conn).await {
                Ok(size) => {
                    {
                        let mut table = self.sessions.lock().await?;
                        table.get_or_create(conn)?.metadata_state = MetadataState::Valid;
                    }
                    if let Err(err) = self.read_object(conn, 0, size.current).await {
                        log::warn!("directory listing read failed on conn {conn}: {err}");
                    }
                }
                Err(err) => {
                    log::warn!("directory listing size query failed on conn {conn}: {err}");
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transfer channel choreography
    // ------------------------------------------------------------------

    /// Open the data channel after an accepted Read/Write (client side).
    async fn start_transfer(&self, conn: ConnHandle) -> Result<(), OtpError> {
        self.client_ready()?;
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.transfer_state = TransferState::ChannelConnecting;
            ctx.channel_state = ChannelState::Connecting;
            ctx.eof = EofStatus::NotReached;
        }
        let handle = self
            .channel
            .connect(conn, self.config.psm, self.config.channel_mtu)
            .await?;
        let mut table = self.sessions.lock().await?;
        if let Some(ctx) = table.get(conn) {
            ctx.channel = Some(handle);
        }
        Ok(())
    }

    /// Feed a data-channel transport event into the engine.
    pub async fn handle_channel_event(&self, event: ChannelEvent) -> Result<(), OtpError> {
        match event {
            ChannelEvent::Connected {
                conn,
                channel,
                cid,
                status,
            } => self.on_channel_connected(conn, channel, cid, status).await,
            ChannelEvent::AcceptRequest {
                conn,
                channel,
                peer_sdu_size,
            } => self.on_channel_accept(conn, channel, peer_sdu_size).await,
            ChannelEvent::DataReceived { conn, channel, sdu } => {
                self.on_data_received(conn, channel, sdu).await
            }
            ChannelEvent::Disconnected { conn, channel } => {
                self.on_channel_disconnected(conn, channel).await
            }
            ChannelEvent::SendUnstalled { .. } => Ok(()),
        }
    }

    async fn on_channel_connected(
        &self,
        conn: ConnHandle,
        channel: ChannelHandle,
        cid: u16,
        status: i32,
    ) -> Result<(), OtpError> {
        if status != 0 {
            log::warn!("transfer channel connect failed, conn={conn}, status={status}");
            let mut events = Vec::new();
            {
                let mut table = self.sessions.lock().await?;
                if let Some(ctx) = table.get(conn) {
                    self.fail_transfer(ctx, TransferFault::ChannelFailed, &mut events);
                }
            }
            self.events.publish_all(events);
            return Ok(());
        }

        log::info!("transfer channel connected, conn={conn}, cid={cid}");
        let mut events = Vec::new();
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.channel = Some(channel);
            ctx.channel_cid = cid;
            ctx.channel_state = ChannelState::Connected;
            ctx.transfer_state = TransferState::Transferring;
            events.push(OtpEvent::ChannelConnected {
                info: self.info_of(ctx),
            });
        }
        self.events.publish_all(events);
        Ok(())
    }

    async fn on_channel_accept(
        &self,
        conn: ConnHandle,
        channel: ChannelHandle,
        peer_sdu_size: u16,
    ) -> Result<(), OtpError> {
        log::info!("transfer channel accept, conn={conn}, peer_sdu_size={peer_sdu_size}");
        {
            let mut table = self.sessions.lock().await?;
            let ctx = table.get_or_create(conn)?;
            ctx.channel = Some(channel);
            ctx.transfer_state = TransferState::ChannelConnecting;
            ctx.channel_state = ChannelState::Connecting;
        }
        // Access control already happened at the OACP layer; the channel
        // itself is always accepted.
        if let Err(err) = self.channel.accept(channel, peer_sdu_size).await {
            log::warn!("transfer channel accept failed, conn={conn}: {err}");
        }
        Ok(())
    }

    async fn on_data_received(
        &self,
        conn: ConnHandle,
        channel: ChannelHandle,
        sdu: Bytes,
    ) -> Result<(), OtpError> {
        let mut events = Vec::new();
        {
            let mut table = self.sessions.lock().await?;
            if let Some(ctx) = table.get(conn) {
                let mut violation = false;
                if matches!(
                    ctx.direction,
                    TransferDirection::Read | TransferDirection::Write
                ) {
                    match ctx.rx_len.checked_add(sdu.len() as u32) {
                        // The counter would wrap: reject, never truncate.
                        None => {
                            self.fail_transfer(ctx, TransferFault::ProtocolViolation, &mut events);
                            violation = true;
                        }
                        Some(new_rx) if ctx.size_known() && new_rx > ctx.object_size => {
                            self.fail_transfer(ctx, TransferFault::ProtocolViolation, &mut events);
                            violation = true;
                        }
                        Some(new_rx) => ctx.rx_len = new_rx,
                    }
                }

                if !violation {
                    let info = self.info_of(ctx);
                    let total_len = sdu.len() as u16;
                    if sdu.is_empty() {
                        events.push(OtpEvent::DataReceived {
                            info,
                            data: sdu.clone(),
                            chunk_offset: 0,
                            total_len: 0,
                        });
                    } else {
                        // Re-chunk large SDUs; each chunk carries its
                        // offset within the SDU and the SDU's length.
                        let mut offset = 0usize;
                        while offset < sdu.len() {
                            let end = (offset + EVENT_DATA_MAX_LEN).min(sdu.len());
                            events.push(OtpEvent::DataReceived {
                                info: info.clone(),
                                data: sdu.slice(offset..end),
                                chunk_offset: offset as u16,
                                total_len,
                            });
                            offset = end;
                        }
                    }

                    if matches!(
                        ctx.direction,
                        TransferDirection::Read | TransferDirection::Write
                    ) && ctx.size_known()
                        && ctx.rx_len == ctx.object_size
                        && !ctx.eof.reported()
                    {
                        self.mark_eof(ctx, EofReason::BySize, &mut events);
                        self.try_complete(ctx, &mut events);
                    }
                }
            }
        }
        self.events.publish_all(events);

        if let Err(err) = self
            .channel
            .recv_ready(channel, self.config.channel_mtu)
            .await
        {
            log::warn!("recv_ready failed, conn={conn}: {err}");
        }
        Ok(())
    }

    async fn on_channel_disconnected(
        &self,
        conn: ConnHandle,
        _channel: ChannelHandle,
    ) -> Result<(), OtpError> {
        log::info!("transfer channel disconnected, conn={conn}");
        let mut events = Vec::new();
        {
            let mut table = self.sessions.lock().await?;
            if let Some(ctx) = table.get(conn) {
                ctx.channel = None;
                ctx.channel_state = ChannelState::Idle;
                let aborting = ctx.transfer_state == TransferState::Aborting;
                match ctx.direction {
                    TransferDirection::Read => {
                        // Final-chunk/disconnect race: if all bytes of a
                        // known size were already exchanged, synthesize
                        // the size-based EOF here.
                        if !ctx.eof.reported()
                            && ctx.size_known()
                            && (ctx.tx_len >= ctx.object_size || ctx.rx_len >= ctx.object_size)
                        {
                            self.mark_eof(ctx, EofReason::BySize, &mut events);
                        }
                        if ctx.eof == EofStatus::Reported(EofReason::BySize) {
                            self.try_complete(ctx, &mut events);
                        } else if !aborting {
                            self.fail_transfer(ctx, TransferFault::ProtocolViolation, &mut events);
                        }
                    }
                    TransferDirection::Write => {
                        if ctx.eof == EofStatus::Reported(EofReason::ByApp) {
                            self.try_complete(ctx, &mut events);
                        } else if !ctx.eof.reported() && !aborting {
                            self.fail_transfer(ctx, TransferFault::ProtocolViolation, &mut events);
                        }
                    }
                    TransferDirection::None => {}
                }
                events.push(OtpEvent::ChannelDisconnected {
                    info: self.info_of(ctx),
                });
            }
        }
        self.events.publish_all(events);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared state transitions (run under the session lock; events are
    // collected and published by the caller after release)
    // ------------------------------------------------------------------

    fn info_of(&self, ctx: &TransferContext) -> TransferInfo {
        ctx.transfer_info(self.config.psm, self.config.channel_mtu)
    }

    fn mark_eof(&self, ctx: &mut TransferContext, reason: EofReason, events: &mut Vec<OtpEvent>) {
        ctx.eof = EofStatus::Reported(reason);
        ctx.transfer_state = TransferState::Eof;
        ctx.session_state = SessionState::Busy;
        events.push(OtpEvent::TransferEof {
            info: self.info_of(ctx),
            reason,
        });
    }

    fn try_complete(&self, ctx: &mut TransferContext, events: &mut Vec<OtpEvent>) {
        if ctx.transfer_state == TransferState::Completed
            || !ctx.eof.reported()
            || ctx.oacp_result != Some(OacpResultCode::Success)
        {
            return;
        }
        if !matches!(
            ctx.direction,
            TransferDirection::Read | TransferDirection::Write
        ) {
            return;
        }
        ctx.transfer_state = TransferState::Completed;
        ctx.session_state = SessionState::Idle;
        events.push(OtpEvent::TransferComplete {
            info: self.info_of(ctx),
            success: true,
        });
    }

    fn fail_transfer(
        &self,
        ctx: &mut TransferContext,
        fault: TransferFault,
        events: &mut Vec<OtpEvent>,
    ) {
        ctx.transfer_state = TransferState::Error;
        ctx.session_state = SessionState::Error;
        events.push(OtpEvent::TransferError {
            info: self.info_of(ctx),
            fault,
        });
    }
}

fn require_discovered(ctx: &TransferContext) -> Result<(), OtpError> {
    if ctx.discovery_state == DiscoveryState::Discovered {
        Ok(())
    } else {
        Err(OtpError::InvalidState("OTS not discovered"))
    }
}

fn require_feature(ctx: &TransferContext) -> Result<OtsFeature, OtpError> {
    ctx.feature
        .ok_or(OtpError::InvalidState("OTS feature not read"))
}

fn require_selected(ctx: &TransferContext) -> Result<(), OtpError> {
    if ctx.select_state == SelectState::Selected {
        Ok(())
    } else {
        Err(OtpError::InvalidState("no object selected"))
    }
}

fn require_metadata_valid(ctx: &TransferContext) -> Result<(), OtpError> {
    if ctx.metadata_state == MetadataState::Valid {
        Ok(())
    } else {
        Err(OtpError::InvalidState("object metadata not valid"))
    }
}

fn require_session_free(ctx: &TransferContext) -> Result<(), OtpError> {
    if ctx.session_state == SessionState::Busy {
        Err(OtpError::InvalidState("session busy"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ots::memory::MemoryObjectStore;
    use crate::transport::simulated::{SimChannel, SimGatt};

    fn client_engine() -> Arc<OtpEngine> {
        OtpEngine::client(
            OtpConfig::client(),
            Arc::new(SimGatt::new()),
            Arc::new(SimChannel::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_role_mismatch_rejected_at_build() {
        let gatt = Arc::new(SimGatt::new());
        let channel = Arc::new(SimChannel::new());
        assert!(OtpEngine::client(OtpConfig::server(), gatt.clone(), channel.clone()).is_err());
        assert!(OtpEngine::server(
            OtpConfig::client(),
            gatt,
            channel,
            Arc::new(MemoryObjectStore::new())
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_client_op_in_wrong_role() {
        let engine = OtpEngine::server(
            OtpConfig::server(),
            Arc::new(SimGatt::new()),
            Arc::new(SimChannel::new()),
            Arc::new(MemoryObjectStore::new()),
        )
        .unwrap();
        assert!(matches!(
            engine.select_first(1).await,
            Err(OtpError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_select_requires_discovery() {
        let engine = client_engine();
        assert!(matches!(
            engine.select_first(1).await,
            Err(OtpError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_select_by_index_unsupported() {
        let engine = client_engine();
        assert!(matches!(
            engine.select_by_index(1, 3).await,
            Err(OtpError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_execute_parameters_rejected() {
        let engine = client_engine();
        let params = [0u8; EXECUTE_PARAM_MAX + 1];
        assert!(matches!(
            engine.execute_object(1, &params).await,
            Err(OtpError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_non_response_pdu_ignored() {
        let engine = client_engine();
        // A request opcode on the response path is not a response PDU.
        engine.handle_oacp_response(1, &[0x05, 0x00, 0x00]).await.unwrap();
        engine.handle_olcp_response(1, &[0x01]).await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_commit_allowed_only_in_post_eof_write_window() {
        use crate::ots::types::{OacpFeatures, ObjectProperties};

        let gatt = Arc::new(SimGatt::new());
        let engine = OtpEngine::client(
            OtpConfig::client(),
            gatt.clone(),
            Arc::new(SimChannel::new()),
        )
        .unwrap();
        gatt.set_value(
            ots::object_properties_uuid(),
            ObjectProperties {
                execute: true,
                ..Default::default()
            }
            .to_bytes()
            .to_vec(),
        )
        .await;

        let seed = |ctx: &mut TransferContext, state: TransferState| {
            ctx.discovery_state = DiscoveryState::Discovered;
            ctx.feature = Some(OtsFeature {
                oacp: OacpFeatures {
                    execute: true,
                    ..Default::default()
                },
                ..Default::default()
            });
            ctx.select_state = SelectState::Selected;
            ctx.metadata_state = MetadataState::Valid;
            ctx.session_state = SessionState::Busy;
            ctx.direction = TransferDirection::Write;
            ctx.transfer_state = state;
        };

        // Busy session, write at EOF: the commit window is open.
        {
            let mut table = engine.sessions.lock().await.unwrap();
            seed(table.get_or_create(1).unwrap(), TransferState::Eof);
        }
        engine.execute_object(1, &[]).await.unwrap();

        // Busy session mid-transfer: rejected.
        {
            let mut table = engine.sessions.lock().await.unwrap();
            seed(table.get_or_create(1).unwrap(), TransferState::Transferring);
        }
        assert!(matches!(
            engine.execute_object(1, &[]).await,
            Err(OtpError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_read_disconnect_race_synthesizes_size_eof() {
        let engine = client_engine();
        let mut rx = engine.subscribe();
        // All bytes of a known size already went out, but the size EOF
        // never fired before the disconnect arrived.
        {
            let mut table = engine.sessions.lock().await.unwrap();
            let ctx = table.get_or_create(1).unwrap();
            ctx.direction = TransferDirection::Read;
            ctx.object_size = 100;
            ctx.tx_len = 100;
            ctx.oacp_result = Some(OacpResultCode::Success);
            ctx.transfer_state = TransferState::Transferring;
            ctx.session_state = SessionState::Busy;
            ctx.channel = Some(uuid::Uuid::new_v4());
        }
        engine
            .handle_channel_event(ChannelEvent::Disconnected {
                conn: 1,
                channel: uuid::Uuid::new_v4(),
            })
            .await
            .unwrap();

        let (mut eof, mut complete, mut errors) = (0, 0, 0);
        while let Ok(event) = rx.try_recv() {
            match event {
                OtpEvent::TransferEof { .. } => eof += 1,
                OtpEvent::TransferComplete { .. } => complete += 1,
                OtpEvent::TransferError { .. } => errors += 1,
                _ => {}
            }
        }
        assert_eq!((eof, complete, errors), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_server_without_decision_rejects() {
        let store = Arc::new(MemoryObjectStore::new());
        let engine = OtpEngine::server(
            OtpConfig::server(),
            Arc::new(SimGatt::new()),
            Arc::new(SimChannel::new()),
            store.clone(),
        )
        .unwrap();
        engine
            .handle_control_write(1, ots::olcp_uuid(), &OlcpRequest::First.encode())
            .await
            .unwrap();
        let indications = store.olcp_indications().await;
        assert_eq!(indications.len(), 1);
        assert_eq!(
            indications[0],
            vec![0x70, 0x01, OlcpResultCode::OpCodeNotSupported as u8]
        );
    }
}
