//! Per-connection transfer context
//!
//! One `TransferContext` tracks everything the engine knows about a
//! connection: discovery, selection and metadata validity, the governing
//! control-point exchange, and the data-channel byte counters. Contexts
//! are owned exclusively by the session table guard.

use crate::ots::types::{ObjectId, OtsFeature, OBJECT_SIZE_UNKNOWN};
use crate::transport::channel::ChannelHandle;
use crate::transport::gatt::ConnHandle;

use super::oacp::{OacpOpcode, OacpResultCode};

/// Direction of the transfer in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransferDirection {
    #[default]
    None,
    Read,
    Write,
}

/// Procedure state machine for the governing OACP exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransferState {
    #[default]
    Idle,
    OacpPending,
    OacpAccepted,
    OacpRejected,
    ChannelConnecting,
    Transferring,
    Eof,
    Aborting,
    Executing,
    Completed,
    Error,
}

/// Why end-of-transfer was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofReason {
    /// All bytes of a known object size were exchanged.
    BySize,
    /// The application closed a write before a size-based EOF.
    ByApp,
}

/// End-of-transfer status. Reported at most once per operation; the
/// reason travels with the report so the two cannot drift apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EofStatus {
    #[default]
    NotReached,
    Reported(EofReason),
}

impl EofStatus {
    pub fn reported(&self) -> bool {
        matches!(self, EofStatus::Reported(_))
    }
}

/// OTS service discovery state; gates all OACP/OLCP use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiscoveryState {
    #[default]
    Idle,
    Discovering,
    Discovered,
    Failed,
}

/// Object selection state, driven by OLCP exchanges. The one-shot
/// directory-listing latch rides on the `Selecting` arm and is consumed
/// by the next selection success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectState {
    #[default]
    None,
    Selecting { directory_listing: bool },
    Selected,
    Error,
}

/// Metadata validity. Only an explicit metadata read/write makes it
/// Valid; Object Changed notifications make it Stale, a new selection
/// makes it Unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataState {
    #[default]
    Unknown,
    Valid,
    Stale,
}

/// Data channel lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

/// Whether a new control-point procedure may start on this connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Busy,
    Error,
}

/// Snapshot describing the transfer channel of an operation, carried by
/// events so handlers can address the channel without the session lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub channel: Option<ChannelHandle>,
    pub cid: u16,
    pub conn: ConnHandle,
    pub psm: u16,
    pub mtu: u16,
    pub object_id: ObjectId,
    pub is_read: bool,
}

/// Everything the engine tracks for one connection.
#[derive(Debug, Clone, Default)]
pub struct TransferContext {
    pub conn: ConnHandle,
    pub channel: Option<ChannelHandle>,
    pub channel_cid: u16,

    pub object_id: ObjectId,
    pub object_size: u32,
    pub object_offset: u32,

    pub direction: TransferDirection,
    pub tx_len: u32,
    pub rx_len: u32,

    pub transfer_state: TransferState,
    pub eof: EofStatus,

    pub oacp_opcode: Option<OacpOpcode>,
    pub oacp_result: Option<OacpResultCode>,

    pub discovery_state: DiscoveryState,
    pub select_state: SelectState,
    pub metadata_state: MetadataState,
    pub channel_state: ChannelState,
    pub session_state: SessionState,

    /// Feature bitset cached by discovery; `None` until read.
    pub feature: Option<OtsFeature>,
}

impl TransferContext {
    pub fn new(conn: ConnHandle) -> Self {
        Self {
            conn,
            object_size: OBJECT_SIZE_UNKNOWN,
            ..Default::default()
        }
    }

    /// Arm the context for a fresh Read/Write procedure.
    pub fn arm_transfer(&mut self, direction: TransferDirection, offset: u32) {
        self.direction = direction;
        self.object_offset = offset;
        self.tx_len = 0;
        self.rx_len = 0;
        self.eof = EofStatus::NotReached;
        self.oacp_result = None;
        self.transfer_state = TransferState::OacpPending;
    }

    pub fn size_known(&self) -> bool {
        self.object_size != OBJECT_SIZE_UNKNOWN
    }

    pub fn transfer_info(&self, psm: u16, mtu: u16) -> TransferInfo {
        TransferInfo {
            channel: self.channel,
            cid: self.channel_cid,
            conn: self.conn,
            psm,
            mtu,
            object_id: self.object_id,
            is_read: self.direction == TransferDirection::Read,
        }
    }
}
