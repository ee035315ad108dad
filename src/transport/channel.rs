//! Data channel transport trait and channel events
//!
//! The object transfer channel is a connection-oriented channel (L2CAP
//! CoC in a real stack) opened after an accepted OACP Read/Write. The
//! engine initiates connects and accepts through this trait and is fed
//! the resulting lifecycle and data events.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use super::gatt::ConnHandle;
use super::TransportError;

/// Opaque handle for one open data channel.
pub type ChannelHandle = Uuid;

/// Abstract connection-oriented data channel transport.
///
/// `connect` and `accept` initiate asynchronously; completion arrives as
/// [`ChannelEvent::Connected`]. `recv_ready` grants receive credit back
/// to the transport after an inbound SDU has been consumed.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Start listening for inbound channel connections on a PSM
    /// (server side). Idempotent per PSM.
    async fn listen(&self, psm: u16, mtu: u16) -> Result<(), TransportError>;

    /// Initiate an outbound channel connection (client side).
    async fn connect(
        &self,
        conn: ConnHandle,
        psm: u16,
        mtu: u16,
    ) -> Result<ChannelHandle, TransportError>;

    /// Accept an inbound channel connection request.
    async fn accept(&self, channel: ChannelHandle, peer_sdu_size: u16)
        -> Result<(), TransportError>;

    /// Send one SDU on an open channel.
    async fn send(&self, channel: ChannelHandle, data: &[u8]) -> Result<(), TransportError>;

    /// Grant receive credit after consuming an inbound SDU.
    async fn recv_ready(&self, channel: ChannelHandle, credits: u16)
        -> Result<(), TransportError>;

    /// Disconnect an open channel.
    async fn disconnect(&self, channel: ChannelHandle) -> Result<(), TransportError>;
}

/// Data channel events delivered by the transport owner.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A connect attempt finished. `status == 0` means connected.
    Connected {
        conn: ConnHandle,
        channel: ChannelHandle,
        cid: u16,
        status: i32,
    },
    /// A peer requests an inbound channel connection (server side).
    AcceptRequest {
        conn: ConnHandle,
        channel: ChannelHandle,
        peer_sdu_size: u16,
    },
    /// The channel dropped.
    Disconnected {
        conn: ConnHandle,
        channel: ChannelHandle,
    },
    /// One inbound SDU arrived.
    DataReceived {
        conn: ConnHandle,
        channel: ChannelHandle,
        sdu: Bytes,
    },
    /// Outbound flow control unstalled.
    SendUnstalled {
        conn: ConnHandle,
        channel: ChannelHandle,
    },
}
