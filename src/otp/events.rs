//! OTP event surface
//!
//! Procedure outcomes are delivered asynchronously as tagged events on a
//! broadcast channel. Each variant carries exactly the payload for its
//! kind, so a listener can never read the wrong arm.

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::ots::types::{ObjectChanged, ObjectInfo, OtsFeature};
use crate::transport::gatt::ConnHandle;

use super::context::{EofReason, TransferInfo};
use super::error::TransferFault;
use super::oacp::{OacpOpcode, OacpResponse};
use super::olcp::OlcpResponse;

/// Largest payload delivered in a single `DataReceived` event. Larger
/// inbound SDUs are re-chunked with offset annotations so receivers can
/// reassemble without ambiguity.
pub const EVENT_DATA_MAX_LEN: usize = 255;

#[derive(Debug, Clone)]
pub enum OtpEvent {
    /// OTS discovery finished; the feature bitset is cached.
    OtsDiscovered {
        conn: ConnHandle,
        feature: OtsFeature,
    },
    OtsDiscoveryFailed {
        conn: ConnHandle,
    },
    /// The selected object's metadata was read.
    ObjectSelected {
        conn: ConnHandle,
        info: ObjectInfo,
    },
    /// The server announced an object change.
    ObjectChanged {
        conn: ConnHandle,
        change: ObjectChanged,
    },
    /// A control-point request went out.
    OacpStarted {
        conn: ConnHandle,
        opcode: OacpOpcode,
    },
    /// An Abort request was confirmed by the peer.
    OacpAborted {
        conn: ConnHandle,
        opcode: OacpOpcode,
    },
    OacpResponse {
        conn: ConnHandle,
        response: OacpResponse,
    },
    OlcpResponse {
        conn: ConnHandle,
        response: OlcpResponse,
    },
    ChannelConnected {
        info: TransferInfo,
    },
    ChannelDisconnected {
        info: TransferInfo,
    },
    /// One chunk of an inbound SDU. `chunk_offset` is the chunk's byte
    /// offset within the SDU; `total_len` is the full SDU length.
    DataReceived {
        info: TransferInfo,
        data: Bytes,
        chunk_offset: u16,
        total_len: u16,
    },
    DataSent {
        info: TransferInfo,
        len: u16,
    },
    /// End of transfer, reported at most once per operation.
    TransferEof {
        info: TransferInfo,
        reason: EofReason,
    },
    /// Read/Write finished after EOF with a successful control-point
    /// result. Fires at most once per operation.
    TransferComplete {
        info: TransferInfo,
        success: bool,
    },
    TransferError {
        info: TransferInfo,
        fault: TransferFault,
    },
}

/// Broadcast sink for engine events. Publishing is fire-and-forget;
/// a missing receiver is not an error.
pub struct EventSink {
    tx: broadcast::Sender<OtpEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OtpEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: OtpEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a batch collected under the session lock, strictly after
    /// the lock was released.
    pub fn publish_all(&self, events: Vec<OtpEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_receiver_is_silent() {
        let sink = EventSink::new(8);
        sink.publish(OtpEvent::OtsDiscoveryFailed { conn: 1 });
    }

    #[tokio::test]
    async fn test_publish_all_preserves_order() {
        let sink = EventSink::new(8);
        let mut rx = sink.subscribe();
        sink.publish_all(vec![
            OtpEvent::OtsDiscoveryFailed { conn: 1 },
            OtpEvent::OtsDiscoveryFailed { conn: 2 },
        ]);
        assert!(matches!(
            rx.recv().await.unwrap(),
            OtpEvent::OtsDiscoveryFailed { conn: 1 }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            OtpEvent::OtsDiscoveryFailed { conn: 2 }
        ));
    }
}
