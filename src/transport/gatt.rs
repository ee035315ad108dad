//! GATT characteristic transport trait and connection events
//!
//! The engine never talks to a BLE stack directly; it drives an abstract
//! characteristic transport (read, write, subscribe) and is fed connection
//! lifecycle and notification events by whoever owns the stack.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use super::TransportError;

/// BLE connection handle. Handle 0 is reserved and never refers to a
/// live connection.
pub type ConnHandle = u16;

/// Expand a 16-bit Bluetooth SIG assigned number against the Bluetooth
/// Base UUID (0000xxxx-0000-1000-8000-00805F9B34FB).
pub fn sig_uuid16(short: u16) -> Uuid {
    const BLUETOOTH_BASE: u128 = 0x0000_0000_0000_1000_8000_00805F9B34FB;
    Uuid::from_u128(BLUETOOTH_BASE | ((short as u128) << 96))
}

/// Abstract GATT client transport.
///
/// Reads and writes address characteristics by UUID on an established
/// connection. `subscribe` arms indications/notifications for a
/// characteristic; the resulting values arrive as
/// [`ConnectionEvent::Notification`].
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Read a characteristic value.
    async fn read(&self, conn: ConnHandle, characteristic: Uuid) -> Result<Vec<u8>, TransportError>;

    /// Write a characteristic value.
    async fn write(
        &self,
        conn: ConnHandle,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Subscribe to indications/notifications for a characteristic.
    async fn subscribe(&self, conn: ConnHandle, characteristic: Uuid)
        -> Result<(), TransportError>;
}

/// Connection-level events delivered by the transport owner.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A BLE connection was established.
    Connected { conn: ConnHandle },
    /// Service discovery on the connection finished.
    DiscoveryComplete { conn: ConnHandle },
    /// The BLE connection dropped.
    Disconnected { conn: ConnHandle },
    /// An indication/notification arrived for a subscribed characteristic.
    Notification {
        conn: ConnHandle,
        characteristic: Uuid,
        value: Bytes,
    },
}
