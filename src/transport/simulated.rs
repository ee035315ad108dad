//! In-process simulated transports
//!
//! Recording test doubles for the GATT and data-channel transports.
//! Characteristic values are programmable, all outbound traffic is
//! captured, and channel handles are allocated locally, so tests can
//! drive the engine deterministically without a radio stack.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::channel::{ChannelHandle, ChannelTransport};
use super::gatt::{ConnHandle, GattTransport};
use super::TransportError;

/// A captured characteristic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub conn: ConnHandle,
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

/// Simulated GATT transport backed by a programmable value table.
///
/// Reads return the programmed value for a characteristic (or
/// `UnknownCharacteristic`), writes are recorded and also update the
/// table, subscriptions are recorded.
#[derive(Default)]
pub struct SimGatt {
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    writes: Mutex<Vec<RecordedWrite>>,
    subscriptions: Mutex<HashSet<Uuid>>,
}

impl SimGatt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program the value returned by subsequent reads of a characteristic.
    pub async fn set_value(&self, characteristic: Uuid, value: Vec<u8>) {
        self.values.lock().await.insert(characteristic, value);
    }

    /// Remove a characteristic so reads of it fail.
    pub async fn clear_value(&self, characteristic: Uuid) {
        self.values.lock().await.remove(&characteristic);
    }

    /// Current value of a characteristic, if any.
    pub async fn value(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        self.values.lock().await.get(&characteristic).cloned()
    }

    /// All captured writes, oldest first.
    pub async fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().await.clone()
    }

    /// Drain the captured writes.
    pub async fn take_writes(&self) -> Vec<RecordedWrite> {
        std::mem::take(&mut *self.writes.lock().await)
    }

    /// Whether a subscription was armed for a characteristic.
    pub async fn subscribed(&self, characteristic: Uuid) -> bool {
        self.subscriptions.lock().await.contains(&characteristic)
    }
}

#[async_trait]
impl GattTransport for SimGatt {
    async fn read(&self, _conn: ConnHandle, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        self.values
            .lock()
            .await
            .get(&characteristic)
            .cloned()
            .ok_or(TransportError::UnknownCharacteristic(characteristic))
    }

    async fn write(
        &self,
        conn: ConnHandle,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.writes.lock().await.push(RecordedWrite {
            conn,
            characteristic,
            value: value.to_vec(),
        });
        self.values
            .lock()
            .await
            .insert(characteristic, value.to_vec());
        Ok(())
    }

    async fn subscribe(
        &self,
        _conn: ConnHandle,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.subscriptions.lock().await.insert(characteristic);
        Ok(())
    }
}

/// A captured channel send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSend {
    pub channel: ChannelHandle,
    pub data: Vec<u8>,
}

/// Simulated data-channel transport.
///
/// Connects allocate a fresh handle; sends, accepts, credit grants and
/// disconnects are captured for inspection. Connection completion is
/// driven by the test delivering [`ChannelEvent`]s to the engine.
#[derive(Default)]
pub struct SimChannel {
    listening: Mutex<Vec<(u16, u16)>>,
    connects: Mutex<Vec<(ConnHandle, u16, u16, ChannelHandle)>>,
    accepts: Mutex<Vec<(ChannelHandle, u16)>>,
    sends: Mutex<Vec<RecordedSend>>,
    credits: Mutex<Vec<(ChannelHandle, u16)>>,
    disconnects: Mutex<Vec<ChannelHandle>>,
    fail_connect: Mutex<bool>,
}

impl SimChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connect attempts fail at the transport layer.
    pub async fn set_fail_connect(&self, fail: bool) {
        *self.fail_connect.lock().await = fail;
    }

    pub async fn listens(&self) -> Vec<(u16, u16)> {
        self.listening.lock().await.clone()
    }

    /// Connect attempts as (conn, psm, mtu, allocated handle).
    pub async fn connects(&self) -> Vec<(ConnHandle, u16, u16, ChannelHandle)> {
        self.connects.lock().await.clone()
    }

    pub async fn accepts(&self) -> Vec<(ChannelHandle, u16)> {
        self.accepts.lock().await.clone()
    }

    pub async fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().await.clone()
    }

    pub async fn credits(&self) -> Vec<(ChannelHandle, u16)> {
        self.credits.lock().await.clone()
    }

    pub async fn disconnects(&self) -> Vec<ChannelHandle> {
        self.disconnects.lock().await.clone()
    }
}

#[async_trait]
impl ChannelTransport for SimChannel {
    async fn listen(&self, psm: u16, mtu: u16) -> Result<(), TransportError> {
        self.listening.lock().await.push((psm, mtu));
        Ok(())
    }

    async fn connect(
        &self,
        conn: ConnHandle,
        psm: u16,
        mtu: u16,
    ) -> Result<ChannelHandle, TransportError> {
        if *self.fail_connect.lock().await {
            return Err(TransportError::ChannelError(
                "simulated connect failure".to_string(),
            ));
        }
        let handle = Uuid::new_v4();
        self.connects.lock().await.push((conn, psm, mtu, handle));
        Ok(handle)
    }

    async fn accept(
        &self,
        channel: ChannelHandle,
        peer_sdu_size: u16,
    ) -> Result<(), TransportError> {
        self.accepts.lock().await.push((channel, peer_sdu_size));
        Ok(())
    }

    async fn send(&self, channel: ChannelHandle, data: &[u8]) -> Result<(), TransportError> {
        self.sends.lock().await.push(RecordedSend {
            channel,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn recv_ready(&self, channel: ChannelHandle, credits: u16) -> Result<(), TransportError> {
        self.credits.lock().await.push((channel, credits));
        Ok(())
    }

    async fn disconnect(&self, channel: ChannelHandle) -> Result<(), TransportError> {
        self.disconnects.lock().await.push(channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::gatt::sig_uuid16;

    #[tokio::test]
    async fn test_sim_gatt_read_write() {
        let gatt = SimGatt::new();
        let chr = sig_uuid16(0x2ABD);

        assert!(gatt.read(1, chr).await.is_err());

        gatt.set_value(chr, vec![0x01, 0x02]).await;
        assert_eq!(gatt.read(1, chr).await.unwrap(), vec![0x01, 0x02]);

        gatt.write(1, chr, &[0x03]).await.unwrap();
        assert_eq!(gatt.read(1, chr).await.unwrap(), vec![0x03]);
        assert_eq!(gatt.writes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sim_channel_connect_allocates_handles() {
        let chan = SimChannel::new();
        let a = chan.connect(1, 0x25, 512).await.unwrap();
        let b = chan.connect(1, 0x25, 512).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(chan.connects().await.len(), 2);
    }

    #[tokio::test]
    async fn test_sim_channel_connect_failure() {
        let chan = SimChannel::new();
        chan.set_fail_connect(true).await;
        assert!(chan.connect(1, 0x25, 512).await.is_err());
        assert!(chan.connects().await.is_empty());
    }
}
