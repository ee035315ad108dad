//! Transport boundary for the OTP engine
//!
//! Defines the abstract GATT characteristic transport and the
//! connection-oriented data channel transport that the engine drives,
//! plus simulated in-process implementations for testing.

pub mod channel;
pub mod gatt;
pub mod simulated;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Characteristic {0} not found")]
    UnknownCharacteristic(Uuid),

    #[error("Write rejected: {0}")]
    WriteRejected(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Payload exceeds MTU ({size} > {mtu})")]
    MtuExceeded { size: usize, mtu: usize },

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Operation timed out")]
    Timeout,
}
