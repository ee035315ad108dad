//! OTP engine error taxonomy

use std::time::Duration;

use thiserror::Error;

use crate::ots::StoreError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum OtpError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Not supported: {0}")]
    NotSupported(&'static str),

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Object store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Session lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(&'static str),
}

/// Fault kind carried by `TransferError` events. Cheap to clone so it can
/// ride the broadcast channel alongside the transfer info snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFault {
    /// The peer rejected the governing control-point request.
    Rejected,
    /// The data channel could not be opened.
    ChannelFailed,
    /// Received bytes exceed the agreed object size, a byte counter would
    /// wrap, or the channel dropped outside any valid end-of-transfer
    /// route.
    ProtocolViolation,
}
