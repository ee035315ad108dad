// ble-otp - Object Transfer Profile engine

pub mod ots;
pub mod otp;
pub mod transport;
