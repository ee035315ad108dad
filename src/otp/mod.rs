//! Object Transfer Profile engine
//!
//! The procedure state machine behind the Object Action Control Point and
//! Object List Control Point, the transfer-channel choreography that moves
//! object bytes, and the per-connection session state that ties the two
//! planes together.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod oacp;
pub mod olcp;
pub mod table;

pub use self::config::{OtpConfig, Role};
pub use self::context::{EofReason, TransferInfo};
pub use self::engine::{OacpDecision, OacpVerdict, OlcpDecision, OlcpVerdict, OtpEngine};
pub use self::error::{OtpError, TransferFault};
pub use self::events::OtpEvent;
pub use self::oacp::WriteMode;
