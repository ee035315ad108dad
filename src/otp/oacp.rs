//! Object Action Control Point codec
//!
//! Typed requests and responses for the OACP characteristic with their
//! little-endian wire encodings. All multi-byte fields are little-endian;
//! the response PDU is `[0x60][request opcode][result code][parameters]`.

use crate::ots::types::ObjectId;

use super::error::OtpError;

/// OACP response PDU marker.
pub const OACP_RESPONSE_OPCODE: u8 = 0x60;

/// Execute request parameters are capped at 20 bytes.
pub const EXECUTE_PARAM_MAX: usize = 20;

/// Response parameters on a server-sent OACP response are capped at 18
/// bytes (the 20-byte control point value minus opcode and result code).
pub const RESPONSE_PARAM_MAX: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OacpOpcode {
    Create = 0x01,
    Delete = 0x02,
    CalculateChecksum = 0x03,
    Execute = 0x04,
    Read = 0x05,
    Write = 0x06,
    Abort = 0x07,
}

impl OacpOpcode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::Create),
            0x02 => Some(Self::Delete),
            0x03 => Some(Self::CalculateChecksum),
            0x04 => Some(Self::Execute),
            0x05 => Some(Self::Read),
            0x06 => Some(Self::Write),
            0x07 => Some(Self::Abort),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OacpResultCode {
    Success = 0x01,
    OpCodeNotSupported = 0x02,
    InvalidParameter = 0x03,
    InsufficientResources = 0x04,
    InvalidObject = 0x05,
    ChannelUnavailable = 0x06,
    UnsupportedType = 0x07,
    ProcedureNotPermitted = 0x08,
    ObjectLocked = 0x09,
    OperationFailed = 0x0A,
}

impl OacpResultCode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::Success),
            0x02 => Some(Self::OpCodeNotSupported),
            0x03 => Some(Self::InvalidParameter),
            0x04 => Some(Self::InsufficientResources),
            0x05 => Some(Self::InvalidObject),
            0x06 => Some(Self::ChannelUnavailable),
            0x07 => Some(Self::UnsupportedType),
            0x08 => Some(Self::ProcedureNotPermitted),
            0x09 => Some(Self::ObjectLocked),
            0x0A => Some(Self::OperationFailed),
            _ => None,
        }
    }
}

/// Write mode carried by an OACP Write request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum WriteMode {
    /// Overwrite within the allocated size.
    #[default]
    Overwrite = 0x00,
    /// Truncate the object after the written range.
    Truncate = 0x01,
    /// Append beyond the allocated size.
    Append = 0x02,
    /// Patch strictly within the existing content.
    Patch = 0x03,
}

impl WriteMode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::Overwrite),
            0x01 => Some(Self::Truncate),
            0x02 => Some(Self::Append),
            0x03 => Some(Self::Patch),
            _ => None,
        }
    }
}

/// A typed OACP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OacpRequest {
    Create { object_type: u16, size: u32 },
    Delete,
    CalculateChecksum { offset: u32, length: u32 },
    Execute { parameters: Vec<u8> },
    Read { offset: u32, length: u32 },
    Write { offset: u32, length: u32, mode: WriteMode },
    Abort,
}

impl OacpRequest {
    pub fn opcode(&self) -> OacpOpcode {
        match self {
            OacpRequest::Create { .. } => OacpOpcode::Create,
            OacpRequest::Delete => OacpOpcode::Delete,
            OacpRequest::CalculateChecksum { .. } => OacpOpcode::CalculateChecksum,
            OacpRequest::Execute { .. } => OacpOpcode::Execute,
            OacpRequest::Read { .. } => OacpOpcode::Read,
            OacpRequest::Write { .. } => OacpOpcode::Write,
            OacpRequest::Abort => OacpOpcode::Abort,
        }
    }

    /// Encode to the control-point wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.opcode() as u8];
        match self {
            OacpRequest::Create { object_type, size } => {
                out.extend_from_slice(&size.to_le_bytes());
                out.extend_from_slice(&object_type.to_le_bytes());
            }
            OacpRequest::CalculateChecksum { offset, length }
            | OacpRequest::Read { offset, length } => {
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&length.to_le_bytes());
            }
            OacpRequest::Write {
                offset,
                length,
                mode,
            } => {
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&length.to_le_bytes());
                out.push(*mode as u8);
            }
            OacpRequest::Execute { parameters } => {
                out.extend_from_slice(parameters);
            }
            OacpRequest::Delete | OacpRequest::Abort => {}
        }
        out
    }

    /// Decode an inbound control-point write into a typed request.
    pub fn decode(value: &[u8]) -> Result<Self, OtpError> {
        let (&op, params) = value
            .split_first()
            .ok_or(OtpError::InvalidArgument("empty OACP request"))?;
        let opcode = OacpOpcode::from_u8(op)
            .ok_or(OtpError::InvalidArgument("unknown OACP opcode"))?;
        match opcode {
            OacpOpcode::Create => {
                if params.len() < 6 {
                    return Err(OtpError::InvalidArgument("short OACP Create request"));
                }
                Ok(OacpRequest::Create {
                    size: u32::from_le_bytes(params[..4].try_into().unwrap_or_default()),
                    object_type: u16::from_le_bytes(params[4..6].try_into().unwrap_or_default()),
                })
            }
            OacpOpcode::Delete => Ok(OacpRequest::Delete),
            OacpOpcode::CalculateChecksum | OacpOpcode::Read => {
                if params.len() < 8 {
                    return Err(OtpError::InvalidArgument("short OACP request"));
                }
                let offset = u32::from_le_bytes(params[..4].try_into().unwrap_or_default());
                let length = u32::from_le_bytes(params[4..8].try_into().unwrap_or_default());
                Ok(match opcode {
                    OacpOpcode::Read => OacpRequest::Read { offset, length },
                    _ => OacpRequest::CalculateChecksum { offset, length },
                })
            }
            OacpOpcode::Write => {
                if params.len() < 9 {
                    return Err(OtpError::InvalidArgument("short OACP Write request"));
                }
                Ok(OacpRequest::Write {
                    offset: u32::from_le_bytes(params[..4].try_into().unwrap_or_default()),
                    length: u32::from_le_bytes(params[4..8].try_into().unwrap_or_default()),
                    mode: WriteMode::from_u8(params[8])
                        .ok_or(OtpError::InvalidArgument("unknown write mode"))?,
                })
            }
            OacpOpcode::Execute => {
                if params.len() > EXECUTE_PARAM_MAX {
                    return Err(OtpError::InvalidArgument("oversized Execute parameters"));
                }
                Ok(OacpRequest::Execute {
                    parameters: params.to_vec(),
                })
            }
            OacpOpcode::Abort => Ok(OacpRequest::Abort),
        }
    }
}

/// A decoded OACP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OacpResponse {
    pub request_opcode: OacpOpcode,
    pub result: OacpResultCode,
    pub parameter: Vec<u8>,
}

impl OacpResponse {
    pub fn new(request_opcode: OacpOpcode, result: OacpResultCode) -> Self {
        Self {
            request_opcode,
            result,
            parameter: Vec::new(),
        }
    }

    /// Decode a response PDU. Returns `None` for PDUs that are not OACP
    /// responses (wrong marker or truncated header).
    pub fn decode(value: &[u8]) -> Option<Self> {
        if value.len() < 3 || value[0] != OACP_RESPONSE_OPCODE {
            return None;
        }
        Some(Self {
            request_opcode: OacpOpcode::from_u8(value[1])?,
            result: OacpResultCode::from_u8(value[2])?,
            parameter: value[3..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![
            OACP_RESPONSE_OPCODE,
            self.request_opcode as u8,
            self.result as u8,
        ];
        out.extend_from_slice(&self.parameter[..self.parameter.len().min(RESPONSE_PARAM_MAX)]);
        out
    }

    /// The checksum carried by a successful Calculate-Checksum response.
    pub fn checksum(&self) -> Option<u32> {
        if self.request_opcode != OacpOpcode::CalculateChecksum {
            return None;
        }
        Some(u32::from_le_bytes(
            self.parameter.get(..4)?.try_into().ok()?,
        ))
    }

    /// The object ID carried by a successful Create response, when the
    /// server reports one.
    pub fn created_id(&self) -> Option<ObjectId> {
        if self.request_opcode != OacpOpcode::Create {
            return None;
        }
        ObjectId::from_bytes(self.parameter.get(..6)?)
    }
}
