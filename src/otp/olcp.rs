//! Object List Control Point codec
//!
//! Typed requests and responses for the OLCP characteristic. The response
//! PDU is `[0x70][request opcode][result code][parameters]`; a successful
//! Request-Number-Of-Objects response carries a 32-bit little-endian
//! object count.

use crate::ots::types::{ObjectId, SortOrder};

use super::error::OtpError;

/// OLCP response PDU marker.
pub const OLCP_RESPONSE_OPCODE: u8 = 0x70;

/// Response parameters on a server-sent OLCP response are capped at 4
/// bytes (the object count).
pub const RESPONSE_PARAM_MAX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OlcpOpcode {
    First = 0x01,
    Last = 0x02,
    Previous = 0x03,
    Next = 0x04,
    GoTo = 0x05,
    Order = 0x06,
    RequestNumberOfObjects = 0x07,
    ClearMarking = 0x08,
}

impl OlcpOpcode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::First),
            0x02 => Some(Self::Last),
            0x03 => Some(Self::Previous),
            0x04 => Some(Self::Next),
            0x05 => Some(Self::GoTo),
            0x06 => Some(Self::Order),
            0x07 => Some(Self::RequestNumberOfObjects),
            0x08 => Some(Self::ClearMarking),
            _ => None,
        }
    }

    /// Whether this opcode moves the current-object selection.
    pub fn is_selection(self) -> bool {
        matches!(
            self,
            Self::First | Self::Last | Self::Previous | Self::Next | Self::GoTo
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OlcpResultCode {
    Success = 0x01,
    OpCodeNotSupported = 0x02,
    InvalidParameter = 0x03,
    OperationFailed = 0x04,
    OutOfBounds = 0x05,
    TooManyObjects = 0x06,
    NoObject = 0x07,
    ObjectIdNotFound = 0x08,
}

impl OlcpResultCode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::Success),
            0x02 => Some(Self::OpCodeNotSupported),
            0x03 => Some(Self::InvalidParameter),
            0x04 => Some(Self::OperationFailed),
            0x05 => Some(Self::OutOfBounds),
            0x06 => Some(Self::TooManyObjects),
            0x07 => Some(Self::NoObject),
            0x08 => Some(Self::ObjectIdNotFound),
            _ => None,
        }
    }
}

/// A typed OLCP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OlcpRequest {
    First,
    Last,
    Previous,
    Next,
    GoTo(ObjectId),
    Order(SortOrder),
    RequestNumberOfObjects,
    ClearMarking,
}

impl OlcpRequest {
    pub fn opcode(&self) -> OlcpOpcode {
        match self {
            OlcpRequest::First => OlcpOpcode::First,
            OlcpRequest::Last => OlcpOpcode::Last,
            OlcpRequest::Previous => OlcpOpcode::Previous,
            OlcpRequest::Next => OlcpOpcode::Next,
            OlcpRequest::GoTo(_) => OlcpOpcode::GoTo,
            OlcpRequest::Order(_) => OlcpOpcode::Order,
            OlcpRequest::RequestNumberOfObjects => OlcpOpcode::RequestNumberOfObjects,
            OlcpRequest::ClearMarking => OlcpOpcode::ClearMarking,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.opcode() as u8];
        match self {
            OlcpRequest::GoTo(id) => out.extend_from_slice(&id.to_bytes()),
            OlcpRequest::Order(order) => out.push(*order as u8),
            _ => {}
        }
        out
    }

    pub fn decode(value: &[u8]) -> Result<Self, OtpError> {
        let (&op, params) = value
            .split_first()
            .ok_or(OtpError::InvalidArgument("empty OLCP request"))?;
        let opcode = OlcpOpcode::from_u8(op)
            .ok_or(OtpError::InvalidArgument("unknown OLCP opcode"))?;
        match opcode {
            OlcpOpcode::First => Ok(OlcpRequest::First),
            OlcpOpcode::Last => Ok(OlcpRequest::Last),
            OlcpOpcode::Previous => Ok(OlcpRequest::Previous),
            OlcpOpcode::Next => Ok(OlcpRequest::Next),
            OlcpOpcode::GoTo => Ok(OlcpRequest::GoTo(
                ObjectId::from_bytes(params)
                    .ok_or(OtpError::InvalidArgument("short OLCP Go-To request"))?,
            )),
            OlcpOpcode::Order => {
                let &key = params
                    .first()
                    .ok_or(OtpError::InvalidArgument("short OLCP Order request"))?;
                let order = match key {
                    0x01 => SortOrder::NameAscending,
                    0x02 => SortOrder::TypeAscending,
                    0x03 => SortOrder::SizeAscending,
                    0x04 => SortOrder::FirstCreatedAscending,
                    0x05 => SortOrder::LastModifiedAscending,
                    0x11 => SortOrder::NameDescending,
                    0x12 => SortOrder::TypeDescending,
                    0x13 => SortOrder::SizeDescending,
                    0x14 => SortOrder::FirstCreatedDescending,
                    0x15 => SortOrder::LastModifiedDescending,
                    _ => return Err(OtpError::InvalidArgument("unknown sort key")),
                };
                Ok(OlcpRequest::Order(order))
            }
            OlcpOpcode::RequestNumberOfObjects => Ok(OlcpRequest::RequestNumberOfObjects),
            OlcpOpcode::ClearMarking => Ok(OlcpRequest::ClearMarking),
        }
    }
}

/// A decoded OLCP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OlcpResponse {
    pub request_opcode: OlcpOpcode,
    pub result: OlcpResultCode,
    pub parameter: Vec<u8>,
    /// Object count, present on a successful Request-Number-Of-Objects.
    pub number_of_objects: Option<u32>,
}

impl OlcpResponse {
    pub fn decode(value: &[u8]) -> Option<Self> {
        if value.len() < 3 || value[0] != OLCP_RESPONSE_OPCODE {
            return None;
        }
        let request_opcode = OlcpOpcode::from_u8(value[1])?;
        let parameter = value[3..].to_vec();
        let number_of_objects = if request_opcode == OlcpOpcode::RequestNumberOfObjects
            && parameter.len() >= 4
        {
            Some(u32::from_le_bytes(parameter[..4].try_into().ok()?))
        } else {
            None
        };
        Some(Self {
            request_opcode,
            result: OlcpResultCode::from_u8(value[2])?,
            parameter,
            number_of_objects,
        })
    }

    pub fn encode(request_opcode: OlcpOpcode, result: OlcpResultCode, parameter: &[u8]) -> Vec<u8> {
        let mut out = vec![OLCP_RESPONSE_OPCODE, request_opcode as u8, result as u8];
        out.extend_from_slice(&parameter[..parameter.len().min(RESPONSE_PARAM_MAX)]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_opcode_requests() {
        assert_eq!(OlcpRequest::First.encode(), vec![0x01]);
        assert_eq!(OlcpRequest::Next.encode(), vec![0x04]);
        assert_eq!(OlcpRequest::ClearMarking.encode(), vec![0x08]);
    }

    #[test]
    fn test_go_to_layout() {
        let req = OlcpRequest::GoTo(ObjectId::new(0x0102_0304_0506));
        assert_eq!(
            req.encode(),
            vec![0x05, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_order_layout() {
        assert_eq!(
            OlcpRequest::Order(SortOrder::SizeDescending).encode(),
            vec![0x06, 0x13]
        );
    }

    #[test]
    fn test_decode_round_trip() {
        for req in [
            OlcpRequest::First,
            OlcpRequest::Last,
            OlcpRequest::Previous,
            OlcpRequest::Next,
            OlcpRequest::GoTo(ObjectId::new(0x42)),
            OlcpRequest::Order(SortOrder::NameAscending),
            OlcpRequest::RequestNumberOfObjects,
            OlcpRequest::ClearMarking,
        ] {
            assert_eq!(OlcpRequest::decode(&req.encode()).unwrap(), req);
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(OlcpRequest::decode(&[]).is_err());
        assert!(OlcpRequest::decode(&[0x09]).is_err());
        assert!(OlcpRequest::decode(&[0x05, 1, 2]).is_err());
        assert!(OlcpRequest::decode(&[0x06, 0x20]).is_err());
    }

    #[test]
    fn test_response_number_of_objects() {
        let rsp = OlcpResponse::decode(&[0x70, 0x07, 0x01, 5, 0, 0, 0]).unwrap();
        assert_eq!(rsp.request_opcode, OlcpOpcode::RequestNumberOfObjects);
        assert_eq!(rsp.number_of_objects, Some(5));

        // A selection response never carries a count.
        let rsp = OlcpResponse::decode(&[0x70, 0x01, 0x01, 5, 0, 0, 0]).unwrap();
        assert_eq!(rsp.number_of_objects, None);
    }

    #[test]
    fn test_response_decode_rejects_non_response() {
        assert!(OlcpResponse::decode(&[0x01, 0x01, 0x01]).is_none());
        assert!(OlcpResponse::decode(&[0x70, 0x01]).is_none());
    }

    #[test]
    fn test_selection_opcodes() {
        assert!(OlcpOpcode::First.is_selection());
        assert!(OlcpOpcode::GoTo.is_selection());
        assert!(!OlcpOpcode::Order.is_selection());
        assert!(!OlcpOpcode::RequestNumberOfObjects.is_selection());
    }
}
