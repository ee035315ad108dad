//! OTS characteristic value types
//!
//! Typed representations of the Object Transfer Service characteristic
//! values with their little-endian wire encodings: the Feature bitsets,
//! 48-bit object IDs, size pairs, per-object properties, timestamps,
//! list filters and the Object Changed notification.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Attribute value length cap for short characteristic values (object
/// name, filter parameters).
pub const ATT_VALUE_LEN: usize = 20;

/// Sentinel for "object size not yet determined".
pub const OBJECT_SIZE_UNKNOWN: u32 = u32::MAX;

/// A 48-bit object ID, carried as the low 48 bits of a `u64`.
///
/// The all-zero ID is reserved for the Directory Listing Object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The reserved Directory Listing Object ID.
    pub const DIRECTORY_LISTING: ObjectId = ObjectId(0);

    const MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

    pub fn new(raw: u64) -> Self {
        ObjectId(raw & Self::MASK)
    }

    /// Encode as the 6-byte little-endian wire form.
    pub fn to_bytes(self) -> [u8; 6] {
        let le = self.0.to_le_bytes();
        [le[0], le[1], le[2], le[3], le[4], le[5]]
    }

    /// Decode from the 6-byte little-endian wire form.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 6 {
            return None;
        }
        let mut le = [0u8; 8];
        le[..6].copy_from_slice(&bytes[..6]);
        Some(ObjectId(u64::from_le_bytes(le)))
    }

    pub fn is_directory_listing(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut be = self.to_bytes();
        be.reverse();
        write!(f, "{}", hex::encode(be))
    }
}

/// OACP opcode support bits of the OTS Feature characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OacpFeatures {
    pub create: bool,
    pub delete: bool,
    pub calculate_checksum: bool,
    pub execute: bool,
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub patch: bool,
    pub abort: bool,
}

impl OacpFeatures {
    fn to_u32(self) -> u32 {
        (self.create as u32)
            | (self.delete as u32) << 1
            | (self.calculate_checksum as u32) << 2
            | (self.execute as u32) << 3
            | (self.read as u32) << 4
            | (self.write as u32) << 5
            | (self.append as u32) << 6
            | (self.truncate as u32) << 7
            | (self.patch as u32) << 8
            | (self.abort as u32) << 9
    }

    fn from_u32(raw: u32) -> Self {
        Self {
            create: raw & (1 << 0) != 0,
            delete: raw & (1 << 1) != 0,
            calculate_checksum: raw & (1 << 2) != 0,
            execute: raw & (1 << 3) != 0,
            read: raw & (1 << 4) != 0,
            write: raw & (1 << 5) != 0,
            append: raw & (1 << 6) != 0,
            truncate: raw & (1 << 7) != 0,
            patch: raw & (1 << 8) != 0,
            abort: raw & (1 << 9) != 0,
        }
    }
}

/// OLCP opcode support bits of the OTS Feature characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlcpFeatures {
    pub go_to: bool,
    pub order: bool,
    pub request_number: bool,
    pub clear_marking: bool,
}

impl OlcpFeatures {
    fn to_u32(self) -> u32 {
        (self.go_to as u32)
            | (self.order as u32) << 1
            | (self.request_number as u32) << 2
            | (self.clear_marking as u32) << 3
    }

    fn from_u32(raw: u32) -> Self {
        Self {
            go_to: raw & (1 << 0) != 0,
            order: raw & (1 << 1) != 0,
            request_number: raw & (1 << 2) != 0,
            clear_marking: raw & (1 << 3) != 0,
        }
    }
}

/// The OTS Feature characteristic: which OACP/OLCP opcodes the server
/// supports. Gates which requests the client engine will even attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtsFeature {
    pub oacp: OacpFeatures,
    pub olcp: OlcpFeatures,
}

impl OtsFeature {
    pub const WIRE_LEN: usize = 8;

    /// Encode as the 8-byte wire form (OACP field then OLCP field, each
    /// a 32-bit little-endian bitset).
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.oacp.to_u32().to_le_bytes());
        out[4..].copy_from_slice(&self.olcp.to_u32().to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_LEN {
            return None;
        }
        let oacp = u32::from_le_bytes(bytes[..4].try_into().ok()?);
        let olcp = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        Some(Self {
            oacp: OacpFeatures::from_u32(oacp),
            olcp: OlcpFeatures::from_u32(olcp),
        })
    }

    /// Whether the server exposes any OLCP opcode at all.
    pub fn olcp_supported(&self) -> bool {
        self.olcp.go_to || self.olcp.order || self.olcp.request_number || self.olcp.clear_marking
    }
}

/// The Object Size characteristic: current and allocated size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSize {
    pub current: u32,
    pub allocated: u32,
}

impl ObjectSize {
    pub const WIRE_LEN: usize = 8;

    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.current.to_le_bytes());
        out[4..].copy_from_slice(&self.allocated.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_LEN {
            return None;
        }
        Some(Self {
            current: u32::from_le_bytes(bytes[..4].try_into().ok()?),
            allocated: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
        })
    }
}

/// The Object Properties characteristic: per-object permissions declared
/// by the server, independent of the global feature bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectProperties {
    pub delete: bool,
    pub execute: bool,
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub patch: bool,
    pub mark: bool,
}

impl ObjectProperties {
    pub const WIRE_LEN: usize = 4;

    pub fn to_bytes(self) -> [u8; 4] {
        let raw = (self.delete as u32)
            | (self.execute as u32) << 1
            | (self.read as u32) << 2
            | (self.write as u32) << 3
            | (self.append as u32) << 4
            | (self.truncate as u32) << 5
            | (self.patch as u32) << 6
            | (self.mark as u32) << 7;
        raw.to_le_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_LEN {
            return None;
        }
        let raw = u32::from_le_bytes(bytes[..4].try_into().ok()?);
        Some(Self {
            delete: raw & (1 << 0) != 0,
            execute: raw & (1 << 1) != 0,
            read: raw & (1 << 2) != 0,
            write: raw & (1 << 3) != 0,
            append: raw & (1 << 4) != 0,
            truncate: raw & (1 << 5) != 0,
            patch: raw & (1 << 6) != 0,
            mark: raw & (1 << 7) != 0,
        })
    }
}

/// First-Created / Last-Modified timestamp, wire-encoded as
/// year:u16 month day hours minutes seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtsDateTime(pub NaiveDateTime);

impl OtsDateTime {
    pub const WIRE_LEN: usize = 7;

    pub fn to_bytes(self) -> [u8; 7] {
        let date = self.0.date();
        let time = self.0.time();
        let mut out = [0u8; 7];
        out[..2].copy_from_slice(&(date.year() as u16).to_le_bytes());
        out[2] = date.month() as u8;
        out[3] = date.day() as u8;
        out[4] = time.hour() as u8;
        out[5] = time.minute() as u8;
        out[6] = time.second() as u8;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_LEN {
            return None;
        }
        let year = u16::from_le_bytes(bytes[..2].try_into().ok()?);
        let date = NaiveDate::from_ymd_opt(year as i32, bytes[2] as u32, bytes[3] as u32)?;
        let dt = date.and_hms_opt(bytes[4] as u32, bytes[5] as u32, bytes[6] as u32)?;
        Some(OtsDateTime(dt))
    }
}

/// Object list sort keys for the OLCP Order opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SortOrder {
    NameAscending = 0x01,
    TypeAscending = 0x02,
    SizeAscending = 0x03,
    FirstCreatedAscending = 0x04,
    LastModifiedAscending = 0x05,
    NameDescending = 0x11,
    TypeDescending = 0x12,
    SizeDescending = 0x13,
    FirstCreatedDescending = 0x14,
    LastModifiedDescending = 0x15,
}

/// The Object List Filter characteristic value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectFilter {
    NoFilter,
    NameStartsWith(String),
    NameEndsWith(String),
    NameContains(String),
    NameIsExactly(String),
    ObjectType(u16),
    CreatedBetween(OtsDateTime, OtsDateTime),
    ModifiedBetween(OtsDateTime, OtsDateTime),
    CurrentSizeBetween(u32, u32),
    AllocatedSizeBetween(u32, u32),
    MarkedObjects,
}

impl ObjectFilter {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ObjectFilter::NoFilter => vec![0x00],
            ObjectFilter::NameStartsWith(name) => Self::name_filter(0x01, name),
            ObjectFilter::NameEndsWith(name) => Self::name_filter(0x02, name),
            ObjectFilter::NameContains(name) => Self::name_filter(0x03, name),
            ObjectFilter::NameIsExactly(name) => Self::name_filter(0x04, name),
            ObjectFilter::ObjectType(ty) => {
                let mut out = vec![0x05];
                out.extend_from_slice(&ty.to_le_bytes());
                out
            }
            ObjectFilter::CreatedBetween(from, to) => Self::time_filter(0x06, from, to),
            ObjectFilter::ModifiedBetween(from, to) => Self::time_filter(0x07, from, to),
            ObjectFilter::CurrentSizeBetween(min, max) => Self::size_filter(0x08, *min, *max),
            ObjectFilter::AllocatedSizeBetween(min, max) => Self::size_filter(0x09, *min, *max),
            ObjectFilter::MarkedObjects => vec![0x0A],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&ty, rest) = bytes.split_first()?;
        match ty {
            0x00 => Some(ObjectFilter::NoFilter),
            0x01..=0x04 => {
                let name = String::from_utf8(rest.to_vec()).ok()?;
                Some(match ty {
                    0x01 => ObjectFilter::NameStartsWith(name),
                    0x02 => ObjectFilter::NameEndsWith(name),
                    0x03 => ObjectFilter::NameContains(name),
                    _ => ObjectFilter::NameIsExactly(name),
                })
            }
            0x05 => {
                let raw: [u8; 2] = rest.get(..2)?.try_into().ok()?;
                Some(ObjectFilter::ObjectType(u16::from_le_bytes(raw)))
            }
            0x06 | 0x07 => {
                let from = OtsDateTime::from_bytes(rest.get(..7)?)?;
                let to = OtsDateTime::from_bytes(rest.get(7..14)?)?;
                Some(if ty == 0x06 {
                    ObjectFilter::CreatedBetween(from, to)
                } else {
                    ObjectFilter::ModifiedBetween(from, to)
                })
            }
            0x08 | 0x09 => {
                let min = u32::from_le_bytes(rest.get(..4)?.try_into().ok()?);
                let max = u32::from_le_bytes(rest.get(4..8)?.try_into().ok()?);
                Some(if ty == 0x08 {
                    ObjectFilter::CurrentSizeBetween(min, max)
                } else {
                    ObjectFilter::AllocatedSizeBetween(min, max)
                })
            }
            0x0A => Some(ObjectFilter::MarkedObjects),
            _ => None,
        }
    }

    fn name_filter(ty: u8, name: &str) -> Vec<u8> {
        let mut out = vec![ty];
        out.extend_from_slice(&name.as_bytes()[..name.len().min(ATT_VALUE_LEN)]);
        out
    }

    fn time_filter(ty: u8, from: &OtsDateTime, to: &OtsDateTime) -> Vec<u8> {
        let mut out = vec![ty];
        out.extend_from_slice(&from.to_bytes());
        out.extend_from_slice(&to.to_bytes());
        out
    }

    fn size_filter(ty: u8, min: u32, max: u32) -> Vec<u8> {
        let mut out = vec![ty];
        out.extend_from_slice(&min.to_le_bytes());
        out.extend_from_slice(&max.to_le_bytes());
        out
    }
}

/// Flags carried by an Object Changed notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFlags {
    /// Change originated on the server side (vs. another client).
    pub source_is_server: bool,
    pub contents_changed: bool,
    pub metadata_changed: bool,
    pub object_created: bool,
    pub object_deleted: bool,
}

/// The Object Changed characteristic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectChanged {
    pub flags: ChangeFlags,
    pub object_id: ObjectId,
}

impl ObjectChanged {
    pub const WIRE_LEN: usize = 7;

    pub fn to_bytes(self) -> [u8; 7] {
        let raw = (self.flags.source_is_server as u8)
            | (self.flags.contents_changed as u8) << 1
            | (self.flags.metadata_changed as u8) << 2
            | (self.flags.object_created as u8) << 3
            | (self.flags.object_deleted as u8) << 4;
        let mut out = [0u8; 7];
        out[0] = raw;
        out[1..].copy_from_slice(&self.object_id.to_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_LEN {
            return None;
        }
        let raw = bytes[0];
        Some(Self {
            flags: ChangeFlags {
                source_is_server: raw & (1 << 0) != 0,
                contents_changed: raw & (1 << 1) != 0,
                metadata_changed: raw & (1 << 2) != 0,
                object_created: raw & (1 << 3) != 0,
                object_deleted: raw & (1 << 4) != 0,
            },
            object_id: ObjectId::from_bytes(&bytes[1..7])?,
        })
    }
}

/// Snapshot of the currently selected object's metadata, as read by the
/// client from the OTS metadata characteristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub object_id: ObjectId,
    pub name: String,
    pub object_type: u16,
    pub size: ObjectSize,
    pub properties: ObjectProperties,
    pub first_created: Option<OtsDateTime>,
    pub last_modified: Option<OtsDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_wire_form() {
        let id = ObjectId::new(0x0000_0123_4567_89AB);
        assert_eq!(id.to_bytes(), [0xAB, 0x89, 0x67, 0x45, 0x23, 0x01]);
        assert_eq!(ObjectId::from_bytes(&id.to_bytes()), Some(id));
    }

    #[test]
    fn test_object_id_masks_to_48_bits() {
        let id = ObjectId::new(0xFFFF_0123_4567_89AB);
        assert_eq!(id.0, 0x0000_0123_4567_89AB);
    }

    #[test]
    fn test_directory_listing_id() {
        assert!(ObjectId::DIRECTORY_LISTING.is_directory_listing());
        assert!(!ObjectId::new(0x100).is_directory_listing());
    }

    #[test]
    fn test_object_id_display() {
        assert_eq!(ObjectId::new(0x0123_4567_89AB).to_string(), "0123456789ab");
    }

    #[test]
    fn test_feature_bit_layout() {
        let feature = OtsFeature {
            oacp: OacpFeatures {
                create: true,
                read: true,
                abort: true,
                ..Default::default()
            },
            olcp: OlcpFeatures {
                go_to: true,
                clear_marking: true,
                ..Default::default()
            },
        };
        let bytes = feature.to_bytes();
        // create = bit 0, read = bit 4, abort = bit 9.
        assert_eq!(u32::from_le_bytes(bytes[..4].try_into().unwrap()), 0x211);
        // go_to = bit 0, clear_marking = bit 3.
        assert_eq!(u32::from_le_bytes(bytes[4..].try_into().unwrap()), 0x9);
        assert_eq!(OtsFeature::from_bytes(&bytes), Some(feature));
    }

    #[test]
    fn test_feature_olcp_supported() {
        assert!(!OtsFeature::default().olcp_supported());
        let f = OtsFeature {
            olcp: OlcpFeatures {
                order: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(f.olcp_supported());
    }

    #[test]
    fn test_feature_short_value_rejected() {
        assert_eq!(OtsFeature::from_bytes(&[0u8; 7]), None);
    }

    #[test]
    fn test_object_size_wire_form() {
        let size = ObjectSize {
            current: 100,
            allocated: 256,
        };
        let bytes = size.to_bytes();
        assert_eq!(&bytes[..4], &100u32.to_le_bytes());
        assert_eq!(&bytes[4..], &256u32.to_le_bytes());
        assert_eq!(ObjectSize::from_bytes(&bytes), Some(size));
    }

    #[test]
    fn test_properties_bit_layout() {
        let props = ObjectProperties {
            delete: true,
            write: true,
            mark: true,
            ..Default::default()
        };
        let bytes = props.to_bytes();
        assert_eq!(u32::from_le_bytes(bytes), 0x89);
        assert_eq!(ObjectProperties::from_bytes(&bytes), Some(props));
    }

    #[test]
    fn test_datetime_wire_form() {
        let dt = OtsDateTime(
            NaiveDate::from_ymd_opt(2026, 8, 7)
                .unwrap()
                .and_hms_opt(13, 45, 59)
                .unwrap(),
        );
        let bytes = dt.to_bytes();
        assert_eq!(u16::from_le_bytes(bytes[..2].try_into().unwrap()), 2026);
        assert_eq!(&bytes[2..], &[8, 7, 13, 45, 59]);
        assert_eq!(OtsDateTime::from_bytes(&bytes), Some(dt));
    }

    #[test]
    fn test_datetime_invalid_rejected() {
        // Month 13 is not a date.
        let bytes = [0xEA, 0x07, 13, 1, 0, 0, 0];
        assert_eq!(OtsDateTime::from_bytes(&bytes), None);
    }

    #[test]
    fn test_filter_encodings() {
        assert_eq!(ObjectFilter::NoFilter.to_bytes(), vec![0x00]);
        assert_eq!(
            ObjectFilter::NameStartsWith("fw".into()).to_bytes(),
            vec![0x01, b'f', b'w']
        );
        assert_eq!(
            ObjectFilter::ObjectType(0x2B05).to_bytes(),
            vec![0x05, 0x05, 0x2B]
        );
        assert_eq!(ObjectFilter::MarkedObjects.to_bytes(), vec![0x0A]);

        let filter = ObjectFilter::CurrentSizeBetween(16, 4096);
        assert_eq!(ObjectFilter::from_bytes(&filter.to_bytes()), Some(filter));
    }

    #[test]
    fn test_object_changed_wire_form() {
        let change = ObjectChanged {
            flags: ChangeFlags {
                contents_changed: true,
                object_deleted: true,
                ..Default::default()
            },
            object_id: ObjectId::new(0x42),
        };
        let bytes = change.to_bytes();
        assert_eq!(bytes[0], 0x12);
        assert_eq!(ObjectChanged::from_bytes(&bytes), Some(change));
    }

    #[test]
    fn test_object_info_serialization_round_trip() {
        let info = ObjectInfo {
            object_id: ObjectId::new(0x100),
            name: "sensor.log".into(),
            object_type: 0x2B05,
            size: ObjectSize {
                current: 100,
                allocated: 256,
            },
            properties: ObjectProperties {
                read: true,
                write: true,
                ..Default::default()
            },
            first_created: None,
            last_modified: None,
        };

        let json = serde_json::to_vec(&info).unwrap();
        let restored: ObjectInfo = serde_json::from_slice(&json).unwrap();
        assert_eq!(info, restored);
    }
}
