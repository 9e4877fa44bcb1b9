//! On-flash record layout.
//!
//! Every record starts on an erase-unit boundary with a fixed 32 byte header,
//! all integers big-endian:
//!
//! ```text
//! +-------+------+----------+--------+------------------+
//! | magic | kind | sequence | length | digest (16 bytes)|
//! +-------+------+----------+--------+------------------+
//!   0       4      8          12       16             32
//! ```
//!
//! The payload follows the header directly, and the record is padded out to
//! whole erase units.

use crate::common::*;
use crate::device::FlashGeometry;

pub const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Entry in the snapshot chain.
    Data,
    /// A copy of the configuration archive.
    Config,
}

impl RecordKind {
    pub fn as_u32(self) -> u32 {
        match self {
            RecordKind::Data => KIND_DATA,
            RecordKind::Config => KIND_CONF,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            KIND_DATA => Some(RecordKind::Data),
            KIND_CONF => Some(RecordKind::Config),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    BadMagic,
    UnknownKind(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: RecordKind,
    pub sequence: Sequence,
    pub length: u32,
    pub digest: Digest,
}

fn get_u32_be(src: &[u8]) -> u32 {
    u32::from_be_bytes([src[0], src[1], src[2], src[3]])
}

impl RecordHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        out[4..8].copy_from_slice(&self.kind.as_u32().to_be_bytes());
        out[8..12].copy_from_slice(&self.sequence.to_be_bytes());
        out[12..16].copy_from_slice(&self.length.to_be_bytes());
        out[16..32].copy_from_slice(&self.digest);
        out
    }

    pub fn decode(src: &[u8]) -> Result<Self, DecodeError> {
        if src.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated);
        }
        if get_u32_be(&src[0..4]) != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let raw_kind = get_u32_be(&src[4..8]);
        let kind = RecordKind::from_u32(raw_kind).ok_or(DecodeError::UnknownKind(raw_kind))?;
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&src[16..32]);
        Ok(Self {
            kind,
            sequence: get_u32_be(&src[8..12]),
            length: get_u32_be(&src[12..16]),
            digest,
        })
    }

    pub fn has_valid_length(&self) -> bool {
        valid_length(self.length as u64)
    }

    pub fn is_data(&self) -> bool {
        self.kind == RecordKind::Data && self.has_valid_length()
    }

    pub fn is_config(&self) -> bool {
        self.kind == RecordKind::Config && self.has_valid_length()
    }
}

pub fn valid_length(len: u64) -> bool {
    len > 0 && len <= MAX_PAYLOAD_LEN as u64
}

/// Bytes occupied by a record with `payload_len` bytes of payload: header plus
/// payload, rounded up to a whole number of erase units.
pub fn padded_len(geometry: &FlashGeometry, payload_len: u64) -> u64 {
    let unit = geometry.erase_unit() as u64;
    (HEADER_SIZE as u64 + payload_len).div_ceil(unit) * unit
}

/// Erase units spanned by a record with `payload_len` bytes of payload.
pub fn span_units(geometry: &FlashGeometry, payload_len: u64) -> Unit {
    (padded_len(geometry, payload_len) / geometry.erase_unit() as u64) as Unit
}

/// The reset marker: the magic tag alone, big-endian.
pub fn magic_marker() -> [u8; 4] {
    MAGIC.to_be_bytes()
}
