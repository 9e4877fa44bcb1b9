use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::common::Unit;
use crate::record_format::RecordKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOp {
    Read,
    Write,
    Erase,
}

impl std::fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DeviceOp::Read => "read",
            DeviceOp::Write => "write",
            DeviceOp::Erase => "erase",
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// A raw device primitive failed. Never retried.
    #[error("device {op} failed at offset {offset:#x}: {source}")]
    Device {
        op: DeviceOp,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to write record at unit {unit}: {source}")]
    WriteFailed {
        unit: Unit,
        #[source]
        source: io::Error,
    },

    #[error("record of {len} bytes at unit {unit} does not fit in {capacity} bytes of flash")]
    CapacityExceeded { unit: Unit, len: u64, capacity: u64 },

    #[error("no valid record header at unit {unit}")]
    InvalidHeader { unit: Unit },

    #[error("record at unit {unit} is {found:?}, expected {expected:?}")]
    KindMismatch {
        unit: Unit,
        expected: RecordKind,
        found: RecordKind,
    },

    #[error("record at unit {unit} has invalid length {len}")]
    InvalidLength { unit: Unit, len: u64 },

    /// The payload was copied out but its digest did not match the header.
    /// `next_unit` still points past the record so chain walkers can skip it.
    #[error("digest mismatch for record at unit {unit}")]
    HashMismatch { unit: Unit, next_unit: Unit },

    #[error("unit {unit} is out of range ({units} units)")]
    InvalidUnit { unit: Unit, units: Unit },

    #[error("invalid flash geometry: {0}")]
    Geometry(String),

    #[error("no current config copy on flash")]
    NoConfig,

    #[error("operation declined")]
    Declined,

    #[error("staging file {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Structural and digest failures mean "no usable record here", not a
    /// broken device. Callers recover from these locally.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Error::InvalidHeader { .. }
                | Error::KindMismatch { .. }
                | Error::InvalidLength { .. }
                | Error::HashMismatch { .. }
        )
    }

    pub(crate) fn staging(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Error {
        let path = path.into();
        move |source| Error::Staging { path, source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
