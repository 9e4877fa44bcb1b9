//! Forward walk over the snapshot chain.
//!
//! The chain starts at unit 0 and is a run of `Data` records whose sequence
//! numbers go up by exactly one. The first unit that breaks the run (no
//! magic, a non-`Data` record, or a sequence gap) is where the next record
//! goes. Leftovers from an earlier fill cycle past a gap are simply
//! overwritten later, so nothing needs a full-device erase.

use log::{debug, trace};

use crate::common::{Sequence, Unit};
use crate::device::{read_at, FlashDevice, FlashGeometry};
use crate::error::Result;
use crate::record_format::{span_units, DecodeError, RecordHeader, HEADER_SIZE};

pub type Decoded = std::result::Result<RecordHeader, DecodeError>;

/// Outcome of looking at one position of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    /// The chain ends here; this unit is the insertion point.
    Free(Unit),
    /// A chain record; continue at `next` with `sequence` as the last seen.
    Continue { next: Unit, sequence: Sequence },
}

/// A live `Data` record found while walking the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainRecord {
    pub unit: Unit,
    pub header: RecordHeader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCursor {
    /// First unit not occupied by the live chain. Equals the device unit
    /// count when the chain runs to the end of the flash.
    pub next_free: Unit,
    /// Sequence of the last chain record, or the seed if the chain is empty.
    pub last_sequence: Sequence,
    /// Whatever header was decoded at `next_free`. A current forward config
    /// copy lives here.
    pub tail: Option<RecordHeader>,
    pub records: Vec<ChainRecord>,
}

impl ChainCursor {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn step(geometry: &FlashGeometry, unit: Unit, decoded: &Decoded, last: Sequence) -> ScanStep {
    match decoded {
        Ok(h) if h.is_data() => {
            if unit != 0 && h.sequence != last.wrapping_add(1) {
                debug!(
                    "sequence break at unit {unit}: expected {}, found {}",
                    last.wrapping_add(1),
                    h.sequence
                );
                return ScanStep::Free(unit);
            }
            ScanStep::Continue {
                next: unit.saturating_add(span_units(geometry, h.length as u64)),
                sequence: h.sequence,
            }
        }
        _ => ScanStep::Free(unit),
    }
}

/// Walk the chain using `header_at` to decode the header at a unit.
/// `seed` stands in for the last sequence until a record establishes one.
pub fn scan<F>(geometry: &FlashGeometry, seed: Sequence, mut header_at: F) -> Result<ChainCursor>
where
    F: FnMut(Unit) -> Result<Decoded>,
{
    let units = geometry.unit_count();
    let mut unit: Unit = 0;
    let mut last = seed;
    let mut records = Vec::new();

    while unit < units {
        let decoded = header_at(unit)?;
        match step(geometry, unit, &decoded, last) {
            ScanStep::Free(free) => {
                trace!("chain ends at unit {free}, last sequence {last}");
                return Ok(ChainCursor {
                    next_free: free,
                    last_sequence: last,
                    tail: decoded.ok(),
                    records,
                });
            }
            ScanStep::Continue { next, sequence } => {
                if let Ok(header) = decoded {
                    records.push(ChainRecord { unit, header });
                }
                unit = next;
                last = sequence;
            }
        }
    }

    debug!("chain fills the device ({units} units)");
    Ok(ChainCursor {
        next_free: units,
        last_sequence: last,
        tail: None,
        records,
    })
}

pub fn read_header<D: FlashDevice + ?Sized>(dev: &mut D, unit: Unit) -> Result<Decoded> {
    let offset = dev.geometry().offset(unit);
    let mut raw = [0u8; HEADER_SIZE];
    read_at(dev, offset, &mut raw)?;
    Ok(RecordHeader::decode(&raw))
}

/// Locate the write cursor of the chain on `dev`.
pub fn scan_forward<D: FlashDevice + ?Sized>(dev: &mut D, seed: Sequence) -> Result<ChainCursor> {
    let geometry = dev.geometry();
    scan(&geometry, seed, |unit| read_header(&mut *dev, unit))
}
