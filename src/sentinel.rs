//! The sentinel is the config copy kept at the top of the flash, found by
//! scanning down from the last unit. It is independent of the forward chain.

use log::{debug, trace};

use crate::chain_scanner::read_header;
use crate::common::Unit;
use crate::device::{FlashDevice, FlashGeometry};
use crate::error::{Error, Result};
use crate::record_format::{padded_len, span_units, RecordHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinel {
    pub unit: Unit,
    pub header: RecordHeader,
}

/// Find the highest config record above unit 0.
///
/// If that record sits at `next_free` it is the forward copy, not a
/// sentinel, and `None` is returned.
pub fn find_sentinel<D: FlashDevice + ?Sized>(dev: &mut D, next_free: Unit) -> Result<Option<Sentinel>> {
    let units = dev.geometry().unit_count();
    for unit in (1..units).rev() {
        if let Ok(header) = read_header(dev, unit)? {
            if !header.is_config() {
                continue;
            }
            if unit == next_free {
                debug!("config at unit {unit} is the forward copy, no sentinel");
                return Ok(None);
            }
            trace!("sentinel at unit {unit}, sequence {}", header.sequence);
            return Ok(Some(Sentinel { unit, header }));
        }
    }
    Ok(None)
}

/// Where a sentinel for `payload_len` bytes goes: flush with the top of the
/// device. `floor` is the first unit past the forward copy; that unit is its
/// guard and stays free, so the sentinel starts at `floor + 1` at the lowest.
pub fn sentinel_slot(geometry: &FlashGeometry, payload_len: u64, floor: Unit) -> Result<Unit> {
    let span = span_units(geometry, payload_len);
    let units = geometry.unit_count();
    if span >= units.saturating_sub(floor) {
        return Err(Error::CapacityExceeded {
            unit: floor,
            len: padded_len(geometry, payload_len),
            capacity: geometry.capacity(),
        });
    }
    Ok(units - span)
}
