use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use log::{debug, info};

use crate::common::{Sequence, Unit, COPY_CHUNK};
use crate::device::FlashDevice;
use crate::digest::file_digest;
use crate::error::{Error, Result};
use crate::record_format::{padded_len, span_units, valid_length, RecordHeader, RecordKind, HEADER_SIZE};

/// Write the contents of `source` as a record starting at `start`.
///
/// Erases the record's span plus one trailing guard unit first, so a stale
/// header right behind the new record cannot be read as a continuation of
/// the chain. Nothing is rolled back if a later step fails.
pub fn write_record<D: FlashDevice + ?Sized>(
    dev: &mut D,
    start: Unit,
    source: &Path,
    sequence: Sequence,
    kind: RecordKind,
) -> Result<RecordHeader> {
    let geometry = dev.geometry();
    let len = fs::metadata(source).map_err(Error::staging(source))?.len();
    if !valid_length(len) {
        return Err(Error::InvalidLength { unit: start, len });
    }

    let padded = padded_len(&geometry, len);
    if geometry.offset(start) + padded > geometry.capacity() {
        return Err(Error::CapacityExceeded {
            unit: start,
            len: padded,
            capacity: geometry.capacity(),
        });
    }

    let digest = file_digest(source).map_err(Error::staging(source))?;
    let header = RecordHeader {
        kind,
        sequence,
        length: len as u32,
        digest,
    };

    let span = span_units(&geometry, len);
    let guard = u32::from(start + span < geometry.unit_count());
    let failed = |source| Error::WriteFailed { unit: start, source };

    debug!("erasing units {start}..{} (+{guard} guard)", start + span);
    dev.erase(start, span + guard).map_err(failed)?;

    let mut offset = geometry.offset(start);
    dev.write(offset, &header.encode()).map_err(failed)?;
    offset += HEADER_SIZE as u64;

    let mut input = File::open(source).map_err(Error::staging(source))?.take(len);
    let mut buf = [0u8; COPY_CHUNK];
    loop {
        let n = input.read(&mut buf).map_err(Error::staging(source))?;
        if n == 0 {
            break;
        }
        dev.write(offset, &buf[..n]).map_err(failed)?;
        offset += n as u64;
    }

    info!(
        "wrote {:?} record at unit {start}: {len} bytes, {span} unit(s), sequence {sequence}",
        kind
    );
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_scanner::read_header;
    use crate::common::ERASED_BYTE;
    use crate::digest::bytes_digest;
    use crate::error::DeviceOp;
    use crate::test_support::*;

    #[test]
    fn test_writes_header_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(3000, 1);
        let src = write_file(dir.path(), "snap", &data);
        let mut flash = ram_flash(16);

        let header = write_record(&mut flash, 2, &src, 77, RecordKind::Data).unwrap();
        assert_eq!(header.length, 3000);
        assert_eq!(header.digest, bytes_digest(&data));

        assert_eq!(read_header(&mut flash, 2).unwrap(), Ok(header));
        let at = 2 * UNIT as usize + HEADER_SIZE;
        assert_eq!(&flash.as_bytes()[at..at + data.len()], &data[..]);
        // 3000 + 32 bytes need three units, plus the guard.
        assert_eq!(flash.erase_log(), &[(2, 4)]);
    }

    #[test]
    fn test_guard_unit_clears_stale_header() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "snap", &payload(100, 2));
        let mut flash = ram_flash(8);
        let stale = RecordHeader {
            kind: RecordKind::Data,
            sequence: 2,
            length: 10,
            digest: [0; 16],
        };
        let at = UNIT as usize;
        flash.as_bytes_mut()[at..at + HEADER_SIZE].copy_from_slice(&stale.encode());

        write_record(&mut flash, 0, &src, 1, RecordKind::Data).unwrap();
        assert!(read_header(&mut flash, 1).unwrap().is_err());
        assert!(flash.as_bytes()[at..at + HEADER_SIZE]
            .iter()
            .all(|&b| b == ERASED_BYTE));
    }

    #[test]
    fn test_guard_is_skipped_at_device_end() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "conf", &payload(100, 3));
        let mut flash = ram_flash(8);

        write_record(&mut flash, 7, &src, 1, RecordKind::Config).unwrap();
        assert_eq!(flash.erase_log(), &[(7, 1)]);
    }

    #[test]
    fn test_capacity_exceeded_erases_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "big", &payload(2 * UNIT as usize, 4));
        let mut flash = ram_flash(8);

        // Needs three units; only two left from unit 6.
        let err = write_record(&mut flash, 6, &src, 1, RecordKind::Data).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { unit: 6, .. }));
        assert!(flash.erase_log().is_empty());
        assert!(flash.as_bytes().iter().all(|&b| b == ERASED_BYTE));
    }

    #[test]
    fn test_empty_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "empty", b"");
        let mut flash = ram_flash(8);

        let err = write_record(&mut flash, 0, &src, 1, RecordKind::Data).unwrap_err();
        assert!(matches!(err, Error::InvalidLength { len: 0, .. }));
        assert!(flash.erase_log().is_empty());
    }

    #[test]
    fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut flash = ram_flash(8);
        let err = write_record(&mut flash, 0, &dir.path().join("nope"), 1, RecordKind::Data)
            .unwrap_err();
        assert!(matches!(err, Error::Staging { .. }));
    }

    #[test]
    fn test_erase_fault_is_write_failed() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "snap", &payload(3000, 6));
        let mut flash = FaultyFlash::new(ram_flash(16), DeviceOp::Erase, 3 * UNIT as u64);

        let err = write_record(&mut flash, 2, &src, 1, RecordKind::Data).unwrap_err();
        assert!(matches!(err, Error::WriteFailed { unit: 2, .. }));
        assert!(!err.is_soft());
        assert!(flash.inner.erase_log().is_empty());
    }

    #[test]
    fn test_payload_write_fault_leaves_torn_record() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "snap", &payload(3000, 7));
        let at = 2 * UNIT as u64 + HEADER_SIZE as u64 + 1000;
        let mut flash = FaultyFlash::new(ram_flash(16), DeviceOp::Write, at);

        let err = write_record(&mut flash, 2, &src, 1, RecordKind::Data).unwrap_err();
        assert!(matches!(err, Error::WriteFailed { unit: 2, .. }));
        // No rollback: the header is already on flash.
        assert!(read_header(&mut flash.inner, 2).unwrap().is_ok());
    }
}
