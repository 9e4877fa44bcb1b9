use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use log::{debug, warn};

use crate::chain_scanner::read_header;
use crate::common::{Unit, COPY_CHUNK};
use crate::device::{read_at, FlashDevice};
use crate::digest::file_digest;
use crate::error::{Error, Result};
use crate::record_format::{span_units, RecordHeader, RecordKind, HEADER_SIZE};

/// Decode the header at `unit` without touching the payload.
pub fn peek_header<D: FlashDevice + ?Sized>(dev: &mut D, unit: Unit) -> Result<RecordHeader> {
    let units = dev.geometry().unit_count();
    if unit >= units {
        return Err(Error::InvalidUnit { unit, units });
    }
    read_header(dev, unit)?.map_err(|e| {
        debug!("no record at unit {unit}: {e:?}");
        Error::InvalidHeader { unit }
    })
}

/// Copy the payload of the record at `unit` into `destination` and verify
/// its digest. Returns the unit right after the record.
///
/// A digest mismatch removes `destination` and reports
/// [`Error::HashMismatch`], which still carries the next unit.
pub fn read_record<D: FlashDevice + ?Sized>(
    dev: &mut D,
    unit: Unit,
    destination: &Path,
    expected: RecordKind,
) -> Result<Unit> {
    let geometry = dev.geometry();
    let header = peek_header(dev, unit)?;
    if header.kind != expected {
        return Err(Error::KindMismatch {
            unit,
            expected,
            found: header.kind,
        });
    }

    let len = header.length as u64;
    let start = geometry.offset(unit) + HEADER_SIZE as u64;
    if !header.has_valid_length() || start + len > geometry.capacity() {
        return Err(Error::InvalidLength { unit, len });
    }
    // Taken from the header, not from what the copy loop consumed.
    let next_unit = unit + span_units(&geometry, len);

    if let Err(e) = copy_payload(dev, start, len, destination) {
        discard(destination);
        return Err(e);
    }

    let actual = file_digest(destination).map_err(Error::staging(destination))?;
    if actual != header.digest {
        warn!("digest verification failed for record at unit {unit}");
        discard(destination);
        return Err(Error::HashMismatch { unit, next_unit });
    }

    debug!("read {len} bytes from unit {unit} into {:?}", destination);
    Ok(next_unit)
}

// Remove a partial or unverified extract.
fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {:?}: {e}", path),
    }
}

fn copy_payload<D: FlashDevice + ?Sized>(
    dev: &mut D,
    mut offset: u64,
    len: u64,
    destination: &Path,
) -> Result<()> {
    let mut out = File::create(destination).map_err(Error::staging(destination))?;
    let mut buf = [0u8; COPY_CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(COPY_CHUNK as u64) as usize;
        read_at(dev, offset, &mut buf[..n])?;
        out.write_all(&buf[..n]).map_err(Error::staging(destination))?;
        offset += n as u64;
        remaining -= n as u64;
    }
    out.flush().map_err(Error::staging(destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceOp;
    use crate::record_writer::write_record;
    use crate::test_support::*;

    #[test]
    fn test_read_back_written_record() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(5000, 9);
        let src = write_file(dir.path(), "in", &data);
        let dst = dir.path().join("out");
        let mut flash = ram_flash(16);

        write_record(&mut flash, 1, &src, 3, RecordKind::Data).unwrap();
        let next = read_record(&mut flash, 1, &dst, RecordKind::Data).unwrap();
        assert_eq!(next, 1 + 5);
        assert_eq!(fs::read(&dst).unwrap(), data);
    }

    #[test]
    fn test_destination_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "in", b"short");
        let dst = write_file(dir.path(), "out", &payload(4000, 0));
        let mut flash = ram_flash(4);

        write_record(&mut flash, 0, &src, 1, RecordKind::Config).unwrap();
        read_record(&mut flash, 0, &dst, RecordKind::Config).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"short");
    }

    #[test]
    fn test_corrupt_payload_is_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "in", &payload(2500, 5));
        let dst = dir.path().join("out");
        let mut flash = ram_flash(16);

        write_record(&mut flash, 4, &src, 1, RecordKind::Data).unwrap();
        let at = 4 * UNIT as usize + HEADER_SIZE + 1234;
        flash.as_bytes_mut()[at] ^= 0x01;

        let err = read_record(&mut flash, 4, &dst, RecordKind::Data).unwrap_err();
        assert!(err.is_soft());
        // The record spans three units; advancing must use the full length.
        assert!(matches!(err, Error::HashMismatch { unit: 4, next_unit: 7 }));
        assert!(!dst.exists());
    }

    #[test]
    fn test_structural_failures() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "in", &payload(10, 5));
        let dst = dir.path().join("out");
        let mut flash = ram_flash(8);

        assert!(matches!(
            read_record(&mut flash, 0, &dst, RecordKind::Data),
            Err(Error::InvalidHeader { unit: 0 })
        ));

        write_record(&mut flash, 0, &src, 1, RecordKind::Config).unwrap();
        assert!(matches!(
            read_record(&mut flash, 0, &dst, RecordKind::Data),
            Err(Error::KindMismatch {
                expected: RecordKind::Data,
                found: RecordKind::Config,
                ..
            })
        ));

        let bogus = RecordHeader {
            kind: RecordKind::Data,
            sequence: 1,
            length: 0,
            digest: [0; 16],
        };
        let at = 2 * UNIT as usize;
        flash.as_bytes_mut()[at..at + HEADER_SIZE].copy_from_slice(&bogus.encode());
        assert!(matches!(
            read_record(&mut flash, 2, &dst, RecordKind::Data),
            Err(Error::InvalidLength { unit: 2, len: 0 })
        ));

        assert!(matches!(
            read_record(&mut flash, 8, &dst, RecordKind::Data),
            Err(Error::InvalidUnit { unit: 8, units: 8 })
        ));
        assert!(!dst.exists());
    }

    #[test]
    fn test_length_past_device_end() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("out");
        let mut flash = ram_flash(4);
        let header = RecordHeader {
            kind: RecordKind::Data,
            sequence: 1,
            length: 4 * UNIT,
            digest: [0; 16],
        };
        let at = 3 * UNIT as usize;
        flash.as_bytes_mut()[at..at + HEADER_SIZE].copy_from_slice(&header.encode());

        let err = read_record(&mut flash, 3, &dst, RecordKind::Data).unwrap_err();
        assert!(matches!(err, Error::InvalidLength { unit: 3, .. }));
    }

    #[test]
    fn test_read_fault_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "in", &payload(3000, 4));
        let dst = dir.path().join("out");
        let mut flash = ram_flash(8);
        write_record(&mut flash, 1, &src, 1, RecordKind::Data).unwrap();

        let at = UNIT as u64 + HEADER_SIZE as u64 + 2000;
        let mut faulty = FaultyFlash::new(flash, DeviceOp::Read, at);
        let err = read_record(&mut faulty, 1, &dst, RecordKind::Data).unwrap_err();
        assert!(matches!(err, Error::Device { op: DeviceOp::Read, .. }));
        assert!(!dst.exists());
    }

    #[test]
    fn test_discard_tolerates_missing_and_unremovable_paths() {
        let dir = tempfile::tempdir().unwrap();
        discard(&dir.path().join("never-created"));

        // remove_file refuses directories; that is logged, not raised.
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        discard(&sub);
        assert!(sub.is_dir());
    }
}
