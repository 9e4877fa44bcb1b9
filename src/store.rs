use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::chain_scanner::{scan_forward, ChainCursor, ChainRecord};
use crate::common::{Sequence, Unit};
use crate::config::StoreConfig;
use crate::device::{FlashDevice, FlashGeometry};
use crate::error::{Error, Result};
use crate::reconciler::{self, SyncOutcome};
use crate::record_format::{magic_marker, span_units, RecordHeader, RecordKind};
use crate::record_reader::read_record;
use crate::record_writer::write_record;
use crate::sentinel::{find_sentinel, sentinel_slot, Sentinel};

/// Config archive plus snapshot chain on one flash device.
pub struct SnapshotStore<D: FlashDevice> {
    device: D,
    config: StoreConfig,
}

impl<D: FlashDevice> SnapshotStore<D> {
    pub fn new(device: D, config: StoreConfig) -> Self {
        Self { device, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }

    fn scan(&mut self) -> Result<ChainCursor> {
        let seed = self.config.seed();
        scan_forward(&mut self.device, seed)
    }

    /// Store the staged config archive twice: at the chain tail and at the
    /// top of the flash. Both copies carry the current chain sequence.
    pub fn write_config(&mut self) -> Result<(RecordHeader, Sentinel)> {
        let source = self.config.config_staging.clone();
        let geometry = self.device.geometry();
        let len = fs::metadata(&source).map_err(Error::staging(&source))?.len();
        let cursor = self.scan()?;
        let seq = cursor.last_sequence;

        // Both copies must fit before either is written.
        let floor = cursor.next_free + span_units(&geometry, len);
        let slot = sentinel_slot(&geometry, len, floor)?;
        let forward = write_record(&mut self.device, cursor.next_free, &source, seq, RecordKind::Config)?;
        let header = write_record(&mut self.device, slot, &source, seq, RecordKind::Config)?;
        info!("wrote {:?} (forward unit {}, sentinel unit {slot})", source, cursor.next_free);
        Ok((forward, Sentinel { unit: slot, header }))
    }

    /// Extract the current config copy into the config staging path.
    /// The forward copy is preferred; the sentinel is used if only it is current.
    pub fn read_config(&mut self) -> Result<PathBuf> {
        let cursor = self.scan()?;
        let current = cursor.last_sequence;
        let unit = match cursor.tail {
            Some(h) if h.is_config() && h.sequence == current => cursor.next_free,
            _ => match find_sentinel(&mut self.device, cursor.next_free)? {
                Some(s) if s.header.sequence == current => s.unit,
                _ => return Err(Error::NoConfig),
            },
        };

        let staging = self.config.config_staging.clone();
        remove_if_present(&staging)?;
        read_record(&mut self.device, unit, &staging, RecordKind::Config)?;
        info!("read config from unit {unit} into {:?}", staging);
        Ok(staging)
    }

    /// Append the staged snapshot archive to the chain.
    pub fn write_snapshot(&mut self) -> Result<ChainRecord> {
        let source = self.config.snapshot_staging.clone();
        let cursor = self.scan()?;
        let seq = cursor.last_sequence.wrapping_add(1);
        let unit = cursor.next_free;
        let header = write_record(&mut self.device, unit, &source, seq, RecordKind::Data)?;
        Ok(ChainRecord { unit, header })
    }

    /// Extract snapshot records into the snapshot directory.
    ///
    /// With a unit, only the record there is read. Without one, every live
    /// chain record is read; entries failing verification are skipped.
    pub fn read_snapshot(&mut self, unit: Option<Unit>) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.config.snapshot_dir).map_err(Error::staging(&self.config.snapshot_dir))?;

        if let Some(unit) = unit {
            let units = self.device.geometry().unit_count();
            if unit >= units {
                return Err(Error::InvalidUnit { unit, units });
            }
            let path = self.config.snapshot_path(unit);
            read_record(&mut self.device, unit, &path, RecordKind::Data)?;
            return Ok(vec![path]);
        }

        let cursor = self.scan()?;
        let mut extracted = Vec::with_capacity(cursor.records.len());
        for record in &cursor.records {
            let path = self.config.snapshot_path(record.unit);
            match read_record(&mut self.device, record.unit, &path, RecordKind::Data) {
                Ok(_) => extracted.push(path),
                Err(e) if e.is_soft() => warn!("skipping snapshot at unit {}: {e}", record.unit),
                Err(e) => return Err(e),
            }
        }
        Ok(extracted)
    }

    /// Write the reset marker: the magic tag at offset 0 and nothing else.
    pub fn mark(&mut self) -> Result<()> {
        self.device
            .write(0, &magic_marker())
            .map_err(|source| Error::WriteFailed { unit: 0, source })?;
        info!("marked device with {:#010x}", u32::from_be_bytes(magic_marker()));
        Ok(())
    }

    pub fn sync(&mut self) -> Result<SyncOutcome> {
        let seed = self.config.seed();
        reconciler::sync(&mut self.device, &self.config.config_staging, seed)
    }

    /// Describe what is currently on the flash.
    pub fn info(&mut self) -> Result<Layout> {
        let cursor = self.scan()?;
        let sentinel = find_sentinel(&mut self.device, cursor.next_free)?;
        Ok(Layout {
            geometry: self.device.geometry(),
            volatile: cursor.tail.filter(RecordHeader::is_config).map(|header| ChainRecord {
                unit: cursor.next_free,
                header,
            }),
            next_free: cursor.next_free,
            last_sequence: (!cursor.is_empty()).then_some(cursor.last_sequence),
            records: cursor.records,
            sentinel,
        })
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(Error::Staging {
            path: path.to_path_buf(),
            source: e,
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub geometry: FlashGeometry,
    pub records: Vec<ChainRecord>,
    pub volatile: Option<ChainRecord>,
    pub sentinel: Option<Sentinel>,
    pub next_free: Unit,
    /// `None` while the chain is empty.
    pub last_sequence: Option<Sequence>,
}

fn entry_line(
    f: &mut fmt::Formatter<'_>,
    geometry: &FlashGeometry,
    unit: Unit,
    what: &str,
    h: &RecordHeader,
) -> fmt::Result {
    writeln!(
        f,
        "block {unit}:\t{what} entry, size: {}, sectors: {}, sequence: {}",
        h.length,
        span_units(geometry, h.length as u64),
        h.sequence
    )
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = &self.geometry;
        writeln!(
            f,
            "sectors:\t{}, erasesize:\t{}K",
            g.unit_count(),
            g.erase_unit() / 1024
        )?;
        for r in &self.records {
            entry_line(f, g, r.unit, "snapshot", &r.header)?;
        }
        if let Some(v) = &self.volatile {
            entry_line(f, g, v.unit, "volatile", &v.header)?;
        }
        if let Some(s) = &self.sentinel {
            entry_line(f, g, s.unit, "sentinel", &s.header)?;
        }
        write!(f, "next free block: {}", self.next_free)
    }
}
