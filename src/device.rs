use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::common::{Unit, ERASED_BYTE};
use crate::error::{DeviceOp, Error, Result};
use crate::record_format::HEADER_SIZE;

/// Size and erase granularity of a flash region. Passed explicitly to every
/// component so the engine can run against devices of any shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    capacity: u64,
    erase_unit: u32,
}

impl FlashGeometry {
    pub fn new(capacity: u64, erase_unit: u32) -> Result<Self> {
        // Every record header must fit inside its first unit.
        if (erase_unit as usize) < HEADER_SIZE {
            return Err(Error::Geometry(format!(
                "erase unit {erase_unit} is smaller than a record header ({HEADER_SIZE})"
            )));
        }
        if capacity < erase_unit as u64 {
            return Err(Error::Geometry(format!(
                "capacity {capacity} is smaller than one erase unit ({erase_unit})"
            )));
        }
        if capacity / erase_unit as u64 > Unit::MAX as u64 {
            return Err(Error::Geometry(format!("capacity {capacity} has too many units")));
        }
        Ok(Self {
            capacity,
            erase_unit,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn erase_unit(&self) -> u32 {
        self.erase_unit
    }

    /// Number of whole erase units on the device.
    pub fn unit_count(&self) -> Unit {
        (self.capacity / self.erase_unit as u64) as Unit
    }

    pub fn offset(&self, unit: Unit) -> u64 {
        unit as u64 * self.erase_unit as u64
    }
}

/// Raw, erase-granular flash. Offsets are in bytes; erase works on whole units.
pub trait FlashDevice {
    fn geometry(&self) -> FlashGeometry;

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn write(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    fn erase(&mut self, unit: Unit, count: u32) -> io::Result<()>;
}

/// Read helper that tags failures with the operation and offset.
pub(crate) fn read_at<D: FlashDevice + ?Sized>(dev: &mut D, offset: u64, buf: &mut [u8]) -> Result<()> {
    dev.read(offset, buf).map_err(|source| Error::Device {
        op: DeviceOp::Read,
        offset,
        source,
    })
}

/// Erase `count` units at `unit`, clamped to the end of the device.
pub(crate) fn erase_clamped<D: FlashDevice + ?Sized>(dev: &mut D, unit: Unit, count: u32) -> Result<()> {
    let units = dev.geometry().unit_count();
    if unit >= units {
        return Ok(());
    }
    let count = count.min(units - unit);
    debug!("erasing {count} unit(s) at unit {unit}");
    dev.erase(unit, count).map_err(|source| Error::Device {
        op: DeviceOp::Erase,
        offset: dev.geometry().offset(unit),
        source,
    })
}

fn check_range(geometry: &FlashGeometry, offset: u64, len: u64) -> io::Result<()> {
    if offset.checked_add(len).map_or(true, |end| end > geometry.capacity()) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range {offset:#x}+{len} is past the end of the device"),
        ));
    }
    Ok(())
}

/// Flash backed by a file: an image on disk or a block device node.
/// Erasing fills the units with the erased byte value.
pub struct FileFlash {
    path: PathBuf,
    file: File,
    geometry: FlashGeometry,
}

impl FileFlash {
    /// Open an existing image. The capacity is the file length, truncated to
    /// whole erase units.
    pub fn open<P: AsRef<Path>>(path: P, erase_unit: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(Error::staging(&path))?;
        // Block devices report a zero metadata length; seeking to the end works for both.
        let len = file.seek(SeekFrom::End(0)).map_err(Error::staging(&path))?;
        let capacity = len - len % erase_unit.max(1) as u64;
        let geometry = FlashGeometry::new(capacity, erase_unit)?;
        debug!(
            "opened {:?}: {} units of {} bytes",
            path,
            geometry.unit_count(),
            erase_unit
        );
        Ok(Self {
            path,
            file,
            geometry,
        })
    }

    /// Create a blank (fully erased) image of the given geometry.
    pub fn create<P: AsRef<Path>>(path: P, geometry: FlashGeometry) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(Error::staging(&path))?;
        file.set_len(geometry.capacity()).map_err(Error::staging(&path))?;
        let mut flash = Self {
            path,
            file,
            geometry,
        };
        flash
            .erase(0, geometry.unit_count())
            .map_err(Error::staging(flash.path.clone()))?;
        Ok(flash)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FlashDevice for FileFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(&self.geometry, offset, buf.len() as u64)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        check_range(&self.geometry, offset, data.len() as u64)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()
    }

    fn erase(&mut self, unit: Unit, count: u32) -> io::Result<()> {
        let offset = self.geometry.offset(unit);
        let len = count as u64 * self.geometry.erase_unit() as u64;
        check_range(&self.geometry, offset, len)?;
        let blank = vec![ERASED_BYTE; self.geometry.erase_unit() as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        for _ in 0..count {
            self.file.write_all(&blank)?;
        }
        self.file.flush()
    }
}

/// In-memory flash. Keeps a log of erase calls so callers can check what
/// was (or was not) erased.
pub struct RamFlash {
    data: Vec<u8>,
    geometry: FlashGeometry,
    erases: Vec<(Unit, u32)>,
}

impl RamFlash {
    pub fn new(geometry: FlashGeometry) -> Self {
        Self {
            data: vec![ERASED_BYTE; geometry.capacity() as usize],
            geometry,
            erases: Vec::new(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn erase_log(&self) -> &[(Unit, u32)] {
        &self.erases
    }
}

impl FlashDevice for RamFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(&self.geometry, offset, buf.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        check_range(&self.geometry, offset, data.len() as u64)?;
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, unit: Unit, count: u32) -> io::Result<()> {
        let offset = self.geometry.offset(unit);
        let len = count as u64 * self.geometry.erase_unit() as u64;
        check_range(&self.geometry, offset, len)?;
        self.data[offset as usize..(offset + len) as usize].fill(ERASED_BYTE);
        self.erases.push((unit, count));
        Ok(())
    }
}
