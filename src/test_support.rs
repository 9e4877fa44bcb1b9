use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::common::Unit;
use crate::device::{FlashDevice, FlashGeometry, RamFlash};
use crate::error::DeviceOp;

pub const UNIT: u32 = 1024;

pub fn ram_flash(units: u32) -> RamFlash {
    RamFlash::new(FlashGeometry::new(units as u64 * UNIT as u64, UNIT).unwrap())
}

/// Deterministic, non-repeating-ish payload so corruption is visible.
pub fn payload(len: usize, salt: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31) ^ salt).collect()
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

/// Wraps a [`RamFlash`] and fails one kind of operation whenever it touches
/// the byte at `offset`.
pub struct FaultyFlash {
    pub inner: RamFlash,
    pub op: DeviceOp,
    pub offset: u64,
}

impl FaultyFlash {
    pub fn new(inner: RamFlash, op: DeviceOp, offset: u64) -> Self {
        Self { inner, op, offset }
    }

    fn check(&self, op: DeviceOp, offset: u64, len: u64) -> io::Result<()> {
        if op == self.op && (offset..offset + len).contains(&self.offset) {
            return Err(io::Error::new(io::ErrorKind::Other, format!("injected {op} fault")));
        }
        Ok(())
    }
}

impl FlashDevice for FaultyFlash {
    fn geometry(&self) -> FlashGeometry {
        self.inner.geometry()
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.check(DeviceOp::Read, offset, buf.len() as u64)?;
        self.inner.read(offset, buf)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.check(DeviceOp::Write, offset, data.len() as u64)?;
        self.inner.write(offset, data)
    }

    fn erase(&mut self, unit: Unit, count: u32) -> io::Result<()> {
        let g = self.inner.geometry();
        self.check(DeviceOp::Erase, g.offset(unit), count as u64 * g.erase_unit() as u64)?;
        self.inner.erase(unit, count)
    }
}
