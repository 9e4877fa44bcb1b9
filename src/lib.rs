pub mod chain_scanner;
pub mod common;
pub mod config;
pub mod device;
pub mod digest;
pub mod error;
pub mod reconciler;
pub mod record_format;
pub mod record_reader;
pub mod record_writer;
pub mod sentinel;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::StoreConfig;
pub use device::{FileFlash, FlashDevice, FlashGeometry, RamFlash};
pub use error::{Error, Result};
pub use record_format::{RecordHeader, RecordKind};
pub use store::{Layout, SnapshotStore};
