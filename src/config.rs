use std::path::{Path, PathBuf};

use crate::common::{Sequence, Unit};

pub const DEFAULT_CONFIG_STAGING: &str = "/tmp/config.tar.gz";
pub const DEFAULT_SNAPSHOT_STAGING: &str = "/tmp/snapshot.tar.gz";
pub const DEFAULT_SNAPSHOT_DIR: &str = "/tmp/snapshot";
/// Sequence assumed before the first chain record. Must be the same for
/// every scan, or config copies written on an empty chain go stale.
pub const DEFAULT_INITIAL_SEQUENCE: Sequence = 0;

/// Host-side paths and policy for a [`SnapshotStore`](crate::SnapshotStore).
/// Device geometry is not here; it comes from the device itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Config archive is read from here by `write_config` and written here by
    /// `read_config` and `sync`.
    pub config_staging: PathBuf,
    /// Source of `write_snapshot`.
    pub snapshot_staging: PathBuf,
    /// Chain entries are extracted here as `block<unit>.tar.gz`.
    pub snapshot_dir: PathBuf,
    /// Sequence assumed before the first chain record.
    pub initial_sequence: Sequence,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            config_staging: PathBuf::from(DEFAULT_CONFIG_STAGING),
            snapshot_staging: PathBuf::from(DEFAULT_SNAPSHOT_STAGING),
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            initial_sequence: DEFAULT_INITIAL_SEQUENCE,
        }
    }
}

impl StoreConfig {
    /// All staging paths under one directory. Handy for tests and for
    /// running against an image file.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            config_staging: dir.join("config.tar.gz"),
            snapshot_staging: dir.join("snapshot.tar.gz"),
            snapshot_dir: dir.join("snapshot"),
            initial_sequence: DEFAULT_INITIAL_SEQUENCE,
        }
    }

    pub fn with_initial_sequence(mut self, seq: Sequence) -> Self {
        self.initial_sequence = seq;
        self
    }

    pub fn snapshot_path(&self, unit: Unit) -> PathBuf {
        self.snapshot_dir.join(format!("block{unit}.tar.gz"))
    }

    pub(crate) fn seed(&self) -> Sequence {
        self.initial_sequence
    }
}
