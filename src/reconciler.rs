//! Boot-time reconciliation of the two config copies.
//!
//! A config copy is current only if its sequence matches the last sequence of
//! the snapshot chain. Stale copies are erased, then the surviving copies are
//! compared and the missing or divergent one is rewritten from the other.
//! The forward copy wins any conflict.

use std::fs;
use std::io;
use std::path::Path;

use log::{debug, info, warn};

use crate::chain_scanner::scan_forward;
use crate::common::{Sequence, Unit};
use crate::device::{erase_clamped, FlashDevice};
use crate::error::Result;
use crate::record_format::{span_units, RecordHeader, RecordKind};
use crate::record_reader::read_record;
use crate::record_writer::write_record;
use crate::sentinel::{find_sentinel, sentinel_slot, Sentinel};

/// Units erased when the forward copy is stale: its first unit plus the guard.
const STALE_FORWARD_ERASE: u32 = 2;
/// Units erased when the sentinel is stale: enough to kill its header.
const STALE_SENTINEL_ERASE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Neither copy is current.
    Nothing,
    /// Both copies are current and identical.
    InSync,
    /// The forward copy is current and the sentinel is missing or differs.
    RefreshSentinel { forward: RecordHeader },
    /// Only the sentinel is current; put it back at the chain tail.
    RestoreForward { sentinel: Sentinel },
    /// Only the sentinel is current but the chain is empty.
    SentinelOnly { sentinel: Sentinel },
}

/// Pick the repair for a pair of current (already staleness-filtered) copies.
pub fn decide(forward: Option<RecordHeader>, sentinel: Option<Sentinel>, next_free: Unit) -> Decision {
    match (forward, sentinel) {
        (None, None) => Decision::Nothing,
        (Some(f), Some(s)) if f.digest == s.header.digest && f.sequence == s.header.sequence => {
            Decision::InSync
        }
        (Some(forward), _) => Decision::RefreshSentinel { forward },
        (None, Some(sentinel)) if next_free != 0 => Decision::RestoreForward { sentinel },
        (None, Some(sentinel)) => Decision::SentinelOnly { sentinel },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub decision: Decision,
    pub stale_forward: bool,
    pub stale_sentinel: bool,
    /// A copy was rewritten.
    pub repaired: bool,
}

/// Bring the forward and sentinel config copies into agreement.
/// `staging` is used for the copy and is removed afterwards in every case.
pub fn sync<D: FlashDevice + ?Sized>(dev: &mut D, staging: &Path, seed: Sequence) -> Result<SyncOutcome> {
    let result = reconcile(dev, staging, seed);
    match fs::remove_file(staging) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            warn!("failed to remove {:?}: {e}", staging)
        }
        _ => {}
    }
    result
}

fn reconcile<D: FlashDevice + ?Sized>(dev: &mut D, staging: &Path, seed: Sequence) -> Result<SyncOutcome> {
    let geometry = dev.geometry();
    let cursor = scan_forward(dev, seed)?;
    let next_free = cursor.next_free;
    let current = cursor.last_sequence;

    let mut forward = cursor.tail.filter(RecordHeader::is_config);
    let mut sentinel = find_sentinel(dev, next_free)?;
    let mut stale_forward = false;
    let mut stale_sentinel = false;

    if let Some(f) = forward {
        if f.sequence != current {
            info!("forward config at unit {next_free} is stale (sequence {} != {current})", f.sequence);
            erase_clamped(dev, next_free, STALE_FORWARD_ERASE)?;
            forward = None;
            stale_forward = true;
        }
    }
    if let Some(s) = sentinel {
        if s.header.sequence != current {
            info!(
                "sentinel config at unit {} is stale (sequence {} != {current})",
                s.unit, s.header.sequence
            );
            erase_clamped(dev, s.unit, STALE_SENTINEL_ERASE)?;
            sentinel = None;
            stale_sentinel = true;
        }
    }

    let decision = decide(forward, sentinel, next_free);
    debug!("reconcile: {decision:?}");
    let repaired = match decision {
        Decision::Nothing | Decision::SentinelOnly { .. } => false,
        Decision::InSync => {
            info!("config in sync");
            false
        }
        Decision::RefreshSentinel { forward } => {
            let len = forward.length as u64;
            let floor = next_free + span_units(&geometry, len);
            match sentinel_slot(&geometry, len, floor) {
                Err(e) => {
                    warn!("no room for a sentinel, not repairing: {e}");
                    false
                }
                Ok(slot) => {
                    if !stage(read_record(dev, next_free, staging, RecordKind::Config))? {
                        false
                    } else {
                        write_record(dev, slot, staging, forward.sequence, RecordKind::Config)?;
                        info!("refreshed sentinel at unit {slot}");
                        true
                    }
                }
            }
        }
        Decision::RestoreForward { sentinel } => {
            let span = span_units(&geometry, sentinel.header.length as u64);
            // The forward copy and its guard unit must end below the sentinel.
            if next_free + span >= sentinel.unit {
                warn!(
                    "forward copy at unit {next_free} would overlap sentinel at unit {}, not repairing",
                    sentinel.unit
                );
                false
            } else if !stage(read_record(dev, sentinel.unit, staging, RecordKind::Config))? {
                false
            } else {
                write_record(dev, next_free, staging, sentinel.header.sequence, RecordKind::Config)?;
                info!("restored forward config at unit {next_free}");
                true
            }
        }
    };

    Ok(SyncOutcome {
        decision,
        stale_forward,
        stale_sentinel,
        repaired,
    })
}

// Soft read failures skip the repair; device faults propagate.
fn stage(read: Result<Unit>) -> Result<bool> {
    match read {
        Ok(_) => Ok(true),
        Err(e) if e.is_soft() => {
            warn!("config copy unreadable, not repairing: {e}");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
