//! Bookkeeping for snapshot reads.
//!
//! Every snapshot scanner pins a sequence number here for its lifetime.
//! History compaction never drops a version that a pinned snapshot (or the
//! current state) can still observe, and snapshots older than the last
//! compaction point are refused.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

use super::types::SeqNum;

#[derive(Default)]
struct RegistryState {
    active: BTreeMap<SeqNum, usize>,
    /// Versions at or below this point may already be pruned.
    ancient_history_mark: SeqNum,
}

#[derive(Default)]
pub struct SnapshotRegistry {
    state: Mutex<RegistryState>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the sequence number returned by `current`, read under the
    /// registry lock so a concurrent compaction cannot overtake it.
    pub fn pin_current(self: &Arc<Self>, current: impl FnOnce() -> SeqNum) -> SnapshotGuard {
        let mut state = self.state.lock();
        let seq_num = current();
        *state.active.entry(seq_num).or_insert(0) += 1;
        SnapshotGuard {
            registry: Arc::clone(self),
            seq_num,
        }
    }

    /// Pin an explicit past sequence number.
    pub fn pin_at(self: &Arc<Self>, seq_num: SeqNum) -> Result<SnapshotGuard> {
        let mut state = self.state.lock();
        if seq_num < state.ancient_history_mark {
            return Err(Error::scan_config(format!(
                "snapshot {} is older than the retained history ({})",
                seq_num, state.ancient_history_mark
            )));
        }
        *state.active.entry(seq_num).or_insert(0) += 1;
        Ok(SnapshotGuard {
            registry: Arc::clone(self),
            seq_num,
        })
    }

    /// Oldest point any reader may still use, given the current sequence
    /// number. Advances the ancient-history mark to it.
    pub fn advance_watermark(&self, current: impl FnOnce() -> SeqNum) -> SeqNum {
        let mut state = self.state.lock();
        let current = current();
        let oldest_pinned = state.active.keys().next().copied().unwrap_or(current);
        let watermark = oldest_pinned.min(current);
        state.ancient_history_mark = state.ancient_history_mark.max(watermark);
        watermark
    }

    pub fn ancient_history_mark(&self) -> SeqNum {
        self.state.lock().ancient_history_mark
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.values().sum()
    }

    fn release(&self, seq_num: SeqNum) {
        let mut state = self.state.lock();
        if let Some(count) = state.active.get_mut(&seq_num) {
            *count -= 1;
            if *count == 0 {
                state.active.remove(&seq_num);
            }
        }
    }
}

/// A pinned snapshot; unpinned on drop.
pub struct SnapshotGuard {
    registry: Arc<SnapshotRegistry>,
    seq_num: SeqNum,
}

impl SnapshotGuard {
    pub fn seq_num(&self) -> SeqNum {
        self.seq_num
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.registry.release(self.seq_num);
    }
}
