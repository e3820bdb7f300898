//! Running batch counters
//!
//! The aggregator is the one piece of state every worker writes to. It keeps
//! per-status counters that move by one on each [`Transition`], so a summary is
//! never recomputed by scanning items.

use parking_lot::Mutex;
use paperflow_core::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

use crate::item::{IngestItem, ItemStatus, Transition};

/// Consolidated view of a batch.
///
/// `total == ready + uploading + processing + completed + failed + rejected`
/// holds for every summary the aggregator hands out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub ready: usize,
    pub uploading: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub rejected: usize,
    /// Bytes of admitted items only
    pub total_bytes: u64,
}

impl BatchSummary {
    pub fn admitted(&self) -> usize {
        self.total - self.rejected
    }

    pub fn in_flight(&self) -> usize {
        self.uploading + self.processing
    }

    /// Every item has reached a terminal state
    pub fn is_settled(&self) -> bool {
        self.ready == 0 && self.in_flight() == 0
    }

    /// Completed items as a percentage of admitted items
    pub fn overall_percent(&self) -> u8 {
        let admitted = self.admitted();
        if admitted == 0 {
            return 0;
        }
        ((self.completed * 100) / admitted) as u8
    }

    fn counter(&mut self, status: ItemStatus) -> &mut usize {
        match status {
            ItemStatus::Ready => &mut self.ready,
            ItemStatus::Uploading | ItemStatus::Uploaded => &mut self.uploading,
            ItemStatus::Processing => &mut self.processing,
            ItemStatus::Completed => &mut self.completed,
            ItemStatus::UploadFailed | ItemStatus::ProcessingFailed => &mut self.failed,
            ItemStatus::Rejected => &mut self.rejected,
        }
    }

    fn check(&self) -> bool {
        self.total
            == self.ready
                + self.uploading
                + self.processing
                + self.completed
                + self.failed
                + self.rejected
    }
}

#[derive(Debug)]
struct AggregatorState {
    summary: BatchSummary,
    applied: HashMap<ItemId, u64>,
}

/// Incrementally maintained [`BatchSummary`]
#[derive(Debug)]
pub struct Aggregator {
    state: Mutex<AggregatorState>,
}

impl Aggregator {
    pub fn new(items: &[IngestItem], rejected: usize) -> Self {
        let mut summary = BatchSummary {
            total: items.len() + rejected,
            rejected,
            ..Default::default()
        };

        let mut applied = HashMap::with_capacity(items.len());
        for item in items {
            *summary.counter(item.status()) += 1;
            summary.total_bytes += item.size_bytes;
            applied.insert(item.id, 0);
        }

        Self {
            state: Mutex::new(AggregatorState { summary, applied }),
        }
    }

    /// Fold one transition into the counters. Replaying a transition that was
    /// already applied changes nothing.
    ///
    /// # Panics
    ///
    /// In debug builds, if the item is not part of the batch. Release builds
    /// log the violation and leave the counters untouched.
    pub fn apply(&self, transition: &Transition) -> BatchSummary {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(last) = state.applied.get_mut(&transition.item_id) else {
            error!(item_id = %transition.item_id, "Transition for an item outside the batch");
            debug_assert!(false, "transition for unknown item {}", transition.item_id);
            return state.summary;
        };
        if transition.seq <= *last {
            return state.summary;
        }
        *last = transition.seq;

        let summary = &mut state.summary;
        let from = summary.counter(transition.from);
        *from = from.saturating_sub(1);
        *summary.counter(transition.to) += 1;

        debug_assert!(summary.check(), "summary counters out of balance");
        *summary
    }

    pub fn snapshot(&self) -> BatchSummary {
        self.state.lock().summary
    }
}
