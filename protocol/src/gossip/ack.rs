//! Per-neighbor acknowledgement tracking.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::wire::MessageValue;

/// Values one neighbor is known to have.
///
/// A value lands here when that neighbor answered a delivery with
/// `broadcast_ok`, or when the neighbor itself sent us the value. Each
/// tracker has its own lock; trackers of different neighbors never contend.
#[derive(Debug, Default)]
pub struct AckTracker {
    acked: RwLock<HashSet<MessageValue>>,
}

impl AckTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the neighbor already has `value`.
    pub fn is_acked(&self, value: MessageValue) -> bool {
        self.acked.read().contains(&value)
    }

    /// Marks `value` as held by the neighbor. Returns `true` if it was not
    /// marked before.
    pub fn mark_acked(&self, value: MessageValue) -> bool {
        self.acked.write().insert(value)
    }

    /// Number of values the neighbor is known to have.
    pub fn acked_count(&self) -> usize {
        self.acked.read().len()
    }
}
