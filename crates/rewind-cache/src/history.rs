//! Bounded log of why entries are not in the cache.

use std::collections::{HashMap, VecDeque};

use crate::ids::NavigationEntryId;
use crate::reason::NotRestoredReason;

/// Remembers the last outcome for recently evicted or rejected entries.
///
/// Oldest records are dropped once `capacity` entries are tracked.
#[derive(Debug)]
pub struct NotRestoredLog {
    capacity: usize,
    order: VecDeque<NavigationEntryId>,
    reasons: HashMap<NavigationEntryId, NotRestoredReason>,
}

impl NotRestoredLog {
    /// Creates a log holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1024)),
            reasons: HashMap::new(),
        }
    }

    /// Records the outcome for `entry_id`, replacing any earlier one.
    pub fn record(&mut self, entry_id: NavigationEntryId, reason: NotRestoredReason) {
        if self.capacity == 0 {
            return;
        }
        if self.reasons.insert(entry_id, reason).is_some() {
            self.order.retain(|id| *id != entry_id);
        }
        self.order.push_back(entry_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.reasons.remove(&oldest);
            }
        }
    }

    /// Forgets `entry_id`, e.g. when it is stored again.
    pub fn forget(&mut self, entry_id: NavigationEntryId) {
        if self.reasons.remove(&entry_id).is_some() {
            self.order.retain(|id| *id != entry_id);
        }
    }

    /// Last recorded outcome for `entry_id`.
    pub fn get(&self, entry_id: NavigationEntryId) -> Option<&NotRestoredReason> {
        self.reasons.get(&entry_id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
