use crate::IdValue;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A released id waiting out its cooldown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedIdEntry {
    pub id: IdValue,
    /// Absolute wall-clock second at which the id may be handed out again.
    pub ready_time_sec: u64,
}

impl DelayedIdEntry {
    pub const fn is_ready(&self, now_sec: u64) -> bool {
        self.ready_time_sec <= now_sec
    }
}

/// Holding area for released ids.
///
/// Entries are kept ordered by `ready_time_sec` (ties keep insertion order),
/// so the ready ids always form a prefix of the queue. `available_id_count`
/// counts every held entry, ready or not, and is recomputed from the queue
/// on every change, so a persisted count that drifted is corrected by the
/// next mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasedIds {
    available_id_count: u64,
    delayed_time_sec: u64,
    delayed_entries: VecDeque<DelayedIdEntry>,
}

impl ReleasedIds {
    pub const fn new(delayed_time_sec: u64) -> Self {
        Self {
            available_id_count: 0,
            delayed_time_sec,
            delayed_entries: VecDeque::new(),
        }
    }

    pub const fn available_id_count(&self) -> u64 {
        self.available_id_count
    }

    pub const fn delayed_time_sec(&self) -> u64 {
        self.delayed_time_sec
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = &DelayedIdEntry> {
        self.delayed_entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.delayed_entries.is_empty()
    }

    /// Quarantines `id` until `now_sec + delayed_time_sec`.
    pub fn hold(&mut self, id: IdValue, now_sec: u64) {
        self.insert(DelayedIdEntry {
            id,
            ready_time_sec: now_sec.saturating_add(self.delayed_time_sec),
        });
    }

    /// Inserts an entry that already carries its deadline, e.g. one moved
    /// between pools.
    pub fn insert(&mut self, entry: DelayedIdEntry) {
        let at = self
            .delayed_entries
            .partition_point(|e| e.ready_time_sec <= entry.ready_time_sec);
        self.delayed_entries.insert(at, entry);
        self.recount();
    }

    pub fn head_is_ready(&self, now_sec: u64) -> bool {
        self.delayed_entries
            .front()
            .is_some_and(|e| e.is_ready(now_sec))
    }

    /// Pops the oldest entry if its cooldown has elapsed.
    pub fn pop_ready(&mut self, now_sec: u64) -> Option<IdValue> {
        if !self.head_is_ready(now_sec) {
            return None;
        }
        let entry = self.delayed_entries.pop_front()?;
        self.recount();
        Some(entry.id)
    }

    pub fn ready_count(&self, now_sec: u64) -> usize {
        self.delayed_entries
            .partition_point(|e| e.is_ready(now_sec))
    }

    /// Removes up to `max` ready entries from the front, oldest first.
    pub fn drain_ready(&mut self, now_sec: u64, max: usize) -> Vec<DelayedIdEntry> {
        let take = self.ready_count(now_sec).min(max);
        let drained = self.delayed_entries.drain(..take).collect();
        self.recount();
        drained
    }

    fn recount(&mut self) {
        self.available_id_count = self.delayed_entries.len() as u64;
    }
}
