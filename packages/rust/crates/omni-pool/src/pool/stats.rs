use std::sync::atomic::Ordering;

use serde::Serialize;
use tokio::time::Instant;

use crate::factory::SlotFactory;

use super::{Slot, SlotPool};

/// Snapshot of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    /// Slot key rendered with `Display`.
    pub slot: String,
    /// Instances waiting to be recycled.
    pub idle: usize,
    /// Instances currently leased.
    pub leased: usize,
    /// Longest current idle duration in the slot.
    pub longest_idle_ms: Option<u64>,
    /// Age of the oldest live instance in the slot.
    pub oldest_instance_age_ms: Option<u64>,
}

impl SlotStats {
    /// Live instances (idle + leased).
    #[must_use]
    pub fn instances(&self) -> usize {
        self.idle + self.leased
    }
}

/// Snapshot of the whole pool plus lifetime counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    /// Every slot ever used, sorted by key.
    pub slots: Vec<SlotStats>,
    /// Instances created (cold starts).
    pub created: u64,
    /// Failed cold starts.
    pub creation_failures: u64,
    /// Idle instances handed out again (hot recycles).
    pub recycled: u64,
    /// Leases released.
    pub released: u64,
    /// Instances disposed.
    pub disposed: u64,
}

impl PoolStats {
    /// Snapshot for one slot, if it was ever used.
    #[must_use]
    pub fn slot(&self, slot: &str) -> Option<&SlotStats> {
        self.slots.iter().find(|stats| stats.slot == slot)
    }

    /// Instances currently leased across all slots.
    #[must_use]
    pub fn leased(&self) -> usize {
        self.slots.iter().map(|stats| stats.leased).sum()
    }

    /// Instances currently idle across all slots.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.slots.iter().map(|stats| stats.idle).sum()
    }
}

impl<F: SlotFactory> SlotPool<F> {
    /// Snapshot of every slot and the lifetime counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let mut slots: Vec<SlotStats> = {
            let state = self.shared.lock_state();
            state
                .slots
                .iter()
                .map(|(key, slot)| slot_stats(key.to_string(), slot, now))
                .collect()
        };
        slots.sort_by(|a, b| a.slot.cmp(&b.slot));

        let counters = &self.shared.counters;
        PoolStats {
            slots,
            created: counters.created.load(Ordering::Relaxed),
            creation_failures: counters.creation_failures.load(Ordering::Relaxed),
            recycled: counters.recycled.load(Ordering::Relaxed),
            released: counters.released.load(Ordering::Relaxed),
            disposed: counters.disposed.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of a single slot, if it was ever used.
    #[must_use]
    pub fn slot_stats(&self, key: &F::Key) -> Option<SlotStats> {
        let now = Instant::now();
        let state = self.shared.lock_state();
        state
            .slots
            .get(key)
            .map(|slot| slot_stats(key.to_string(), slot, now))
    }
}

fn slot_stats<T>(slot: String, entries: &Slot<T>, now: Instant) -> SlotStats {
    let mut idle = 0usize;
    let mut leased = 0usize;
    let mut longest_idle = None::<u64>;
    let mut oldest_instance = None::<u64>;

    for entry in &entries.instances {
        let age = elapsed_millis(now, entry.created_at);
        oldest_instance = Some(oldest_instance.map_or(age, |v| v.max(age)));
        match entry.idle_since {
            Some(since) => {
                idle += 1;
                let idle_ms = elapsed_millis(now, since);
                longest_idle = Some(longest_idle.map_or(idle_ms, |v| v.max(idle_ms)));
            }
            None => leased += 1,
        }
    }

    SlotStats {
        slot,
        idle,
        leased,
        longest_idle_ms: longest_idle,
        oldest_instance_age_ms: oldest_instance,
    }
}

fn elapsed_millis(now: Instant, start: Instant) -> u64 {
    u64::try_from(now.saturating_duration_since(start).as_millis()).unwrap_or(u64::MAX)
}
