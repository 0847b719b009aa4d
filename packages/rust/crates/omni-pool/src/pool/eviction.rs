use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};

use crate::factory::SlotFactory;

use super::{InstanceEntry, PoolShared};

pub(super) fn spawn_eviction_loop<F: SlotFactory>(shared: &Arc<PoolShared<F>>) {
    let pool = Arc::downgrade(shared);
    let shutdown = shared.shutdown.clone();
    let period = shared.config.eviction_interval();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let Some(pool) = pool.upgrade() else {
                break;
            };
            let disposed = pool.evict_idle(Instant::now());
            if disposed > 0 {
                tracing::trace!(event = "pool.eviction.sweep", disposed, "idle sweep");
            }
        }
        tracing::trace!(event = "pool.eviction.stopped", "idle eviction loop stopped");
    });
}

impl<F: SlotFactory> PoolShared<F> {
    /// Dispose idle instances idle for longer than `max_idle`, oldest first,
    /// never taking a slot below `min_idle_count` idle instances.
    pub(super) fn evict_idle(&self, now: Instant) -> usize {
        let max_idle = self.config.max_idle();
        let min_idle = self.config.min_idle_count;

        let expired = {
            let mut state = self.lock_state();
            if state.closed {
                return 0;
            }
            let mut expired: Vec<(F::Key, InstanceEntry<F::Instance>)> = Vec::new();
            for (key, slot) in &mut state.slots {
                let mut idle: Vec<(usize, Instant)> = slot
                    .instances
                    .iter()
                    .enumerate()
                    .filter_map(|(index, entry)| entry.idle_since.map(|since| (index, since)))
                    .collect();
                let mut idle_count = idle.len();
                if idle_count <= min_idle {
                    continue;
                }
                idle.sort_by_key(|(_, since)| *since);

                let mut doomed = Vec::new();
                for (index, since) in idle {
                    if idle_count <= min_idle || now.saturating_duration_since(since) <= max_idle {
                        break;
                    }
                    doomed.push(index);
                    idle_count -= 1;
                }
                // Descending so swap_remove never moves a doomed entry.
                doomed.sort_unstable_by(|a, b| b.cmp(a));
                for index in doomed {
                    expired.push((key.clone(), slot.instances.swap_remove(index)));
                }
            }
            expired
        };

        let disposed = expired.len();
        for (key, entry) in expired {
            self.dispose_entry(&key, &entry);
        }
        disposed
    }
}
