use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use omni_pool::PoolStats;
use serde::Serialize;
use tokio::time::Instant;

use crate::request::{RequestId, RequestSnapshot, RequestState};

use super::{Dispatcher, RequestRecord};

/// Point-in-time dispatcher metrics.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchMetrics {
    /// Requests without a terminal state.
    pub outstanding: usize,
    /// Requests still queued in their group.
    pub queued: usize,
    /// Requests admitted and waiting for a worker.
    pub awaiting_worker: usize,
    /// Requests holding a worker.
    pub running: usize,
    /// Running requests per job name.
    pub running_by_job: BTreeMap<String, usize>,
    /// Requests accepted since start.
    pub total_submitted: u64,
    /// Requests that delivered a result.
    pub completed: u64,
    /// Requests that delivered an error.
    pub failed: u64,
    /// Requests cancelled before a result arrived.
    pub cancelled: u64,
    /// Worker pool snapshot.
    pub pool: PoolStats,
}

impl Dispatcher {
    /// Status of an outstanding request; `None` once it reached a terminal state.
    #[must_use]
    pub fn status(&self, request_id: RequestId) -> Option<RequestSnapshot> {
        let now = Instant::now();
        self.lock_pending()
            .get(&request_id)
            .map(|record| snapshot(request_id, record, now))
    }

    /// Snapshots of every outstanding request, oldest first.
    #[must_use]
    pub fn outstanding(&self) -> Vec<RequestSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<RequestSnapshot> = self
            .lock_pending()
            .iter()
            .map(|(request_id, record)| snapshot(*request_id, record, now))
            .collect();
        snapshots.sort_by(|a, b| b.submitted_age_ms.cmp(&a.submitted_age_ms));
        snapshots
    }

    /// Current queue, worker and lifetime counters.
    #[must_use]
    pub fn metrics(&self) -> DispatchMetrics {
        let mut queued = 0usize;
        let mut awaiting_worker = 0usize;
        let mut running = 0usize;
        let mut running_by_job = BTreeMap::new();
        let outstanding = {
            let pending = self.lock_pending();
            for record in pending.values() {
                match record.state {
                    RequestState::Submitted => queued += 1,
                    RequestState::AwaitingWorker => awaiting_worker += 1,
                    RequestState::Running => {
                        running += 1;
                        *running_by_job.entry(record.job_name.clone()).or_insert(0) += 1;
                    }
                    RequestState::Completed | RequestState::Failed | RequestState::Cancelled => {}
                }
            }
            pending.len()
        };

        DispatchMetrics {
            outstanding,
            queued,
            awaiting_worker,
            running,
            running_by_job,
            total_submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            pool: self.pool.stats(),
        }
    }
}

fn snapshot(request_id: RequestId, record: &RequestRecord, now: Instant) -> RequestSnapshot {
    RequestSnapshot {
        request_id,
        job_name: record.job_name.clone(),
        state: record.state,
        submitted_age_ms: elapsed_millis(now, record.submitted_at),
        running_age_ms: record
            .started_at
            .map(|started| elapsed_millis(now, started)),
    }
}

fn elapsed_millis(now: Instant, start: Instant) -> u64 {
    u64::try_from(now.saturating_duration_since(start).as_millis()).unwrap_or(u64::MAX)
}
