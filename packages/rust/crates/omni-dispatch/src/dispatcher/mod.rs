//! Pooled job dispatcher.
//!
//! One FIFO queue per job name feeds a dispatch loop that admits at most
//! `concurrency` requests at a time; each admitted request leases a worker
//! from the shared [`SlotPool`] and resolves its caller's [`JobHandle`].

mod metrics;
mod runtime;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use omni_pool::{PoolListener, SlotPool, TracingListener};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::DispatcherConfig;
use crate::error::{ConfigError, DispatchError};
use crate::events::{DispatchEvent, DispatchEventBus, DispatchEventKind};
use crate::request::{JobHandle, RequestId, RequestState};
use crate::worker::{JobArgs, WorkerFactory, WorkerSlots};

pub use metrics::DispatchMetrics;

/// Routes job submissions to pooled workers with per-job concurrency limits.
///
/// Each job name gets one dispatch loop on first use; the loop lives until
/// [`Dispatcher::shutdown`] or until the dispatcher is dropped. Group loops
/// only hold a weak reference, so dropping the last `Arc<Dispatcher>` closes
/// every queue and drops the pool (idle workers are dropped, not disposed).
/// Prefer `shutdown` for an orderly stop that disposes every worker.
pub struct Dispatcher {
    config: DispatcherConfig,
    pool: SlotPool<WorkerSlots>,
    groups: Mutex<GroupTable>,
    pending: Mutex<HashMap<RequestId, RequestRecord>>,
    events: DispatchEventBus,
    tracker: TaskTracker,
    abort: CancellationToken,
    counters: DispatchCounters,
}

#[derive(Default)]
struct GroupTable {
    queues: HashMap<String, mpsc::UnboundedSender<QueuedRequest>>,
    closed: bool,
}

#[derive(Debug, Clone)]
struct RequestRecord {
    job_name: String,
    state: RequestState,
    submitted_at: Instant,
    started_at: Option<Instant>,
}

struct QueuedRequest {
    request_id: RequestId,
    job_name: String,
    job_path: String,
    args: JobArgs,
    cancel: CancellationToken,
    result_tx: oneshot::Sender<Result<Value, DispatchError>>,
}

#[derive(Default)]
struct DispatchCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl Dispatcher {
    /// Start a dispatcher whose pool logs worker lifecycle through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` is invalid.
    pub fn start(
        factory: Arc<dyn WorkerFactory>,
        config: DispatcherConfig,
    ) -> Result<Arc<Self>, ConfigError> {
        Self::start_with_listener(factory, config, Arc::new(TracingListener))
    }

    /// Start a dispatcher with a custom pool lifecycle listener.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` is invalid.
    pub fn start_with_listener(
        factory: Arc<dyn WorkerFactory>,
        config: DispatcherConfig,
        listener: Arc<dyn PoolListener<String>>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let pool =
            SlotPool::start_with_listener(WorkerSlots::new(factory), config.pool_config(), listener);
        tracing::debug!(
            event = "dispatch.started",
            concurrency = config.concurrency,
            max_idle_ms = config.max_idle_millis,
            min_idle_count = config.min_idle_count,
            "pooled dispatcher started"
        );
        Ok(Arc::new(Self {
            config,
            pool,
            groups: Mutex::new(GroupTable::default()),
            pending: Mutex::new(HashMap::new()),
            events: DispatchEventBus::new(config.event_capacity),
            tracker: TaskTracker::new(),
            abort: CancellationToken::new(),
            counters: DispatchCounters::default(),
        }))
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Submit one job. The returned handle resolves to its single result.
    ///
    /// Requests with the same `job_name` share a FIFO queue and at most
    /// `concurrency` of them hold a worker at once; different job names never
    /// wait on each other.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ShutDown`] once [`Dispatcher::shutdown`] has started.
    pub fn submit(
        self: &Arc<Self>,
        job_name: impl Into<String>,
        job_path: impl Into<String>,
        args: impl Into<JobArgs>,
    ) -> Result<JobHandle, DispatchError> {
        let job_name = job_name.into();
        let request_id = RequestId::new();
        let cancel = self.abort.child_token();
        let (result_tx, result_rx) = oneshot::channel();
        let queued = QueuedRequest {
            request_id,
            job_name: job_name.clone(),
            job_path: job_path.into(),
            args: args.into(),
            cancel: cancel.clone(),
            result_tx,
        };

        tracing::trace!(
            event = "dispatch.request.submitted",
            request_id = %request_id,
            job_name = %job_name,
            "submitting <{job_name}> to pooled worker"
        );

        {
            let mut groups = self.lock_groups();
            if groups.closed {
                return Err(DispatchError::ShutDown);
            }
            self.lock_pending().insert(
                request_id,
                RequestRecord {
                    job_name: job_name.clone(),
                    state: RequestState::Submitted,
                    submitted_at: Instant::now(),
                    started_at: None,
                },
            );
            self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            self.events
                .emit(request_id, &job_name, DispatchEventKind::Submitted);

            let queue = groups
                .queues
                .entry(job_name.clone())
                .or_insert_with(|| self.spawn_group(&job_name));
            if let Err(mpsc::error::SendError(queued)) = queue.send(queued) {
                // Group loop is gone; only possible while the runtime shuts down.
                drop(groups);
                self.finish(queued.request_id, &queued.job_name, None, queued.result_tx);
                return Err(DispatchError::ShutDown);
            }
        }

        Ok(JobHandle::new(
            request_id,
            job_name,
            result_rx,
            cancel.drop_guard(),
        ))
    }

    /// Subscribe to lifecycle events of every request.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// The worker pool backing this dispatcher.
    #[must_use]
    pub fn pool(&self) -> &SlotPool<WorkerSlots> {
        &self.pool
    }

    /// Stop accepting submissions, let queued and running requests finish,
    /// then dispose every pooled worker.
    pub async fn shutdown(&self) {
        let newly_closed = {
            let mut groups = self.lock_groups();
            let newly_closed = !groups.closed;
            groups.closed = true;
            // Dropping the senders lets each group loop drain and exit.
            groups.queues.clear();
            newly_closed
        };
        if newly_closed {
            tracing::debug!(event = "dispatch.shutdown.begin", "draining in-flight requests");
        }

        self.tracker.close();
        self.tracker.wait().await;
        let disposed = self.pool.shutdown();
        if newly_closed {
            tracing::debug!(
                event = "dispatch.shutdown.done",
                disposed,
                "pooled dispatcher shut down"
            );
        }
    }

    /// Cancel every outstanding request, then shut down.
    ///
    /// Callers still holding a handle receive [`DispatchError::Cancelled`].
    pub async fn abort(&self) {
        self.abort.cancel();
        self.shutdown().await;
    }

    fn lock_groups(&self) -> MutexGuard<'_, GroupTable> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<RequestId, RequestRecord>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
