use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::events::DispatchEventKind;
use crate::request::{RequestId, RequestState};
use crate::worker::{JobArgs, WorkerRequest, WorkerSpec};

use super::{Dispatcher, QueuedRequest};

impl Dispatcher {
    /// Spawn the dispatch loop of one job-name group and return its queue.
    pub(super) fn spawn_group(
        self: &Arc<Self>,
        job_name: &str,
    ) -> mpsc::UnboundedSender<QueuedRequest> {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<QueuedRequest>();
        // Weak so that dropping the dispatcher closes every queue and ends the loop.
        let weak = Arc::downgrade(self);
        let group = job_name.to_string();
        let concurrency = self.config.concurrency;

        self.tracker.spawn(async move {
            let semaphore = Arc::new(Semaphore::new(concurrency));
            let mut workers = JoinSet::new();

            while let Some(request) = queue_rx.recv().await {
                let Some(dispatcher) = weak.upgrade() else {
                    break;
                };
                let permit = tokio::select! {
                    biased;
                    () = request.cancel.cancelled() => {
                        dispatcher.finish(request.request_id, &request.job_name, None, request.result_tx);
                        continue;
                    }
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let worker_dispatcher = Arc::clone(&dispatcher);
                workers.spawn(async move {
                    // Dropped after the request's lease is released.
                    let _permit = permit;
                    worker_dispatcher.run_request(request).await;
                });

                while let Some(result) = workers.try_join_next() {
                    if let Err(error) = result {
                        tracing::error!(job_name = %group, "pooled request task crashed: {error}");
                    }
                }
            }

            while let Some(result) = workers.join_next().await {
                if let Err(error) = result {
                    tracing::error!(job_name = %group, "pooled request task crashed: {error}");
                }
            }
            tracing::trace!(event = "dispatch.group.stopped", job_name = %group, "group loop stopped");
        });

        queue_tx
    }

    async fn run_request(self: Arc<Self>, request: QueuedRequest) {
        let QueuedRequest {
            request_id,
            job_name,
            job_path,
            args,
            cancel,
            result_tx,
        } = request;

        let outcome = self
            .execute(request_id, &job_name, job_path, args, &cancel)
            .await;
        self.finish(request_id, &job_name, outcome, result_tx);
    }

    /// `None` when the request was cancelled before the worker answered.
    async fn execute(
        &self,
        request_id: RequestId,
        job_name: &str,
        job_path: String,
        args: JobArgs,
        cancel: &CancellationToken,
    ) -> Option<Result<Value, DispatchError>> {
        self.mark(request_id, RequestState::AwaitingWorker);
        let spec = WorkerSpec {
            job_name: job_name.to_string(),
            job_path,
        };
        // Cancelled while waiting for a worker: the acquire future is dropped
        // and nothing was leased.
        let acquired = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            acquired = self.pool.acquire(job_name.to_string(), spec) => acquired,
        };
        let lease = match acquired {
            Ok(lease) => lease,
            Err(error) => return Some(Err(DispatchError::from_pool(job_name, error))),
        };

        self.mark(request_id, RequestState::Running);
        self.events.emit(
            request_id,
            job_name,
            DispatchEventKind::Running {
                cold: lease.is_cold(),
            },
        );

        let request = WorkerRequest {
            request_id,
            job_name: job_name.to_string(),
            args,
        };
        // The lease outlives the submission so an abandoned worker can be
        // checked before it goes back to the pool.
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = lease.submit(request, cancel.clone()) => Some(result),
        };

        if lease.is_reusable() {
            lease.release();
        } else {
            tracing::debug!(
                event = "dispatch.worker.discarded",
                request_id = %request_id,
                job_name = %job_name,
                instance_id = %lease.instance_id(),
                "worker cannot be reused; disposing"
            );
            lease.discard();
        }
        outcome.map(|result| result.map_err(|error| DispatchError::submission(job_name, error)))
    }

    fn mark(&self, request_id: RequestId, state: RequestState) {
        if let Some(record) = self.lock_pending().get_mut(&request_id) {
            record.state = state;
            if state == RequestState::Running {
                record.started_at = Some(Instant::now());
            }
        }
    }

    /// Record the terminal state and deliver the outcome. `None` means the
    /// request was cancelled before producing a result.
    pub(super) fn finish(
        &self,
        request_id: RequestId,
        job_name: &str,
        outcome: Option<Result<Value, DispatchError>>,
        result_tx: oneshot::Sender<Result<Value, DispatchError>>,
    ) {
        self.lock_pending().remove(&request_id);

        let outcome = match outcome {
            Some(Ok(value)) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.events
                    .emit(request_id, job_name, DispatchEventKind::Completed);
                tracing::trace!(
                    event = "dispatch.request.completed",
                    request_id = %request_id,
                    job_name = %job_name,
                    "request completed"
                );
                Ok(value)
            }
            Some(Err(error)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.events.emit(
                    request_id,
                    job_name,
                    DispatchEventKind::Failed {
                        error: error.to_string(),
                    },
                );
                tracing::warn!(
                    event = "dispatch.request.failed",
                    request_id = %request_id,
                    job_name = %job_name,
                    error = %error,
                    "request failed"
                );
                Err(error)
            }
            None => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                self.events
                    .emit(request_id, job_name, DispatchEventKind::Cancelled);
                tracing::debug!(
                    event = "dispatch.request.cancelled",
                    request_id = %request_id,
                    job_name = %job_name,
                    "request cancelled"
                );
                Err(DispatchError::Cancelled)
            }
        };

        // The caller may already be gone (cancelled); nothing to deliver then.
        let _ = result_tx.send(outcome);
    }
}
