//! Request identity, lifecycle state and the caller-side handle.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::DropGuard;
use uuid::Uuid;

use crate::error::DispatchError;

/// Unique, never reused request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Request lifecycle.
///
/// `Submitted → AwaitingWorker → Running → {Completed | Failed | Cancelled}`;
/// a request may be cancelled from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Queued in its job-name group.
    Submitted,
    /// Admitted; waiting for a pooled worker (possibly a cold start).
    AwaitingWorker,
    /// Worker leased and executing.
    Running,
    /// Result delivered.
    Completed,
    /// Creation or execution error delivered.
    Failed,
    /// Abandoned before a result arrived.
    Cancelled,
}

impl RequestState {
    /// Whether the state is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of one outstanding request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    /// Request id.
    pub request_id: RequestId,
    /// Job name (group).
    pub job_name: String,
    /// Current state.
    pub state: RequestState,
    /// Milliseconds since submission.
    pub submitted_age_ms: u64,
    /// Milliseconds since the worker started, when running.
    pub running_age_ms: Option<u64>,
}

/// Caller side of one request: resolves to the request's single result.
///
/// Dropping the handle (or calling [`JobHandle::cancel`]) before it resolves
/// cancels the request: the worker is told to stop and its lease is released.
#[must_use = "dropping a JobHandle cancels the request"]
pub struct JobHandle {
    request_id: RequestId,
    job_name: String,
    result_rx: oneshot::Receiver<Result<Value, DispatchError>>,
    _cancel_on_drop: DropGuard,
}

impl JobHandle {
    pub(crate) fn new(
        request_id: RequestId,
        job_name: String,
        result_rx: oneshot::Receiver<Result<Value, DispatchError>>,
        cancel_on_drop: DropGuard,
    ) -> Self {
        Self {
            request_id,
            job_name,
            result_rx,
            _cancel_on_drop: cancel_on_drop,
        }
    }

    /// Correlation id of this request.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Job name this request was submitted under.
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Abandon the request.
    pub fn cancel(self) {}
}

impl Future for JobHandle {
    type Output = Result<Value, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.result_rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without a result: the runtime tore the task down.
            Poll::Ready(Err(_)) => Poll::Ready(Err(DispatchError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("request_id", &self.request_id)
            .field("job_name", &self.job_name)
            .finish_non_exhaustive()
    }
}
