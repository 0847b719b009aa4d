//! Worker collaborator contract and its pool adapter.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use omni_pool::SlotFactory;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::request::RequestId;

/// Argument payload of one request.
#[derive(Debug)]
pub struct JobArgs {
    /// Initial arguments.
    pub args: Value,
    /// Optional open-ended sequence of further argument chunks.
    pub stream: Option<mpsc::Receiver<Value>>,
}

impl JobArgs {
    /// Arguments without a chunk stream.
    #[must_use]
    pub fn new(args: Value) -> Self {
        Self { args, stream: None }
    }

    /// Arguments followed by a stream of chunks.
    #[must_use]
    pub fn with_stream(args: Value, stream: mpsc::Receiver<Value>) -> Self {
        Self {
            args,
            stream: Some(stream),
        }
    }
}

impl From<Value> for JobArgs {
    fn from(args: Value) -> Self {
        Self::new(args)
    }
}

/// One submission forwarded to a leased worker.
#[derive(Debug)]
pub struct WorkerRequest {
    /// Correlation id of the originating request.
    pub request_id: RequestId,
    /// Job name the worker was created for.
    pub job_name: String,
    /// Argument payload.
    pub args: JobArgs,
}

/// A running worker instance. Leased exclusively: at most one `submit` at a time.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Run one job and return its result.
    ///
    /// `cancel` fires when the caller abandons the request; the worker should
    /// stop producing work for it. The dispatcher may also drop the returned
    /// future once `cancel` fires.
    async fn submit(&self, request: WorkerRequest, cancel: CancellationToken) -> Result<Value>;

    /// Whether the worker may serve another request. Checked after every
    /// submission, including abandoned ones; `false` disposes the worker.
    fn is_reusable(&self) -> bool {
        true
    }

    /// Release the worker's OS resources. Best-effort.
    fn dispose(&self) -> Result<()>;
}

/// Creates workers from a job identifier and the job's executable path.
#[async_trait]
pub trait WorkerFactory: Send + Sync + 'static {
    /// Start a worker (cold start).
    async fn create(&self, job_id: &str, job_path: &str) -> Result<Box<dyn Worker>>;
}

/// Creation arguments for a pooled worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Job name (also the pool slot).
    pub job_name: String,
    /// Path of the job executable.
    pub job_path: String,
}

/// Adapts a [`WorkerFactory`] to the slot pool, one slot per job name.
pub struct WorkerSlots {
    factory: Arc<dyn WorkerFactory>,
}

impl WorkerSlots {
    /// Wrap a worker factory.
    #[must_use]
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl SlotFactory for WorkerSlots {
    type Key = String;
    type Args = WorkerSpec;
    type Instance = Box<dyn Worker>;

    async fn create(&self, _key: &String, spec: WorkerSpec) -> Result<Box<dyn Worker>> {
        self.factory
            .create(&spec.job_name, &spec.job_path)
            .await
            .with_context(|| format!("worker <{}> failed to start from {}", spec.job_name, spec.job_path))
    }

    #[allow(clippy::borrowed_box)]
    fn dispose(&self, _key: &String, worker: &Box<dyn Worker>) -> Result<()> {
        worker.dispose()
    }
}
