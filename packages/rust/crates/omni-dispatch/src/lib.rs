//! omni-dispatch - Pooled job dispatch
//!
//! Routes job submissions to pooled, reusable workers:
//! - Per-job-name FIFO queues with a concurrency limit per job name
//! - Workers leased from an [`omni_pool::SlotPool`] keyed by job name, released exactly once
//! - Result correlation by [`RequestId`]; one result (or error) per request
//! - Cancellation by dropping the [`JobHandle`]
//! - Lifecycle events, per-request status and dispatcher metrics
//!
//! # Architecture
//!
//! ```text
//! Dispatcher::submit(job_name, job_path, args)
//!      ↓
//! group queue (one per job_name) → semaphore(concurrency)
//!      ↓
//! SlotPool::acquire(job_name) → Lease<Worker>
//!      ↓
//! Worker::submit(request) → result
//!      ↓
//! lease released → JobHandle resolves
//! ```

mod config;
mod dispatcher;
mod error;
mod events;
mod process;
mod request;
mod settings;
mod worker;

pub use config::DispatcherConfig;
pub use dispatcher::{DispatchMetrics, Dispatcher};
pub use error::{ConfigError, DispatchError};
pub use events::{DispatchEvent, DispatchEventKind};
pub use process::{JOB_ID_ENV, ProcessWorker, ProcessWorkerConfig, ProcessWorkerFactory};
pub use request::{JobHandle, RequestId, RequestSnapshot, RequestState};
pub use settings::{
    DispatchSettings, PoolSettings, WorkerSettings, load_settings, load_settings_from_paths,
    settings_paths,
};
pub use worker::{JobArgs, Worker, WorkerFactory, WorkerRequest, WorkerSlots, WorkerSpec};
