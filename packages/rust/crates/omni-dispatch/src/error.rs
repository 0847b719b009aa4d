//! Error types for job dispatch.

use omni_pool::PoolError;
use thiserror::Error;

/// Terminal error delivered to the caller of one request.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No worker could be created for the job (cold start failed).
    #[error("failed to create worker <{job_name}>: {source}")]
    Creation {
        /// Job name (pool slot) the worker was requested for.
        job_name: String,
        /// Underlying pool error.
        source: PoolError,
    },

    /// The leased worker failed while executing the job.
    #[error("job <{job_name}> failed: {source}")]
    Submission {
        /// Job name of the failed request.
        job_name: String,
        /// Worker error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The request was cancelled by the dispatcher before a result arrived.
    #[error("request cancelled before a result arrived")]
    Cancelled,

    /// The dispatcher no longer accepts or runs requests.
    #[error("dispatcher is shut down")]
    ShutDown,
}

impl DispatchError {
    pub(crate) fn from_pool(job_name: &str, error: PoolError) -> Self {
        match error {
            PoolError::ShutDown => Self::ShutDown,
            creation @ PoolError::Creation { .. } => Self::Creation {
                job_name: job_name.to_string(),
                source: creation,
            },
        }
    }

    pub(crate) fn submission(job_name: &str, error: anyhow::Error) -> Self {
        Self::Submission {
            job_name: job_name.to_string(),
            source: error.into(),
        }
    }
}

/// Invalid dispatcher configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `concurrency` must be a positive integer.
    #[error("concurrency must be greater than 0")]
    ZeroConcurrency,

    /// `concurrency` exceeds what a semaphore can hand out.
    #[error("concurrency must be at most {max}")]
    ConcurrencyTooLarge {
        /// Largest accepted value.
        max: usize,
    },

    /// The event bus needs room for at least one event.
    #[error("event capacity must be greater than 0")]
    ZeroEventCapacity,

    /// An environment override could not be parsed.
    #[error("invalid value for {name}: `{value}`")]
    InvalidEnv {
        /// Environment variable name.
        name: String,
        /// Raw value.
        value: String,
    },
}
