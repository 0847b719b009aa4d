//! Error types for slot pool operations.

use thiserror::Error;

/// Slot pool errors surfaced to `acquire` callers.
///
/// Disposal failures are never surfaced; they are logged by the pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The factory failed to produce an instance; nothing was registered.
    #[error("failed to create instance for slot `{slot}`: {source}")]
    Creation {
        /// Slot key the creation was attempted for.
        slot: String,
        /// Factory error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The pool no longer hands out instances.
    #[error("pool is shut down")]
    ShutDown,
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
