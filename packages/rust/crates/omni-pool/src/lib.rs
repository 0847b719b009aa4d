//! omni-pool - Keyed Slot Pool for expensive worker instances
//!
//! Manages, per key ("slot"), a set of lazily created, reusable instances:
//! - Hot recycle of idle instances, cold creation through a [`SlotFactory`]
//! - RAII [`Lease`] handles that return instances to the idle set exactly once
//! - Background idle eviction with a per-slot warm floor (`min_idle_count`)
//! - Lifecycle notifications through a pluggable [`PoolListener`]
//!
//! # Architecture
//!
//! ```text
//! acquire(slot, args)
//!      ↓
//! idle instance? ── yes → lease (hot)
//!      ↓ no
//! SlotFactory::create → lease (cold)
//!      ↓
//! Lease dropped / released → idle (timestamped); discarded → disposed
//!      ↓
//! eviction sweep → SlotFactory::dispose (idle > max_idle, above floor)
//! ```

mod config;
mod error;
mod factory;
mod lease;
mod listener;
mod pool;

pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use factory::SlotFactory;
pub use lease::{InstanceId, Lease};
pub use listener::{NoopListener, PoolListener, TracingListener};
pub use pool::{PoolStats, SlotPool, SlotStats};
