use omni_pool::PoolConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::ConfigError;

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_MAX_IDLE_MILLIS: u64 = 60_000;
const DEFAULT_EVENT_CAPACITY: usize = 1_024;

/// Dispatcher settings: per-job concurrency plus the worker pool policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum requests holding a worker at once, per job name.
    pub concurrency: usize,
    /// Idle workers older than this are disposed.
    pub max_idle_millis: u64,
    /// Idle workers kept per job name regardless of age.
    pub min_idle_count: usize,
    /// Eviction sweep period; derived from `max_idle_millis` when unset.
    pub eviction_interval_millis: Option<u64>,
    /// Capacity of the lifecycle event bus.
    pub event_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_idle_millis: DEFAULT_MAX_IDLE_MILLIS,
            min_idle_count: 0,
            eviction_interval_millis: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl DispatcherConfig {
    /// Check the invariants the dispatcher relies on.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroConcurrency`], [`ConfigError::ConcurrencyTooLarge`]
    /// or [`ConfigError::ZeroEventCapacity`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.concurrency > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ConcurrencyTooLarge {
                max: Semaphore::MAX_PERMITS,
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        Ok(())
    }

    /// Pool policy derived from this config.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_idle_millis: self.max_idle_millis,
            min_idle_count: self.min_idle_count,
            eviction_interval_millis: self.eviction_interval_millis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(DispatcherConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = DispatcherConfig {
            concurrency: 0,
            ..DispatcherConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroConcurrency));
    }

    #[test]
    fn concurrency_above_permit_limit_is_rejected() {
        let at_limit = DispatcherConfig {
            concurrency: Semaphore::MAX_PERMITS,
            ..DispatcherConfig::default()
        };
        assert_eq!(at_limit.validate(), Ok(()));

        let config = DispatcherConfig {
            concurrency: usize::MAX,
            ..DispatcherConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ConcurrencyTooLarge {
                max: Semaphore::MAX_PERMITS
            })
        );
    }

    #[test]
    fn zero_event_capacity_is_rejected() {
        let config = DispatcherConfig {
            event_capacity: 0,
            ..DispatcherConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroEventCapacity));
    }

    #[test]
    fn pool_config_carries_eviction_policy() {
        let config = DispatcherConfig {
            concurrency: 2,
            max_idle_millis: 1_000,
            min_idle_count: 1,
            eviction_interval_millis: Some(100),
            event_capacity: 16,
        };
        let pool = config.pool_config();
        assert_eq!(pool.max_idle_millis, 1_000);
        assert_eq!(pool.min_idle_count, 1);
        assert_eq!(pool.eviction_interval_millis, Some(100));
    }
}
