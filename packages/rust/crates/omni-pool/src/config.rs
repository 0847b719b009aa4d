//! Pool eviction policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_MAX_IDLE_MILLIS: u64 = 60_000;
const MIN_EVICTION_INTERVAL_MILLIS: u64 = 10;
const MAX_EVICTION_INTERVAL_MILLIS: u64 = 30_000;

/// Idle eviction settings shared by every slot of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle instances older than this are eligible for disposal.
    pub max_idle_millis: u64,
    /// Eviction never takes a slot's idle count below this floor.
    pub min_idle_count: usize,
    /// Sweep period; derived from `max_idle_millis` when unset.
    pub eviction_interval_millis: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_millis: DEFAULT_MAX_IDLE_MILLIS,
            min_idle_count: 0,
            eviction_interval_millis: None,
        }
    }
}

impl PoolConfig {
    /// Maximum idle duration before an instance may be evicted.
    #[must_use]
    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_millis)
    }

    /// Period of the background eviction sweep.
    ///
    /// Half of `max_idle_millis` by default so an expired instance is
    /// disposed within 1.5x its idle budget.
    #[must_use]
    pub fn eviction_interval(&self) -> Duration {
        let millis = self
            .eviction_interval_millis
            .unwrap_or(self.max_idle_millis / 2)
            .clamp(MIN_EVICTION_INTERVAL_MILLIS, MAX_EVICTION_INTERVAL_MILLIS);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_interval_defaults_to_half_max_idle() {
        let config = PoolConfig {
            max_idle_millis: 1_000,
            ..PoolConfig::default()
        };
        assert_eq!(config.eviction_interval(), Duration::from_millis(500));
    }

    #[test]
    fn eviction_interval_is_clamped() {
        let zero = PoolConfig {
            max_idle_millis: 0,
            ..PoolConfig::default()
        };
        assert_eq!(zero.eviction_interval(), Duration::from_millis(10));

        let huge = PoolConfig {
            max_idle_millis: 3_600_000,
            ..PoolConfig::default()
        };
        assert_eq!(huge.eviction_interval(), Duration::from_secs(30));
    }

    #[test]
    fn explicit_eviction_interval_wins() {
        let config = PoolConfig {
            max_idle_millis: 1_000,
            min_idle_count: 2,
            eviction_interval_millis: Some(250),
        };
        assert_eq!(config.eviction_interval(), Duration::from_millis(250));
        assert_eq!(config.max_idle(), Duration::from_secs(1));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: PoolConfig =
            serde_json::from_str(r#"{"min_idle_count":1}"#).expect("deserialize");
        assert_eq!(config.max_idle_millis, DEFAULT_MAX_IDLE_MILLIS);
        assert_eq!(config.min_idle_count, 1);
        assert!(config.eviction_interval_millis.is_none());
    }
}
