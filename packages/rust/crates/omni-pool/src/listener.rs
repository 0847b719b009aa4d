//! Lifecycle notifications.
//!
//! Listeners are observability hooks only; the pool behaves identically
//! whichever listener is installed.

use std::fmt;

use crate::lease::InstanceId;

/// Receives pool lifecycle notifications. All methods default to no-ops.
pub trait PoolListener<K>: Send + Sync {
    /// A new instance was created for `key` (cold start).
    fn on_cold(&self, key: &K, instance_id: InstanceId) {
        let _ = (key, instance_id);
    }

    /// An idle instance was handed out again (hot recycle).
    fn on_hot(&self, key: &K, instance_id: InstanceId) {
        let _ = (key, instance_id);
    }

    /// A lease was released and its instance returned to the pool.
    fn on_release(&self, key: &K, instance_id: InstanceId) {
        let _ = (key, instance_id);
    }

    /// An instance was disposed and removed from the pool.
    fn on_dispose(&self, key: &K, instance_id: InstanceId) {
        let _ = (key, instance_id);
    }
}

/// Listener that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl<K> PoolListener<K> for NoopListener {}

/// Listener that logs every notification through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl<K: fmt::Display> PoolListener<K> for TracingListener {
    fn on_cold(&self, key: &K, instance_id: InstanceId) {
        tracing::debug!(
            event = "pool.instance.cold",
            slot = %key,
            instance_id = %instance_id,
            "created instance <{key}>"
        );
    }

    fn on_hot(&self, key: &K, instance_id: InstanceId) {
        tracing::debug!(
            event = "pool.instance.hot",
            slot = %key,
            instance_id = %instance_id,
            "recycling instance <{key}>"
        );
    }

    fn on_release(&self, key: &K, instance_id: InstanceId) {
        tracing::trace!(
            event = "pool.instance.released",
            slot = %key,
            instance_id = %instance_id,
            "released instance <{key}>"
        );
    }

    fn on_dispose(&self, key: &K, instance_id: InstanceId) {
        tracing::debug!(
            event = "pool.instance.disposed",
            slot = %key,
            instance_id = %instance_id,
            "disposed instance <{key}>"
        );
    }
}
