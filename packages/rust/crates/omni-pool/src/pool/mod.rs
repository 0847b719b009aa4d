//! Core slot pool: acquire, release, dispose.

mod eviction;
mod stats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::factory::SlotFactory;
use crate::lease::{InstanceId, Lease};
use crate::listener::{PoolListener, TracingListener};

pub use stats::{PoolStats, SlotStats};

/// Keyed pool of lazily created, reusable instances.
///
/// Cloning is cheap; clones share the same instances. The background eviction
/// task stops on [`SlotPool::shutdown`] or once every clone is dropped.
pub struct SlotPool<F: SlotFactory> {
    shared: Arc<PoolShared<F>>,
}

impl<F: SlotFactory> Clone for SlotPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub(crate) struct PoolShared<F: SlotFactory> {
    factory: F,
    listener: Arc<dyn PoolListener<F::Key>>,
    config: PoolConfig,
    state: Mutex<PoolState<F::Key, F::Instance>>,
    next_instance_id: AtomicU64,
    counters: PoolCounters,
    shutdown: CancellationToken,
}

struct PoolState<K, T> {
    slots: HashMap<K, Slot<T>>,
    closed: bool,
}

struct Slot<T> {
    instances: Vec<InstanceEntry<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
        }
    }
}

struct InstanceEntry<T> {
    id: InstanceId,
    instance: Arc<T>,
    created_at: Instant,
    /// `None` while leased.
    idle_since: Option<Instant>,
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    creation_failures: AtomicU64,
    recycled: AtomicU64,
    released: AtomicU64,
    disposed: AtomicU64,
}

impl<F: SlotFactory> SlotPool<F> {
    /// Start a pool that logs lifecycle events through `tracing`.
    ///
    /// Must be called within a tokio runtime: the eviction sweep is spawned here.
    pub fn start(factory: F, config: PoolConfig) -> Self {
        Self::start_with_listener(factory, config, Arc::new(TracingListener))
    }

    /// Start a pool with a custom lifecycle listener.
    pub fn start_with_listener(
        factory: F,
        config: PoolConfig,
        listener: Arc<dyn PoolListener<F::Key>>,
    ) -> Self {
        let shared = Arc::new(PoolShared {
            factory,
            listener,
            config,
            state: Mutex::new(PoolState {
                slots: HashMap::new(),
                closed: false,
            }),
            next_instance_id: AtomicU64::new(1),
            counters: PoolCounters::default(),
            shutdown: CancellationToken::new(),
        });
        eviction::spawn_eviction_loop(&shared);
        Self { shared }
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// The factory backing this pool.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Lease an instance for `key`, recycling an idle one when available and
    /// creating a new one with `args` otherwise.
    ///
    /// # Errors
    ///
    /// [`PoolError::Creation`] when the factory fails (nothing is registered),
    /// [`PoolError::ShutDown`] after [`SlotPool::shutdown`].
    pub async fn acquire(&self, key: F::Key, args: F::Args) -> Result<Lease<F>> {
        if let Some(lease) = self.shared.try_recycle(&key)? {
            return Ok(lease);
        }

        let instance = match self.shared.factory.create(&key, args).await {
            Ok(instance) => instance,
            Err(error) => {
                self.shared
                    .counters
                    .creation_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event = "pool.instance.create_failed",
                    slot = %key,
                    error = %format!("{error:#}"),
                    "instance creation failed"
                );
                return Err(PoolError::Creation {
                    slot: key.to_string(),
                    source: error.into(),
                });
            }
        };
        self.shared.register(key, instance)
    }

    /// Run one eviction sweep now. Returns the number of disposed instances.
    pub fn evict_idle(&self) -> usize {
        self.shared.evict_idle(Instant::now())
    }

    /// Stop handing out instances and dispose every idle one.
    ///
    /// Leases still outstanding dispose their instance when released.
    /// Returns the number of instances disposed by this call.
    pub fn shutdown(&self) -> usize {
        self.shared.shutdown.cancel();
        let idle = {
            let mut state = self.shared.lock_state();
            if state.closed {
                return 0;
            }
            state.closed = true;
            let mut idle = Vec::new();
            for (key, slot) in &mut state.slots {
                let (leased, free): (Vec<_>, Vec<_>) = slot
                    .instances
                    .drain(..)
                    .partition(|entry| entry.idle_since.is_none());
                slot.instances = leased;
                idle.extend(free.into_iter().map(|entry| (key.clone(), entry)));
            }
            idle
        };

        let disposed = idle.len();
        for (key, entry) in idle {
            self.shared.dispose_entry(&key, &entry);
        }
        tracing::debug!(event = "pool.shutdown", disposed, "slot pool shut down");
        disposed
    }

    /// Whether [`SlotPool::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.lock_state().closed
    }
}

impl<F: SlotFactory> PoolShared<F> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<F::Key, F::Instance>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> InstanceId {
        InstanceId(self.next_instance_id.fetch_add(1, Ordering::Relaxed))
    }

    fn try_recycle(self: &Arc<Self>, key: &F::Key) -> Result<Option<Lease<F>>> {
        let recycled = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(PoolError::ShutDown);
            }
            let slot = state.slots.entry(key.clone()).or_default();
            slot.instances
                .iter_mut()
                .find(|entry| entry.idle_since.is_some())
                .map(|entry| {
                    entry.idle_since = None;
                    (entry.id, Arc::clone(&entry.instance))
                })
        };

        let Some((instance_id, instance)) = recycled else {
            return Ok(None);
        };
        self.counters.recycled.fetch_add(1, Ordering::Relaxed);
        self.listener.on_hot(key, instance_id);
        Ok(Some(Lease::new(
            key.clone(),
            instance_id,
            instance,
            false,
            Arc::clone(self),
        )))
    }

    fn register(self: &Arc<Self>, key: F::Key, instance: F::Instance) -> Result<Lease<F>> {
        let instance = Arc::new(instance);
        let instance_id = self.next_id();
        {
            let mut state = self.lock_state();
            if !state.closed {
                state
                    .slots
                    .entry(key.clone())
                    .or_default()
                    .instances
                    .push(InstanceEntry {
                        id: instance_id,
                        instance: Arc::clone(&instance),
                        created_at: Instant::now(),
                        idle_since: None,
                    });
                drop(state);
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                self.listener.on_cold(&key, instance_id);
                return Ok(Lease::new(key, instance_id, instance, true, Arc::clone(self)));
            }
        }

        // Shut down while the factory was creating: the instance was never
        // registered, so it is disposed here and nobody can lease it.
        if let Err(error) = self.factory.dispose(&key, &instance) {
            log_dispose_failure(&key, instance_id, &error);
        }
        Err(PoolError::ShutDown)
    }

    /// End a lease. The instance goes idle, or is disposed when `recycle` is
    /// false or the pool is closed.
    pub(crate) fn release(&self, key: &F::Key, instance_id: InstanceId, recycle: bool) {
        let outcome = {
            let mut state = self.lock_state();
            let closed = state.closed;
            let Some(slot) = state.slots.get_mut(key) else {
                return;
            };
            let Some(position) = slot
                .instances
                .iter()
                .position(|entry| entry.id == instance_id && entry.idle_since.is_none())
            else {
                return;
            };
            if closed || !recycle {
                Some(slot.instances.swap_remove(position))
            } else {
                slot.instances[position].idle_since = Some(Instant::now());
                None
            }
        };

        self.counters.released.fetch_add(1, Ordering::Relaxed);
        self.listener.on_release(key, instance_id);
        if let Some(entry) = outcome {
            self.dispose_entry(key, &entry);
        }
    }

    fn dispose_entry(&self, key: &F::Key, entry: &InstanceEntry<F::Instance>) {
        if let Err(error) = self.factory.dispose(key, &entry.instance) {
            log_dispose_failure(key, entry.id, &error);
        }
        self.counters.disposed.fetch_add(1, Ordering::Relaxed);
        self.listener.on_dispose(key, entry.id);
    }
}

fn log_dispose_failure<K: std::fmt::Display>(
    key: &K,
    instance_id: InstanceId,
    error: &anyhow::Error,
) {
    tracing::warn!(
        event = "pool.instance.dispose_failed",
        slot = %key,
        instance_id = %instance_id,
        error = %format!("{error:#}"),
        "instance disposal failed"
    );
}
