use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::factory::SlotFactory;
use crate::pool::PoolShared;

/// Pool-local instance identifier, unique for the lifetime of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) u64);

impl InstanceId {
    /// Raw numeric id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A borrowed pool instance.
///
/// The instance goes back to the idle set when the lease is released, either
/// explicitly through [`Lease::release`] or implicitly on drop. An instance
/// that must not be handed out again is ended with [`Lease::discard`].
/// Either takes effect exactly once.
pub struct Lease<F: SlotFactory> {
    key: F::Key,
    instance_id: InstanceId,
    instance: Arc<F::Instance>,
    cold: bool,
    pool: Option<Arc<PoolShared<F>>>,
}

impl<F: SlotFactory> Lease<F> {
    pub(crate) fn new(
        key: F::Key,
        instance_id: InstanceId,
        instance: Arc<F::Instance>,
        cold: bool,
        pool: Arc<PoolShared<F>>,
    ) -> Self {
        Self {
            key,
            instance_id,
            instance,
            cold,
            pool: Some(pool),
        }
    }

    /// Slot this lease was acquired from.
    #[must_use]
    pub fn key(&self) -> &F::Key {
        &self.key
    }

    /// Identifier of the leased instance.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Whether the instance was freshly created for this lease.
    #[must_use]
    pub fn is_cold(&self) -> bool {
        self.cold
    }

    /// Return the instance to the pool.
    pub fn release(mut self) {
        self.release_once(true);
    }

    /// End the lease and dispose the instance instead of recycling it.
    pub fn discard(mut self) {
        self.release_once(false);
    }

    fn release_once(&mut self, recycle: bool) {
        if let Some(pool) = self.pool.take() {
            pool.release(&self.key, self.instance_id, recycle);
        }
    }
}

impl<F: SlotFactory> Deref for Lease<F> {
    type Target = F::Instance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl<F: SlotFactory> Drop for Lease<F> {
    fn drop(&mut self) {
        self.release_once(true);
    }
}

impl<F: SlotFactory> fmt::Debug for Lease<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("instance_id", &self.instance_id)
            .field("cold", &self.cold)
            .field("released", &self.pool.is_none())
            .finish_non_exhaustive()
    }
}
