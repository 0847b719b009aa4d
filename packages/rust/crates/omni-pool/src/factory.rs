use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;

/// Creates and disposes the instances a [`SlotPool`](crate::SlotPool) manages.
#[async_trait]
pub trait SlotFactory: Send + Sync + 'static {
    /// Slot key (e.g. a job name).
    type Key: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;
    /// Arguments needed to create a fresh instance.
    type Args: Send + 'static;
    /// The pooled resource.
    type Instance: Send + Sync + 'static;

    /// Create a new instance for `key` (cold start). May be slow and may fail.
    async fn create(&self, key: &Self::Key, args: Self::Args) -> anyhow::Result<Self::Instance>;

    /// Release the instance's own resources. Called once, right before the
    /// pool forgets the instance. Errors are logged, never propagated.
    fn dispose(&self, key: &Self::Key, instance: &Self::Instance) -> anyhow::Result<()>;
}
