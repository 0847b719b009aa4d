#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use omni_pool::{InstanceId, PoolListener, SlotFactory};

/// Instance handed out by [`MockFactory`].
#[derive(Debug)]
pub struct MockInstance {
    pub serial: usize,
}

/// Factory double: counts creations and disposals, fails for slot `broken`.
#[derive(Default)]
pub struct MockFactory {
    pub created: AtomicUsize,
    pub disposed: AtomicUsize,
    pub create_delay: Duration,
    pub fail_dispose: bool,
}

impl MockFactory {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            create_delay: delay,
            ..Self::default()
        }
    }

    pub fn failing_dispose() -> Self {
        Self {
            fail_dispose: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SlotFactory for MockFactory {
    type Key = String;
    type Args = ();
    type Instance = MockInstance;

    async fn create(&self, key: &String, _args: ()) -> anyhow::Result<MockInstance> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if key == "broken" {
            anyhow::bail!("worker bootstrap failed for {key}");
        }
        let serial = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockInstance { serial })
    }

    fn dispose(&self, _key: &String, _instance: &MockInstance) -> anyhow::Result<()> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        if self.fail_dispose {
            anyhow::bail!("process already gone");
        }
        Ok(())
    }
}

/// Listener double recording every notification in order.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<(&'static str, String, InstanceId)>>,
}

impl RecordingListener {
    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .expect("listener lock")
            .iter()
            .filter(|(event, _, _)| *event == kind)
            .count()
    }

    fn push(&self, kind: &'static str, key: &String, instance_id: InstanceId) {
        self.events
            .lock()
            .expect("listener lock")
            .push((kind, key.clone(), instance_id));
    }
}

impl PoolListener<String> for RecordingListener {
    fn on_cold(&self, key: &String, instance_id: InstanceId) {
        self.push("cold", key, instance_id);
    }

    fn on_hot(&self, key: &String, instance_id: InstanceId) {
        self.push("hot", key, instance_id);
    }

    fn on_release(&self, key: &String, instance_id: InstanceId) {
        self.push("release", key, instance_id);
    }

    fn on_dispose(&self, key: &String, instance_id: InstanceId) {
        self.push("dispose", key, instance_id);
    }
}

pub fn recording() -> Arc<RecordingListener> {
    Arc::new(RecordingListener::default())
}
