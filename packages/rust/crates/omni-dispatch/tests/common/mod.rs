#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use omni_dispatch::{
    DispatchEvent, Dispatcher, DispatcherConfig, JobArgs, RequestId, RequestState, Worker,
    WorkerFactory, WorkerRequest,
};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Worker factory double. Fails for job `broken`; workers interpret their args:
/// `sleep_ms`, `block` (wait for cancellation), `fail` (error message), `echo`,
/// `unusable` (worker refuses reuse afterwards).
#[derive(Default)]
pub struct MockWorkerFactory {
    pub created: AtomicUsize,
    pub disposed: Arc<AtomicUsize>,
    in_flight: Arc<InFlight>,
}

#[derive(Default)]
struct InFlight {
    current: Mutex<HashMap<String, usize>>,
    peak: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    peak_total: AtomicUsize,
}

impl MockWorkerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Highest number of simultaneous submissions observed for one job name.
    pub fn peak_in_flight(&self, job_name: &str) -> usize {
        self.in_flight
            .peak
            .lock()
            .expect("peak lock")
            .get(job_name)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous submissions across all job names.
    pub fn peak_total_in_flight(&self) -> usize {
        self.in_flight.peak_total.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerFactory for MockWorkerFactory {
    async fn create(&self, job_id: &str, _job_path: &str) -> anyhow::Result<Box<dyn Worker>> {
        if job_id == "broken" {
            anyhow::bail!("cannot start job {job_id}");
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockWorker {
            job_name: job_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
            disposed: Arc::clone(&self.disposed),
            unusable: AtomicBool::new(false),
        }))
    }
}

struct MockWorker {
    job_name: String,
    in_flight: Arc<InFlight>,
    disposed: Arc<AtomicUsize>,
    unusable: AtomicBool,
}

struct InFlightGuard {
    job_name: String,
    in_flight: Arc<InFlight>,
}

impl InFlightGuard {
    fn enter(job_name: &str, in_flight: &Arc<InFlight>) -> Self {
        {
            let mut current = in_flight.current.lock().expect("current lock");
            let count = current.entry(job_name.to_string()).or_insert(0);
            *count += 1;
            let mut peak = in_flight.peak.lock().expect("peak lock");
            let max = peak.entry(job_name.to_string()).or_insert(0);
            *max = (*max).max(*count);
        }
        let total = in_flight.total.fetch_add(1, Ordering::SeqCst) + 1;
        in_flight.peak_total.fetch_max(total, Ordering::SeqCst);
        Self {
            job_name: job_name.to_string(),
            in_flight: Arc::clone(in_flight),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(count) = self
            .in_flight
            .current
            .lock()
            .expect("current lock")
            .get_mut(&self.job_name)
        {
            *count -= 1;
        }
        self.in_flight.total.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Worker for MockWorker {
    async fn submit(&self, request: WorkerRequest, cancel: CancellationToken) -> anyhow::Result<Value> {
        let _guard = InFlightGuard::enter(&self.job_name, &self.in_flight);
        let JobArgs { args, stream } = request.args;
        if args["unusable"] == true {
            self.unusable.store(true, Ordering::SeqCst);
        }

        if let Some(mut stream) = stream {
            let mut chunks = 0u64;
            while stream.recv().await.is_some() {
                chunks += 1;
            }
            return Ok(json!(chunks));
        }
        if let Some(ms) = args["sleep_ms"].as_u64() {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if args["block"] == true {
            cancel.cancelled().await;
            anyhow::bail!("stopped by cancellation");
        }
        if let Some(message) = args["fail"].as_str() {
            anyhow::bail!("{message}");
        }
        Ok(args.get("echo").cloned().unwrap_or(Value::Null))
    }

    fn is_reusable(&self) -> bool {
        !self.unusable.load(Ordering::SeqCst)
    }

    fn dispose(&self) -> anyhow::Result<()> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn config(concurrency: usize) -> DispatcherConfig {
    DispatcherConfig {
        concurrency,
        ..DispatcherConfig::default()
    }
}

pub fn start(factory: &Arc<MockWorkerFactory>, config: DispatcherConfig) -> Arc<Dispatcher> {
    let factory: Arc<dyn WorkerFactory> = factory.clone();
    Dispatcher::start(factory, config).expect("valid config")
}

/// Poll until the request reaches `state`.
pub async fn wait_for_state(dispatcher: &Dispatcher, request_id: RequestId, state: RequestState) {
    for _ in 0..1_000 {
        if dispatcher.status(request_id).map(|s| s.state) == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("request {request_id} never reached {state:?}");
}

/// Poll until the request is no longer outstanding.
pub async fn wait_until_finished(dispatcher: &Dispatcher, request_id: RequestId) {
    for _ in 0..1_000 {
        if dispatcher.status(request_id).is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("request {request_id} is still outstanding");
}

/// Drain every event already published.
pub fn drain(rx: &mut broadcast::Receiver<DispatchEvent>) -> Vec<DispatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
