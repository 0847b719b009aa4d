//! Request lifecycle event bus.
//!
//! Every request transition is published on one shared broadcast channel,
//! tagged with the request id. Callers receive their own result through their
//! [`JobHandle`](crate::JobHandle); the bus is for observers that want the
//! whole stream (dashboards, audit logs, tests).
//!
//! ```text
//! Dispatcher transition
//!      ↓
//! DispatchEventBus.emit() → broadcast::Sender
//!      ↓
//! Fan-out to every subscriber (filter by request_id as needed)
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::request::RequestId;

/// Kind of lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchEventKind {
    /// Request accepted and queued in its group.
    Submitted,
    /// Worker leased; job running.
    Running {
        /// Whether the worker was created for this request.
        cold: bool,
    },
    /// Result delivered.
    Completed,
    /// Error delivered.
    Failed {
        /// Rendered error.
        error: String,
    },
    /// Abandoned before a result arrived.
    Cancelled,
}

/// One lifecycle transition of one request.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchEvent {
    /// Request the event belongs to.
    pub request_id: RequestId,
    /// Job name (group).
    pub job_name: String,
    /// Transition.
    #[serde(flatten)]
    pub kind: DispatchEventKind,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} <{}>: {:?}",
            self.timestamp.format("%H:%M:%S"),
            self.request_id,
            self.job_name,
            self.kind
        )
    }
}

/// Broadcast bus for [`DispatchEvent`]s.
#[derive(Clone)]
pub(crate) struct DispatchEventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl DispatchEventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish; returns the number of subscribers reached (0 is not an error).
    pub(crate) fn emit(
        &self,
        request_id: RequestId,
        job_name: &str,
        kind: DispatchEventKind,
    ) -> usize {
        let event = DispatchEvent {
            request_id,
            job_name: job_name.to_string(),
            kind,
            timestamp: Utc::now(),
        };
        self.tx.send(event).unwrap_or(0)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
