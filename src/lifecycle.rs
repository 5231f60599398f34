//! Work item lifecycle events.
//!
//! Events are the invoker's voice to schedulers and monitors. Publishing
//! is fire-and-forget: a sink that fails or panics is logged and skipped,
//! and never affects the invocation being reported on. Sinks are called
//! synchronously and in order, so an event is out before the invoker moves
//! on.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::model::{Params, WorkItemUid};
use crate::telemetry::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    InProgress,
    Failed,
    Succeeded,
}

impl LifecyclePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecyclePhase::Failed | LifecyclePhase::Succeeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::InProgress => "IN_PROGRESS",
            LifecyclePhase::Failed => "FAILED",
            LifecyclePhase::Succeeded => "SUCCEEDED",
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event. Published and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Absent when the request carried nothing to derive it from.
    pub work_item_uid: Option<WorkItemUid>,
    /// Snapshot of the parameters at the time of the event.
    pub params: Option<Params>,
    pub phase: LifecyclePhase,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Destination for lifecycle events.
pub trait LifecycleSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent) -> anyhow::Result<()>;
}

/// Fans each event out to every registered sink.
#[derive(Clone, Default)]
pub struct WorkItemLifecyclePublisher {
    sinks: Vec<Arc<dyn LifecycleSink>>,
}

impl WorkItemLifecyclePublisher {
    /// A publisher with no sinks. Events are counted and dropped.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn LifecycleSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Publish an event. Never fails.
    pub fn publish(
        &self,
        work_item_uid: Option<&WorkItemUid>,
        params: Option<&Params>,
        phase: LifecyclePhase,
        message: Option<&str>,
    ) {
        let event = LifecycleEvent {
            work_item_uid: work_item_uid.cloned(),
            params: params.cloned(),
            phase,
            message: message.map(str::to_string),
            timestamp: Utc::now(),
        };

        metrics::lifecycle_events().add(1, &[KeyValue::new("phase", phase.as_str())]);

        for sink in &self.sinks {
            match catch_unwind(AssertUnwindSafe(|| sink.emit(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(phase = %phase, error = %e, "lifecycle sink failed, event dropped");
                }
                Err(_) => {
                    warn!(phase = %phase, "lifecycle sink panicked, event dropped");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Writes each event as a structured `tracing` event.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl LifecycleSink for TracingSink {
    fn emit(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        let uid = event
            .work_item_uid
            .as_ref()
            .map(|u| u.0.as_str())
            .unwrap_or("-");
        let detail = event.message.as_deref().unwrap_or("");
        match event.phase {
            LifecyclePhase::Failed => warn!(
                work_item_uid = uid,
                phase = %event.phase,
                detail,
                "work item lifecycle"
            ),
            _ => info!(
                work_item_uid = uid,
                phase = %event.phase,
                detail,
                "work item lifecycle"
            ),
        }
        Ok(())
    }
}

/// Sends each event over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl LifecycleSink for BroadcastSink {
    fn emit(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        if self.tx.send(event.clone()).is_err() {
            debug!(phase = %event.phase, "no lifecycle subscribers");
        }
        Ok(())
    }
}
