//! Progress reporting for composite lifecycle steps.
//!
//! Every action a [`crate::CompositeStep`] executes emits a `Started` event
//! followed by exactly one `Succeeded` or `Failed` event. Sinks implement
//! [`ProgressMonitor`]; the default sink logs through `tracing`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::lifecycle::LifecyclePhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Started,
    Succeeded,
    Failed,
}

/// One observation about an action of a composite step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Human-readable composite step name, e.g. `Start tenant acme`.
    pub step: String,
    pub component: String,
    pub phase: LifecyclePhase,
    pub status: ProgressStatus,
    pub message: String,
}

/// Observer of lifecycle progress. Must not block; called inline by the executor.
pub trait ProgressMonitor: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Writes progress events to the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressMonitor;

impl ProgressMonitor for TracingProgressMonitor {
    fn report(&self, event: ProgressEvent) {
        match event.status {
            ProgressStatus::Started => tracing::debug!(
                step = %event.step,
                component = %event.component,
                phase = %event.phase,
                "{}",
                event.message
            ),
            ProgressStatus::Succeeded => tracing::info!(
                step = %event.step,
                component = %event.component,
                phase = %event.phase,
                "{}",
                event.message
            ),
            ProgressStatus::Failed => tracing::warn!(
                step = %event.step,
                component = %event.component,
                phase = %event.phase,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps every event in memory. Useful for health endpoints and tests.
#[derive(Debug, Default)]
pub struct RecordingProgressMonitor {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressMonitor {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Events with [`ProgressStatus::Failed`].
    #[must_use]
    pub fn failures(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.status == ProgressStatus::Failed)
            .cloned()
            .collect()
    }

    /// Events belonging to the composite step named `step`.
    #[must_use]
    pub fn for_step(&self, step: &str) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.step == step)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ProgressMonitor for RecordingProgressMonitor {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards events to an unbounded channel for an external consumer.
#[derive(Debug, Clone)]
pub struct ChannelProgressMonitor {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressMonitor {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressMonitor for ChannelProgressMonitor {
    fn report(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("progress receiver dropped; event discarded");
        }
    }
}

/// Fans every event out to several sinks, in order.
#[derive(Default, Clone)]
pub struct FanoutProgressMonitor {
    sinks: Vec<Arc<dyn ProgressMonitor>>,
}

impl FanoutProgressMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn ProgressMonitor>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ProgressMonitor for FanoutProgressMonitor {
    fn report(&self, event: ProgressEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.report(event.clone());
            }
            last.report(event);
        }
    }
}
