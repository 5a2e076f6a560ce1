//! Incident sinks
//!
//! Every component reports incidents through the `IncidentSink` configured
//! in the policy. Sinks are infallible: losing an incident is never a
//! reason to change an enforcement decision.

use crate::types::IncidentEvent;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Receives incident events
pub trait IncidentSink: Send + Sync {
    /// Record a single incident
    fn record(&self, event: &IncidentEvent);
}

/// Default sink: emits incidents as structured `tracing` warnings
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl IncidentSink for TracingSink {
    fn record(&self, event: &IncidentEvent) {
        tracing::warn!(
            incident = ?event.kind,
            context = %event.context,
            key = event.key.as_deref().unwrap_or(""),
            detail = event.detail.as_deref().unwrap_or(""),
            ip = event.meta.ip.as_deref().unwrap_or(""),
            path = event.meta.path.as_deref().unwrap_or(""),
            method = event.meta.method.as_deref().unwrap_or(""),
            url = event.meta.url.as_deref().unwrap_or(""),
            "Shield incident"
        );
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl IncidentSink for NullSink {
    fn record(&self, _event: &IncidentEvent) {}
}

/// Adapts a closure into a sink
pub struct FnSink<F>(pub F);

impl<F> IncidentSink for FnSink<F>
where
    F: Fn(&IncidentEvent) + Send + Sync,
{
    fn record(&self, event: &IncidentEvent) {
        (self.0)(event)
    }
}

/// In-memory sink that keeps every incident, mostly for tests
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<IncidentEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded incidents
    pub fn events(&self) -> Vec<IncidentEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Number of recorded incidents
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all recorded incidents
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl IncidentSink for MemorySink {
    fn record(&self, event: &IncidentEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Broadcast-based sink that fans incidents out to any number of consumers.
///
/// Send failures (no receivers) are ignored. Consumers that fall behind
/// see `RecvError::Lagged` and can skip to the latest incidents.
pub struct BroadcastSink {
    tx: broadcast::Sender<IncidentEvent>,
}

impl BroadcastSink {
    /// Create a new broadcast sink with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to the incident stream
    pub fn subscribe(&self) -> broadcast::Receiver<IncidentEvent> {
        self.tx.subscribe()
    }
}

impl IncidentSink for BroadcastSink {
    fn record(&self, event: &IncidentEvent) {
        let _ = self.tx.send(event.clone());
    }
}
