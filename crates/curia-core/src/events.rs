//! Curation event types, event bus, and progress sinks.
//!
//! The curation controller reports through the [`ProgressSink`] port. This
//! module provides the sinks the host wires in: a `tracing` sink, a collecting
//! sink used for summaries and tests, and a sink that publishes enveloped
//! [`CurationEvent`]s on a broadcast [`EventBus`] so that websocket or
//! notification layers can subscribe independently.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{CurationOutcome, CurationStatus, LogLevel};
use crate::traits::ProgressSink;

// ============================================================================
// Curation Event (domain payloads)
// ============================================================================

/// Progress event of a bulk curation batch.
///
/// Serialized as JSON with a `type` tag field, e.g.
/// `{"type":"DocumentProcessed","project":"p","document_id":"d",...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum CurationEvent {
    /// A batch started.
    BatchStarted { project: String, total: usize },
    /// One document was curated (or failed).
    DocumentProcessed {
        project: String,
        document_id: String,
        status: CurationStatus,
        applied: usize,
        contested: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Free-form progress message.
    Message {
        project: String,
        level: LogLevel,
        text: String,
    },
    /// A batch ended, either completely or through cancellation.
    BatchFinished {
        project: String,
        finished: usize,
        contested: usize,
        failed: usize,
        cancelled: bool,
    },
}

impl CurationEvent {
    /// Namespaced event type (e.g. `"curation.document"`).
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            CurationEvent::BatchStarted { .. } => "curation.started",
            CurationEvent::DocumentProcessed { .. } => "curation.document",
            CurationEvent::Message { .. } => "curation.message",
            CurationEvent::BatchFinished { .. } => "curation.finished",
        }
    }

    /// Project the event belongs to.
    pub fn project(&self) -> &str {
        match self {
            CurationEvent::BatchStarted { project, .. }
            | CurationEvent::DocumentProcessed { project, .. }
            | CurationEvent::Message { project, .. }
            | CurationEvent::BatchFinished { project, .. } => project,
        }
    }
}

// ============================================================================
// Event Envelope
// ============================================================================

/// Versioned wrapper around a [`CurationEvent`].
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type.
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Payload schema version.
    pub payload_version: u32,
    /// Domain-specific event data.
    pub payload: CurationEvent,
}

impl EventEnvelope {
    pub fn new(event: CurationEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus for distributing curation events.
///
/// Slow receivers that fall behind receive a `Lagged` error and miss events.
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently without subscribers.
    pub fn emit(&self, event: CurationEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::trace!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive enveloped events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

// ============================================================================
// Progress sinks
// ============================================================================

/// Publishes progress of one project on an [`EventBus`].
pub struct EventBusProgressSink {
    bus: Arc<EventBus>,
    project: String,
}

impl EventBusProgressSink {
    pub fn new(bus: Arc<EventBus>, project: impl Into<String>) -> Self {
        Self {
            bus,
            project: project.into(),
        }
    }
}

impl ProgressSink for EventBusProgressSink {
    fn on_document_processed(&self, document: &str, outcome: &CurationOutcome) {
        self.bus.emit(CurationEvent::DocumentProcessed {
            project: self.project.clone(),
            document_id: document.to_string(),
            status: outcome.status,
            applied: outcome.applied,
            contested: outcome.contested,
            error: outcome.error.clone(),
        });
    }

    fn on_message(&self, level: LogLevel, text: &str) {
        self.bus.emit(CurationEvent::Message {
            project: self.project.clone(),
            level,
            text: text.to_string(),
        });
    }
}

/// Forwards progress to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_document_processed(&self, document: &str, outcome: &CurationOutcome) {
        tracing::info!(
            document_id = %document,
            status = ?outcome.status,
            applied = outcome.applied,
            contested_count = outcome.contested,
            "Document processed"
        );
    }

    fn on_message(&self, level: LogLevel, text: &str) {
        match level {
            LogLevel::Info => tracing::info!("{text}"),
            LogLevel::Warn => tracing::warn!("{text}"),
            LogLevel::Error => tracing::error!("{text}"),
        }
    }
}

/// Accumulates everything it receives.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    outcomes: Mutex<Vec<CurationOutcome>>,
    messages: Mutex<Vec<(LogLevel, String)>>,
}

impl CollectingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<CurationOutcome> {
        self.outcomes.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn on_document_processed(&self, _document: &str, outcome: &CurationOutcome) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push(outcome.clone());
        }
    }

    fn on_message(&self, level: LogLevel, text: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, text.to_string()));
        }
    }
}

/// Forwards to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutProgressSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ProgressSink for FanoutProgressSink {
    fn on_document_processed(&self, document: &str, outcome: &CurationOutcome) {
        for sink in &self.sinks {
            sink.on_document_processed(document, outcome);
        }
    }

    fn on_message(&self, level: LogLevel, text: &str) {
        for sink in &self.sinks {
            sink.on_message(level, text);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
