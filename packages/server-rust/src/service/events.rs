//! Structured request events and the sinks that receive them.
//!
//! Exactly one [`ObservabilityEvent`] is emitted per inbound request. Sinks
//! are append-only: they never see an event twice and never reorder.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use petstore_core::{CorrelationContext, OperationType};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Kind of a request event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Every field resolved.
    GraphqlRequest,
    /// At least one field failed after passing validation.
    GraphqlError,
    /// At least one field (or the whole body) failed validation.
    GraphqlRequestInvalid,
    /// The request was dropped before an envelope was produced.
    GraphqlRequestIncomplete,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::GraphqlRequest => "graphql_request",
            EventKind::GraphqlError => "graphql_error",
            EventKind::GraphqlRequestInvalid => "graphql_request_invalid",
            EventKind::GraphqlRequestIncomplete => "graphql_request_incomplete",
        }
    }
}

/// One structured event, serialized as a flat JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityEvent {
    pub event: EventKind,
    pub correlation_id: String,
    pub operation_name: String,
    pub operation_type: OperationType,
    pub duration_ms: u64,
    pub field_count: usize,
    pub error_count: usize,
}

impl ObservabilityEvent {
    #[must_use]
    pub fn new(
        event: EventKind,
        ctx: &CorrelationContext,
        duration_ms: u64,
        field_count: usize,
        error_count: usize,
    ) -> Self {
        Self {
            event,
            correlation_id: ctx.correlation_id.clone(),
            operation_name: ctx.operation_name.clone(),
            operation_type: ctx.operation_type,
            duration_ms,
            field_count,
            error_count,
        }
    }
}

/// Append-only destination for events.
///
/// Used as `Arc<dyn EventSink>`. Implementations must not block for long:
/// `emit` runs on the request path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ObservabilityEvent);
}

// ---------------------------------------------------------------------------
// TracingEventSink
// ---------------------------------------------------------------------------

/// Writes each event as one `info` record on target `petstore::events`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &ObservabilityEvent) {
        info!(
            target: "petstore::events",
            event = event.event.as_str(),
            correlation_id = %event.correlation_id,
            operation_name = %event.operation_name,
            operation_type = event.operation_type.as_str(),
            duration_ms = event.duration_ms,
            field_count = event.field_count,
            error_count = event.error_count,
            "request event"
        );
    }
}

// ---------------------------------------------------------------------------
// JsonLinesEventSink
// ---------------------------------------------------------------------------

/// Appends one JSON object per line to a file.
pub struct JsonLinesEventSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesEventSink {
    /// Opens (creating if needed) `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl EventSink for JsonLinesEventSink {
    fn emit(&self, event: &ObservabilityEvent) {
        let mut writer = self.writer.lock();
        let written = serde_json::to_writer(&mut *writer, event)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        if let Err(err) = written {
            warn!(error = %err, correlation_id = %event.correlation_id, "failed to append event");
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryEventSink
// ---------------------------------------------------------------------------

/// Keeps events in memory, for tests and diagnostics.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<ObservabilityEvent>>,
}

impl MemoryEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event emitted so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<ObservabilityEvent> {
        self.events.lock().clone()
    }

    /// Events carrying the given correlation id.
    #[must_use]
    pub fn for_correlation(&self, correlation_id: &str) -> Vec<ObservabilityEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &ObservabilityEvent) {
        self.events.lock().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// CompositeEventSink
// ---------------------------------------------------------------------------

/// Fans every event out to several sinks, in registration order.
#[derive(Default)]
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeEventSink {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for CompositeEventSink {
    fn emit(&self, event: &ObservabilityEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
