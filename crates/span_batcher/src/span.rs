use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// A completed (or in-flight) span record.
///
/// This is the owned value that flows producer -> ring buffer -> worker ->
/// exporter. The batching pipeline treats it as opaque: it moves records
/// around but never reads their fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Unique trace identifier (128-bit)
    pub trace_id: u128,
    /// Unique span identifier (64-bit)
    pub span_id: u64,
    /// Parent span identifier (0 if root span)
    pub parent_span_id: u64,
    /// Span start time (Unix nanoseconds)
    pub start_time: u64,
    /// Span end time (Unix nanoseconds)
    pub end_time: u64,
    /// Operation name
    pub name: String,
    /// Span attributes (boxed to keep SpanRecord size manageable)
    pub attributes: Box<HashMap<String, AttributeValue>>,
    /// Span status
    pub status: SpanStatus,
    /// Span kind
    pub kind: SpanKind,
}

/// Identifying context of a span, handed to processors on span start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: u128,
    pub span_id: u64,
}

/// Attribute value types for span metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<String>),
}

/// Span execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanStatus {
    /// Span completed successfully
    Ok,
    /// Span completed with error
    Error,
    /// Span status unknown
    Unset,
}

/// Span kind according to the OpenTelemetry data model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    /// Internal operation span
    Internal,
    /// Server-side RPC span
    Server,
    /// Client-side RPC span
    Client,
    /// Producer span (messaging)
    Producer,
    /// Consumer span (messaging)
    Consumer,
}

impl SpanRecord {
    /// Creates a new span record with the given identity, started now.
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: u64,
        name: String,
        kind: SpanKind,
    ) -> Self {
        let now = unix_nanos();

        Self {
            trace_id,
            span_id,
            parent_span_id,
            start_time: now,
            end_time: now,
            name,
            attributes: Box::new(HashMap::new()),
            status: SpanStatus::Unset,
            kind,
        }
    }

    /// Returns the identifying context of this span.
    pub fn context(&self) -> SpanContext {
        SpanContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
        }
    }

    /// Marks the span as completed with the given status.
    pub fn finish(&mut self, status: SpanStatus) {
        self.end_time = unix_nanos();
        self.status = status;
    }

    /// Adds an attribute to the span.
    pub fn set_attribute(&mut self, key: String, value: AttributeValue) {
        self.attributes.insert(key, value);
    }

    /// Duration of the span in nanoseconds.
    pub fn duration_nanos(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

impl Default for SpanRecord {
    /// An empty recordable, as handed out by
    /// [`SpanExporter::make_recordable`](crate::SpanExporter::make_recordable).
    fn default() -> Self {
        Self {
            trace_id: 0,
            span_id: 0,
            parent_span_id: 0,
            start_time: 0,
            end_time: 0,
            name: String::new(),
            attributes: Box::new(HashMap::new()),
            status: SpanStatus::Unset,
            kind: SpanKind::Internal,
        }
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
