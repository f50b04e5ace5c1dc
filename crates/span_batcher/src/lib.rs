//! Batching Span Export Pipeline
//!
//! Buffers finished spans in a bounded lock-free ring (from `slotring`) and
//! ships them to a pluggable exporter in size-limited batches from a
//! dedicated worker thread. Producers never block: a full buffer drops the
//! span instead of stalling the application.
//!
//! The pipeline guarantees bounded memory (fixed ring capacity), bounded
//! latency (a schedule interval plus preemptive wakeups once the buffer is
//! half full), and at-most-once delivery (records are move-only all the way
//! from producer to exporter).
//!
//! # Example
//!
//! ```
//! use span_batcher::{BatchConfig, BatchSpanProcessor, InMemorySpanExporter, SpanProcessor};
//! use std::time::Duration;
//!
//! let exporter = InMemorySpanExporter::default();
//! let data = exporter.data();
//!
//! let processor = BatchSpanProcessor::new(
//!     Box::new(exporter),
//!     BatchConfig::default().with_schedule_delay(Duration::from_millis(100)),
//! );
//!
//! let mut span = processor.make_recordable();
//! span.name = "GET /users".to_string();
//! processor.on_end(span);
//!
//! assert!(processor.force_flush(None));
//! assert_eq!(data.get_spans().len(), 1);
//! assert!(processor.shutdown(None));
//! ```
//!
//! # Cargo features
//!
//! - `async-export`: adds [`SpanExporter::export_async`] and the
//!   `is_export_async` / `max_export_async` configuration knobs. Batches are
//!   then handed to the exporter with a completion callback, with a bounded
//!   pool capping the number of in-flight exports.

pub mod exporter;
pub mod in_memory;
pub mod processor;
pub mod span;

// Re-export main types
pub use exporter::{ExportError, SpanBatch, SpanExporter, StdoutExporter};
pub use in_memory::{InMemorySpanData, InMemorySpanExporter, DEFAULT_BUFFER_SIZE};
pub use processor::{BatchConfig, BatchSpanProcessor, SpanProcessor};
pub use span::{AttributeValue, SpanContext, SpanKind, SpanRecord, SpanStatus};

#[cfg(feature = "async-export")]
pub use exporter::ExportCallback;
