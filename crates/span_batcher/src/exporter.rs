use crate::span::SpanRecord;
use std::time::Duration;
use thiserror::Error;

/// Error types for span export operations
#[derive(Debug, Error, Clone)]
pub enum ExportError {
    /// Exporter has already been shut down
    #[error("exporter is shut down")]
    Shutdown,
    /// Transport-layer error (network, gRPC, HTTP)
    #[error("transport error: {0}")]
    Transport(String),
}

/// An ordered sequence of owned span records handed to an exporter in one call.
pub type SpanBatch = Vec<Box<SpanRecord>>;

/// Completion callback for asynchronous exports. Invoked exactly once.
#[cfg(feature = "async-export")]
pub type ExportCallback = Box<dyn FnOnce(Result<(), ExportError>) + Send>;

/// Trait for exporting span batches to a backend.
///
/// The batching pipeline calls `export` only from its single worker thread,
/// so implementations never see concurrent export calls. `make_recordable`
/// and `shutdown` may be called from any thread, hence `Send + Sync`.
///
/// A failed export is terminal from the pipeline's point of view: the batch
/// is considered consumed and is not retried. Retry policy belongs to the
/// exporter, which knows its transport.
pub trait SpanExporter: Send + Sync {
    /// Returns a fresh, empty recordable for a producer to fill in.
    fn make_recordable(&self) -> Box<SpanRecord> {
        Box::default()
    }

    /// Exports a batch of spans, taking ownership of the records.
    fn export(&self, batch: SpanBatch) -> Result<(), ExportError>;

    /// Exports a batch asynchronously, invoking `done` exactly once when
    /// the export completes.
    ///
    /// The default implementation performs the export synchronously and
    /// invokes the callback before returning, so exporters without a real
    /// asynchronous transport still satisfy the contract.
    #[cfg(feature = "async-export")]
    fn export_async(&self, batch: SpanBatch, done: ExportCallback) {
        tracing::warn!("async export not supported by this exporter; falling back to sync");
        done(self.export(batch));
    }

    /// Shuts the exporter down. Idempotent; after this returns, further
    /// `export` calls must fail.
    fn shutdown(&self, timeout: Option<Duration>) -> bool;

    /// Flushes any exporter-side buffering. May be a no-op.
    fn force_flush(&self, _timeout: Option<Duration>) -> bool {
        true
    }

    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;
}

/// Stdout exporter for local debugging and the demo binary.
pub struct StdoutExporter {
    verbose: bool,
}

impl StdoutExporter {
    /// Creates a new stdout exporter. With `verbose` off it only counts.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl SpanExporter for StdoutExporter {
    fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        if self.verbose {
            println!("=== Exporting {} spans ===", batch.len());
            for span in &batch {
                println!(
                    "Span: trace_id={:032x} span_id={:016x} name={} duration={}ns status={:?}",
                    span.trace_id,
                    span.span_id,
                    span.name,
                    span.duration_nanos(),
                    span.status
                );
            }
        }
        Ok(())
    }

    fn shutdown(&self, _timeout: Option<Duration>) -> bool {
        true
    }

    fn name(&self) -> &str {
        "stdout"
    }
}
