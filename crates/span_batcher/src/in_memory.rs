//! In-memory span exporter, a test double for the batching pipeline.

use crate::exporter::{ExportError, SpanBatch, SpanExporter};
use crate::span::SpanRecord;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default capacity of the in-memory store.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Bounded in-memory store of exported span records.
///
/// Shared between the exporter that fills it and the test code that drains
/// it. Overflow policy is drop-oldest: once `capacity` records are buffered,
/// adding another evicts the front of the queue.
#[derive(Debug)]
pub struct InMemorySpanData {
    spans: Mutex<VecDeque<Box<SpanRecord>>>,
    capacity: usize,
}

impl InMemorySpanData {
    /// Creates a store holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            spans: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Adds a record, evicting the oldest one at capacity.
    pub fn add(&self, span: Box<SpanRecord>) {
        let mut spans = self.spans.lock().unwrap();
        if spans.len() == self.capacity {
            spans.pop_front();
        }
        spans.push_back(span);
    }

    /// Drains and returns all currently buffered records, oldest first.
    pub fn get_spans(&self) -> Vec<Box<SpanRecord>> {
        self.spans.lock().unwrap().drain(..).collect()
    }

    /// Number of records currently buffered.
    pub fn span_count(&self) -> usize {
        self.spans.lock().unwrap().len()
    }
}

/// An exporter that keeps every received span in memory.
///
/// Exists to make pipeline behavior observable from tests: `data()` hands
/// out the shared store, and `get_spans()` on it drains whatever arrived.
pub struct InMemorySpanExporter {
    data: Arc<InMemorySpanData>,
    is_shutdown: AtomicBool,
}

impl InMemorySpanExporter {
    /// Creates an exporter with a store of the given capacity.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            data: Arc::new(InMemorySpanData::new(buffer_size)),
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Returns a shared handle to this exporter's span store.
    pub fn data(&self) -> Arc<InMemorySpanData> {
        Arc::clone(&self.data)
    }
}

impl Default for InMemorySpanExporter {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        if self.is_shutdown.load(Ordering::Acquire) {
            tracing::error!(
                spans = batch.len(),
                "in-memory exporter received batch after shutdown"
            );
            return Err(ExportError::Shutdown);
        }

        for span in batch {
            self.data.add(span);
        }
        Ok(())
    }

    fn shutdown(&self, _timeout: Option<Duration>) -> bool {
        self.is_shutdown.store(true, Ordering::Release);
        true
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
