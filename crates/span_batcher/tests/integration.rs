use span_batcher::{
    BatchConfig, BatchSpanProcessor, ExportError, InMemorySpanData, InMemorySpanExporter,
    SpanBatch, SpanExporter, SpanKind, SpanProcessor, SpanRecord,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn ended_span(producer_id: usize, seq: u64) -> Box<SpanRecord> {
    Box::new(SpanRecord::new(
        1,
        ((producer_id as u64) << 48) | seq,
        0,
        format!("op-{}", seq),
        SpanKind::Internal,
    ))
}

/// Poll until the store holds `expected` spans or the deadline passes.
fn wait_for_span_count(data: &InMemorySpanData, expected: usize, deadline: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if data.span_count() >= expected {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    data.span_count() >= expected
}

#[test]
fn test_scheduled_export_delivers_in_order() {
    let exporter = InMemorySpanExporter::default();
    let data = exporter.data();
    let processor = BatchSpanProcessor::new(
        Box::new(exporter),
        BatchConfig::default()
            .with_max_queue_size(4)
            .with_max_export_batch_size(2)
            .with_schedule_delay(Duration::from_secs(1)),
    );

    for seq in 0..3 {
        processor.on_end(ended_span(0, seq));
    }
    thread::sleep(Duration::from_millis(1200));

    let spans = data.get_spans();
    let seqs: Vec<u64> = spans.iter().map(|s| s.span_id & 0xFFFF_FFFF_FFFF).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert_eq!(processor.buffered_spans(), 0);

    assert!(processor.shutdown(None));
}

#[test]
fn test_force_flush_delivers_before_schedule() {
    let exporter = InMemorySpanExporter::default();
    let data = exporter.data();
    let processor = BatchSpanProcessor::new(
        Box::new(exporter),
        BatchConfig::default()
            .with_max_queue_size(4)
            .with_max_export_batch_size(2)
            .with_schedule_delay(Duration::from_secs(10)),
    );

    processor.on_end(ended_span(0, 0));
    processor.on_end(ended_span(0, 1));

    assert!(processor.force_flush(None));
    assert_eq!(data.span_count(), 2);

    assert!(processor.shutdown(None));
}

/// Exporter that parks inside `export` until the gate is opened, keeping the
/// worker busy so the ring can be observed filling up behind it.
struct GateExporter {
    data: Arc<InMemorySpanData>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl GateExporter {
    fn new() -> (Self, Arc<InMemorySpanData>, Arc<(Mutex<bool>, Condvar)>) {
        let data = Arc::new(InMemorySpanData::new(1000));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        (
            Self {
                data: Arc::clone(&data),
                gate: Arc::clone(&gate),
            },
            data,
            gate,
        )
    }

    fn open(gate: &(Mutex<bool>, Condvar)) {
        let (lock, cv) = gate;
        *lock.lock().unwrap() = true;
        cv.notify_all();
    }
}

impl SpanExporter for GateExporter {
    fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        let (lock, cv) = &*self.gate;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cv.wait(open).unwrap();
        }
        drop(open);

        for span in batch {
            self.data.add(span);
        }
        Ok(())
    }

    fn shutdown(&self, _timeout: Option<Duration>) -> bool {
        true
    }

    fn name(&self) -> &str {
        "gate"
    }
}

#[test]
fn test_overflow_drops_newest_spans() {
    let (exporter, data, gate) = GateExporter::new();
    let processor = BatchSpanProcessor::new(
        Box::new(exporter),
        BatchConfig::default()
            .with_max_queue_size(2)
            .with_max_export_batch_size(2)
            .with_schedule_delay(Duration::from_secs(10)),
    );

    // Occupy the worker: it consumes this span and parks inside export.
    processor.on_end(ended_span(0, 0));
    let start = Instant::now();
    while processor.buffered_spans() > 0 && start.elapsed() < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(processor.buffered_spans(), 0, "worker never picked up the span");

    // With the worker stuck, only the ring accepts spans: 2 fit, 3 drop.
    for seq in 1..=5 {
        processor.on_end(ended_span(0, seq));
    }
    let metrics = processor.buffer_metrics();
    assert_eq!(metrics.records_dropped, 3);
    assert_eq!(processor.buffered_spans(), 2);

    GateExporter::open(&gate);
    assert!(processor.force_flush(None));

    // The occupied-worker span plus the two that fit in the ring
    assert_eq!(data.span_count(), 3);
    assert!(processor.shutdown(None));
}

#[test]
fn test_half_full_buffer_wakes_worker_early() {
    let exporter = InMemorySpanExporter::default();
    let data = exporter.data();
    let processor = BatchSpanProcessor::new(
        Box::new(exporter),
        BatchConfig::default()
            .with_max_queue_size(8)
            .with_max_export_batch_size(4)
            .with_schedule_delay(Duration::from_secs(5)),
    );

    let start = Instant::now();
    for seq in 0..4 {
        processor.on_end(ended_span(0, seq));
    }

    // Delivered well before the 5s schedule interval
    assert!(wait_for_span_count(&data, 4, Duration::from_secs(2)));
    assert!(start.elapsed() < Duration::from_secs(2));

    assert!(processor.shutdown(None));
}

#[test]
fn test_shutdown_drains_everything_in_order() {
    let exporter = InMemorySpanExporter::default();
    let data = exporter.data();
    let processor = BatchSpanProcessor::new(
        Box::new(exporter),
        BatchConfig::default()
            .with_max_queue_size(8)
            .with_max_export_batch_size(4)
            .with_schedule_delay(Duration::from_secs(10)),
    );

    // Two waves so the ring never overflows even if the worker lags
    for seq in 0..5 {
        processor.on_end(ended_span(0, seq));
    }
    thread::sleep(Duration::from_millis(50));
    for seq in 5..10 {
        processor.on_end(ended_span(0, seq));
    }

    assert!(processor.shutdown(None));

    let spans = data.get_spans();
    let seqs: Vec<u64> = spans.iter().map(|s| s.span_id & 0xFFFF_FFFF_FFFF).collect();
    assert_eq!(seqs, (0..10).collect::<Vec<u64>>());
    assert_eq!(processor.buffer_metrics().records_dropped, 0);
}

/// Records the size of every batch it receives.
struct BatchSizeRecordingExporter {
    data: Arc<InMemorySpanData>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl SpanExporter for BatchSizeRecordingExporter {
    fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        self.batch_sizes.lock().unwrap().push(batch.len());
        for span in batch {
            self.data.add(span);
        }
        Ok(())
    }

    fn shutdown(&self, _timeout: Option<Duration>) -> bool {
        true
    }

    fn name(&self) -> &str {
        "batch_size_recording"
    }
}

#[test]
fn test_batch_size_never_exceeds_configured_maximum() {
    const MAX_BATCH: usize = 16;

    let batch_sizes = Arc::new(Mutex::new(Vec::new()));
    let exporter = BatchSizeRecordingExporter {
        data: Arc::new(InMemorySpanData::new(100_000)),
        batch_sizes: Arc::clone(&batch_sizes),
    };
    let data = Arc::clone(&exporter.data);

    let processor = BatchSpanProcessor::new(
        Box::new(exporter),
        BatchConfig::default()
            .with_max_queue_size(256)
            .with_max_export_batch_size(MAX_BATCH)
            .with_schedule_delay(Duration::from_millis(20)),
    );

    for seq in 0..500 {
        processor.on_end(ended_span(0, seq));
        if seq % 100 == 99 {
            thread::sleep(Duration::from_millis(10));
        }
    }
    assert!(processor.shutdown(None));

    // No force_flush was issued, so every batch obeys the configured cap
    let sizes = batch_sizes.lock().unwrap();
    assert!(!sizes.is_empty());
    for &size in sizes.iter() {
        assert!(size <= MAX_BATCH, "batch of {} exceeds cap {}", size, MAX_BATCH);
    }
    assert_eq!(sizes.iter().sum::<usize>(), data.span_count());
}

#[test]
fn test_idle_schedule_cycles_are_harmless() {
    let exporter = InMemorySpanExporter::default();
    let data = exporter.data();
    let processor = BatchSpanProcessor::new(
        Box::new(exporter),
        BatchConfig::default().with_schedule_delay(Duration::from_millis(20)),
    );

    // Several schedule intervals pass with nothing to export
    thread::sleep(Duration::from_millis(150));
    assert_eq!(data.span_count(), 0);

    // The worker is still responsive afterwards
    processor.on_end(ended_span(0, 1));
    assert!(processor.force_flush(None));
    assert_eq!(data.span_count(), 1);
    assert!(processor.shutdown(None));
}

/// Counts shutdown calls to observe idempotence across racing callers.
struct ShutdownCountingExporter {
    inner: InMemorySpanExporter,
    shutdown_calls: Arc<AtomicUsize>,
}

impl SpanExporter for ShutdownCountingExporter {
    fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        self.inner.export(batch)
    }

    fn shutdown(&self, timeout: Option<Duration>) -> bool {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown(timeout)
    }

    fn name(&self) -> &str {
        "shutdown_counting"
    }
}

#[test]
fn test_concurrent_shutdown_calls_exporter_once() {
    let shutdown_calls = Arc::new(AtomicUsize::new(0));
    let exporter = ShutdownCountingExporter {
        inner: InMemorySpanExporter::default(),
        shutdown_calls: Arc::clone(&shutdown_calls),
    };
    let processor = Arc::new(BatchSpanProcessor::new(
        Box::new(exporter),
        BatchConfig::default()
            .with_max_queue_size(8)
            .with_max_export_batch_size(4),
    ));

    for seq in 0..6 {
        processor.on_end(ended_span(0, seq));
    }

    let mut handles = Vec::new();
    for _ in 0..2 {
        let processor = Arc::clone(&processor);
        handles.push(thread::spawn(move || processor.shutdown(None)));
    }
    for handle in handles {
        assert!(handle.join().unwrap());
    }

    assert_eq!(shutdown_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_conservation_across_concurrent_producers() {
    const PRODUCERS: usize = 4;
    const SPANS_PER_PRODUCER: u64 = 5_000;

    let exporter = InMemorySpanExporter::new(100_000);
    let data = exporter.data();
    let processor = Arc::new(BatchSpanProcessor::new(
        Box::new(exporter),
        BatchConfig::default()
            .with_max_queue_size(256)
            .with_max_export_batch_size(64)
            .with_schedule_delay(Duration::from_millis(20)),
    ));

    let mut handles = Vec::new();
    for producer_id in 0..PRODUCERS {
        let processor = Arc::clone(&processor);
        handles.push(thread::spawn(move || {
            for seq in 0..SPANS_PER_PRODUCER {
                processor.on_end(ended_span(producer_id, seq));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(processor.shutdown(None));

    // Every submitted span was either delivered or dropped, exactly once.
    let submitted = PRODUCERS as u64 * SPANS_PER_PRODUCER;
    let metrics = processor.buffer_metrics();
    assert_eq!(metrics.records_enqueued + metrics.records_dropped, submitted);
    assert_eq!(metrics.records_consumed, metrics.records_enqueued);
    assert_eq!(data.span_count() as u64, metrics.records_consumed);

    // Per-producer submission order survives batching.
    let mut last_seen = vec![None::<u64>; PRODUCERS];
    for span in data.get_spans() {
        let producer_id = (span.span_id >> 48) as usize;
        let seq = span.span_id & 0xFFFF_FFFF_FFFF;
        if let Some(prev) = last_seen[producer_id] {
            assert!(
                seq > prev,
                "producer {} order violated: {} after {}",
                producer_id,
                seq,
                prev
            );
        }
        last_seen[producer_id] = Some(seq);
    }
}

#[cfg(feature = "async-export")]
mod async_export {
    use super::*;
    use span_batcher::ExportCallback;

    /// Async exporter whose first callback is deferred by a background
    /// thread, holding its export slot for the duration.
    struct StallingExporter {
        data: Arc<InMemorySpanData>,
        stall: Duration,
        stalled_once: AtomicUsize,
    }

    impl StallingExporter {
        fn new(stall: Duration) -> (Self, Arc<InMemorySpanData>) {
            let data = Arc::new(InMemorySpanData::new(1000));
            (
                Self {
                    data: Arc::clone(&data),
                    stall,
                    stalled_once: AtomicUsize::new(0),
                },
                data,
            )
        }
    }

    impl SpanExporter for StallingExporter {
        fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
            for span in batch {
                self.data.add(span);
            }
            Ok(())
        }

        fn export_async(&self, batch: SpanBatch, done: ExportCallback) {
            let first = self.stalled_once.fetch_add(1, Ordering::SeqCst) == 0;
            if first {
                let data = Arc::clone(&self.data);
                let stall = self.stall;
                thread::spawn(move || {
                    thread::sleep(stall);
                    for span in batch {
                        data.add(span);
                    }
                    done(Ok(()));
                });
            } else {
                done(self.export(batch));
            }
        }

        fn shutdown(&self, _timeout: Option<Duration>) -> bool {
            true
        }

        fn name(&self) -> &str {
            "stalling"
        }
    }

    #[test]
    fn test_slot_pool_saturation_does_not_deadlock() {
        let (exporter, data) = StallingExporter::new(Duration::from_secs(2));
        let processor = BatchSpanProcessor::new(
            Box::new(exporter),
            BatchConfig::default()
                .with_max_queue_size(8)
                .with_max_export_batch_size(2)
                .with_schedule_delay(Duration::from_secs(5))
                .with_export_async(true)
                .with_max_export_async(1),
        );

        let start = Instant::now();
        for seq in 0..3 {
            processor.on_end(ended_span(0, seq));
        }

        // The second batch has to wait for the stalled callback to return
        // the only slot; everything still lands without deadlocking.
        assert!(processor.shutdown(None));
        assert_eq!(data.span_count(), 3);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
