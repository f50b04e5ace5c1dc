//! # Batching Span Export Pipeline Demo
//!
//! End-to-end demonstration of the batch span processor: several producer
//! threads finish spans concurrently while the worker thread ships batches
//! to an exporter, followed by an explicit flush and a graceful shutdown.
//!
//! ## Running
//!
//! ```bash
//! # Quiet mode (counts only)
//! cargo run -p span_batcher --bin demo --release
//!
//! # Verbose mode (print every exported span)
//! cargo run -p span_batcher --bin demo --release -- --verbose
//! ```

use span_batcher::{
    AttributeValue, BatchConfig, BatchSpanProcessor, SpanKind, SpanProcessor, SpanRecord,
    SpanStatus, StdoutExporter,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PRODUCERS: usize = 4;
const SPANS_PER_PRODUCER: u64 = 250;

fn main() {
    let verbose = std::env::args().any(|arg| arg == "--verbose");

    let processor = Arc::new(BatchSpanProcessor::new(
        Box::new(StdoutExporter::new(verbose)),
        BatchConfig::default()
            .with_max_queue_size(1024)
            .with_max_export_batch_size(128)
            .with_schedule_delay(Duration::from_millis(200)),
    ));

    println!(
        "Submitting {} spans from {} producer threads...",
        PRODUCERS as u64 * SPANS_PER_PRODUCER,
        PRODUCERS
    );

    let start = Instant::now();
    let mut handles = Vec::new();
    for producer_id in 0..PRODUCERS {
        let processor = Arc::clone(&processor);
        handles.push(std::thread::spawn(move || {
            for seq in 0..SPANS_PER_PRODUCER {
                let mut span = SpanRecord::new(
                    producer_id as u128 + 1,
                    ((producer_id as u64) << 48) | seq,
                    0,
                    format!("operation-{}", seq % 8),
                    SpanKind::Server,
                );
                span.set_attribute(
                    "service.name".to_string(),
                    AttributeValue::String(format!("demo-service-{}", producer_id)),
                );
                span.finish(if seq % 10 == 9 {
                    SpanStatus::Error
                } else {
                    SpanStatus::Ok
                });
                processor.on_end(Box::new(span));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let flushed = processor.force_flush(Some(Duration::from_secs(5)));
    println!("force_flush completed: {}", flushed);

    let metrics = processor.buffer_metrics();
    println!(
        "Buffer traffic: {} enqueued, {} dropped, {} consumed in {} batches",
        metrics.records_enqueued,
        metrics.records_dropped,
        metrics.records_consumed,
        metrics.batches_consumed
    );

    let ok = processor.shutdown(Some(Duration::from_secs(5)));
    println!("shutdown completed: {} (took {:?} total)", ok, start.elapsed());
}
