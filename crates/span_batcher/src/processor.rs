//! Batching span processor.
//!
//! Decouples the hot path of span completion from the expensive work of
//! shipping batches to an exporter: producers enqueue finished spans into a
//! bounded lock-free ring and a dedicated worker thread drains it in
//! size-limited batches, on a schedule or on a preemptive wakeup.

use crate::exporter::{SpanBatch, SpanExporter};
use crate::span::{SpanContext, SpanRecord};
use slotring::{Backoff, Ring};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(feature = "async-export")]
use std::collections::VecDeque;

/// Default maximum queue size.
const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;
/// Default delay interval between two consecutive exports.
const DEFAULT_SCHEDULE_DELAY: Duration = Duration::from_millis(5000);
/// Default maximum batch size, must be less than or equal to the queue size.
const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;
/// Default cap on in-flight asynchronous exports.
#[cfg(feature = "async-export")]
const DEFAULT_MAX_EXPORT_ASYNC: usize = 8;

/// Hooks invoked at span start and end.
///
/// `on_end` is called synchronously inside the span's end path, so
/// implementations must never block the calling thread.
pub trait SpanProcessor: Send + Sync {
    /// Returns an empty recordable for a producer to fill in.
    fn make_recordable(&self) -> Box<SpanRecord>;

    /// Called when a span is started.
    fn on_start(&self, span: &mut SpanRecord, ctx: &SpanContext);

    /// Called with the owned record of a span that just ended.
    fn on_end(&self, span: Box<SpanRecord>);

    /// Blocks until every record buffered at call time has been handed to
    /// the exporter, or until `timeout` expires. `None` waits indefinitely.
    /// Returns `true` iff the flush completed before the deadline.
    fn force_flush(&self, timeout: Option<Duration>) -> bool;

    /// Drains the buffer, stops the worker, and shuts down the exporter.
    /// Idempotent; afterwards `on_end` is a no-op and `force_flush`
    /// returns `false`.
    fn shutdown(&self, timeout: Option<Duration>) -> bool;
}

/// Batch processor configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Capacity of the span buffer. Once full, finished spans are dropped.
    /// The default is 2048.
    pub max_queue_size: usize,

    /// Maximum idle interval between two consecutive export cycles.
    /// The default is 5 seconds.
    pub schedule_delay: Duration,

    /// Upper bound on the size of one exported batch. Clamped to
    /// `max_queue_size`. The default is 512.
    pub max_export_batch_size: usize,

    /// Hand batches to the exporter's asynchronous entry point instead of
    /// the synchronous one. The default is `false`.
    #[cfg(feature = "async-export")]
    pub is_export_async: bool,

    /// Cap on in-flight asynchronous exporter calls. The default is 8.
    #[cfg(feature = "async-export")]
    pub max_export_async: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            schedule_delay: DEFAULT_SCHEDULE_DELAY,
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
            #[cfg(feature = "async-export")]
            is_export_async: false,
            #[cfg(feature = "async-export")]
            max_export_async: DEFAULT_MAX_EXPORT_ASYNC,
        }
    }
}

impl BatchConfig {
    /// Set the span buffer capacity.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set the maximum idle interval between export cycles.
    pub fn with_schedule_delay(mut self, schedule_delay: Duration) -> Self {
        self.schedule_delay = schedule_delay;
        self
    }

    /// Set the maximum batch size. Values above the queue size are clamped
    /// down when the processor is built.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Route batches through the exporter's asynchronous entry point.
    #[cfg(feature = "async-export")]
    pub fn with_export_async(mut self, is_export_async: bool) -> Self {
        self.is_export_async = is_export_async;
        self
    }

    /// Set the cap on in-flight asynchronous exports.
    #[cfg(feature = "async-export")]
    pub fn with_max_export_async(mut self, max_export_async: usize) -> Self {
        self.max_export_async = max_export_async;
        self
    }

    fn normalized(mut self) -> Self {
        if self.max_export_batch_size > self.max_queue_size {
            self.max_export_batch_size = self.max_queue_size;
        }
        #[cfg(feature = "async-export")]
        {
            self.max_export_async = self.max_export_async.max(1);
        }
        self
    }
}

/// Shared flags and condition variables coordinating producers, the worker
/// thread, force-flush callers, and shutdown.
///
/// Held in an `Arc` by the processor handle and the worker; asynchronous
/// export callbacks hold a `Weak` so a callback firing after the processor
/// is gone becomes a safe no-op.
struct SyncState {
    /// Monotonic shutdown flag (false -> true, never back).
    is_shutdown: AtomicBool,
    /// Tells the worker to skip the rest of its timed wait.
    is_force_wakeup: AtomicBool,
    /// A force-flush caller asked the worker to drain everything visible.
    is_force_flush_pending: AtomicBool,
    /// Handshake reply: the worker finished servicing the flush request.
    is_force_flush_notified: AtomicBool,

    /// The worker parks here between export cycles.
    worker_lock: Mutex<()>,
    worker_cv: Condvar,

    /// Force-flush callers park here until the worker replies.
    flush_lock: Mutex<()>,
    flush_cv: Condvar,
}

impl SyncState {
    fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            is_force_wakeup: AtomicBool::new(false),
            is_force_flush_pending: AtomicBool::new(false),
            is_force_flush_notified: AtomicBool::new(false),
            worker_lock: Mutex::new(()),
            worker_cv: Condvar::new(),
            flush_lock: Mutex::new(()),
            flush_cv: Condvar::new(),
        }
    }

    /// Reply to a force-flush caller.
    fn notify_flush_completion(&self) {
        self.is_force_flush_notified.store(true, Ordering::Release);
        self.flush_cv.notify_one();
    }
}

/// Bounded pool of tokens capping concurrent asynchronous exports.
///
/// Slot ids are dense small integers. The `in_use` parallel array makes a
/// double release idempotent, which keeps a misbehaving exporter that
/// invokes a callback twice from corrupting the pool.
#[cfg(feature = "async-export")]
struct ExportSlotPool {
    state: Mutex<SlotPoolState>,
    waker: Condvar,
    capacity: usize,
}

#[cfg(feature = "async-export")]
struct SlotPoolState {
    free: VecDeque<usize>,
    in_use: Vec<bool>,
}

#[cfg(feature = "async-export")]
impl ExportSlotPool {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SlotPoolState {
                free: (0..capacity).collect(),
                in_use: vec![false; capacity],
            }),
            waker: Condvar::new(),
            capacity,
        }
    }

    /// Take a slot id, waiting up to `timeout` for one to free up.
    fn acquire(&self, timeout: Duration) -> Option<usize> {
        let guard = self.state.lock().unwrap();
        let (mut state, _) = self
            .waker
            .wait_timeout_while(guard, timeout, |s| s.free.is_empty())
            .unwrap();

        let id = state.free.pop_front()?;
        state.in_use[id] = true;
        Some(id)
    }

    /// Return a slot id to the pool. Idempotent per id.
    fn release(&self, id: usize) {
        {
            let mut state = self.state.lock().unwrap();
            if state.in_use[id] {
                state.in_use[id] = false;
                state.free.push_back(id);
            }
        }
        self.waker.notify_all();
    }

    /// Block until every slot is free (all async exports completed), or
    /// until `timeout` expires.
    fn wait_all_free(&self, timeout: Option<Duration>) {
        let guard = self.state.lock().unwrap();
        match timeout {
            None => {
                let _ = self
                    .waker
                    .wait_while(guard, |s| s.free.len() < self.capacity)
                    .unwrap();
            }
            Some(duration) => {
                let _ = self
                    .waker
                    .wait_timeout_while(guard, duration, |s| s.free.len() < self.capacity)
                    .unwrap();
            }
        }
    }
}

/// The export-facing half of the processor, owned by the worker thread.
struct Worker {
    buffer: Arc<Ring<SpanRecord>>,
    exporter: Arc<dyn SpanExporter>,
    config: BatchConfig,
    sync: Arc<SyncState>,
    #[cfg(feature = "async-export")]
    slots: Arc<ExportSlotPool>,
}

impl Worker {
    fn run(self) {
        let mut timeout = self.config.schedule_delay;

        loop {
            {
                let guard = self.sync.worker_lock.lock().unwrap();
                // The predicate tolerates spurious wakeups and signals that
                // fire before the wait begins: waking is justified by either
                // the wakeup flag or visible buffered records.
                let _ = self
                    .sync
                    .worker_cv
                    .wait_timeout_while(guard, timeout, |_| {
                        !self.sync.is_force_wakeup.load(Ordering::Acquire)
                            && self.buffer.is_empty()
                    })
                    .unwrap();
            }
            self.sync.is_force_wakeup.store(false, Ordering::Release);

            if self.sync.is_shutdown.load(Ordering::Acquire) {
                self.drain();
                return;
            }

            let start = Instant::now();
            self.export_cycle();
            // Charge the time spent exporting against the next interval.
            timeout = self.config.schedule_delay.saturating_sub(start.elapsed());
        }
    }

    /// Repeatedly consume and export batches until an iteration finds no
    /// records.
    fn export_cycle(&self) {
        loop {
            let notify_flush = self
                .sync
                .is_force_flush_pending
                .swap(false, Ordering::AcqRel);

            // A flush drains everything currently visible; a scheduled
            // cycle takes at most one batch.
            let num_records = if notify_flush {
                self.buffer.size()
            } else {
                self.buffer.size().min(self.config.max_export_batch_size)
            };

            if num_records == 0 {
                if notify_flush {
                    self.sync.notify_flush_completion();
                }
                break;
            }

            let mut batch: SpanBatch = Vec::with_capacity(num_records);
            self.buffer.consume(num_records, |record| batch.push(record));

            self.dispatch(batch, notify_flush);
        }
    }

    fn dispatch(&self, batch: SpanBatch, notify_flush: bool) {
        #[cfg(feature = "async-export")]
        if self.config.is_export_async {
            self.dispatch_async(batch, notify_flush);
            return;
        }

        self.export_sync(batch, notify_flush);
    }

    fn export_sync(&self, batch: SpanBatch, notify_flush: bool) {
        let batch_size = batch.len();
        if let Err(err) = self.exporter.export(batch) {
            // The batch is consumed either way; retry policy belongs to
            // the exporter.
            tracing::warn!(
                exporter = self.exporter.name(),
                spans = batch_size,
                error = %err,
                "export failed, batch dropped"
            );
        }
        if notify_flush {
            self.sync.notify_flush_completion();
        }
    }

    #[cfg(feature = "async-export")]
    fn dispatch_async(&self, batch: SpanBatch, notify_flush: bool) {
        let Some(slot) = self.slots.acquire(self.config.schedule_delay) else {
            // Every concurrent export is still in flight. Records already
            // consumed from the buffer must not be dropped, so ship this
            // batch synchronously; only the waiting period is bounded.
            tracing::warn!(
                exporter = self.exporter.name(),
                "async export slots exhausted, exporting synchronously"
            );
            self.export_sync(batch, notify_flush);
            return;
        };

        let sync = Arc::downgrade(&self.sync);
        let slots = Arc::downgrade(&self.slots);

        self.exporter.export_async(
            batch,
            Box::new(move |result| {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "async export failed, batch dropped");
                }

                // A late callback may outlive the processor; both upgrades
                // failing means there is nothing left to notify.
                let (Some(sync), Some(slots)) = (sync.upgrade(), slots.upgrade()) else {
                    return;
                };

                slots.release(slot);
                if notify_flush {
                    sync.notify_flush_completion();
                }
            }),
        );
    }

    /// Shutdown-time loop: exits once the buffer is empty and no flush
    /// request is outstanding.
    fn drain(&self) {
        loop {
            if self.buffer.is_empty()
                && !self.sync.is_force_flush_pending.load(Ordering::Acquire)
            {
                break;
            }
            self.export_cycle();
        }
    }
}

/// A [`SpanProcessor`] that buffers finished spans and exports them in
/// batches from a dedicated worker thread.
///
/// Producers never block: [`on_end`](SpanProcessor::on_end) either enqueues
/// the record or drops it when the buffer is full. The worker wakes on a
/// schedule, on a half-full buffer, or on an explicit flush or shutdown.
///
/// # Example
///
/// ```
/// use span_batcher::{BatchConfig, BatchSpanProcessor, InMemorySpanExporter, SpanProcessor};
///
/// let exporter = InMemorySpanExporter::default();
/// let data = exporter.data();
/// let processor = BatchSpanProcessor::new(Box::new(exporter), BatchConfig::default());
///
/// let mut span = processor.make_recordable();
/// span.name = "request".to_string();
/// processor.on_end(span);
///
/// assert!(processor.force_flush(None));
/// assert_eq!(data.span_count(), 1);
/// assert!(processor.shutdown(None));
/// ```
pub struct BatchSpanProcessor {
    buffer: Arc<Ring<SpanRecord>>,
    exporter: Arc<dyn SpanExporter>,
    config: BatchConfig,
    sync: Arc<SyncState>,
    #[cfg(feature = "async-export")]
    slots: Arc<ExportSlotPool>,
    /// Also serializes concurrent `shutdown` callers.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchSpanProcessor {
    /// Creates the processor and starts its worker thread.
    ///
    /// # Panics
    ///
    /// Panics if `config.max_queue_size` is 0 or the worker thread cannot
    /// be spawned.
    pub fn new(exporter: Box<dyn SpanExporter>, config: BatchConfig) -> Self {
        let config = config.normalized();
        let exporter: Arc<dyn SpanExporter> = Arc::from(exporter);
        let buffer = Arc::new(Ring::new(slotring::Config::new(config.max_queue_size, true)));
        let sync = Arc::new(SyncState::new());
        #[cfg(feature = "async-export")]
        let slots = Arc::new(ExportSlotPool::new(config.max_export_async));

        let worker = Worker {
            buffer: Arc::clone(&buffer),
            exporter: Arc::clone(&exporter),
            config: config.clone(),
            sync: Arc::clone(&sync),
            #[cfg(feature = "async-export")]
            slots: Arc::clone(&slots),
        };
        let handle = thread::Builder::new()
            .name("span-batcher-worker".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn span batcher worker thread");

        Self {
            buffer,
            exporter,
            config,
            sync,
            #[cfg(feature = "async-export")]
            slots,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Number of records currently buffered. Approximate under load.
    pub fn buffered_spans(&self) -> usize {
        self.buffer.size()
    }

    /// Snapshot of buffer traffic counters (enqueued, dropped, consumed).
    pub fn buffer_metrics(&self) -> slotring::MetricsSnapshot {
        self.buffer.metrics()
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn make_recordable(&self) -> Box<SpanRecord> {
        self.exporter.make_recordable()
    }

    fn on_start(&self, _span: &mut SpanRecord, _ctx: &SpanContext) {
        // no-op
    }

    fn on_end(&self, span: Box<SpanRecord>) {
        if self.sync.is_shutdown.load(Ordering::Acquire) {
            return;
        }

        if !self.buffer.add(span) {
            return;
        }

        // Once the queue is half full (or holds a full batch) wake the
        // worker early instead of waiting out the schedule interval.
        let buffer_size = self.buffer.size();
        if buffer_size >= self.config.max_queue_size / 2
            || buffer_size >= self.config.max_export_batch_size
        {
            self.sync.worker_cv.notify_one();
        }
    }

    fn force_flush(&self, timeout: Option<Duration>) -> bool {
        let sync = &self.sync;
        if sync.is_shutdown.load(Ordering::Acquire) {
            return false;
        }

        let mut guard = sync.flush_lock.lock().unwrap();
        sync.is_force_flush_pending.store(true, Ordering::Release);

        let break_condition = || {
            if sync.is_shutdown.load(Ordering::Acquire) {
                return true;
            }
            // Re-arm the worker wakeup on every check: the request may
            // have landed after the worker entered its timed wait.
            if sync.is_force_flush_pending.load(Ordering::Acquire) {
                sync.is_force_wakeup.store(true, Ordering::Release);
                sync.worker_cv.notify_one();
            }
            sync.is_force_flush_notified.load(Ordering::Acquire)
        };

        let completed = match timeout {
            None => {
                // The notification can slip in between the pending check and
                // the park, so never sleep unboundedly on a single wait;
                // chunk by the schedule interval and re-check.
                loop {
                    let (g, wait) = sync
                        .flush_cv
                        .wait_timeout_while(guard, self.config.schedule_delay, |_| {
                            !break_condition()
                        })
                        .unwrap();
                    guard = g;
                    if !wait.timed_out() {
                        break;
                    }
                }
                true
            }
            Some(duration) => {
                let (g, wait) = sync
                    .flush_cv
                    .wait_timeout_while(guard, duration, |_| !break_condition())
                    .unwrap();
                guard = g;
                !wait.timed_out()
            }
        };

        // If the worker already claimed the request, it may not have set
        // the notified flag yet; close that window with a yielding spin.
        if !sync.is_force_flush_pending.swap(false, Ordering::AcqRel) {
            let mut backoff = Backoff::new();
            while !sync.is_force_flush_notified.load(Ordering::Acquire) {
                backoff.snooze();
            }
        }
        sync.is_force_flush_notified.store(false, Ordering::Release);
        drop(guard);

        completed
    }

    fn shutdown(&self, timeout: Option<Duration>) -> bool {
        let start = Instant::now();
        // Serializes concurrent shutdown callers; only the first finds a
        // worker handle to join.
        let mut worker = self.worker.lock().unwrap();
        let already_shutdown = self.sync.is_shutdown.swap(true, Ordering::AcqRel);

        if let Some(handle) = worker.take() {
            self.sync.is_force_wakeup.store(true, Ordering::Release);
            self.sync.worker_cv.notify_one();
            // The worker observes the shutdown flag after its current wait
            // and drains the buffer before exiting.
            if handle.join().is_err() {
                tracing::error!("span batcher worker thread panicked");
            }
        }

        #[cfg(feature = "async-export")]
        if self.config.is_export_async {
            self.slots
                .wait_all_free(remaining_timeout(timeout, start));
        }

        if !already_shutdown {
            return self.exporter.shutdown(remaining_timeout(timeout, start));
        }

        true
    }
}

impl Drop for BatchSpanProcessor {
    fn drop(&mut self) {
        if !self.sync.is_shutdown.load(Ordering::Acquire) {
            self.shutdown(None);
        }
    }
}

/// Subtract elapsed time from a bounded timeout, keeping at least one tick
/// so a bound never degenerates to a zero wait.
fn remaining_timeout(timeout: Option<Duration>, start: Instant) -> Option<Duration> {
    timeout.map(|t| {
        t.saturating_sub(start.elapsed())
            .max(Duration::from_micros(1))
    })
}
