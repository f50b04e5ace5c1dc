use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for monitoring ring traffic.
///
/// Uses atomic counters with `Relaxed` ordering since these are purely
/// statistical - no control flow depends on exact values, and eventual
/// visibility is acceptable for observability.
#[derive(Debug)]
pub struct Metrics {
    records_enqueued: AtomicU64,
    records_dropped: AtomicU64,
    records_consumed: AtomicU64,
    batches_consumed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            records_enqueued: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            records_consumed: AtomicU64::new(0),
            batches_consumed: AtomicU64::new(0),
        }
    }

    /// Increment enqueued counter.
    #[inline]
    pub fn add_enqueued(&self, n: u64) {
        self.records_enqueued.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment dropped counter (ring full).
    #[inline]
    pub fn add_dropped(&self, n: u64) {
        self.records_dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment consumed counter.
    #[inline]
    pub fn add_consumed(&self, n: u64) {
        self.records_consumed.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment consumed-batch counter.
    #[inline]
    pub fn add_batches(&self, n: u64) {
        self.batches_consumed.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a snapshot of current counter values.
    ///
    /// Returns a plain struct with `u64` values that can be copied and compared.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_enqueued: self.records_enqueued.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_consumed: self.records_consumed.load(Ordering::Relaxed),
            batches_consumed: self.batches_consumed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics values.
///
/// This is a plain data struct (Copy, Clone) for easy use in aggregation
/// and test assertions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub records_enqueued: u64,
    pub records_dropped: u64,
    pub records_consumed: u64,
    pub batches_consumed: u64,
}
