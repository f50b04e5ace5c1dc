use crate::invariants::{
    debug_assert_bounded_occupancy, debug_assert_monotonic, debug_assert_slot_published,
    debug_assert_tail_not_past_head,
};
use crate::{Backoff, Config, Metrics};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// This MPSC ring buffer holds one owned record per slot and coordinates any
// number of producers with a single consumer:
//
// ## Sequence Numbers (ABA Prevention)
//
// `head` and `tail` are unbounded u64 sequence numbers, not wrapped indices.
// - With 2^64 possible values, wrap-around is practically impossible
// - Slot index is computed as `sequence % capacity` only when accessing slots
// - Two positions that alias the same slot are still distinct sequences
//
// ## Slot Protocol
//
// Each slot is an `AtomicPtr<T>`: null means empty, non-null is a uniquely
// owned record (a `Box<T>` turned into a raw pointer).
//
// **Producer (add):**
// 1. Load `tail` with Acquire, `head` with Relaxed; full if head - tail >= capacity
// 2. Claim the slot at `head % capacity` by compare-exchanging null -> record
//    (Release publishes the record to the consumer)
// 3. Publish the claim by compare-exchanging `head` -> head + 1 with Release.
//    On a (spurious) failure, take the record back out of the slot and retry.
//
// **Consumer (consume):**
// 1. Load `tail` with Relaxed (only the consumer writes tail)
// 2. Load `head` with Acquire: synchronizes with every producer's head CAS in
//    the release sequence, so all slots in [tail, head) hold published records
// 3. Swap each slot back to null, taking exclusive ownership of the record
// 4. Store `tail` with Release once the whole range is owned (publishes the
//    freed slots back to producers)
//
// ## Single-Consumer Invariant
//
// Exactly one thread may call `consume` at a time. Producers never touch
// slots in [tail, head): a producer targets `head % capacity`, and the full
// check guarantees that index is outside the occupied range even against a
// stale `tail` (a stale tail only makes the producer more conservative).
//
// =============================================================================

/// Bounded MPSC ring buffer of owned records - the core building block.
///
/// Producers hand records over with a non-blocking [`add`](Ring::add) that
/// drops on overflow; the single consumer takes them back out in batches
/// with [`consume`](Ring::consume). Optimized with:
/// - 128-byte alignment of the head/tail counters to prevent false sharing
/// - Batch consumption (single tail update for N records)
/// - Adaptive backoff under producer contention
pub struct Ring<T> {
    // === PRODUCER HOT === (128-byte aligned)
    /// Next free sequence (written by producers, read by consumer)
    head: CacheAligned<AtomicU64>,

    // === CONSUMER HOT === (128-byte aligned)
    /// Next occupied sequence (written by consumer, read by producers)
    tail: CacheAligned<AtomicU64>,

    // === COLD STATE ===
    /// Thread-safe metrics (uses atomics internally)
    metrics: Metrics,
    config: Config,

    /// The slot array. `Box<[_]>` rather than `Vec<_>` because the size is
    /// fixed at construction and never changes.
    slots: Box<[AtomicPtr<T>]>,
}

// Safety: Ring owns its records and hands them across threads by value;
// the slot protocol above makes concurrent access sound for any T: Send.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Creates a new ring buffer with the given configuration.
    pub fn new(config: Config) -> Self {
        let capacity = config.capacity();

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || AtomicPtr::new(ptr::null_mut()));

        Self {
            head: CacheAligned::new(AtomicU64::new(0)),
            tail: CacheAligned::new(AtomicU64::new(0)),
            metrics: Metrics::new(),
            config,
            slots: slots.into_boxed_slice(),
        }
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    /// Returns the ring buffer capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// Returns the approximate number of records in the ring.
    ///
    /// May lag under concurrent production; exact only when quiescent.
    #[inline]
    pub fn size(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail) as usize
    }

    /// Returns true if `head == tail` at the observation point.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == self.tail.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Transfers ownership of `record` into the next free slot.
    ///
    /// Returns `true` on success. Returns `false` if the ring is full, in
    /// which case the record is dropped - producers are never blocked.
    ///
    /// Any number of threads may call this concurrently.
    pub fn add(&self, record: Box<T>) -> bool {
        let mut raw = Box::into_raw(record);
        let mut backoff = Backoff::new();

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Relaxed);

            // A stale tail only over-counts occupancy, so this check can
            // refuse a record spuriously but never admit one into an
            // occupied slot.
            if head.wrapping_sub(tail) as usize >= self.capacity() {
                // SAFETY: `raw` came from Box::into_raw above and was never
                // published into a slot, so we still own it exclusively.
                drop(unsafe { Box::from_raw(raw) });
                if self.config.enable_metrics {
                    self.metrics.add_dropped(1);
                }
                return false;
            }

            let slot = &self.slots[(head % self.capacity() as u64) as usize];

            // Claim the slot: null -> our record. A non-null slot means
            // another producer is mid-claim on the same sequence; retry.
            if slot
                .compare_exchange(ptr::null_mut(), raw, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                // Publish the claim. The CAS fails if this view of head was
                // stale (the ring went a full lap between the head load and
                // the slot claim) or spuriously from the weak variant.
                if self
                    .head
                    .compare_exchange_weak(
                        head,
                        head.wrapping_add(1),
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    if self.config.enable_metrics {
                        self.metrics.add_enqueued(1);
                    }
                    return true;
                }

                // Take the record back out of the slot and try again.
                raw = slot.swap(ptr::null_mut(), Ordering::Acquire);
            }

            backoff.spin();
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Takes up to `max_records` records out of the ring, in enqueue order,
    /// with a single tail update.
    ///
    /// The visitor receives ownership of each record; the slot is left
    /// empty. Wrap-around is handled by modular indexing, so a batch may
    /// cross the end of the slot array transparently. Returns the number of
    /// records consumed.
    ///
    /// Only one thread may consume. The tail is published only after the
    /// visitor owns every record in the range, so a racing `add` can never
    /// observe a half-consumed slot.
    pub fn consume<F>(&self, max_records: usize, mut visitor: F) -> usize
    where
        F: FnMut(Box<T>),
    {
        if max_records == 0 {
            return 0;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        // The consumer's tail is exact, so occupancy is bounded here even
        // though producers may see it stale.
        let avail = head.wrapping_sub(tail) as usize;
        debug_assert_bounded_occupancy!(avail, self.capacity());
        if avail == 0 {
            return 0;
        }

        let count = avail.min(max_records);
        let mut seq = tail;

        for _ in 0..count {
            let slot = &self.slots[(seq % self.capacity() as u64) as usize];
            let raw = slot.swap(ptr::null_mut(), Ordering::Acquire);
            debug_assert_slot_published!(raw, seq);

            // SAFETY: slots in [tail, head) hold pointers created by
            // Box::into_raw in `add` and published before the head counter;
            // the swap above took exclusive ownership and left the slot
            // empty for reuse.
            visitor(unsafe { Box::from_raw(raw) });
            seq = seq.wrapping_add(1);
        }

        debug_assert_tail_not_past_head!(seq, head);
        debug_assert_monotonic!("tail", tail, seq);

        // Single atomic update for the entire batch
        self.tail.store(seq, Ordering::Release);

        if self.config.enable_metrics {
            self.metrics.add_consumed(count as u64);
            self.metrics.add_batches(1);
        }

        count
    }

    /// Get a snapshot of metrics if enabled.
    pub fn metrics(&self) -> crate::MetricsSnapshot {
        if self.config.enable_metrics {
            self.metrics.snapshot()
        } else {
            crate::MetricsSnapshot::default()
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Release any records still sitting in slots. `&mut self` means no
        // producer or consumer is active, so plain loads are sufficient.
        for slot in self.slots.iter_mut() {
            let raw = *slot.get_mut();
            if !raw.is_null() {
                // SAFETY: a non-null slot holds a pointer from Box::into_raw
                // that was never taken back out.
                drop(unsafe { Box::from_raw(raw) });
            }
        }
    }
}

impl<T> std::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}

// ---------------------------------------------------------------------
// HELPER: 128-byte cache-aligned wrapper
// ---------------------------------------------------------------------

/// Wrapper type that ensures 128-byte alignment to prevent prefetcher-induced
/// false sharing on Intel/AMD CPUs (which may prefetch adjacent cache lines).
#[repr(align(128))]
struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
