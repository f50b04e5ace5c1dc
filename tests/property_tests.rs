//! Property-based tests for the ring buffer invariants.
//!
//! These use proptest to exercise the same guarantees the unit tests pin
//! down, across arbitrary operation sequences:
//! - occupancy never exceeds capacity
//! - records come out exactly once, in order, and none are invented
//! - drops happen only on overflow

use proptest::prelude::*;
use slotring::{Config, Ring};

proptest! {
    /// Occupancy stays within [0, capacity] after any add/consume sequence.
    #[test]
    fn prop_bounded_occupancy(
        capacity in 1usize..64,
        ops in prop::collection::vec(prop::bool::ANY, 1..200),
    ) {
        let ring = Ring::<u64>::new(Config::new(capacity, false));
        let mut next = 0u64;

        for write_op in ops {
            if write_op {
                ring.add(Box::new(next));
                next += 1;
            } else {
                ring.consume(1, |_| {});
            }
            prop_assert!(ring.size() <= capacity,
                "occupancy {} exceeds capacity {}", ring.size(), capacity);
        }
    }

    /// delivered + buffered + dropped == submitted, and delivery preserves
    /// submission order without duplication.
    #[test]
    fn prop_conservation_and_order(
        capacity in 1usize..64,
        writes in 0usize..200,
        consume_every in 1usize..16,
    ) {
        let ring = Ring::<u64>::new(Config::new(capacity, true));

        let mut delivered = Vec::new();
        for i in 0..writes {
            ring.add(Box::new(i as u64));
            if i % consume_every == 0 {
                ring.consume(capacity, |record| delivered.push(*record));
            }
        }
        ring.consume(usize::MAX, |record| delivered.push(*record));

        let metrics = ring.metrics();
        prop_assert_eq!(
            metrics.records_enqueued + metrics.records_dropped,
            writes as u64
        );
        prop_assert_eq!(metrics.records_consumed, delivered.len() as u64);
        prop_assert_eq!(
            metrics.records_consumed + ring.size() as u64,
            metrics.records_enqueued
        );

        // Exactly-once, in submission order: the delivered values are a
        // strictly increasing subsequence of 0..writes
        for window in delivered.windows(2) {
            prop_assert!(window[0] < window[1],
                "order violation: {} then {}", window[0], window[1]);
        }
        for &value in &delivered {
            prop_assert!(value < writes as u64);
        }
    }

    /// With no consumer, exactly `capacity` records are accepted and the
    /// rest are dropped.
    #[test]
    fn prop_overflow_drops_exactly(
        capacity in 1usize..64,
        submitted in 0usize..200,
    ) {
        let ring = Ring::<u64>::new(Config::new(capacity, true));

        for i in 0..submitted {
            ring.add(Box::new(i as u64));
        }

        let metrics = ring.metrics();
        let expected_accepted = submitted.min(capacity) as u64;
        prop_assert_eq!(metrics.records_enqueued, expected_accepted);
        prop_assert_eq!(metrics.records_dropped, submitted as u64 - expected_accepted);
    }

    /// `consume(n)` never takes more than n records, nor more than are
    /// buffered.
    #[test]
    fn prop_consume_respects_limit(
        capacity in 1usize..64,
        fill in 0usize..64,
        limit in 0usize..64,
    ) {
        let ring = Ring::<u64>::new(Config::new(capacity, false));

        let mut accepted = 0;
        for i in 0..fill.min(capacity) {
            if ring.add(Box::new(i as u64)) {
                accepted += 1;
            }
        }

        let consumed = ring.consume(limit, |_| {});
        prop_assert!(consumed <= limit);
        prop_assert!(consumed <= accepted);
        prop_assert_eq!(ring.size(), accepted - consumed);
    }
}
