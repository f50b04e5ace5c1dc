//! Debug assertion macros for ring buffer invariants.
//!
//! Only active in debug builds (`debug_assert!`), so there is zero
//! overhead in release builds.

/// Assert that occupancy does not exceed capacity.
///
/// Holds because producers check `head - tail < capacity` before claiming
/// a slot and the consumer only ever shrinks the occupied range.
macro_rules! debug_assert_bounded_occupancy {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "occupancy {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// Assert that the consumer does not advance past the published head.
macro_rules! debug_assert_tail_not_past_head {
    ($new_tail:expr, $head:expr) => {
        debug_assert!(
            $new_tail <= $head,
            "advancing tail {} beyond head {}",
            $new_tail,
            $head
        )
    };
}

/// Assert that a sequence counter only increases.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that a slot in `[tail, head)` holds a published record.
///
/// Producers publish the slot pointer before the head counter, so any
/// slot the consumer can see must be non-null.
macro_rules! debug_assert_slot_published {
    ($ptr:expr, $seq:expr) => {
        debug_assert!(
            !$ptr.is_null(),
            "empty slot at published sequence {}",
            $seq
        )
    };
}

pub(crate) use debug_assert_bounded_occupancy;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_slot_published;
pub(crate) use debug_assert_tail_not_past_head;
