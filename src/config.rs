/// Configuration for a [`Ring`](crate::Ring).
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Number of slots in the ring (default: 2048)
    pub capacity: usize,
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
}

impl Config {
    /// Creates a new configuration with custom settings.
    ///
    /// Capacity does not need to be a power of two; slot indices are taken
    /// modulo `capacity` from unbounded 64-bit sequence counters.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0, or greater than 2^24 slots to prevent
    /// excessive memory usage.
    pub const fn new(capacity: usize, enable_metrics: bool) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        assert!(capacity <= 1 << 24, "capacity must be at most 16M slots");

        Self {
            capacity,
            enable_metrics,
        }
    }

    /// Returns the capacity of the ring buffer.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 2048,
            enable_metrics: false,
        }
    }
}
