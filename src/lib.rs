//! SlotRing - Lock-Free Multi-Producer Single-Consumer Ring of Owned Records
//!
//! A bounded MPSC ring buffer where each slot holds an atomically swappable
//! owned record. Producers hand records over without ever blocking (the ring
//! drops on overflow), and a single consumer drains them in batches.
//!
//! Built as the buffering core of a span export pipeline: span producers
//! are application threads on the hot path, the consumer is a background
//! worker that ships batches to an exporter.
//!
//! # Key Features
//!
//! - Non-blocking `add` with drop-on-full overflow policy
//! - Batch consumption API (single tail update for N records)
//! - Unbounded 64-bit sequence counters (no ABA, no index wrap bugs)
//! - 128-byte alignment of hot counters (prefetcher false sharing elimination)
//!
//! # Example
//!
//! ```
//! use slotring::{Config, Ring};
//!
//! let ring = Ring::<u64>::new(Config::new(8, false));
//!
//! // Producers move owned records in
//! assert!(ring.add(Box::new(42)));
//! assert!(ring.add(Box::new(43)));
//!
//! // The single consumer takes them back out in batches
//! let mut received = Vec::new();
//! let consumed = ring.consume(16, |record| received.push(*record));
//! assert_eq!(consumed, 2);
//! assert_eq!(received, vec![42, 43]);
//! ```

mod backoff;
mod config;
mod invariants;
mod metrics;
mod ring;

pub use backoff::Backoff;
pub use config::Config;
pub use metrics::{Metrics, MetricsSnapshot};
pub use ring::Ring;
