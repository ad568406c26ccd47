// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tally-core
//!
//! In-memory metric state and shared types for the tally metrics store.
//!
//! This crate provides the foundational pieces used by every other tally
//! component:
//!
//! - **Types**: `Gauge`, `Counter` and the `Snapshot` transfer unit
//! - **Counter**: overflow-checked counter accumulation
//! - **Registry**: the concurrency-safe `MetricRegistry`
//! - **Error**: overflow and storage error taxonomy
//! - **Retry**: retry strategies for durable backends
//!
//! Nothing in this crate logs; failures are returned as typed errors.
//!
//! ## Example
//!
//! ```
//! use tally_core::{Counter, Gauge, MetricRegistry};
//!
//! let registry = MetricRegistry::new();
//! for _ in 0..3 {
//!     registry.update_counter("PollCount", 1).unwrap();
//! }
//! registry.set_gauge("Temp", 36.6);
//!
//! let snapshot = registry.export();
//! assert_eq!(snapshot.counters, vec![Counter::new("PollCount", 3)]);
//! assert_eq!(snapshot.gauges, vec![Gauge::new("Temp", 36.6)]);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod counter;
pub mod error;
pub mod registry;
pub mod retry;
pub mod types;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use counter::accumulate;
pub use error::{OverflowError, StorageError, StorageResult, TallyError};
pub use registry::MetricRegistry;
pub use retry::{
    ExponentialBackoff, FixedSchedule, NoRetry, RetryConfig, RetryDecision, RetryStrategy,
    MAX_SCHEDULE_LEN,
};
pub use types::{Counter, Gauge, Snapshot, SNAPSHOT_VERSION};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
