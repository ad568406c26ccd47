// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built snapshots and configuration documents.

use tally_core::{Counter, Gauge, Snapshot};

// =============================================================================
// Snapshot Fixtures
// =============================================================================

/// Fixture providing snapshots.
pub struct SnapshotFixtures;

impl SnapshotFixtures {
    /// The snapshot produced by three `PollCount` increments and one `Temp` reading.
    pub fn poll_scenario() -> Snapshot {
        Snapshot::new(
            vec![Gauge::new("Temp", 36.6)],
            vec![Counter::new("PollCount", 3)],
        )
    }

    /// Runtime-style gauges plus a poll counter.
    pub fn runtime_stats() -> Snapshot {
        Snapshot::new(
            vec![
                Gauge::new("Alloc", 2_621_440.0),
                Gauge::new("HeapInuse", 4_128_768.0),
                Gauge::new("NumGC", 12.0),
                Gauge::new("RandomValue", 0.734_218_5),
            ],
            vec![Counter::new("PollCount", 42)],
        )
    }

    /// Counters at the edges of the signed 64-bit range.
    pub fn extreme_values() -> Snapshot {
        Snapshot::new(
            vec![Gauge::new("Tiny", f64::MIN_POSITIVE), Gauge::new("Huge", f64::MAX)],
            vec![Counter::new("Max", i64::MAX), Counter::new("Min", i64::MIN)],
        )
    }

    /// A snapshot with `count` gauges and `count` counters.
    pub fn batch(count: usize) -> Snapshot {
        Snapshot::new(
            (0..count)
                .map(|i| Gauge::new(format!("gauge-{:04}", i), i as f64 * 0.5))
                .collect(),
            (0..count)
                .map(|i| Counter::new(format!("counter-{:04}", i), i as i64))
                .collect(),
        )
    }
}

// =============================================================================
// Config Fixtures
// =============================================================================

/// Fixture providing configuration documents.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A YAML document selecting the file backend at `path`.
    pub fn file_yaml(path: &str, store_interval_secs: u64) -> String {
        format!(
            r#"
storage:
  store_interval_secs: {store_interval_secs}
  restore: true
  backend:
    kind: file
    path: {path}
logging:
  level: debug
"#
        )
    }

    /// A TOML document selecting the sqlite backend.
    pub fn sqlite_toml(dsn: &str) -> String {
        format!(
            r#"
[storage]
store_interval_secs = 0
restore_failure = "abort"
flush_timeout_ms = 5000

[storage.backend]
kind = "sqlite"
dsn = "{dsn}"
busy_timeout_ms = 250

[storage.retry]
kind = "exponential"
max_retries = 4
initial_delay_ms = 100
max_delay_ms = 2000
"#
        )
    }
}
