// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core metric types.
//!
//! - [`Gauge`]: named `f64`, last write wins
//! - [`Counter`]: named `i64`, accumulates
//! - [`Snapshot`]: every gauge and counter at one instant; the unit of
//!   transfer between the registry and a durable backend

use serde::{Deserialize, Serialize};

/// Snapshot document version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

// =============================================================================
// Gauge / Counter
// =============================================================================

/// A named floating-point metric whose value is replaced on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    /// Metric name, unique among gauges.
    pub name: String,
    /// Current value.
    pub value: f64,
}

impl Gauge {
    /// Creates a new gauge record.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A named signed-integer metric whose value accumulates across updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Metric name, unique among counters.
    pub name: String,
    /// Accumulated value.
    pub value: i64,
}

impl Counter {
    /// Creates a new counter record.
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// A point-in-time copy of all gauges and counters.
///
/// Produced by [`MetricRegistry::export`](crate::registry::MetricRegistry::export)
/// and consumed by
/// [`MetricRegistry::replace_all`](crate::registry::MetricRegistry::replace_all).
/// Importing a snapshot replaces the registry contents; it never merges.
///
/// Serialized form:
///
/// ```json
/// {
///   "version": 1,
///   "gauges": [{ "name": "Temp", "value": 36.6 }],
///   "counters": [{ "name": "PollCount", "value": 3 }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Document version. Files written before versioning default to 1.
    #[serde(default = "default_version")]
    pub version: u32,

    /// All gauges.
    #[serde(default)]
    pub gauges: Vec<Gauge>,

    /// All counters.
    #[serde(default)]
    pub counters: Vec<Counter>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Snapshot {
    /// Creates a snapshot from gauge and counter lists.
    pub fn new(gauges: Vec<Gauge>, counters: Vec<Counter>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            gauges,
            counters,
        }
    }

    /// Creates a snapshot with no metrics.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Returns the total number of metrics.
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    /// Returns `true` if the snapshot holds no metrics.
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Returns a copy with both collections sorted by name.
    ///
    /// Useful for comparing snapshots whose source made no ordering promise.
    pub fn sorted(mut self) -> Self {
        self.gauges.sort_by(|a, b| a.name.cmp(&b.name));
        self.counters.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }

    /// Returns the name of the first metric that appears twice in the same
    /// collection, if any.
    pub fn find_duplicate(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        for gauge in &self.gauges {
            if !seen.insert(gauge.name.as_str()) {
                return Some(&gauge.name);
            }
        }

        seen.clear();
        for counter in &self.counters {
            if !seen.insert(counter.name.as_str()) {
                return Some(&counter.name);
            }
        }

        None
    }

    /// Returns the name of the first gauge whose value is NaN or infinite.
    pub fn find_non_finite_gauge(&self) -> Option<&str> {
        self.gauges
            .iter()
            .find(|g| !g.value.is_finite())
            .map(|g| g.name.as_str())
    }

    /// Renders the snapshot as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_without_version_defaults_to_current() {
        let json = r#"{"gauges":[{"name":"Alloc","value":1.5}],"counters":[]}"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();

        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.gauges, vec![Gauge::new("Alloc", 1.5)]);
        assert!(snapshot.counters.is_empty());
    }

    #[test]
    fn test_snapshot_len() {
        let snapshot = Snapshot::new(
            vec![Gauge::new("a", 1.0), Gauge::new("b", 2.0)],
            vec![Counter::new("c", 3)],
        );
        assert_eq!(snapshot.len(), 3);
        assert!(!snapshot.is_empty());
        assert!(Snapshot::empty().is_empty());
    }

    #[test]
    fn test_find_duplicate() {
        let snapshot = Snapshot::new(
            vec![Gauge::new("a", 1.0)],
            vec![Counter::new("x", 1), Counter::new("x", 2)],
        );
        assert_eq!(snapshot.find_duplicate(), Some("x"));

        // The same name as a gauge and a counter is not a duplicate
        let snapshot = Snapshot::new(vec![Gauge::new("a", 1.0)], vec![Counter::new("a", 1)]);
        assert_eq!(snapshot.find_duplicate(), None);
    }

    #[test]
    fn test_find_non_finite_gauge() {
        let snapshot = Snapshot::new(
            vec![Gauge::new("ok", 1.0), Gauge::new("bad", f64::NAN)],
            Vec::new(),
        );
        assert_eq!(snapshot.find_non_finite_gauge(), Some("bad"));
    }

    #[test]
    fn test_sorted() {
        let snapshot = Snapshot::new(
            vec![Gauge::new("b", 2.0), Gauge::new("a", 1.0)],
            vec![Counter::new("z", 1), Counter::new("y", 2)],
        )
        .sorted();

        assert_eq!(snapshot.gauges[0].name, "a");
        assert_eq!(snapshot.counters[0].name, "y");
    }
}
