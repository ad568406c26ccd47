// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Concurrency-safe in-memory metric registry.
//!
//! The registry owns two independent name-keyed collections, gauges and
//! counters, behind a single `parking_lot::RwLock`. Reads (`get_*`, `list_*`,
//! `export`) share the lock; writes (`set_gauge`, `update_counter`,
//! `replace_all`) take it exclusively, so every operation is linearizable
//! with respect to every other on the same instance.
//!
//! The lock is only held for the map access itself. It is released before a
//! change signal is sent and is never held across a durable-store call.
//!
//! # Change Signal
//!
//! A single subscriber (the persistence coordinator in debounced mode) can
//! ask to be woken after mutations with [`MetricRegistry::subscribe`]. The
//! signal travels over a capacity-one channel using `try_send`, so a burst of
//! mutations while a wakeup is already pending collapses into that one
//! pending wakeup and writers never wait on persistence. The signal carries
//! no data; the subscriber always re-reads state with
//! [`MetricRegistry::export`].
//!
//! # Example
//!
//! ```
//! use tally_core::registry::MetricRegistry;
//!
//! let registry = MetricRegistry::new();
//! registry.set_gauge("Temp", 36.6);
//! for _ in 0..3 {
//!     registry.update_counter("PollCount", 1).unwrap();
//! }
//!
//! assert_eq!(registry.get_counter("PollCount"), Some(3));
//! assert_eq!(registry.get_gauge("Temp"), Some(36.6));
//! ```

use std::collections::BTreeMap;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::counter::accumulate;
use crate::error::OverflowError;
use crate::types::{Counter, Gauge, Snapshot};

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct Metrics {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
    /// Bumped on every successful mutation.
    generation: u64,
}

impl Metrics {
    fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.gauges
                .iter()
                .map(|(name, value)| Gauge::new(name.clone(), *value))
                .collect(),
            self.counters
                .iter()
                .map(|(name, value)| Counter::new(name.clone(), *value))
                .collect(),
        )
    }
}

// =============================================================================
// MetricRegistry
// =============================================================================

/// In-memory store of named gauges and counters.
///
/// Share it between request handlers and the persistence coordinator with
/// an `Arc<MetricRegistry>`.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: RwLock<Metrics>,
    changes: Mutex<Option<mpsc::Sender<()>>>,
}

impl MetricRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let registry = Self::new();
        registry.replace_all(snapshot);
        registry
    }

    // -------------------------------------------------------------------------
    // Gauges
    // -------------------------------------------------------------------------

    /// Sets a gauge, replacing any previous value.
    pub fn set_gauge(&self, name: impl Into<String>, value: f64) {
        {
            let mut metrics = self.metrics.write();
            metrics.gauges.insert(name.into(), value);
            metrics.generation += 1;
        }
        self.notify();
    }

    /// Returns the current value of a gauge.
    pub fn get_gauge(&self, name: &str) -> Option<f64> {
        self.metrics.read().gauges.get(name).copied()
    }

    /// Returns every gauge, ordered by name.
    pub fn list_gauges(&self) -> Vec<Gauge> {
        self.metrics
            .read()
            .gauges
            .iter()
            .map(|(name, value)| Gauge::new(name.clone(), *value))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    /// Adds `delta` to a counter (starting from zero if absent) and returns
    /// the new value.
    ///
    /// On overflow the stored value is left exactly as it was.
    pub fn update_counter(&self, name: &str, delta: i64) -> Result<i64, OverflowError> {
        let updated = {
            let mut metrics = self.metrics.write();
            let current = metrics.counters.get(name).copied().unwrap_or(0);
            let updated = accumulate(current, delta)?;
            metrics.counters.insert(name.to_string(), updated);
            metrics.generation += 1;
            updated
        };
        self.notify();
        Ok(updated)
    }

    /// Returns the current value of a counter.
    pub fn get_counter(&self, name: &str) -> Option<i64> {
        self.metrics.read().counters.get(name).copied()
    }

    /// Returns every counter, ordered by name.
    pub fn list_counters(&self) -> Vec<Counter> {
        self.metrics
            .read()
            .counters
            .iter()
            .map(|(name, value)| Counter::new(name.clone(), *value))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Bulk operations
    // -------------------------------------------------------------------------

    /// Discards all gauges and counters and installs the snapshot's contents.
    ///
    /// If a name appears more than once in a collection, the last entry wins.
    pub fn replace_all(&self, snapshot: Snapshot) {
        let gauges = snapshot
            .gauges
            .into_iter()
            .map(|g| (g.name, g.value))
            .collect();
        let counters = snapshot
            .counters
            .into_iter()
            .map(|c| (c.name, c.value))
            .collect();

        {
            let mut metrics = self.metrics.write();
            metrics.gauges = gauges;
            metrics.counters = counters;
            metrics.generation += 1;
        }
        self.notify();
    }

    /// Captures every gauge and counter under one read of the lock.
    pub fn export(&self) -> Snapshot {
        self.metrics.read().snapshot()
    }

    /// Like [`export`](Self::export), also returning the mutation generation
    /// the snapshot reflects.
    pub fn export_with_generation(&self) -> (Snapshot, u64) {
        let metrics = self.metrics.read();
        (metrics.snapshot(), metrics.generation)
    }

    /// Returns the number of successful mutations so far.
    pub fn generation(&self) -> u64 {
        self.metrics.read().generation
    }

    /// Returns the total number of metrics held.
    pub fn len(&self) -> usize {
        let metrics = self.metrics.read();
        metrics.gauges.len() + metrics.counters.len()
    }

    /// Returns `true` if the registry holds no metrics.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -------------------------------------------------------------------------
    // Change signal
    // -------------------------------------------------------------------------

    /// Registers the single change subscriber and returns its receiver.
    ///
    /// A previous subscriber, if any, stops receiving signals.
    pub fn subscribe(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        *self.changes.lock() = Some(tx);
        rx
    }

    /// Detaches the change subscriber.
    pub fn unsubscribe(&self) {
        self.changes.lock().take();
    }

    fn notify(&self) {
        if let Some(tx) = self.changes.lock().as_ref() {
            // Full means a wakeup is already pending; closed means nobody
            // is listening any more. Neither is the writer's concern.
            let _ = tx.try_send(());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_gauge_last_write_wins() {
        let registry = MetricRegistry::new();
        registry.set_gauge("Alloc", 1.0);
        registry.set_gauge("Alloc", 2.5);
        registry.set_gauge("Alloc", -3.25);

        assert_eq!(registry.get_gauge("Alloc"), Some(-3.25));
        assert_eq!(registry.list_gauges().len(), 1);
    }

    #[test]
    fn test_missing_metrics() {
        let registry = MetricRegistry::new();
        assert_eq!(registry.get_gauge("nope"), None);
        assert_eq!(registry.get_counter("nope"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_counter_accumulates() {
        let registry = MetricRegistry::new();
        let deltas = [5, -2, 10, 0, 7];
        for delta in deltas {
            registry.update_counter("hits", delta).unwrap();
        }

        assert_eq!(registry.get_counter("hits"), Some(deltas.iter().sum::<i64>()));
    }

    #[test]
    fn test_update_counter_returns_new_value() {
        let registry = MetricRegistry::new();
        assert_eq!(registry.update_counter("c", 4), Ok(4));
        assert_eq!(registry.update_counter("c", 6), Ok(10));
    }

    #[test]
    fn test_update_counter_overflow_leaves_value_unchanged() {
        let registry = MetricRegistry::new();
        registry.update_counter("big", i64::MAX - 1).unwrap();
        let generation = registry.generation();

        let err = registry.update_counter("big", 2).unwrap_err();
        assert_eq!(err, OverflowError::new(i64::MAX - 1, 2));
        assert_eq!(registry.get_counter("big"), Some(i64::MAX - 1));
        assert_eq!(registry.generation(), generation);

        registry.update_counter("small", i64::MIN).unwrap();
        assert!(registry.update_counter("small", -1).is_err());
        assert_eq!(registry.get_counter("small"), Some(i64::MIN));
    }

    #[test]
    fn test_replace_all_resets_counters() {
        let registry = MetricRegistry::new();
        registry.update_counter("c", i64::MAX).unwrap();
        registry.replace_all(Snapshot::empty());

        // Starting from zero cannot overflow with a single delta
        assert_eq!(registry.update_counter("c", i64::MIN), Ok(i64::MIN));
    }

    #[test]
    fn test_export_then_replace_all_is_idempotent() {
        let registry = MetricRegistry::new();
        registry.set_gauge("g1", 1.5);
        registry.set_gauge("g2", 0.0);
        registry.update_counter("c1", 42).unwrap();

        let gauges_before = registry.list_gauges();
        let counters_before = registry.list_counters();

        registry.replace_all(registry.export());

        assert_eq!(registry.list_gauges(), gauges_before);
        assert_eq!(registry.list_counters(), counters_before);
    }

    #[test]
    fn test_replace_all_discards_existing() {
        let registry = MetricRegistry::new();
        registry.set_gauge("old", 1.0);
        registry.update_counter("old", 1).unwrap();

        registry.replace_all(Snapshot::new(
            vec![Gauge::new("new", 2.0)],
            vec![Counter::new("fresh", 9)],
        ));

        assert_eq!(registry.get_gauge("old"), None);
        assert_eq!(registry.get_counter("old"), None);
        assert_eq!(registry.get_gauge("new"), Some(2.0));
        assert_eq!(registry.get_counter("fresh"), Some(9));
    }

    #[test]
    fn test_poll_count_scenario() {
        let registry = MetricRegistry::new();
        for _ in 0..3 {
            registry.update_counter("PollCount", 1).unwrap();
        }
        registry.set_gauge("Temp", 36.6);

        let snapshot = registry.export();
        assert_eq!(snapshot.counters, vec![Counter::new("PollCount", 3)]);
        assert_eq!(snapshot.gauges, vec![Gauge::new("Temp", 36.6)]);
    }

    #[test]
    fn test_generation_tracks_mutations() {
        let registry = MetricRegistry::new();
        assert_eq!(registry.generation(), 0);

        registry.set_gauge("g", 1.0);
        registry.update_counter("c", 1).unwrap();
        let (snapshot, generation) = registry.export_with_generation();

        assert_eq!(generation, 2);
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_change_signal_coalesces() {
        let registry = MetricRegistry::new();
        let mut rx = registry.subscribe();

        for i in 0..10 {
            registry.set_gauge("g", i as f64);
        }

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_signal_without_mutation() {
        let registry = MetricRegistry::new();
        registry.update_counter("c", i64::MAX).unwrap();
        let mut rx = registry.subscribe();

        assert!(registry.update_counter("c", 1).is_err());
        let _ = registry.get_counter("c");
        let _ = registry.export();

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_stops_signals() {
        let registry = MetricRegistry::new();
        let mut rx = registry.subscribe();
        registry.unsubscribe();

        registry.set_gauge("g", 1.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_counter_updates() {
        let registry = Arc::new(MetricRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.update_counter("shared", 1).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.get_counter("shared"), Some(8000));
    }
}
