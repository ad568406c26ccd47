// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! Backends that record interactions and inject failures.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tally_core::{Snapshot, StorageError, StorageResult};
use tally_store::DurableBackend;

// =============================================================================
// RecordingBackend
// =============================================================================

/// A backend that keeps every stored snapshot.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    initial: Option<Snapshot>,
    history: Mutex<Vec<Snapshot>>,
    store_delay: Duration,
    store_calls: AtomicU64,
    load_calls: AtomicU64,
}

impl RecordingBackend {
    /// Creates an empty backend whose `load` reports NotFound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend whose `load` returns `snapshot`.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            initial: Some(snapshot),
            ..Self::default()
        }
    }

    /// Makes every store take `delay` before completing.
    pub fn with_store_delay(mut self, delay: Duration) -> Self {
        self.store_delay = delay;
        self
    }

    /// Returns every stored snapshot, oldest first.
    pub fn history(&self) -> Vec<Snapshot> {
        self.history.lock().clone()
    }

    /// Returns the most recently stored snapshot.
    pub fn last_stored(&self) -> Option<Snapshot> {
        self.history.lock().last().cloned()
    }

    /// Number of completed stores.
    pub fn store_count(&self) -> u64 {
        self.store_calls.load(Ordering::SeqCst)
    }

    /// Number of load calls.
    pub fn load_count(&self) -> u64 {
        self.load_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableBackend for RecordingBackend {
    async fn load(&self) -> StorageResult<Snapshot> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let latest = self.history.lock().last().cloned();
        latest
            .or_else(|| self.initial.clone())
            .ok_or_else(|| StorageError::not_found("recording"))
    }

    async fn store(&self, snapshot: &Snapshot) -> StorageResult<()> {
        if !self.store_delay.is_zero() {
            tokio::time::sleep(self.store_delay).await;
        }
        self.history.lock().push(snapshot.clone());
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// =============================================================================
// FlakyBackend
// =============================================================================

/// A backend whose stores fail a configurable number of times.
#[derive(Debug)]
pub struct FlakyBackend {
    inner: RecordingBackend,
    failures_left: AtomicU32,
    failed_calls: AtomicU64,
    make_error: fn() -> StorageError,
}

impl FlakyBackend {
    /// Fails the next `failures` stores with a transient connection error.
    pub fn failing(failures: u32) -> Self {
        Self::failing_with(failures, || StorageError::connection("connection reset"))
    }

    /// Fails the next `failures` stores with the given error.
    pub fn failing_with(failures: u32, make_error: fn() -> StorageError) -> Self {
        Self {
            inner: RecordingBackend::new(),
            failures_left: AtomicU32::new(failures),
            failed_calls: AtomicU64::new(0),
            make_error,
        }
    }

    /// Fails every store from now on.
    pub fn fail_always(&self) {
        self.failures_left.store(u32::MAX, Ordering::SeqCst);
    }

    /// Lets every store succeed from now on.
    pub fn heal(&self) {
        self.failures_left.store(0, Ordering::SeqCst);
    }

    /// Number of stores that failed.
    pub fn failed_count(&self) -> u64 {
        self.failed_calls.load(Ordering::SeqCst)
    }

    /// The backend that receives successful stores.
    pub fn recorded(&self) -> &RecordingBackend {
        &self.inner
    }
}

#[async_trait]
impl DurableBackend for FlakyBackend {
    async fn load(&self) -> StorageResult<Snapshot> {
        self.inner.load().await
    }

    async fn store(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                if left == 0 {
                    None
                } else if left == u32::MAX {
                    Some(left)
                } else {
                    Some(left - 1)
                }
            })
            .is_ok();

        if should_fail {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            return Err((self.make_error)());
        }
        self.inner.store(snapshot).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

// =============================================================================
// FailureInjector
// =============================================================================

/// Counts calls and fails the first `n` of them.
///
/// Used inside unit-of-work closures to simulate a database that is briefly
/// unreachable.
#[derive(Debug, Default)]
pub struct FailureInjector {
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl FailureInjector {
    /// Fails the first `failures` calls.
    pub fn new(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    /// Records a call; returns `err` while failures remain.
    pub fn check(&self, err: impl FnOnce() -> StorageError) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            Err(err())
        } else {
            Ok(())
        }
    }

    /// Number of calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
