// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Persistence Coordinator.
//!
//! This module provides the `PersistenceCoordinator` which keeps a
//! [`MetricRegistry`] durable through a [`DurableBackend`]:
//!
//! - **Restore**: on start, optionally loads the last snapshot into the registry
//! - **Interval Mode**: flushes on a fixed period (`store_interval > 0`)
//! - **Debounced Mode**: flushes right after mutations, coalescing bursts
//!   (`store_interval == 0`)
//! - **Final Flush**: always flushes once more on stop
//! - **Metrics**: flush attempts, outcomes and timings
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                   PersistenceCoordinator                      │
//! │                                                               │
//! │  ┌──────────────┐  change   ┌──────────────┐  store   ┌─────┐  │
//! │  │MetricRegistry│──signal──▶│  Flush Loop  │────────▶│ DB/ │  │
//! │  │  (RwLock)    │◀─export───│ (one task)   │         │file │  │
//! │  └──────────────┘           └──────┬───────┘         └─────┘  │
//! │                                    │                          │
//! │                      interval tick │ cancellation token       │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop never takes values from the change signal. It always re-reads
//! the registry with `export`, so a coalesced signal can delay a flush but
//! never lose a mutation.
//!
//! # Lifecycle
//!
//! `Idle` → `Restoring` → `Running` → `Stopped`
//!
//! # Example
//!
//! ```rust,ignore
//! use tally_store::{CoordinatorConfig, FileSnapshotBackend, PersistenceCoordinator};
//!
//! let registry = Arc::new(MetricRegistry::new());
//! let backend = Arc::new(FileSnapshotBackend::new("/tmp/metrics-db.json"));
//!
//! let coordinator = PersistenceCoordinator::new(
//!     registry.clone(),
//!     backend,
//!     CoordinatorConfig::default(),
//! );
//!
//! coordinator.start().await?;
//! registry.update_counter("PollCount", 1)?;
//!
//! // Final flush happens here.
//! coordinator.stop().await?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tally_core::error::{StorageError, StorageResult};
use tally_core::registry::MetricRegistry;

use crate::backend::DurableBackend;

// =============================================================================
// Configuration
// =============================================================================

/// How the coordinator reacts when restoring at startup fails.
///
/// A missing snapshot is a first run, not a failure, and always starts
/// empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreFailurePolicy {
    /// Log the error and serve with an empty registry.
    #[default]
    StartEmpty,
    /// Fail `start` with the load error.
    Abort,
}

/// When the background task flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush on every tick of a fixed period.
    Interval(Duration),
    /// Flush as soon as possible after mutations.
    Debounced,
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushMode::Interval(period) => write!(f, "interval ({}s)", period.as_secs_f64()),
            FlushMode::Debounced => write!(f, "debounced"),
        }
    }
}

/// Configuration for the persistence coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Period between flushes. Zero selects debounced mode.
    pub store_interval: Duration,

    /// Whether to load the stored snapshot on start.
    pub restore: bool,

    /// Reaction to a failed restore.
    pub restore_failure: RestoreFailurePolicy,

    /// Upper bound for a single flush, retries included.
    pub flush_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            store_interval: Duration::from_secs(300),
            restore: true,
            restore_failure: RestoreFailurePolicy::StartEmpty,
            flush_timeout: Duration::from_secs(10),
        }
    }
}

impl CoordinatorConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Creates a configuration for testing.
    pub fn for_testing() -> Self {
        Self {
            store_interval: Duration::ZERO,
            restore: true,
            restore_failure: RestoreFailurePolicy::StartEmpty,
            flush_timeout: Duration::from_secs(1),
        }
    }

    /// Returns the flush mode selected by `store_interval`.
    pub fn flush_mode(&self) -> FlushMode {
        if self.store_interval.is_zero() {
            FlushMode::Debounced
        } else {
            FlushMode::Interval(self.store_interval)
        }
    }
}

/// Builder for CoordinatorConfig.
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorConfigBuilder {
    /// Sets the store interval (zero for debounced mode).
    pub fn store_interval(mut self, interval: Duration) -> Self {
        self.config.store_interval = interval;
        self
    }

    /// Enables or disables restore on start.
    pub fn restore(mut self, restore: bool) -> Self {
        self.config.restore = restore;
        self
    }

    /// Sets the restore failure policy.
    pub fn restore_failure(mut self, policy: RestoreFailurePolicy) -> Self {
        self.config.restore_failure = policy;
        self
    }

    /// Sets the flush timeout.
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.config.flush_timeout = timeout;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> CoordinatorConfig {
        self.config
    }
}

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Constructed, not started.
    Idle,
    /// Starting up; loads the stored snapshot when restore is enabled.
    Restoring,
    /// The flush loop is active.
    Running,
    /// The final flush has completed.
    Stopped,
}

impl CoordinatorState {
    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Restoring => "restoring",
            CoordinatorState::Running => "running",
            CoordinatorState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Coordinator Metrics
// =============================================================================

/// Metrics for the persistence coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorMetrics {
    /// Current lifecycle state.
    pub state: CoordinatorState,
    /// Flushes handed to the backend.
    pub flush_attempts: u64,
    /// Successful flushes.
    pub flush_successes: u64,
    /// Failed or timed out flushes.
    pub flush_failures: u64,
    /// Flushes skipped because nothing changed.
    pub flush_skipped: u64,
    /// Average successful flush duration (microseconds).
    pub avg_flush_duration_us: u64,
    /// Duration of the most recent successful flush (microseconds).
    pub last_flush_duration_us: u64,
    /// Time of the most recent successful flush.
    pub last_flush_time: Option<DateTime<Utc>>,
    /// Gauges installed by the restore.
    pub restored_gauges: u64,
    /// Counters installed by the restore.
    pub restored_counters: u64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    flush_attempts: AtomicU64,
    flush_successes: AtomicU64,
    flush_failures: AtomicU64,
    flush_skipped: AtomicU64,
    total_flush_duration_us: AtomicU64,
    last_flush_duration_us: AtomicU64,
    last_flush_time: RwLock<Option<DateTime<Utc>>>,
    restored_gauges: AtomicU64,
    restored_counters: AtomicU64,
}

impl MetricsInner {
    fn record_flush_attempt(&self) {
        self.flush_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_flush_success(&self, duration_us: u64) {
        self.flush_successes.fetch_add(1, Ordering::Relaxed);
        self.total_flush_duration_us
            .fetch_add(duration_us, Ordering::Relaxed);
        self.last_flush_duration_us
            .store(duration_us, Ordering::Relaxed);
        *self.last_flush_time.write() = Some(Utc::now());
    }

    fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_flush_skipped(&self) {
        self.flush_skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_restore(&self, gauges: usize, counters: usize) {
        self.restored_gauges.store(gauges as u64, Ordering::Relaxed);
        self.restored_counters
            .store(counters as u64, Ordering::Relaxed);
    }

    fn snapshot(&self, state: CoordinatorState) -> CoordinatorMetrics {
        let flush_successes = self.flush_successes.load(Ordering::Relaxed);
        let total_duration = self.total_flush_duration_us.load(Ordering::Relaxed);
        let avg_duration = if flush_successes > 0 {
            total_duration / flush_successes
        } else {
            0
        };

        CoordinatorMetrics {
            state,
            flush_attempts: self.flush_attempts.load(Ordering::Relaxed),
            flush_successes,
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            flush_skipped: self.flush_skipped.load(Ordering::Relaxed),
            avg_flush_duration_us: avg_duration,
            last_flush_duration_us: self.last_flush_duration_us.load(Ordering::Relaxed),
            last_flush_time: *self.last_flush_time.read(),
            restored_gauges: self.restored_gauges.load(Ordering::Relaxed),
            restored_counters: self.restored_counters.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the coordinator handle and its background task.
struct Shared {
    registry: Arc<MetricRegistry>,
    backend: Arc<dyn DurableBackend>,
    config: CoordinatorConfig,
    metrics: MetricsInner,
    state: RwLock<CoordinatorState>,
    /// Registry generation covered by the last successful flush.
    flushed_generation: Mutex<Option<u64>>,
    /// Serializes flushes so at most one is in flight.
    flush_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    fn set_state(&self, state: CoordinatorState) {
        *self.state.write() = state;
    }

    /// Moves to `to` only if the state is still `from`.
    ///
    /// Returns the current state when it is not.
    fn transition(
        &self,
        from: CoordinatorState,
        to: CoordinatorState,
    ) -> Result<(), CoordinatorState> {
        let mut state = self.state.write();
        if *state != from {
            return Err(*state);
        }
        *state = to;
        Ok(())
    }

    /// Loads the stored snapshot into the registry.
    async fn restore(&self) -> StorageResult<()> {
        match self.backend.load().await {
            Ok(snapshot) => {
                let gauges = snapshot.gauges.len();
                let counters = snapshot.counters.len();

                self.registry.replace_all(snapshot);
                self.metrics.record_restore(gauges, counters);
                *self.flushed_generation.lock() = Some(self.registry.generation());

                info!(
                    backend = self.backend.name(),
                    gauges = gauges,
                    counters = counters,
                    "Registry restored"
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!(
                    backend = self.backend.name(),
                    "No stored snapshot, starting with an empty registry"
                );
                Ok(())
            }
            Err(e) => match self.config.restore_failure {
                RestoreFailurePolicy::StartEmpty => {
                    error!(
                        backend = self.backend.name(),
                        error = %e,
                        error_type = e.error_type(),
                        "Restore failed, starting with an empty registry"
                    );
                    Ok(())
                }
                RestoreFailurePolicy::Abort => {
                    error!(
                        backend = self.backend.name(),
                        error = %e,
                        error_type = e.error_type(),
                        "Restore failed, aborting start"
                    );
                    Err(e)
                }
            },
        }
    }

    /// Exports the registry and stores it.
    ///
    /// Unless `force` is set the flush is skipped when the registry has not
    /// changed since the last successful flush.
    async fn flush(&self, force: bool) -> StorageResult<()> {
        let _guard = self.flush_lock.lock().await;

        let (snapshot, generation) = self.registry.export_with_generation();
        if !force && *self.flushed_generation.lock() == Some(generation) {
            self.metrics.record_flush_skipped();
            return Ok(());
        }

        self.metrics.record_flush_attempt();
        let start_time = Instant::now();

        let timeout = self.config.flush_timeout;
        let result = match tokio::time::timeout(timeout, self.backend.store(&snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::timeout(timeout)),
        };

        let duration_us = start_time.elapsed().as_micros() as u64;

        match result {
            Ok(()) => {
                self.metrics.record_flush_success(duration_us);
                *self.flushed_generation.lock() = Some(generation);

                debug!(
                    backend = self.backend.name(),
                    metrics = snapshot.len(),
                    generation = generation,
                    duration_ms = duration_us / 1000,
                    "Flush completed"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.record_flush_failure();

                warn!(
                    backend = self.backend.name(),
                    error = %e,
                    error_type = e.error_type(),
                    "Flush failed, registry remains authoritative"
                );
                Err(e)
            }
        }
    }
}

/// What wakes the flush loop.
enum Trigger {
    Tick(Duration),
    Changes(mpsc::Receiver<()>),
}

// =============================================================================
// Persistence Coordinator
// =============================================================================

/// Keeps a metric registry durable across restarts.
///
/// The coordinator never mutates the registry except through
/// [`MetricRegistry::replace_all`] during restore. Flush failures are
/// logged and do not stop the loop; the next tick or change retries.
pub struct PersistenceCoordinator {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<StorageResult<()>>>>,
}

impl PersistenceCoordinator {
    /// Creates a coordinator in the `Idle` state.
    pub fn new(
        registry: Arc<MetricRegistry>,
        backend: Arc<dyn DurableBackend>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                backend,
                config,
                metrics: MetricsInner::default(),
                state: RwLock::new(CoordinatorState::Idle),
                flushed_generation: Mutex::new(None),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Restores the registry (if enabled) and starts the flush loop.
    ///
    /// # Returns
    ///
    /// - `Ok(())` once the loop is running
    /// - `Err(StorageError)` only if restore failed under
    ///   [`RestoreFailurePolicy::Abort`]; the coordinator is then `Stopped`
    ///
    /// Only the first of several concurrent calls starts anything; the
    /// others return `Ok(())` at once.
    pub async fn start(&self) -> StorageResult<()> {
        let shared = &self.shared;

        if let Err(state) = shared.transition(CoordinatorState::Idle, CoordinatorState::Restoring) {
            warn!(state = %state, "Coordinator already started");
            return Ok(());
        }

        if shared.config.restore {
            if let Err(e) = shared.restore().await {
                shared.set_state(CoordinatorState::Stopped);
                return Err(e);
            }
        }

        // Held until the handle is stored so `stop` sees either no loop and
        // a state it can overwrite, or the running loop.
        let mut task = self.task.lock();
        if let Err(state) = shared.transition(CoordinatorState::Restoring, CoordinatorState::Running)
        {
            info!(state = %state, "Coordinator stopped while starting, flush loop not started");
            return Ok(());
        }

        let mode = shared.config.flush_mode();
        let trigger = match mode {
            FlushMode::Interval(period) => Trigger::Tick(period),
            FlushMode::Debounced => Trigger::Changes(shared.registry.subscribe()),
        };

        info!(
            backend = shared.backend.name(),
            mode = %mode,
            flush_timeout_ms = shared.config.flush_timeout.as_millis() as u64,
            "Persistence coordinator started"
        );

        *task = Some(tokio::spawn(Self::run(
            shared.clone(),
            trigger,
            self.cancel.clone(),
        )));

        Ok(())
    }

    /// The background flush loop.
    async fn run(
        shared: Arc<Shared>,
        trigger: Trigger,
        cancel: CancellationToken,
    ) -> StorageResult<()> {
        match trigger {
            Trigger::Tick(period) => match tokio::time::Instant::now().checked_add(period) {
                Some(start) => {
                    let mut interval = tokio::time::interval_at(start, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = interval.tick() => {
                                let _ = shared.flush(false).await;
                            }
                        }
                    }
                }
                None => {
                    warn!(
                        interval_secs = period.as_secs(),
                        "Store interval cannot be scheduled, flushing only on stop"
                    );
                    cancel.cancelled().await;
                }
            },
            Trigger::Changes(mut changes) => loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    signal = changes.recv() => match signal {
                        Some(()) => {
                            let _ = shared.flush(false).await;
                        }
                        None => {
                            // Another subscriber replaced us; wait for stop.
                            cancel.cancelled().await;
                            break;
                        }
                    },
                }
            },
        }

        info!("Persistence coordinator shutting down, performing final flush");
        shared.flush(true).await
    }

    /// Stops the flush loop after one final flush.
    ///
    /// Returns the result of the final flush. Calling `stop` on a
    /// coordinator that never started marks it `Stopped` without flushing.
    ///
    /// If the flush loop died, the coordinator still ends `Stopped` and the
    /// final flush runs here instead.
    pub async fn stop(&self) -> StorageResult<()> {
        let handle = {
            let mut task = self.task.lock();
            match task.take() {
                Some(handle) => handle,
                None => {
                    self.shared.set_state(CoordinatorState::Stopped);
                    return Ok(());
                }
            }
        };

        self.cancel.cancel();
        let joined = handle.await;

        self.shared.registry.unsubscribe();
        self.shared.set_state(CoordinatorState::Stopped);

        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Flush loop failed, performing final flush from stop");
                self.shared.flush(true).await
            }
        };

        let metrics = self.metrics();
        info!(
            flush_successes = metrics.flush_successes,
            flush_failures = metrics.flush_failures,
            final_flush_ok = result.is_ok(),
            "Persistence coordinator stopped"
        );

        result
    }

    /// Exports and stores the registry now, even if nothing changed.
    ///
    /// Waits for any in-flight flush to finish first.
    pub async fn flush_now(&self) -> StorageResult<()> {
        self.shared.flush(true).await
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> CoordinatorState {
        *self.shared.state.read()
    }

    /// Returns the coordinator metrics.
    pub fn metrics(&self) -> CoordinatorMetrics {
        self.shared.metrics.snapshot(self.state())
    }

    /// Returns the flush mode.
    pub fn flush_mode(&self) -> FlushMode {
        self.shared.config.flush_mode()
    }

    /// Returns the registry being persisted.
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.shared.registry
    }

    /// Returns the backend in use.
    pub fn backend(&self) -> &Arc<dyn DurableBackend> {
        &self.shared.backend
    }
}

impl Drop for PersistenceCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for PersistenceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceCoordinator")
            .field("state", &self.state())
            .field("mode", &self.flush_mode())
            .field("backend", &self.shared.backend.name())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
