// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Registry Workload Harness
//!
//! Drives a shared [`MetricRegistry`] from many writer tasks while an
//! optional observer samples exports, so suites can assert on both the
//! final state and every snapshot seen along the way.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{MetricRegistry, Snapshot};

/// One update applied by a writer: `(registry, writer index, step)`.
pub type WriteStep = Arc<dyn Fn(&MetricRegistry, usize, usize) + Send + Sync>;

/// Outcome of a workload run.
#[derive(Debug, Default)]
pub struct WorkloadReport {
    /// Exports taken while writers were active.
    pub samples: Vec<Snapshot>,
    /// Export taken after every writer finished.
    pub final_snapshot: Snapshot,
}

impl WorkloadReport {
    /// Value of a counter in a snapshot, zero when absent.
    pub fn counter_in(snapshot: &Snapshot, name: &str) -> i64 {
        snapshot
            .counters
            .iter()
            .find(|c| c.name == name)
            .map_or(0, |c| c.value)
    }
}

/// Concurrent writers against one registry.
pub struct RegistryWorkload {
    registry: Arc<MetricRegistry>,
    writers: usize,
    steps: usize,
    samples: usize,
    deadline: Duration,
}

impl RegistryWorkload {
    /// `writers` tasks, each running `steps` updates.
    pub fn new(registry: Arc<MetricRegistry>, writers: usize, steps: usize) -> Self {
        Self {
            registry,
            writers,
            steps,
            samples: 0,
            deadline: Duration::from_secs(10),
        }
    }

    /// Takes `count` exports concurrently with the writers.
    pub fn sample_exports(mut self, count: usize) -> Self {
        self.samples = count;
        self
    }

    /// Fails the run if it has not finished within `deadline`.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Runs the workload. Panics if a task panics or the deadline passes.
    pub async fn run(self, step: WriteStep) -> WorkloadReport {
        let mut writers = Vec::with_capacity(self.writers);
        for writer in 0..self.writers {
            let registry = Arc::clone(&self.registry);
            let step = Arc::clone(&step);
            let steps = self.steps;
            writers.push(tokio::spawn(async move {
                for n in 0..steps {
                    step(&registry, writer, n);
                    if n % 64 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }

        let observer = {
            let registry = Arc::clone(&self.registry);
            let count = self.samples;
            tokio::spawn(async move {
                let mut samples = Vec::with_capacity(count);
                for _ in 0..count {
                    samples.push(registry.export());
                    tokio::task::yield_now().await;
                }
                samples
            })
        };

        let joined = tokio::time::timeout(self.deadline, async move {
            for writer in writers {
                writer.await.expect("writer task panicked");
            }
            observer.await.expect("observer task panicked")
        })
        .await;

        let samples = joined.unwrap_or_else(|_| panic!("workload exceeded {:?}", self.deadline));
        WorkloadReport {
            samples,
            final_snapshot: self.registry.export(),
        }
    }
}
