// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory backend for testing.
//!
//! Holds the last stored snapshot in a `parking_lot::RwLock`. Nothing
//! survives the process, so it is only useful for tests and dry runs.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use tally_core::error::{StorageError, StorageResult};
use tally_core::types::Snapshot;

use crate::backend::DurableBackend;

/// A volatile backend that keeps the last stored snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshot: RwLock<Option<Snapshot>>,
    store_count: AtomicU64,
    load_count: AtomicU64,
}

impl MemoryBackend {
    /// Creates an empty backend. `load` reports `NotFound` until the first
    /// `store`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that already holds `snapshot`.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Returns a copy of the stored snapshot, if any.
    pub fn stored(&self) -> Option<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Returns how many times `store` succeeded.
    pub fn store_count(&self) -> u64 {
        self.store_count.load(Ordering::Relaxed)
    }

    /// Returns how many times `load` was called.
    pub fn load_count(&self) -> u64 {
        self.load_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DurableBackend for MemoryBackend {
    async fn load(&self) -> StorageResult<Snapshot> {
        self.load_count.fetch_add(1, Ordering::Relaxed);
        self.snapshot
            .read()
            .clone()
            .ok_or_else(|| StorageError::not_found("memory"))
    }

    async fn store(&self, snapshot: &Snapshot) -> StorageResult<()> {
        *self.snapshot.write() = Some(snapshot.clone());
        self.store_count.fetch_add(1, Ordering::Relaxed);
        debug!(metrics = snapshot.len(), "Snapshot stored in memory");
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
