// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The durable backend abstraction.
//!
//! A backend holds exactly one logical value: the last snapshot that was
//! successfully stored. There is no history. Implementations are selected at
//! construction time from configuration and used through
//! `Arc<dyn DurableBackend>`.
//!
//! # Example
//!
//! ```rust,ignore
//! use tally_store::{DurableBackend, FileSnapshotBackend};
//!
//! let backend = FileSnapshotBackend::new("/tmp/metrics-db.json");
//!
//! match backend.load().await {
//!     Ok(snapshot) => registry.replace_all(snapshot),
//!     Err(e) if e.is_not_found() => {} // first run
//!     Err(e) => return Err(e.into()),
//! }
//!
//! backend.store(&registry.export()).await?;
//! ```

use std::fmt::Debug;

use async_trait::async_trait;

use tally_core::error::{StorageError, StorageResult};
use tally_core::types::Snapshot;

// =============================================================================
// DurableBackend Trait
// =============================================================================

/// Persistent storage for registry snapshots.
///
/// # Contract
///
/// - `store` fully replaces whatever was stored before. A failed `store`
///   leaves the previously stored snapshot readable.
/// - `load` returns the last successfully stored snapshot, or
///   [`StorageError::NotFound`] when nothing was ever stored. A missing or
///   unreadable store is never reported as an empty snapshot.
#[async_trait]
pub trait DurableBackend: Send + Sync + Debug {
    /// Loads the last persisted snapshot.
    ///
    /// # Returns
    ///
    /// - `Ok(snapshot)` with the stored state
    /// - `Err(StorageError::NotFound)` if no prior state exists
    /// - `Err(StorageError::Corrupted)` if the stored state cannot be decoded
    /// - other `StorageError` variants for I/O or database failures
    async fn load(&self) -> StorageResult<Snapshot>;

    /// Durably persists `snapshot`, replacing the previous state.
    async fn store(&self, snapshot: &Snapshot) -> StorageResult<()>;

    /// Returns the name of this backend for logging.
    fn name(&self) -> &str;

    /// Releases backend resources and aborts pending retries.
    ///
    /// The default implementation does nothing.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Maps a failed blocking task to a storage error.
pub(crate) fn blocking_task_failed(e: tokio::task::JoinError) -> StorageError {
    StorageError::database(format!("Blocking task failed: {}", e))
}
