// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Single-file JSON snapshot backend.
//!
//! The snapshot is written to a temporary file next to the target, flushed
//! to disk, and then atomically renamed over the target path. A reader of
//! the target path therefore only ever sees a complete previous snapshot or
//! a complete new one.
//!
//! The write is split into two steps, [`FileSnapshotBackend::stage`] and
//! [`StagedSnapshot::commit`]; `store` simply runs both. Dropping a staged
//! snapshot without committing removes its temporary file and leaves the
//! target untouched.
//!
//! Every `store` takes a sequence number when it is called. Commits happen
//! one at a time and a write whose number is older than the last committed
//! one is discarded, so a store abandoned by its caller (for example after a
//! flush timeout) can never replace a newer snapshot when it finally runs.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

use tally_core::error::{StorageError, StorageResult};
use tally_core::types::{Snapshot, SNAPSHOT_VERSION};

use crate::backend::{blocking_task_failed, DurableBackend};

// =============================================================================
// FileSnapshotBackend
// =============================================================================

/// Stores the registry snapshot as a JSON document at a fixed path.
///
/// Clones share one write order.
#[derive(Debug, Clone)]
pub struct FileSnapshotBackend {
    path: PathBuf,
    order: Arc<WriteOrder>,
}

/// Sequence numbers handed to stores and the last one committed.
#[derive(Debug, Default)]
struct WriteOrder {
    issued: AtomicU64,
    /// Held across every commit.
    committed: Mutex<u64>,
}

impl FileSnapshotBackend {
    /// Creates a backend for the given target path.
    ///
    /// Nothing is touched on disk until the first `store`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            order: Arc::new(WriteOrder::default()),
        }
    }

    /// Returns the target path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes `snapshot` into a synced temporary file beside the target.
    ///
    /// The target path is not modified until [`StagedSnapshot::commit`].
    pub fn stage(&self, snapshot: &Snapshot) -> StorageResult<StagedSnapshot> {
        if let Some(name) = snapshot.find_non_finite_gauge() {
            return Err(StorageError::serialization(format!(
                "gauge '{}' has a non-finite value",
                name
            )));
        }

        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        let dir = self.parent_dir();
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let prefix = format!(
            ".{}.",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("snapshot")
        );

        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| StorageError::io(&dir, e))?;

        temp.write_all(&bytes)
            .map_err(|e| StorageError::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| StorageError::io(temp.path(), e))?;

        debug!(
            path = %temp.path().display(),
            bytes = bytes.len(),
            "Snapshot staged"
        );

        Ok(StagedSnapshot {
            temp,
            target: self.path.clone(),
        })
    }

    /// Reads and validates the snapshot at the target path.
    pub fn load_blocking(&self) -> StorageResult<Snapshot> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found(self.path.display().to_string()));
            }
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        if bytes.is_empty() {
            return Err(StorageError::corrupted(format!(
                "'{}' is empty",
                self.path.display()
            )));
        }

        let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::corrupted(format!("'{}': {}", self.path.display(), e))
        })?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(StorageError::corrupted(format!(
                "snapshot version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        if let Some(name) = snapshot.find_duplicate() {
            return Err(StorageError::corrupted(format!(
                "metric '{}' appears more than once",
                name
            )));
        }

        debug!(
            path = %self.path.display(),
            gauges = snapshot.gauges.len(),
            counters = snapshot.counters.len(),
            "Snapshot loaded"
        );

        Ok(snapshot)
    }

    /// Stages and commits `snapshot` on the calling thread.
    pub fn store_blocking(&self, snapshot: &Snapshot) -> StorageResult<()> {
        self.store_sequenced(self.next_sequence(), snapshot)
    }

    fn next_sequence(&self) -> u64 {
        self.order.issued.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Stages `snapshot` and commits it unless a later write already landed.
    ///
    /// A superseded write returns `Ok(())`; its temporary file is removed.
    fn store_sequenced(&self, sequence: u64, snapshot: &Snapshot) -> StorageResult<()> {
        let staged = self.stage(snapshot)?;

        let mut committed = self.order.committed.lock();
        if sequence < *committed {
            debug!(
                path = %self.path.display(),
                sequence = sequence,
                committed = *committed,
                "Discarding snapshot superseded by a newer write"
            );
            return Ok(());
        }

        staged.commit()?;
        *committed = sequence;
        Ok(())
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[async_trait]
impl DurableBackend for FileSnapshotBackend {
    async fn load(&self) -> StorageResult<Snapshot> {
        let backend = self.clone();
        tokio::task::spawn_blocking(move || backend.load_blocking())
            .await
            .map_err(blocking_task_failed)?
    }

    async fn store(&self, snapshot: &Snapshot) -> StorageResult<()> {
        // Taken at call time so the caller's order decides, not the pool's.
        let sequence = self.next_sequence();
        let backend = self.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || backend.store_sequenced(sequence, &snapshot))
            .await
            .map_err(blocking_task_failed)?
    }

    fn name(&self) -> &str {
        "file"
    }
}

// =============================================================================
// StagedSnapshot
// =============================================================================

/// A fully written, synced snapshot waiting to replace the target file.
///
/// Dropping it without calling [`commit`](Self::commit) deletes the
/// temporary file.
#[derive(Debug)]
pub struct StagedSnapshot {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedSnapshot {
    /// Returns the path of the temporary file.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically renames the temporary file over the target path.
    ///
    /// If the rename fails the temporary file is removed and the previous
    /// target is left intact.
    pub fn commit(self) -> StorageResult<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| StorageError::io(&target, e.error))?;

        sync_parent_dir(&target);

        debug!(path = %target.display(), "Snapshot committed");
        Ok(())
    }
}

/// Flushes the directory entry of a freshly renamed file.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
            debug!(path = %parent.display(), error = %e, "Directory sync failed");
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tally_core::types::{Counter, Gauge};
    use tempfile::TempDir;

    fn sample_snapshot() -> Snapshot {
        Snapshot::new(
            vec![Gauge::new("Alloc", 1024.5), Gauge::new("Temp", 36.6)],
            vec![Counter::new("PollCount", 3), Counter::new("Errors", -2)],
        )
    }

    fn create_test_backend() -> (FileSnapshotBackend, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileSnapshotBackend::new(temp_dir.path().join("metrics-db.json"));
        (backend, temp_dir)
    }

    fn leftover_temp_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[tokio::test]
    async fn test_store_then_load_round_trip() {
        let (backend, _temp) = create_test_backend();

        backend.store(&sample_snapshot()).await.unwrap();
        let loaded = backend.load().await.unwrap();

        assert_eq!(loaded, sample_snapshot());
    }

    #[tokio::test]
    async fn test_round_trip_empty_snapshot() {
        let (backend, _temp) = create_test_backend();

        backend.store(&Snapshot::empty()).await.unwrap();
        let loaded = backend.load().await.unwrap();

        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_extreme_values() {
        let (backend, _temp) = create_test_backend();
        let snapshot = Snapshot::new(
            vec![Gauge::new("tiny", f64::MIN_POSITIVE), Gauge::new("third", 1.0 / 3.0)],
            vec![Counter::new("max", i64::MAX), Counter::new("min", i64::MIN)],
        );

        backend.store(&snapshot).await.unwrap();

        assert_eq!(backend.load().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_store_replaces_previous_snapshot() {
        let (backend, _temp) = create_test_backend();

        backend.store(&sample_snapshot()).await.unwrap();
        let replacement = Snapshot::new(vec![Gauge::new("Only", 1.0)], Vec::new());
        backend.store(&replacement).await.unwrap();

        assert_eq!(backend.load().await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_not_found() {
        let (backend, _temp) = create_test_backend();

        let err = backend.load().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_load_empty_file_is_corrupted() {
        let (backend, _temp) = create_test_backend();
        fs::write(backend.path(), b"").unwrap();

        let err = backend.load().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_load_garbage_is_corrupted() {
        let (backend, _temp) = create_test_backend();
        fs::write(backend.path(), b"{\"gauges\": [").unwrap();

        let err = backend.load().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_load_newer_version_is_corrupted() {
        let (backend, _temp) = create_test_backend();
        fs::write(
            backend.path(),
            br#"{"version": 99, "gauges": [], "counters": []}"#,
        )
        .unwrap();

        let err = backend.load().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_load_duplicate_names_is_corrupted() {
        let (backend, _temp) = create_test_backend();
        fs::write(
            backend.path(),
            br#"{"gauges": [{"name": "a", "value": 1.0}, {"name": "a", "value": 2.0}]}"#,
        )
        .unwrap();

        let err = backend.load().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_load_document_without_version() {
        let (backend, _temp) = create_test_backend();
        fs::write(
            backend.path(),
            br#"{"gauges": [{"name": "Temp", "value": 36.6}], "counters": [{"name": "PollCount", "value": 3}]}"#,
        )
        .unwrap();

        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert_eq!(loaded.counters, vec![Counter::new("PollCount", 3)]);
    }

    #[tokio::test]
    async fn test_non_finite_gauge_rejected_before_write() {
        let (backend, temp) = create_test_backend();
        backend.store(&sample_snapshot()).await.unwrap();

        let bad = Snapshot::new(vec![Gauge::new("nan", f64::NAN)], Vec::new());
        let err = backend.store(&bad).await.unwrap_err();

        assert!(matches!(err, StorageError::Serialization { .. }));
        assert_eq!(backend.load().await.unwrap(), sample_snapshot());
        assert_eq!(leftover_temp_files(temp.path()), 0);
    }

    #[test]
    fn test_uncommitted_stage_keeps_previous_snapshot() {
        let (backend, temp) = create_test_backend();
        backend.store_blocking(&sample_snapshot()).unwrap();

        let next = Snapshot::new(vec![Gauge::new("Temp", 40.0)], Vec::new());
        let staged = backend.stage(&next).unwrap();
        assert!(staged.temp_path().exists());
        assert_eq!(leftover_temp_files(temp.path()), 1);

        // Interrupted before the rename.
        drop(staged);

        assert_eq!(backend.load_blocking().unwrap(), sample_snapshot());
        assert_eq!(leftover_temp_files(temp.path()), 0);
    }

    #[test]
    fn test_commit_failure_keeps_previous_snapshot() {
        let (backend, temp) = create_test_backend();
        backend.store_blocking(&sample_snapshot()).unwrap();

        let staged = backend.stage(&Snapshot::empty()).unwrap();
        let blocked = StagedSnapshot {
            temp: staged.temp,
            target: temp.path().to_path_buf(),
        };

        // Renaming a file over a directory fails.
        assert!(blocked.commit().is_err());
        assert_eq!(backend.load_blocking().unwrap(), sample_snapshot());
        assert_eq!(leftover_temp_files(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_abandoned_write_cannot_replace_newer_snapshot() {
        let (backend, temp) = create_test_backend();

        // Sequence of a store whose caller gave up before it reached the disk.
        let abandoned = backend.next_sequence();

        let newer = Snapshot::new(vec![Gauge::new("Temp", 40.0)], Vec::new());
        backend.store(&newer).await.unwrap();

        let stale = Snapshot::new(vec![Gauge::new("Temp", 1.0)], Vec::new());
        backend.store_sequenced(abandoned, &stale).unwrap();

        assert_eq!(backend.load().await.unwrap(), newer);
        assert_eq!(leftover_temp_files(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_timed_out_store_does_not_land_late() {
        let (backend, temp) = create_test_backend();

        let large = Snapshot::new(
            (0..300_000)
                .map(|i| Gauge::new(format!("g{}", i), i as f64))
                .collect(),
            Vec::new(),
        );
        let _ = tokio::time::timeout(Duration::from_micros(1), backend.store(&large)).await;

        let newer = Snapshot::new(vec![Gauge::new("Temp", 40.0)], Vec::new());
        backend.store(&newer).await.unwrap();

        // Give the abandoned blocking write time to finish.
        for _ in 0..100 {
            if leftover_temp_files(temp.path()) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(backend.load().await.unwrap(), newer);
        assert_eq!(leftover_temp_files(temp.path()), 0);
    }

    #[test]
    fn test_clones_share_write_order() {
        let (backend, _temp) = create_test_backend();
        let clone = backend.clone();

        let abandoned = backend.next_sequence();
        clone.store_blocking(&sample_snapshot()).unwrap();
        backend
            .store_sequenced(abandoned, &Snapshot::empty())
            .unwrap();

        assert_eq!(backend.load_blocking().unwrap(), sample_snapshot());
    }

    #[test]
    fn test_store_creates_parent_directory() {
        let temp = TempDir::new().unwrap();
        let backend = FileSnapshotBackend::new(temp.path().join("nested/dir/metrics.json"));

        backend.store_blocking(&sample_snapshot()).unwrap();

        assert!(backend.path().exists());
        assert_eq!(backend.load_blocking().unwrap(), sample_snapshot());
    }

    #[test]
    fn test_name() {
        assert_eq!(FileSnapshotBackend::new("x.json").name(), "file");
    }
}
