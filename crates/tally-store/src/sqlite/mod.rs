// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Relational backend on SQLite.
//!
//! Gauges and counters live in two tables keyed by metric name:
//!
//! ```sql
//! gauges(name TEXT PRIMARY KEY, value DOUBLE PRECISION NOT NULL)
//! counters(name TEXT PRIMARY KEY, value BIGINT NOT NULL)
//! ```
//!
//! All access runs through a [`UnitOfWork`]. A full `store` clears both
//! tables and bulk-inserts the snapshot in a single transaction, so no
//! reader ever sees a half-cleared table.
//!
//! SQLite stores NaN as NULL, so non-finite gauges are rejected with a
//! serialization error before any transaction starts.

mod error;
pub mod migrations;
mod unit_of_work;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tally_core::error::{StorageError, StorageResult};
use tally_core::retry::{RetryConfig, RetryStrategy};
use tally_core::types::{Counter, Gauge, Snapshot};

use crate::backend::{blocking_task_failed, DurableBackend};

pub use error::map_sqlite_err;
pub use unit_of_work::UnitOfWork;

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the relational backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database path, `file:` URI, or `:memory:`.
    pub dsn: String,

    /// How long SQLite waits on a locked database before reporting `BUSY`.
    #[serde(default = "default_busy_timeout", rename = "busy_timeout_ms")]
    #[serde(with = "duration_millis")]
    pub busy_timeout: Duration,

    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(1)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl SqliteConfig {
    /// Creates a configuration with default busy timeout and retry schedule.
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            busy_timeout: default_busy_timeout(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

// =============================================================================
// RelationalBackend
// =============================================================================

/// Stores gauges and counters as rows in SQLite.
#[derive(Debug)]
pub struct RelationalBackend {
    uow: UnitOfWork,
    cancel: CancellationToken,
    dsn: String,
}

impl RelationalBackend {
    /// Opens (or creates) the database and applies pending migrations.
    pub async fn open(config: SqliteConfig) -> StorageResult<Self> {
        let dsn = config.dsn.clone();
        let busy_timeout = config.busy_timeout;

        let conn = tokio::task::spawn_blocking(move || -> StorageResult<Connection> {
            let conn = Connection::open(&dsn).map_err(map_sqlite_err)?;
            conn.busy_timeout(busy_timeout).map_err(map_sqlite_err)?;
            migrations::run_migrations(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(blocking_task_failed)??;

        debug!(dsn = %config.dsn, "Relational backend opened");

        Ok(Self::with_connection(conn, config.retry.build(), config.dsn))
    }

    /// Wraps an already open connection, applying pending migrations.
    pub fn from_connection(
        conn: Connection,
        retry: Arc<dyn RetryStrategy>,
    ) -> StorageResult<Self> {
        migrations::run_migrations(&conn)?;
        let dsn = conn
            .path()
            .filter(|path| !path.is_empty())
            .unwrap_or(":memory:")
            .to_string();
        Ok(Self::with_connection(conn, retry, dsn))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(retry: Arc<dyn RetryStrategy>) -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_err)?;
        Self::from_connection(conn, retry)
    }

    fn with_connection(conn: Connection, retry: Arc<dyn RetryStrategy>, dsn: String) -> Self {
        Self {
            uow: UnitOfWork::new(Arc::new(Mutex::new(conn)), retry),
            cancel: CancellationToken::new(),
            dsn,
        }
    }

    /// Bounds every operation, retries included.
    ///
    /// A retry wait that would end past `budget` fails with
    /// [`StorageError::Timeout`] instead of being started.
    pub fn with_operation_timeout(mut self, budget: Duration) -> Self {
        self.uow = self.uow.with_deadline(budget);
        self
    }

    /// Returns the unit of work used for all access.
    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }

    /// Returns the token that aborts pending retries when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the connection string.
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Inserts or replaces a single gauge.
    pub async fn upsert_gauge(&self, name: impl Into<String>, value: f64) -> StorageResult<()> {
        let name = name.into();
        if !value.is_finite() {
            return Err(non_finite_gauge(&name));
        }
        self.uow
            .execute(&self.cancel, move |tx| {
                tx.execute(
                    "INSERT INTO gauges (name, value) VALUES (?1, ?2)
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                    params![name, value],
                )
                .map_err(map_sqlite_err)?;
                Ok(())
            })
            .await
    }

    /// Inserts or replaces a single counter with an absolute value.
    ///
    /// Accumulation happens in the registry; the table only mirrors the
    /// resulting total.
    pub async fn upsert_counter(&self, name: impl Into<String>, value: i64) -> StorageResult<()> {
        let name = name.into();
        self.uow
            .execute(&self.cancel, move |tx| {
                tx.execute(
                    "INSERT INTO counters (name, value) VALUES (?1, ?2)
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                    params![name, value],
                )
                .map_err(map_sqlite_err)?;
                Ok(())
            })
            .await
    }

    /// Looks up a single gauge.
    pub async fn get_gauge(&self, name: impl Into<String>) -> StorageResult<Option<f64>> {
        let name = name.into();
        self.uow
            .execute(&self.cancel, move |tx| {
                tx.query_row(
                    "SELECT value FROM gauges WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite_err)
            })
            .await
    }

    /// Looks up a single counter.
    pub async fn get_counter(&self, name: impl Into<String>) -> StorageResult<Option<i64>> {
        let name = name.into();
        self.uow
            .execute(&self.cancel, move |tx| {
                tx.query_row(
                    "SELECT value FROM counters WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite_err)
            })
            .await
    }
}

fn read_snapshot(tx: &Transaction<'_>) -> StorageResult<Snapshot> {
    let mut stmt = tx
        .prepare("SELECT name, value FROM gauges ORDER BY name")
        .map_err(map_sqlite_err)?;
    let gauges = stmt
        .query_map([], |row| Ok(Gauge::new(row.get::<_, String>(0)?, row.get(1)?)))
        .map_err(map_sqlite_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_sqlite_err)?;

    let mut stmt = tx
        .prepare("SELECT name, value FROM counters ORDER BY name")
        .map_err(map_sqlite_err)?;
    let counters = stmt
        .query_map([], |row| Ok(Counter::new(row.get::<_, String>(0)?, row.get(1)?)))
        .map_err(map_sqlite_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_sqlite_err)?;

    Ok(Snapshot::new(gauges, counters))
}

fn non_finite_gauge(name: &str) -> StorageError {
    StorageError::serialization(format!("gauge '{}' has a non-finite value", name))
}

fn replace_snapshot(tx: &Transaction<'_>, snapshot: &Snapshot) -> StorageResult<()> {
    tx.execute("DELETE FROM gauges", []).map_err(map_sqlite_err)?;
    tx.execute("DELETE FROM counters", []).map_err(map_sqlite_err)?;

    let mut insert_gauge = tx
        .prepare("INSERT INTO gauges (name, value) VALUES (?1, ?2)")
        .map_err(map_sqlite_err)?;
    for gauge in &snapshot.gauges {
        insert_gauge
            .execute(params![gauge.name, gauge.value])
            .map_err(map_sqlite_err)?;
    }

    let mut insert_counter = tx
        .prepare("INSERT INTO counters (name, value) VALUES (?1, ?2)")
        .map_err(map_sqlite_err)?;
    for counter in &snapshot.counters {
        insert_counter
            .execute(params![counter.name, counter.value])
            .map_err(map_sqlite_err)?;
    }

    Ok(())
}

#[async_trait]
impl DurableBackend for RelationalBackend {
    async fn load(&self) -> StorageResult<Snapshot> {
        let snapshot = self.uow.execute(&self.cancel, read_snapshot).await?;

        if snapshot.is_empty() {
            return Err(StorageError::not_found(format!("sqlite:{}", self.dsn)));
        }

        debug!(
            gauges = snapshot.gauges.len(),
            counters = snapshot.counters.len(),
            "Snapshot loaded from database"
        );
        Ok(snapshot)
    }

    async fn store(&self, snapshot: &Snapshot) -> StorageResult<()> {
        if let Some(name) = snapshot.find_non_finite_gauge() {
            return Err(non_finite_gauge(name));
        }

        let snapshot = snapshot.clone();
        let rows = snapshot.len();

        self.uow
            .execute(&self.cancel, move |tx| replace_snapshot(tx, &snapshot))
            .await?;

        debug!(rows = rows, "Snapshot stored in database");
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }

    async fn close(&self) -> StorageResult<()> {
        self.cancel.cancel();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::retry::NoRetry;
    use tempfile::TempDir;

    fn create_test_backend() -> RelationalBackend {
        RelationalBackend::open_in_memory(Arc::new(NoRetry)).unwrap()
    }

    fn sample_snapshot() -> Snapshot {
        Snapshot::new(
            vec![Gauge::new("Alloc", 2048.25), Gauge::new("Temp", 36.6)],
            vec![Counter::new("Errors", -4), Counter::new("PollCount", 3)],
        )
    }

    #[tokio::test]
    async fn test_empty_tables_are_not_found() {
        let backend = create_test_backend();
        assert!(backend.load().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_store_then_load_round_trip() {
        let backend = create_test_backend();

        backend.store(&sample_snapshot()).await.unwrap();

        assert_eq!(backend.load().await.unwrap(), sample_snapshot());
    }

    #[tokio::test]
    async fn test_store_replaces_all_rows() {
        let backend = create_test_backend();
        backend.store(&sample_snapshot()).await.unwrap();

        let replacement = Snapshot::new(Vec::new(), vec![Counter::new("Fresh", 1)]);
        backend.store(&replacement).await.unwrap();

        assert_eq!(backend.load().await.unwrap(), replacement);
        assert_eq!(backend.get_gauge("Temp").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_store_keeps_previous_rows() {
        let backend = create_test_backend();
        backend.store(&sample_snapshot()).await.unwrap();

        let duplicate = Snapshot::new(
            vec![Gauge::new("same", 1.0), Gauge::new("same", 2.0)],
            Vec::new(),
        );
        let err = backend.store(&duplicate).await.unwrap_err();

        assert!(matches!(err, StorageError::Constraint { .. }));
        assert_eq!(backend.load().await.unwrap(), sample_snapshot());
    }

    #[tokio::test]
    async fn test_non_finite_gauge_rejected_before_transaction() {
        let backend = create_test_backend();
        backend.store(&sample_snapshot()).await.unwrap();

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let bad = Snapshot::new(
                vec![Gauge::new("Alloc", 1.0), Gauge::new("Broken", value)],
                Vec::new(),
            );
            let err = backend.store(&bad).await.unwrap_err();
            assert!(matches!(err, StorageError::Serialization { .. }), "{value}: {err}");
        }

        let err = backend.upsert_gauge("Broken", f64::NAN).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));

        assert_eq!(backend.load().await.unwrap(), sample_snapshot());
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let backend = create_test_backend();

        backend.upsert_gauge("Temp", 36.6).await.unwrap();
        backend.upsert_gauge("Temp", 37.1).await.unwrap();
        backend.upsert_counter("PollCount", 3).await.unwrap();
        backend.upsert_counter("PollCount", 5).await.unwrap();

        assert_eq!(backend.get_gauge("Temp").await.unwrap(), Some(37.1));
        assert_eq!(backend.get_counter("PollCount").await.unwrap(), Some(5));
        assert_eq!(backend.get_counter("Missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_file_database_persists_across_connections() {
        let temp = TempDir::new().unwrap();
        let dsn = temp.path().join("metrics.db").to_string_lossy().to_string();

        let backend = RelationalBackend::open(SqliteConfig::new(&dsn)).await.unwrap();
        backend.store(&sample_snapshot()).await.unwrap();
        backend.close().await.unwrap();
        drop(backend);

        let reopened = RelationalBackend::open(SqliteConfig::new(&dsn)).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), sample_snapshot());
    }

    #[tokio::test]
    async fn test_close_cancels_further_work() {
        let backend = create_test_backend();
        backend.close().await.unwrap();

        let err = backend.store(&sample_snapshot()).await.unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
    }

    #[tokio::test]
    async fn test_operation_timeout_applies_to_unit_of_work() {
        let backend = RelationalBackend::open_in_memory(Arc::new(NoRetry))
            .unwrap()
            .with_operation_timeout(Duration::from_secs(2));

        assert_eq!(backend.unit_of_work().deadline(), Some(Duration::from_secs(2)));
        backend.store(&sample_snapshot()).await.unwrap();
    }

    #[test]
    fn test_config_deserialization() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{"dsn": "metrics.db", "busy_timeout_ms": 250}"#).unwrap();

        assert_eq!(config.dsn, "metrics.db");
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.retry, RetryConfig::default());
    }
}
