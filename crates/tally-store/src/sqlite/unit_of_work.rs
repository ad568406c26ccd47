// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transactional, retrying executor for relational work.
//!
//! Every read and write against the relational backend goes through
//! [`UnitOfWork::execute`]. One call:
//!
//! 1. begins a transaction on the blocking pool,
//! 2. runs the caller's closure against it,
//! 3. commits on `Ok`, rolls back on `Err`.
//!
//! When the attempt fails with a transient error the whole block is run
//! again from scratch in a new transaction, following the configured
//! [`RetryStrategy`]. Persistent errors are returned at once. Waiting for the
//! next attempt is raced against a [`CancellationToken`], so a cancelled
//! caller is released immediately instead of sitting out the schedule.
//! With a deadline set, a wait that would end past it is not started and
//! the call fails with [`StorageError::Timeout`] instead.
//!
//! # Example
//!
//! ```rust,ignore
//! let uow = UnitOfWork::new(conn, Arc::new(FixedSchedule::default()));
//!
//! let total: i64 = uow
//!     .execute(&cancel, |tx| {
//!         tx.query_row("SELECT COUNT(*) FROM counters", [], |row| row.get(0))
//!             .map_err(map_sqlite_err)
//!     })
//!     .await?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tally_core::error::{StorageError, StorageResult};
use tally_core::retry::{RetryDecision, RetryStrategy};

use super::error::map_sqlite_err;
use crate::backend::blocking_task_failed;

// =============================================================================
// UnitOfWork
// =============================================================================

/// Runs closures inside transactions and retries transient failures.
#[derive(Clone)]
pub struct UnitOfWork {
    conn: Arc<Mutex<Connection>>,
    retry: Arc<dyn RetryStrategy>,
    /// Budget for one `execute` call, retries included.
    deadline: Option<Duration>,
}

impl UnitOfWork {
    /// Creates a unit of work over a shared connection.
    pub fn new(conn: Arc<Mutex<Connection>>, retry: Arc<dyn RetryStrategy>) -> Self {
        Self {
            conn,
            retry,
            deadline: None,
        }
    }

    /// Bounds each `execute` call, retries and backoff included.
    pub fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(budget);
        self
    }

    /// Returns the per-call deadline, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Returns the retry strategy in use.
    pub fn retry_strategy(&self) -> &dyn RetryStrategy {
        self.retry.as_ref()
    }

    /// Runs `work` in a transaction, retrying transient failures.
    ///
    /// # Returns
    ///
    /// - `Ok(value)` once an attempt commits
    /// - the attempt's error, unchanged, if it is not transient
    /// - `Err(StorageError::RetriesExhausted)` wrapping the last error once
    ///   the strategy declines another attempt
    /// - `Err(StorageError::Cancelled)` if `cancel` fires before an attempt
    ///   starts or while waiting for the next one
    /// - `Err(StorageError::Timeout)` if the wait for the next attempt would
    ///   end past the deadline
    /// - `Err(StorageError::Rollback)` if the rollback after a failed
    ///   attempt also failed
    pub async fn execute<T, F>(&self, cancel: &CancellationToken, work: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Fn(&Transaction<'_>) -> StorageResult<T> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut attempt = 0u32;
        let expires_at = self.deadline.and_then(|budget| {
            tokio::time::Instant::now()
                .checked_add(budget)
                .map(|at| (at, budget))
        });

        loop {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            attempt += 1;

            let conn = self.conn.clone();
            let work = work.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mut conn = conn.lock();
                run_in_transaction(&mut conn, work.as_ref())
            })
            .await
            .map_err(blocking_task_failed)?;

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_transient() {
                return Err(error);
            }

            let delay = match self.retry.should_retry(&error, attempt) {
                RetryDecision::Retry(delay) => delay,
                RetryDecision::DoNotRetry => {
                    return Err(StorageError::retries_exhausted(attempt, error));
                }
            };

            if let Some((expires_at, budget)) = expires_at {
                let wakes_at = tokio::time::Instant::now().checked_add(delay);
                if wakes_at.map_or(true, |wake| wake > expires_at) {
                    debug!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        deadline_ms = budget.as_millis() as u64,
                        error = %error,
                        "Next attempt would miss the deadline, giving up"
                    );
                    return Err(StorageError::timeout(budget));
                }
            }

            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                strategy = self.retry.name(),
                error = %error,
                "Retrying unit of work after transient failure"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("retry", &self.retry.name())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Begins a transaction, runs `work`, and commits or rolls back.
fn run_in_transaction<T, F>(conn: &mut Connection, work: &F) -> StorageResult<T>
where
    F: Fn(&Transaction<'_>) -> StorageResult<T>,
{
    let tx = conn.transaction().map_err(map_sqlite_err)?;

    match work(&tx) {
        Ok(value) => {
            tx.commit().map_err(map_sqlite_err)?;
            Ok(value)
        }
        Err(original) => match tx.rollback() {
            Ok(()) => Err(original),
            Err(e) => Err(StorageError::rollback(original, e.to_string())),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tally_core::retry::{FixedSchedule, NoRetry};

    fn create_test_uow(retry: Arc<dyn RetryStrategy>) -> UnitOfWork {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE items (name TEXT PRIMARY KEY NOT NULL);")
            .unwrap();
        UnitOfWork::new(Arc::new(Mutex::new(conn)), retry)
    }

    fn count_items(uow: &UnitOfWork) -> i64 {
        uow.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_commits_on_success() {
        let uow = create_test_uow(Arc::new(NoRetry));
        let cancel = CancellationToken::new();

        let inserted = uow
            .execute(&cancel, |tx| {
                tx.execute("INSERT INTO items (name) VALUES ('a')", [])
                    .map_err(map_sqlite_err)
            })
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(count_items(&uow), 1);
    }

    #[tokio::test]
    async fn test_rolls_back_on_failure() {
        let uow = create_test_uow(Arc::new(NoRetry));
        let cancel = CancellationToken::new();

        let result: StorageResult<()> = uow
            .execute(&cancel, |tx| {
                tx.execute("INSERT INTO items (name) VALUES ('a')", [])
                    .map_err(map_sqlite_err)?;
                Err(StorageError::constraint("rejected by caller"))
            })
            .await;

        assert!(matches!(result, Err(StorageError::Constraint { .. })));
        assert_eq!(count_items(&uow), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_on_schedule() {
        let uow = create_test_uow(Arc::new(FixedSchedule::default()));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let result = uow
            .execute(&cancel, move |tx| {
                tx.execute("INSERT INTO items (name) VALUES ('a')", [])
                    .map_err(map_sqlite_err)?;
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(StorageError::connection("connection reset"));
                }
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 3s between the three attempts.
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(start.elapsed() < Duration::from_secs(5));
        // Failed attempts were rolled back, so the insert landed once.
        assert_eq!(count_items(&uow), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_every_scheduled_attempt() {
        let uow = create_test_uow(Arc::new(FixedSchedule::default()));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: StorageResult<()> = uow
            .execute(&cancel, move |_tx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::connection("connection refused"))
            })
            .await;

        match result {
            Err(StorageError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(last.is_transient());
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_persistent_error_is_not_retried() {
        let uow = create_test_uow(Arc::new(FixedSchedule::default()));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: StorageResult<()> = uow
            .execute(&cancel, move |_tx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::constraint("duplicate key"))
            })
            .await;

        assert!(matches!(result, Err(StorageError::Constraint { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let uow = create_test_uow(Arc::new(FixedSchedule::new(vec![Duration::from_secs(60)])));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let counter = calls.clone();
        let result: StorageResult<()> = uow
            .execute(&cancel, move |_tx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::connection("timeout"))
            })
            .await;

        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_past_deadline_times_out() {
        let uow = create_test_uow(Arc::new(FixedSchedule::default()))
            .with_deadline(Duration::from_secs(3));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: StorageResult<()> = uow
            .execute(&cancel, move |_tx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::connection("connection refused"))
            })
            .await;

        // The 1s wait fits, the following 3s wait would end at 4s.
        match result {
            Err(StorageError::Timeout { duration }) => {
                assert_eq!(duration, Duration::from_secs(3));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_leaves_fast_success_alone() {
        let uow = create_test_uow(Arc::new(FixedSchedule::default()))
            .with_deadline(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = uow
            .execute(&cancel, move |_tx| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(StorageError::connection("connection reset"));
                }
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(uow.deadline(), Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_work() {
        let uow = create_test_uow(Arc::new(NoRetry));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = uow.execute(&cancel, |_tx| Ok(())).await;

        assert!(matches!(result, Err(StorageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_real_constraint_violation_is_not_retried() {
        let uow = create_test_uow(Arc::new(FixedSchedule::default()));
        let cancel = CancellationToken::new();

        let result = uow
            .execute(&cancel, |tx| {
                tx.execute("INSERT INTO items (name) VALUES ('dup')", [])
                    .map_err(map_sqlite_err)?;
                tx.execute("INSERT INTO items (name) VALUES ('dup')", [])
                    .map_err(map_sqlite_err)
            })
            .await;

        assert!(matches!(result, Err(StorageError::Constraint { .. })));
        assert_eq!(count_items(&uow), 0);
    }
}
