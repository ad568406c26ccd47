// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for tally.
//!
//! This module defines the error types shared by the registry and the
//! durable backends. It:
//!
//! - Keeps arithmetic failures separate from storage failures
//! - Distinguishes transient storage failures (eligible for retry) from
//!   persistent ones
//! - Treats "nothing stored yet" as its own, expected outcome
//!
//! # Error Hierarchy
//!
//! ```text
//! TallyError (root)
//! ├── OverflowError   - Counter accumulation left the i64 range
//! └── StorageError    - Durable backend operations
//!     ├── NotFound            (expected: first run)
//!     ├── Connection          (transient: retried by the unit of work)
//!     └── Io / Corrupted / Serialization / Database / Constraint / ...
//! ```
//!
//! # Examples
//!
//! ```
//! use tally_core::error::{StorageError, TallyError};
//!
//! let error = StorageError::connection("connection reset by peer");
//! assert!(error.is_transient());
//!
//! let tally_error: TallyError = error.into();
//! assert_eq!(tally_error.error_type(), "storage");
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// TallyError - Root Error Type
// =============================================================================

/// The root error type for tally.
#[derive(Debug, Error)]
pub enum TallyError {
    /// Counter accumulation overflowed.
    #[error(transparent)]
    Overflow(#[from] OverflowError),

    /// Durable storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl TallyError {
    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TallyError::Storage(e) => e.is_transient(),
            TallyError::Overflow(_) => false,
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            TallyError::Overflow(_) => "overflow",
            TallyError::Storage(_) => "storage",
        }
    }
}

// =============================================================================
// OverflowError
// =============================================================================

/// A counter update would leave the signed 64-bit range.
///
/// Carries both operands so the caller can report exactly what was rejected.
/// The stored counter value is never modified when this error is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("counter overflow: {current} + {delta} does not fit in i64")]
pub struct OverflowError {
    /// The value stored before the update.
    pub current: i64,
    /// The rejected increment.
    pub delta: i64,
}

impl OverflowError {
    /// Creates a new overflow error.
    pub fn new(current: i64, delta: i64) -> Self {
        Self { current, delta }
    }

    /// Returns `true` if the update overflowed upward (past `i64::MAX`).
    pub fn is_upward(&self) -> bool {
        self.delta > 0
    }
}

// =============================================================================
// StorageError
// =============================================================================

/// Durable backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No prior state has been persisted.
    #[error("No stored snapshot at {location}")]
    NotFound {
        /// Where the backend looked (file path or table set).
        location: String,
    },

    /// The backend could not be reached (timeout, refused, locked).
    #[error("Backend connection failed: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// File system operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Stored data could not be decoded.
    #[error("Corrupted snapshot: {message}")]
    Corrupted {
        /// Error message.
        message: String,
    },

    /// A snapshot could not be encoded.
    #[error("Serialization failed: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// The database rejected the statement.
    #[error("Database error: {message}")]
    Database {
        /// Error message.
        message: String,
    },

    /// A database constraint was violated.
    #[error("Constraint violation: {message}")]
    Constraint {
        /// Error message.
        message: String,
    },

    /// Every scheduled attempt failed with a transient error.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: Box<StorageError>,
    },

    /// The caller cancelled the operation while it waited for a retry.
    #[error("Operation cancelled while waiting to retry")]
    Cancelled,

    /// The operation did not finish within its deadline.
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// The deadline that elapsed.
        duration: Duration,
    },

    /// The operation failed and so did the rollback.
    #[error("{original}; rollback also failed: {rollback}")]
    Rollback {
        /// The failure that triggered the rollback.
        #[source]
        original: Box<StorageError>,
        /// Why the rollback failed.
        rollback: String,
    },
}

impl StorageError {
    /// Creates a not found error.
    pub fn not_found(location: impl Into<String>) -> Self {
        Self::NotFound {
            location: location.into(),
        }
    }

    /// Creates a transient connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a corrupted data error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Wraps the last transient failure once the retry schedule is spent.
    pub fn retries_exhausted(attempts: u32, last: StorageError) -> Self {
        Self::RetriesExhausted {
            attempts,
            last: Box::new(last),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Joins a failed operation with the error its rollback produced.
    pub fn rollback(original: StorageError, rollback: impl Into<String>) -> Self {
        Self::Rollback {
            original: Box::new(original),
            rollback: rollback.into(),
        }
    }

    /// Returns `true` if this failure is likely temporary.
    ///
    /// Only transport-level failures qualify. Exhausted retries, rollbacks
    /// and constraint violations are final even when they wrap a
    /// connection error.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection { .. })
    }

    /// Returns `true` if the backend simply has nothing stored yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Returns the error type for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "not_found",
            StorageError::Connection { .. } => "connection",
            StorageError::Io { .. } => "io",
            StorageError::Corrupted { .. } => "corrupted",
            StorageError::Serialization { .. } => "serialization",
            StorageError::Database { .. } => "database",
            StorageError::Constraint { .. } => "constraint",
            StorageError::RetriesExhausted { .. } => "retries_exhausted",
            StorageError::Cancelled => "cancelled",
            StorageError::Timeout { .. } => "timeout",
            StorageError::Rollback { .. } => "rollback",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
