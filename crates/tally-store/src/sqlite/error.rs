// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Classification of SQLite failures.

use rusqlite::ErrorCode;

use tally_core::error::StorageError;

/// Maps a `rusqlite::Error` to a `StorageError`.
///
/// | SQLite result                      | StorageError   | retried |
/// |------------------------------------|----------------|---------|
/// | `BUSY`, `LOCKED`, `CANTOPEN`, `IOERR` | `Connection` | yes     |
/// | `CONSTRAINT`                       | `Constraint`   | no      |
/// | column type / range mismatch       | `Corrupted`    | no      |
/// | anything else                      | `Database`     | no      |
pub fn map_sqlite_err(e: rusqlite::Error) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure => StorageError::connection(e.to_string()),
            ErrorCode::ConstraintViolation => StorageError::constraint(e.to_string()),
            _ => StorageError::database(e.to_string()),
        },
        rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => StorageError::corrupted(e.to_string()),
        _ => StorageError::database(e.to_string()),
    }
}
