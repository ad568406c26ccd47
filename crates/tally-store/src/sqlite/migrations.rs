// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Schema migrations for the relational backend.
//!
//! The applied version is tracked in `PRAGMA user_version`.

use rusqlite::Connection;

use tally_core::error::{StorageError, StorageResult};

use super::error::map_sqlite_err;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Runs all pending migrations on the database.
pub fn run_migrations(conn: &Connection) -> StorageResult<()> {
    let current = get_schema_version(conn)?;

    if current > SCHEMA_VERSION {
        return Err(StorageError::database(format!(
            "database schema version {} is newer than supported version {}",
            current, SCHEMA_VERSION
        )));
    }

    if current < 1 {
        migrate_v1(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)
}

/// Creates the gauge and counter tables (v1).
fn migrate_v1(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS gauges (
            name  TEXT PRIMARY KEY NOT NULL,
            value DOUBLE PRECISION NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counters (
            name  TEXT PRIMARY KEY NOT NULL,
            value BIGINT NOT NULL
        );",
    )
    .map_err(map_sqlite_err)
}

/// Reads the current schema version from PRAGMA user_version.
pub fn get_schema_version(conn: &Connection) -> StorageResult<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(map_sqlite_err)
}

fn set_schema_version(conn: &Connection, version: u32) -> StorageResult<()> {
    conn.pragma_update(None, "user_version", version)
        .map_err(map_sqlite_err)
}
