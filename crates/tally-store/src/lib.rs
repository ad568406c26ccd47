// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tally-store
//!
//! Durable persistence for the tally metric registry.
//!
//! - **Backend**: the `DurableBackend` abstraction (`load` / `store`)
//! - **File**: single-file JSON snapshots written with temp-file-then-rename
//! - **SQLite**: two-table relational storage behind a retrying `UnitOfWork`
//! - **Memory**: a volatile backend for tests and dry runs
//! - **Coordinator**: restore on start, interval or debounced flushing, and
//!   a final flush on stop

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod coordinator;
pub mod file;
pub mod memory;
pub mod sqlite;

pub use backend::DurableBackend;
pub use coordinator::{
    CoordinatorConfig, CoordinatorConfigBuilder, CoordinatorMetrics, CoordinatorState,
    FlushMode, PersistenceCoordinator, RestoreFailurePolicy,
};
pub use file::{FileSnapshotBackend, StagedSnapshot};
pub use memory::MemoryBackend;
pub use sqlite::{RelationalBackend, SqliteConfig, UnitOfWork};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
