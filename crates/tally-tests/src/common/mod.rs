// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Common Test Utilities
//!
//! - `fixtures`: snapshots and config documents
//! - `mocks`: recording and failing backends
//! - `harness`: concurrent registry workloads

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;

use std::path::PathBuf;
use std::sync::Once;

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static LOGGING: Once = Once::new();

/// Routes coordinator and backend logs to the test writer.
///
/// `RUST_LOG` overrides the default `warn,tally_store=debug` filter.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,tally_store=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Creates a scratch directory removed when the handle drops.
pub fn temp_test_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("{}-", prefix))
        .tempdir()
        .unwrap_or_else(|e| panic!("cannot create scratch dir for {}: {}", prefix, e))
}

/// A snapshot file path inside `dir` that does not exist yet.
pub fn snapshot_path(dir: &TempDir) -> PathBuf {
    dir.path().join("metrics-db.json")
}
