// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tally Integration Tests
//!
//! Shared fixtures, mock backends, and helpers for the integration suites
//! under `tests/`.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p tally-tests
//! cargo test -p tally-tests --test integration_coordinator
//! ```
//!
//! ## Test Suites
//!
//! - `integration_registry.rs`: registry semantics and concurrency
//! - `integration_file.rs`: file backend round trips and crash safety
//! - `integration_sqlite.rs`: relational backend and unit of work retries
//! - `integration_coordinator.rs`: restore, interval, debounce, shutdown
//! - `integration_config.rs`: config files wired into coordinator settings

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
}
