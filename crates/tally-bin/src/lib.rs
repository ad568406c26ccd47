// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tally-bin
//!
//! The `tally` command. `run` restores the registry from the configured
//! backend, keeps it flushed while the process lives, and performs a final
//! flush on SIGINT or SIGTERM. The other subcommands are offline helpers:
//!
//! ```bash
//! tally -c /etc/tally/tally.yaml          # run (default)
//! tally validate --show-config            # check a config file
//! TALLY_DATABASE_DSN=metrics.db tally inspect --format text
//! tally version
//! ```
//!
//! Exit codes are listed on [`BinError`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{open_backend, RuntimeBuilder, TallyRuntime};
pub use shutdown::{ShutdownHandle, ShutdownReason};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
