// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.

mod inspect;
mod run;
mod validate;
mod version;

pub use inspect::inspect;
pub use run::run;
pub use validate::validate;
pub use version::version;

use tally_config::TallyConfig;

use crate::cli::{Cli, Commands};
use crate::error::{BinError, BinResult};
use crate::logging::init_logging;
use crate::runtime::load_config;

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    let command = cli.effective_command();
    if let Commands::Version = command {
        return version::version(&cli);
    }

    let config = load_config(cli.config.as_deref())?;
    setup_logging(&cli, &config)?;

    match command {
        Commands::Run => run::run(config).await,
        Commands::Validate(args) => validate::validate(&cli, &config, args),
        Commands::Inspect(args) => inspect::inspect(&config, args).await,
        Commands::Version => version::version(&cli),
    }
}

fn setup_logging(cli: &Cli, config: &TallyConfig) -> BinResult<()> {
    let level = cli.effective_log_level(config.logging.level.as_str());
    let format = cli.effective_log_format(config.logging.format);

    init_logging(level, format, config.logging.with_target)
        .map_err(BinError::Logging)
}
