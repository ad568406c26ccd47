// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use tally_config::TallyConfig;

use crate::error::BinResult;
use crate::runtime::RuntimeBuilder;

/// Executes the `run` command to start the service.
pub async fn run(config: TallyConfig) -> BinResult<()> {
    RuntimeBuilder::new().config(config).build()?.run().await
}
