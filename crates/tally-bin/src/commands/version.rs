// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

/// Prints component versions and, with `--verbose`, the build target.
pub fn version(cli: &Cli) -> BinResult<()> {
    print!("{}", render(cli.verbose));
    Ok(())
}

fn render(verbose: bool) -> String {
    let mut out = format!("tally {}\n", crate::VERSION);
    for (component, version) in [
        ("tally-core", tally_core::VERSION),
        ("tally-store", tally_store::VERSION),
        ("tally-config", tally_config::VERSION),
    ] {
        out.push_str(&format!("  {:<14}{}\n", component, version));
    }
    out.push_str(&format!(
        "  {:<14}v{}\n",
        "snapshot", tally_core::SNAPSHOT_VERSION
    ));

    if verbose {
        out.push_str(&format!(
            "  {:<14}{}-{}\n",
            "target",
            std::env::consts::ARCH,
            std::env::consts::OS
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_snapshot_format() {
        let out = render(false);
        assert!(out.starts_with(&format!("tally {}\n", crate::VERSION)));
        assert!(out.contains("snapshot      v1"));
        assert!(!out.contains("target"));
    }

    #[test]
    fn test_render_verbose_adds_target() {
        assert!(render(true).contains(std::env::consts::OS));
    }
}
