// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use tracing::info;

use crate::cli::{Cli, RunArgs};
use crate::error::BinResult;
use crate::runtime::CollectorRuntime;

/// Executes the `run` command to start the collector.
pub async fn run(cli: &Cli, args: RunArgs) -> BinResult<()> {
    info!(config_dir = %cli.config_dir.display(), "starting PULSE");

    let runtime =
        CollectorRuntime::new(&cli.config_dir)?.with_skip_connect(args.skip_connect);

    runtime.run().await
}
