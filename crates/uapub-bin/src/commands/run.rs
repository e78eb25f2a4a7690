// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use tracing::info;

use crate::cli::{Cli, RunArgs};
use crate::error::{BinError, BinResult};
use crate::logging::init_logging;
use crate::runtime::RuntimeBuilder;

/// Executes the `run` command to start the publisher.
///
/// The configuration is loaded before logging is installed so that its
/// `logging` section applies; load failures are reported on stderr.
pub async fn run(cli: &Cli, args: RunArgs) -> BinResult<()> {
    let config = uapub_config::load_config(&cli.config).map_err(|e| {
        BinError::from(e).with_context(format!(
            "Failed to load config from {}",
            cli.config.display()
        ))
    })?;

    init_logging(
        cli.effective_log_level(config.logging.level.as_str()),
        cli.effective_log_format(config.logging.format),
    )?;
    info!(config = %cli.config.display(), "Configuration loaded");

    let mut builder = RuntimeBuilder::new().config(config);
    if let Some(nodes) = args.nodes {
        builder = builder.node_config_path(nodes);
    }

    builder.build()?.run().await
}
