// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

/// Executes the `version` command to display version information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("uapub - OPC UA edge telemetry publisher");
    println!();
    println!("Version Information:");
    println!("  uapub-bin:    {}", env!("CARGO_PKG_VERSION"));
    println!("  uapub-core:   {}", uapub_core::VERSION);
    println!("  uapub-opcua:  {}", uapub_opcua::VERSION);
    println!("  uapub-buffer: {}", uapub_buffer::VERSION);
    println!("  uapub-config: {}", uapub_config::VERSION);
    println!();
    println!("Build Information:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
    println!();
    println!("Features:");
    println!(
        "  OPC UA client: {}",
        if cfg!(feature = "real-transport") { "enabled" } else { "disabled" }
    );
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
