// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

/// Executes the `version` command to display version information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("PULSE - PLC polling and anomaly engine");
    println!();
    println!("Version Information:");
    println!("  pulse-bin:  {}", env!("CARGO_PKG_VERSION"));
    println!("  pulse-core: {}", pulse_core::VERSION);
    println!();
    println!("Supported Protocols:");
    println!("  modbus_tcp          Modbus TCP (MBAP framing)");
    println!("  modbus_rtu_over_tcp Modbus RTU tunneled over TCP");
    println!("  omron_fins          Omron FINS/TCP");
    println!("  siemens_s7          Siemens S7comm over ISO-on-TCP");
    println!();
    println!("Build Information:");
    println!("  Target: {}", std::env::consts::ARCH);
    println!("  OS:     {}", std::env::consts::OS);
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
