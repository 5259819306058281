// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use std::collections::BTreeMap;

use pulse_config::{load_devices, load_settings, DEVICES_FILE, SETTINGS_FILE};

use crate::cli::{Cli, ValidateArgs};
use crate::error::BinResult;

/// Executes the `validate` command against the configuration directory.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let devices_path = cli.config_dir.join(DEVICES_FILE);
    let settings_path = cli.config_dir.join(SETTINGS_FILE);

    println!("Validating {}", cli.config_dir.display());

    let devices = load_devices(&devices_path)?;
    let settings = load_settings(&settings_path)?;

    let mut by_protocol: BTreeMap<&str, usize> = BTreeMap::new();
    let mut address_count = 0usize;
    for device in &devices {
        *by_protocol.entry(device.protocol.as_str()).or_default() += 1;
        address_count += device.addresses.len();
    }

    println!();
    println!("Devices: {} ({} addresses)", devices.len(), address_count);
    for (protocol, count) in &by_protocol {
        println!("  {:<22} {}", protocol, count);
    }

    println!();
    println!("Settings:");
    println!("  collectIntervalSeconds:    {}", settings.collect_interval_seconds);
    println!("  connectTimeoutMs:          {}", settings.connect_timeout_ms);
    println!("  receiveTimeoutMs:          {}", settings.receive_timeout_ms);
    println!("  maxConcurrentConnections:  {}", settings.max_concurrent_connections);
    println!("  dataRetentionDays:         {}", settings.data_retention_days);

    if args.show_devices {
        println!();
        for device in &devices {
            println!(
                "  [{}] {} {} {} ({} addresses)",
                device.id,
                device.name,
                device.protocol.as_str(),
                device.endpoint(),
                device.addresses.len()
            );
        }
    }

    println!();
    println!("Configuration is valid.");
    Ok(())
}
