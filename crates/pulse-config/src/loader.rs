// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Loading and validation of the registry and settings files.
//!
//! `devices.json` is a JSON array of device entries; `settings.json` holds
//! the collector settings and falls back to defaults when absent, so a
//! fresh deployment only needs the device file.

use std::path::Path;

use tracing::{info, warn};

use pulse_core::device::Device;
use pulse_core::error::ConfigError;
use pulse_core::types::Settings;

use crate::schema::DeviceEntry;

/// Conventional registry file name.
pub const DEVICES_FILE: &str = "devices.json";

/// Conventional settings file name.
pub const SETTINGS_FILE: &str = "settings.json";

/// Parses registry bytes into enabled devices, validating the result.
pub fn parse_devices(bytes: &[u8]) -> Result<Vec<Device>, ConfigError> {
    let entries: Vec<DeviceEntry> = serde_json::from_slice(bytes)?;
    let total = entries.len();

    let devices: Vec<Device> = entries
        .into_iter()
        .filter(|e| e.enabled)
        .map(DeviceEntry::into_device)
        .collect::<Result<_, _>>()?;

    if devices.len() < total {
        info!(
            enabled = devices.len(),
            disabled = total - devices.len(),
            "disabled devices skipped"
        );
    }
    validate_devices(&devices)?;
    Ok(devices)
}

/// Structural validation beyond what serde enforces.
pub fn validate_devices(devices: &[Device]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for device in devices {
        if !seen.insert(device.id) {
            return Err(ConfigError::invalid(format!(
                "duplicate device id {}",
                device.id
            )));
        }
        if device.name.trim().is_empty() {
            return Err(ConfigError::invalid(format!(
                "device {} has an empty name",
                device.id
            )));
        }
        if device.host.trim().is_empty() {
            return Err(ConfigError::invalid(format!(
                "device {} ({}) has an empty host",
                device.id, device.name
            )));
        }
        if device.port == 0 {
            return Err(ConfigError::invalid(format!(
                "device {} ({}) has port 0",
                device.id, device.name
            )));
        }
        if device.addresses.is_empty() {
            warn!(device = %device.name, "device has no addresses configured");
        }
    }
    Ok(())
}

/// Loads the device registry from disk.
pub fn load_devices(path: &Path) -> Result<Vec<Device>, ConfigError> {
    let bytes = std::fs::read(path)?;
    let devices = parse_devices(&bytes)?;
    info!(path = %path.display(), devices = devices.len(), "device registry loaded");
    Ok(devices)
}

/// Loads collector settings from disk; a missing file yields defaults.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }
        Err(err) => return Err(err.into()),
    };
    let settings: Settings = serde_json::from_slice(&bytes)?;
    validate_settings(&settings)?;
    info!(path = %path.display(), "settings loaded");
    Ok(settings)
}

/// Rejects settings that would stall or flood the collector.
pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.collect_interval_seconds == 0 {
        return Err(ConfigError::invalid("collectIntervalSeconds must be >= 1"));
    }
    if settings.connect_timeout_ms == 0 || settings.receive_timeout_ms == 0 {
        return Err(ConfigError::invalid("timeouts must be >= 1ms"));
    }
    if settings.max_concurrent_connections == 0 {
        return Err(ConfigError::invalid("maxConcurrentConnections must be >= 1"));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices_filters_disabled() {
        let json = r#"[
            {"id": 1, "name": "a", "protocol": "modbus_tcp", "host": "h", "port": 502,
             "addresses": ["40001"]},
            {"id": 2, "name": "b", "protocol": "modbus_tcp", "host": "h", "port": 502,
             "enabled": false}
        ]"#;
        let devices = parse_devices(json.as_bytes()).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "a");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let json = r#"[
            {"id": 1, "name": "a", "protocol": "modbus_tcp", "host": "h", "port": 502},
            {"id": 1, "name": "b", "protocol": "modbus_tcp", "host": "h", "port": 502}
        ]"#;
        let err = parse_devices(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_port_zero_rejected() {
        let json = r#"[{"id": 1, "name": "a", "protocol": "modbus_tcp", "host": "h", "port": 0}]"#;
        assert!(parse_devices(json.as_bytes()).is_err());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = parse_devices(b"not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        assert!(validate_settings(&settings).is_ok());

        settings.collect_interval_seconds = 0;
        assert!(validate_settings(&settings).is_err());

        settings = Settings::default();
        settings.max_concurrent_connections = 0;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_missing_settings_file_defaults() {
        let path = std::env::temp_dir().join("pulse-test-no-such-settings.json");
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
