// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! On-disk schema for the device registry file.
//!
//! The registry accepts two address shapes side by side: the canonical
//! object form and the legacy bare string form older deployments wrote.
//! Legacy strings are normalized into full configs at load time, so the
//! rest of the system only ever sees [`AddressConfig`].

use serde::Deserialize;

use pulse_core::address::AddressConfig;
use pulse_core::device::Device;
use pulse_core::error::ConfigError;
use pulse_core::types::{ByteOrder, DeviceId, Protocol};

// =============================================================================
// Address entries
// =============================================================================

/// One address entry as it appears in the registry file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AddressEntry {
    /// Canonical object form.
    Canonical(AddressConfig),
    /// Legacy bare address string.
    Legacy(String),
}

impl AddressEntry {
    /// Normalizes into the canonical config. `index` seeds the generated
    /// ID/name for legacy entries.
    pub fn normalize(self, index: usize) -> AddressConfig {
        match self {
            Self::Canonical(config) => config,
            Self::Legacy(address) => AddressConfig::from_legacy(index, address),
        }
    }
}

// =============================================================================
// Device entries
// =============================================================================

fn default_enabled() -> bool {
    true
}

/// One device entry as it appears in the registry file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    /// Registry identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Protocol name; aliases like `modbus` or `s7` are accepted.
    pub protocol: String,
    /// Network host.
    pub host: String,
    /// Network port.
    pub port: u16,
    /// Device-level byte order.
    #[serde(default)]
    pub byte_order: Option<String>,
    /// Address list, canonical or legacy form.
    #[serde(default)]
    pub addresses: Vec<AddressEntry>,
    /// Group key for connection-cap prioritization.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Disabled devices are skipped by the collector but kept on file.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl DeviceEntry {
    /// Converts to the runtime device model, normalizing legacy addresses
    /// and resolving protocol/byte-order names.
    pub fn into_device(self) -> Result<Device, ConfigError> {
        let protocol: Protocol = self.protocol.parse().map_err(|e: String| {
            ConfigError::invalid(format!("device {} ({}): {}", self.id, self.name, e))
        })?;

        let byte_order = match self.byte_order {
            Some(raw) => raw.parse::<ByteOrder>().map_err(|e| {
                ConfigError::invalid(format!("device {} ({}): {}", self.id, self.name, e))
            })?,
            None => ByteOrder::default(),
        };

        let addresses = self
            .addresses
            .into_iter()
            .enumerate()
            .map(|(i, entry)| entry.normalize(i))
            .collect();

        Ok(Device {
            id: DeviceId::new(self.id),
            name: self.name,
            protocol,
            host: self.host,
            port: self.port,
            byte_order,
            addresses,
            group_id: self.group_id,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::types::DataType;

    #[test]
    fn test_mixed_address_forms() {
        let json = r#"{
            "id": 1,
            "name": "press-01",
            "protocol": "modbus_tcp",
            "host": "10.0.0.5",
            "port": 502,
            "addresses": [
                "40001",
                {"address": "40003", "type": "float", "name": "temp"}
            ]
        }"#;
        let entry: DeviceEntry = serde_json::from_str(json).unwrap();
        assert!(entry.enabled);

        let device = entry.into_device().unwrap();
        assert_eq!(device.addresses.len(), 2);
        // Legacy string got normalized with generated id/name.
        assert_eq!(device.addresses[0].id, "legacy_0");
        assert_eq!(device.addresses[0].name, "address_1");
        assert_eq!(device.addresses[0].data_type, DataType::Int16);
        assert_eq!(device.addresses[1].name, "temp");
        assert_eq!(device.addresses[1].data_type, DataType::Float);
    }

    #[test]
    fn test_protocol_aliases_accepted() {
        let json = r#"{"id": 2, "name": "x", "protocol": "s7", "host": "h", "port": 102}"#;
        let device: Device = serde_json::from_str::<DeviceEntry>(json)
            .unwrap()
            .into_device()
            .unwrap();
        assert_eq!(device.protocol, Protocol::SiemensS7);
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let json = r#"{"id": 2, "name": "x", "protocol": "profinet", "host": "h", "port": 102}"#;
        let err = serde_json::from_str::<DeviceEntry>(json)
            .unwrap()
            .into_device()
            .unwrap_err();
        assert!(err.to_string().contains("profinet"));
    }

    #[test]
    fn test_byte_order_resolution() {
        let json = r#"{
            "id": 3, "name": "x", "protocol": "modbus_tcp",
            "host": "h", "port": 502, "byteOrder": "abcd"
        }"#;
        let device: Device = serde_json::from_str::<DeviceEntry>(json)
            .unwrap()
            .into_device()
            .unwrap();
        assert_eq!(device.byte_order, ByteOrder::Abcd);
    }

    #[test]
    fn test_disabled_flag() {
        let json = r#"{
            "id": 4, "name": "x", "protocol": "modbus_tcp",
            "host": "h", "port": 502, "enabled": false
        }"#;
        let entry: DeviceEntry = serde_json::from_str(json).unwrap();
        assert!(!entry.enabled);
    }
}
