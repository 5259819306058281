// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Device model and the registry snapshot contract.
//!
//! A [`Device`] is immutable during a poll cycle; the collector refreshes
//! its view by re-fetching the snapshot from a [`DeviceRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::AddressConfig;
use crate::error::ConfigError;
use crate::types::{ByteOrder, DeviceId, Protocol};

/// Ordering key assigned to devices without a group, sorting them after
/// every grouped device.
pub const UNGROUPED_PRIORITY: i64 = 999;

// =============================================================================
// Device
// =============================================================================

/// One device from the registry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Registry identifier.
    pub id: DeviceId,
    /// Display name.
    pub name: String,
    /// Wire protocol.
    pub protocol: Protocol,
    /// Network host (IP or DNS name).
    pub host: String,
    /// Network port.
    pub port: u16,
    /// Device-level byte order; per-address configs may override.
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Addresses collected from this device.
    #[serde(default)]
    pub addresses: Vec<AddressConfig>,
    /// Group key for connection-cap prioritization.
    #[serde(default)]
    pub group_id: Option<i64>,
}

impl Device {
    /// `host:port` endpoint string.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Sort key for the connection cap: group first (ungrouped last),
    /// then registry id.
    pub fn priority_key(&self) -> (i64, i64) {
        (self.group_id.unwrap_or(UNGROUPED_PRIORITY), self.id.value())
    }

    /// Distinct station IDs referenced by this device's addresses, sorted.
    pub fn station_ids(&self) -> Vec<u8> {
        let mut stations: Vec<u8> = self.addresses.iter().map(|a| a.station_id).collect();
        stations.sort_unstable();
        stations.dedup();
        if stations.is_empty() {
            stations.push(1);
        }
        stations
    }
}

// =============================================================================
// DeviceRegistry
// =============================================================================

/// Read-only view of the device registry, consumed as a snapshot.
///
/// The CRUD surface that maintains the registry is an external collaborator;
/// the collector only ever lists active devices and re-lists on reload.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Returns every device currently enabled for collection.
    async fn list_active_devices(&self) -> Result<Vec<Device>, ConfigError>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: i64, group: Option<i64>) -> Device {
        Device {
            id: DeviceId::new(id),
            name: format!("dev-{}", id),
            protocol: Protocol::ModbusTcp,
            host: "10.0.0.1".to_string(),
            port: 502,
            byte_order: ByteOrder::default(),
            addresses: Vec::new(),
            group_id: group,
        }
    }

    #[test]
    fn test_priority_ordering() {
        let mut devices = vec![device(3, None), device(2, Some(1)), device(1, Some(2))];
        devices.sort_by_key(Device::priority_key);

        let ids: Vec<i64> = devices.iter().map(|d| d.id.value()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_station_ids_sorted_unique() {
        let mut dev = device(1, None);
        dev.addresses = vec![
            AddressConfig::new("40001").with_station(3),
            AddressConfig::new("40002").with_station(1),
            AddressConfig::new("40003").with_station(3),
        ];
        assert_eq!(dev.station_ids(), vec![1, 3]);

        let empty = device(2, None);
        assert_eq!(empty.station_ids(), vec![1]);
    }

    #[test]
    fn test_device_json_shape() {
        let json = r#"{
            "id": 5,
            "name": "press-01",
            "protocol": "modbus_rtu_over_tcp",
            "host": "192.168.0.40",
            "port": 502,
            "byteOrder": "ABCD",
            "groupId": 2,
            "addresses": [{"address": "40001"}]
        }"#;
        let dev: Device = serde_json::from_str(json).unwrap();
        assert_eq!(dev.protocol, Protocol::ModbusRtuOverTcp);
        assert_eq!(dev.byte_order, ByteOrder::Abcd);
        assert_eq!(dev.group_id, Some(2));
        assert_eq!(dev.endpoint(), "192.168.0.40:502");
    }
}
