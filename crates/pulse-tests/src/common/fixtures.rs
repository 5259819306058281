// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Pre-built test data.

use chrono::{DateTime, Duration, Utc};

use pulse_core::address::{AddressConfig, ScalingConfig};
use pulse_core::types::{
    ByteOrder, DataPoint, DataQuality, DataType, DeviceId, Protocol, RegisterType, Settings,
};
use pulse_core::Device;

// =============================================================================
// Devices
// =============================================================================

/// A Modbus TCP device with `address_count` sequential holding registers.
pub fn modbus_device(id: i64, address_count: usize) -> Device {
    let addresses = (0..address_count)
        .map(|i| {
            AddressConfig::new(format!("{}", 40001 + i))
                .with_data_type(DataType::Int16)
        })
        .collect();
    Device {
        id: DeviceId::new(id),
        name: format!("plc-{:02}", id),
        protocol: Protocol::ModbusTcp,
        host: "127.0.0.1".to_string(),
        port: 502,
        byte_order: ByteOrder::default(),
        addresses,
        group_id: None,
    }
}

/// Same device shape, placed in a priority group.
pub fn grouped_device(id: i64, group_id: i64) -> Device {
    let mut device = modbus_device(id, 1);
    device.group_id = Some(group_id);
    device
}

/// A FINS device reading two Data-area words.
pub fn fins_device(id: i64) -> Device {
    Device {
        id: DeviceId::new(id),
        name: format!("omron-{:02}", id),
        protocol: Protocol::OmronFins,
        host: "127.0.0.1".to_string(),
        port: 9600,
        byte_order: ByteOrder::default(),
        addresses: vec![
            AddressConfig::new("D100"),
            AddressConfig::new("D102").with_data_type(DataType::Float),
        ],
        group_id: None,
    }
}

// =============================================================================
// Addresses
// =============================================================================

/// An address with linear scaling 0..4000 raw -> 0.0..100.0 engineering.
pub fn scaled_address(address: &str) -> AddressConfig {
    AddressConfig::new(address).with_scaling(ScalingConfig {
        enabled: true,
        input_min: 0.0,
        input_max: 4000.0,
        output_min: 0.0,
        output_max: 100.0,
    })
}

// =============================================================================
// Settings
// =============================================================================

/// Default settings with a specific connection cap.
pub fn settings_with_cap(max_concurrent_connections: usize) -> Settings {
    Settings {
        max_concurrent_connections,
        ..Settings::default()
    }
}

// =============================================================================
// Stored points
// =============================================================================

/// A fully populated stored point for seeding the memory store.
pub fn point_at(device: &Device, key: &str, value: f64, timestamp: DateTime<Utc>) -> DataPoint {
    DataPoint {
        device_id: device.id,
        device_name: device.name.clone(),
        key: key.to_string(),
        address: key.to_string(),
        raw_value: value,
        scaled_value: value,
        quality: DataQuality::Good,
        response_time_ms: 5.0,
        timestamp,
        station_id: 1,
        register_type: RegisterType::Holding,
        function_code: 3,
        data_type: DataType::Int16,
        unit: String::new(),
        byte_order: ByteOrder::default(),
    }
}

/// `count` evenly spaced points for one key, `step_secs` apart, ending
/// at `end`.
pub fn even_series(
    device: &Device,
    key: &str,
    value: f64,
    count: usize,
    step_secs: i64,
    end: DateTime<Utc>,
) -> Vec<DataPoint> {
    (0..count)
        .map(|i| {
            let ts = end - Duration::seconds(step_secs * (count - 1 - i) as i64);
            point_at(device, key, value, ts)
        })
        .collect()
}
