// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-address collection configuration.
//!
//! Each device carries a list of [`AddressConfig`] entries describing what to
//! read and how to interpret it: the address string, the semantic data type,
//! station/function-code routing, byte ordering, and the raw-to-engineering
//! scaling spec. Legacy registries stored bare address strings; those are
//! normalized into the canonical shape at load time via
//! [`AddressConfig::from_legacy`].

use serde::{Deserialize, Serialize};

use crate::types::{ByteOrder, DataType, RegisterType};

// =============================================================================
// ScalingConfig
// =============================================================================

/// Linear min-max scaling spec for one address.
///
/// When enabled, a raw reading is mapped as
/// `out_min + (raw - in_min) * (out_max - out_min) / (in_max - in_min)`.
/// A degenerate input range (`input_max == input_min`) passes the raw value
/// through unscaled rather than dividing by zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScalingConfig {
    /// Whether linear scaling applies.
    pub enabled: bool,
    /// Raw-range lower bound.
    pub input_min: f64,
    /// Raw-range upper bound.
    pub input_max: f64,
    /// Engineering-range lower bound.
    pub output_min: f64,
    /// Engineering-range upper bound.
    pub output_max: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            input_min: 0.0,
            input_max: 100.0,
            output_min: 0.0,
            output_max: 10.0,
        }
    }
}

// =============================================================================
// AddressConfig
// =============================================================================

/// Canonical configuration for one collected address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressConfig {
    /// Stable identifier within the device's address list.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Protocol address string ("40001", "D100", "DB1.DBW0", ...).
    pub address: String,
    /// Semantic type driving the typed read.
    #[serde(rename = "type", default)]
    pub data_type: DataType,
    /// Engineering unit label.
    #[serde(default)]
    pub unit: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Station ID; overrides the device default when the transport
    /// multiplexes stations.
    #[serde(default = "default_station_id")]
    pub station_id: u8,
    /// Configured Modbus function code hint.
    #[serde(default = "default_function_code")]
    pub function_code: u8,
    /// Modbus register class hint; the numeric address range wins when the
    /// two disagree.
    #[serde(default)]
    pub register_type: RegisterType,
    /// Byte/word ordering for multi-register values.
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Swap the two words of a 32-bit value after byte ordering.
    #[serde(default)]
    pub word_swap: bool,
    /// Desired scan rate hint in milliseconds (best-effort only).
    #[serde(default = "default_scan_rate")]
    pub scan_rate: u64,
    /// Linear scaling spec.
    #[serde(default)]
    pub scaling: ScalingConfig,
    /// Simple multiplier; takes precedence over `scaling` when set and != 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// Character count for string reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_length: Option<u16>,
}

fn default_station_id() -> u8 {
    1
}

fn default_function_code() -> u8 {
    3
}

fn default_scan_rate() -> u64 {
    1_000
}

impl AddressConfig {
    /// Creates a config with canonical defaults for the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            address: address.into(),
            data_type: DataType::default(),
            unit: String::new(),
            description: String::new(),
            station_id: default_station_id(),
            function_code: default_function_code(),
            register_type: RegisterType::default(),
            byte_order: ByteOrder::default(),
            word_swap: false,
            scan_rate: default_scan_rate(),
            scaling: ScalingConfig::default(),
            scale: None,
            string_length: None,
        }
    }

    /// Normalizes a legacy bare-string address entry into the canonical
    /// shape, as older registries stored plain address lists.
    pub fn from_legacy(index: usize, address: impl Into<String>) -> Self {
        let mut config = Self::new(address);
        config.id = format!("legacy_{}", index);
        config.name = format!("address_{}", index + 1);
        config
    }

    /// Sets the data type (builder style).
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Sets the station ID (builder style).
    pub fn with_station(mut self, station_id: u8) -> Self {
        self.station_id = station_id;
        self
    }

    /// Sets the scaling spec (builder style).
    pub fn with_scaling(mut self, scaling: ScalingConfig) -> Self {
        self.scaling = scaling;
        self
    }

    /// Storage key for this address on the given transport.
    ///
    /// Station-multiplexed transports (RTU-over-TCP) qualify the key with
    /// the station so two stations sharing an address string never collide
    /// in the store; plain TCP variants use the bare address.
    pub fn storage_key(&self, station_multiplexed: bool) -> String {
        if station_multiplexed {
            format!("{}_s{}", self.address, self.station_id)
        } else {
            self.address.clone()
        }
    }

    /// Address parsed as a plain number, when it is one.
    pub fn numeric_address(&self) -> Option<u32> {
        self.address.trim().parse::<u32>().ok()
    }

    /// Resolves the Modbus register class and zero-based register offset
    /// from the numeric address range:
    ///
    /// - 1-9999: coil (function 01), offset `addr - 1`
    /// - 10001-19999: discrete input (function 02), offset `addr - 10001`
    /// - 30001-39999: input register (function 04), offset `addr - 30001`
    /// - 40001-49999: holding register (function 03), offset `addr - 40001`
    /// - any other bare numeric: holding register at that offset
    pub fn resolve_modbus_class(&self) -> Option<(RegisterType, u16)> {
        let addr = self.numeric_address()?;
        let resolved = match addr {
            1..=9_999 => (RegisterType::Coil, (addr - 1) as u16),
            10_001..=19_999 => (RegisterType::DiscreteInput, (addr - 10_001) as u16),
            30_001..=39_999 => (RegisterType::InputRegister, (addr - 30_001) as u16),
            40_001..=49_999 => (RegisterType::Holding, (addr - 40_001) as u16),
            _ => (RegisterType::Holding, (addr & 0xFFFF) as u16),
        };
        Some(resolved)
    }

    /// Applies the configured scaling to a raw reading.
    ///
    /// Precedence: the simple multiplier when set and not 1.0, else the
    /// linear min-max map when enabled, else the raw value.
    pub fn scale_value(&self, raw: f64) -> f64 {
        if let Some(scale) = self.scale {
            if scale != 1.0 {
                return raw * scale;
            }
        }

        if self.scaling.enabled {
            let in_span = self.scaling.input_max - self.scaling.input_min;
            if in_span == 0.0 {
                return raw;
            }
            let out_span = self.scaling.output_max - self.scaling.output_min;
            return self.scaling.output_min + (raw - self.scaling.input_min) * out_span / in_span;
        }

        raw
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: AddressConfig = serde_json::from_str(r#"{"address": "40001"}"#).unwrap();
        assert_eq!(config.station_id, 1);
        assert_eq!(config.function_code, 3);
        assert_eq!(config.register_type, RegisterType::Holding);
        assert_eq!(config.byte_order, ByteOrder::Cdab);
        assert!(!config.word_swap);
        assert_eq!(config.scan_rate, 1_000);
        assert!(!config.scaling.enabled);
        assert_eq!(config.data_type, DataType::Int16);
    }

    #[test]
    fn test_camel_case_fields() {
        let json = r#"{
            "address": "30010",
            "type": "float",
            "stationId": 7,
            "registerType": "input_register",
            "byteOrder": "ABCD",
            "wordSwap": true,
            "scaling": {"enabled": true, "inputMin": 0, "inputMax": 200, "outputMin": 0, "outputMax": 20}
        }"#;
        let config: AddressConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.data_type, DataType::Float);
        assert_eq!(config.station_id, 7);
        assert_eq!(config.register_type, RegisterType::InputRegister);
        assert_eq!(config.byte_order, ByteOrder::Abcd);
        assert!(config.word_swap);
        assert!(config.scaling.enabled);
        assert_eq!(config.scaling.input_max, 200.0);
    }

    #[test]
    fn test_legacy_normalization() {
        let config = AddressConfig::from_legacy(0, "40001");
        assert_eq!(config.id, "legacy_0");
        assert_eq!(config.address, "40001");
        assert_eq!(config.data_type, DataType::Int16);
        assert_eq!(config.station_id, 1);
    }

    #[test]
    fn test_storage_key_station_qualified() {
        let a = AddressConfig::new("40001").with_station(1);
        let b = AddressConfig::new("40001").with_station(2);

        // Multiplexed transports must keep the two stations apart.
        assert_eq!(a.storage_key(true), "40001_s1");
        assert_eq!(b.storage_key(true), "40001_s2");
        assert_ne!(a.storage_key(true), b.storage_key(true));

        // Plain TCP keeps the bare address.
        assert_eq!(a.storage_key(false), "40001");
    }

    #[test]
    fn test_modbus_class_resolution() {
        let cases = [
            ("1", RegisterType::Coil, 0u16),
            ("9999", RegisterType::Coil, 9_998),
            ("10001", RegisterType::DiscreteInput, 0),
            ("30001", RegisterType::InputRegister, 0),
            ("30500", RegisterType::InputRegister, 499),
            ("40001", RegisterType::Holding, 0),
            ("49999", RegisterType::Holding, 9_998),
            ("25000", RegisterType::Holding, 25_000),
        ];
        for (addr, expected_class, expected_offset) in cases {
            let (class, offset) = AddressConfig::new(addr).resolve_modbus_class().unwrap();
            assert_eq!(class, expected_class, "address {}", addr);
            assert_eq!(offset, expected_offset, "address {}", addr);
        }

        assert!(AddressConfig::new("D100").resolve_modbus_class().is_none());
    }

    #[test]
    fn test_linear_scaling() {
        let config = AddressConfig::new("40001").with_scaling(ScalingConfig {
            enabled: true,
            input_min: 0.0,
            input_max: 100.0,
            output_min: 0.0,
            output_max: 10.0,
        });
        assert_eq!(config.scale_value(50.0), 5.0);
        assert_eq!(config.scale_value(0.0), 0.0);
        assert_eq!(config.scale_value(100.0), 10.0);
    }

    #[test]
    fn test_scaling_degenerate_range_passthrough() {
        let config = AddressConfig::new("40001").with_scaling(ScalingConfig {
            enabled: true,
            input_min: 50.0,
            input_max: 50.0,
            output_min: 0.0,
            output_max: 10.0,
        });
        assert_eq!(config.scale_value(123.0), 123.0);
    }

    #[test]
    fn test_multiplier_precedence() {
        let mut config = AddressConfig::new("40001").with_scaling(ScalingConfig {
            enabled: true,
            input_min: 0.0,
            input_max: 100.0,
            output_min: 0.0,
            output_max: 10.0,
        });
        config.scale = Some(2.0);
        // Multiplier wins over the linear map.
        assert_eq!(config.scale_value(50.0), 100.0);

        // A multiplier of exactly 1.0 defers to the linear map.
        config.scale = Some(1.0);
        assert_eq!(config.scale_value(50.0), 5.0);
    }

    #[test]
    fn test_unscaled_passthrough() {
        let config = AddressConfig::new("40001");
        assert_eq!(config.scale_value(7.5), 7.5);
    }
}
