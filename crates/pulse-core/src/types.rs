// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for the PULSE collector.
//!
//! This module defines the identifiers, enumerations, and value-carrying
//! records shared across the collector:
//!
//! - [`DeviceId`]: unique device identifier
//! - [`Protocol`]: supported wire protocols
//! - [`DataType`] / [`ByteOrder`]: typed-read configuration
//! - [`DataPoint`]: one scaled reading bound for the time-series store
//! - [`CollectLog`]: per-poll-attempt audit record
//! - [`ConnectionStatus`]: device connectivity state
//! - [`Settings`]: live-reloadable collector settings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for a device in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub i64);

impl DeviceId {
    /// Creates a new device ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DeviceId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Protocol
// =============================================================================

/// Wire protocols supported by the collector.
///
/// The handler abstraction is extensible; these are the protocol families
/// with a shipped implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Modbus over plain TCP (MBAP framing).
    ModbusTcp,
    /// Modbus RTU framing tunneled over TCP, typically fronting a serial
    /// multi-drop bus where several stations share one socket.
    ModbusRtuOverTcp,
    /// Omron FINS over TCP.
    OmronFins,
    /// Siemens S7 over ISO-on-TCP.
    SiemensS7,
}

impl Protocol {
    /// Returns true when multiple station IDs are multiplexed over a single
    /// transport connection, requiring station-qualified storage keys.
    pub fn is_station_multiplexed(&self) -> bool {
        matches!(self, Self::ModbusRtuOverTcp)
    }

    /// Protocol name as stored in the registry snapshot.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModbusTcp => "modbus_tcp",
            Self::ModbusRtuOverTcp => "modbus_rtu_over_tcp",
            Self::OmronFins => "omron_fins",
            Self::SiemensS7 => "siemens_s7",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "modbus_tcp" | "modbustcp" | "modbus" => Ok(Self::ModbusTcp),
            "modbus_rtu_over_tcp" | "modbusrtuovertcp" | "modbus_rtu" => {
                Ok(Self::ModbusRtuOverTcp)
            }
            "omron_fins" | "omron" | "fins" => Ok(Self::OmronFins),
            "siemens_s7" | "siemens" | "s7" => Ok(Self::SiemensS7),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

// =============================================================================
// Typed-read configuration
// =============================================================================

/// Semantic data type of one configured address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Single bit / coil.
    Bool,
    /// Signed 16-bit integer (one register). Default when unspecified.
    #[default]
    Int16,
    /// Unsigned 16-bit integer (one register).
    UInt16,
    /// Signed 32-bit integer (two registers).
    Int32,
    /// Unsigned 32-bit integer (two registers).
    UInt32,
    /// IEEE-754 single-precision float (two registers).
    Float,
    /// Character string; coerced to a numeric value after read.
    String,
}

impl DataType {
    /// Number of 16-bit registers one value of this type occupies.
    ///
    /// Strings use a configured length; this returns the default word count.
    pub fn register_count(&self) -> u16 {
        match self {
            Self::Bool | Self::Int16 | Self::UInt16 => 1,
            Self::Int32 | Self::UInt32 | Self::Float => 2,
            Self::String => 5,
        }
    }

    /// Lowercase name as used in stored point tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Float => "float",
            Self::String => "string",
        }
    }
}

/// Byte/word ordering convention for multi-register numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Big-endian bytes, high word first.
    #[serde(rename = "ABCD")]
    Abcd,
    /// Byte-swapped within words, high word first.
    #[serde(rename = "BADC")]
    Badc,
    /// Big-endian bytes, low word first. Default for the device families
    /// this collector targets.
    #[default]
    #[serde(rename = "CDAB")]
    Cdab,
    /// Little-endian bytes, low word first.
    #[serde(rename = "DCBA")]
    Dcba,
}

impl ByteOrder {
    /// Uppercase name as used in config files and stored point tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abcd => "ABCD",
            Self::Badc => "BADC",
            Self::Cdab => "CDAB",
            Self::Dcba => "DCBA",
        }
    }
}

impl std::str::FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ABCD" => Ok(Self::Abcd),
            "BADC" => Ok(Self::Badc),
            "CDAB" => Ok(Self::Cdab),
            "DCBA" => Ok(Self::Dcba),
            other => Err(format!("unknown byte order: {}", other)),
        }
    }
}

/// Modbus register class, resolved from the numeric address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    /// 1-9999: coils, function 01, writable bool.
    Coil,
    /// 10001-19999: discrete inputs, function 02, read-only.
    DiscreteInput,
    /// 30001-39999: input registers, function 04, read-only.
    InputRegister,
    /// 40001-49999 and bare numeric addresses: holding registers, function 03.
    #[default]
    Holding,
}

impl RegisterType {
    /// Modbus function code for reads of this class.
    pub fn function_code(&self) -> u8 {
        match self {
            Self::Coil => 1,
            Self::DiscreteInput => 2,
            Self::InputRegister => 4,
            Self::Holding => 3,
        }
    }

    /// Whether this class accepts writes.
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::Holding)
    }

    /// Snake-case name as used in stored point tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete_input",
            Self::InputRegister => "input_register",
            Self::Holding => "holding",
        }
    }
}

// =============================================================================
// Data quality
// =============================================================================

/// Quality marker attached to each stored point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    /// Value read and decoded successfully.
    Good,
    /// Value could not be trusted (decode failure, device rejection).
    Bad,
}

impl DataQuality {
    /// Tag value as written to the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Bad => "bad",
        }
    }
}

// =============================================================================
// DataPoint
// =============================================================================

/// One scaled reading, produced once per successful read per poll cycle.
///
/// Points are append-only: written immediately or buffered into a batch,
/// never mutated after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Owning device.
    pub device_id: DeviceId,
    /// Device display name (denormalized into tags for query convenience).
    pub device_name: String,
    /// Storage key: the bare address, or `{address}_s{station}` when the
    /// transport multiplexes stations.
    pub key: String,
    /// Configured address string as read.
    pub address: String,
    /// Raw register value before scaling.
    pub raw_value: f64,
    /// Engineering-unit value after scaling.
    pub scaled_value: f64,
    /// Read quality.
    pub quality: DataQuality,
    /// Wall-clock duration of the device read, in milliseconds.
    pub response_time_ms: f64,
    /// Point timestamp.
    pub timestamp: DateTime<Utc>,
    /// Station ID the value was read from.
    pub station_id: u8,
    /// Modbus register class (holding for non-Modbus protocols).
    pub register_type: RegisterType,
    /// Function code used for the read.
    pub function_code: u8,
    /// Configured data type.
    pub data_type: DataType,
    /// Engineering unit label.
    pub unit: String,
    /// Byte order the value was decoded with.
    pub byte_order: ByteOrder,
}

// =============================================================================
// CollectLog
// =============================================================================

/// Outcome of one poll attempt for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectOutcome {
    /// At least one address was read and persisted.
    Success,
    /// The device responded but no usable data was produced.
    Failed,
    /// The attempt died on a network or internal error.
    Error,
}

impl CollectOutcome {
    /// Lowercase name as recorded in the log entry.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

/// Audit record written once per poll attempt per device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectLog {
    /// Device the attempt targeted.
    pub device_id: DeviceId,
    /// Attempt outcome.
    pub outcome: CollectOutcome,
    /// Free-text detail (read counts, error message).
    pub message: String,
    /// End-to-end attempt duration in milliseconds.
    pub response_time_ms: f64,
    /// Attempt timestamp.
    pub timestamp: DateTime<Utc>,
}

impl CollectLog {
    /// Creates a log entry stamped with the current time.
    pub fn new(
        device_id: DeviceId,
        outcome: CollectOutcome,
        message: impl Into<String>,
        response_time_ms: f64,
    ) -> Self {
        Self {
            device_id,
            outcome,
            message: message.into(),
            response_time_ms,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// ConnectionStatus
// =============================================================================

/// Connectivity state of one device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No session; never attempted or explicitly torn down.
    Disconnected,
    /// Session establishment in flight.
    Connecting,
    /// Live session.
    Connected,
    /// Last attempt failed; waiting out the backoff window.
    Backoff,
}

impl ConnectionStatus {
    /// True only for a live session.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Lowercase name for status surfaces.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Live-reloadable collector settings.
///
/// Loaded from the settings store and pushed into the scheduler via an
/// explicit reload call; there is no ambient global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Poll cycle period in seconds.
    pub collect_interval_seconds: u64,
    /// Session establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-request receive timeout in milliseconds.
    pub receive_timeout_ms: u64,
    /// Upper bound on simultaneously connected devices.
    pub max_concurrent_connections: usize,
    /// Stored-data retention horizon in days.
    pub data_retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            collect_interval_seconds: default_collect_interval(),
            connect_timeout_ms: default_connect_timeout(),
            receive_timeout_ms: default_receive_timeout(),
            max_concurrent_connections: default_max_connections(),
            data_retention_days: default_retention_days(),
        }
    }
}

fn default_collect_interval() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_receive_timeout() -> u64 {
    10_000
}

fn default_max_connections() -> usize {
    100
}

fn default_retention_days() -> u32 {
    30
}

impl Settings {
    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }

    /// Receive timeout as a `Duration`.
    pub fn receive_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.receive_timeout_ms)
    }

    /// Poll period as a `Duration`.
    pub fn collect_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.collect_interval_seconds)
    }
}

// =============================================================================
// Tests
// =============================================================================
