// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # pulse-core
//!
//! Core abstractions and shared types for the PULSE PLC collector.
//!
//! This crate provides the foundations used across all PULSE components:
//!
//! - **Types**: `DeviceId`, `Protocol`, `DataPoint`, `Settings`, ...
//! - **Address**: per-address collection config, scaling, storage keys
//! - **Convert**: 16-bit word codec honoring byte order and word swap
//! - **Error**: unified error hierarchy with network classification
//! - **Handler**: the `ProtocolHandler` trait plus factory/registry
//! - **Connection**: per-device lifecycle with exponential backoff
//! - **Store**: time-series write/query/retention contracts
//! - **Device**: device model and the registry snapshot contract
//!
//! ## Example
//!
//! ```rust,ignore
//! use pulse_core::{DeviceConnection, HandlerRegistry, Settings};
//!
//! let registry = HandlerRegistry::new();
//! registry.register(Box::new(pulse_modbus::ModbusHandlerFactory::tcp()));
//!
//! let handler = registry.create(&device, &Settings::default())?;
//! let connection = DeviceConnection::new(device, handler, store);
//! connection.ensure_connected().await;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod address;
pub mod convert;
pub mod error;
pub mod types;

// =============================================================================
// Handler & Connection Modules
// =============================================================================

pub mod connection;
pub mod device;
pub mod handler;

// =============================================================================
// Store Contracts
// =============================================================================

pub mod store;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use address::{AddressConfig, ScalingConfig};
pub use convert::{decode_registers, encode_registers, register_count};
pub use connection::{
    backoff_delay, ConnectOutcome, ConnectionSnapshot, DeviceConnection, BACKOFF_CAP_SECS,
};
pub use device::{Device, DeviceRegistry, UNGROUPED_PRIORITY};
pub use error::{
    is_network_error_message, ConfigError, HandlerError, PulseError, PulseResult, StoreError,
};
pub use handler::{
    validate_write, HandlerFactory, HandlerRegistry, ProtocolHandler, ReadBatch, ReadFailure,
    MAX_WRITE_ADDRESS_LEN, MAX_WRITE_MAGNITUDE,
};
pub use store::{
    CommError, CommErrorType, RetentionStore, Severity, StoredPoint, TimeSeriesReader,
    TimeSeriesStore, TimeSeriesWriter, MEASUREMENT_COMM_ERRORS, MEASUREMENT_PLC_DATA,
};
pub use types::{
    ByteOrder, CollectLog, CollectOutcome, ConnectionStatus, DataPoint, DataQuality, DataType,
    DeviceId, Protocol, RegisterType, Settings,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
