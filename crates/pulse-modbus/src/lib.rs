// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # pulse-modbus
//!
//! Modbus protocol handler for the PULSE collector, covering plain Modbus
//! TCP and RTU-over-TCP gateways. Built on `tokio-modbus`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod handler;

pub use handler::{ModbusHandler, ModbusHandlerFactory, STATION_SETTLE};
