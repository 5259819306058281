// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # pulse-config
//!
//! File-backed configuration for the PULSE collector: the `devices.json`
//! registry schema (canonical and legacy address forms), settings loading
//! with defaults, and the [`FileRegistry`] the collector polls from.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod loader;
pub mod registry;
pub mod schema;

pub use loader::{
    load_devices, load_settings, parse_devices, validate_devices, validate_settings,
    DEVICES_FILE, SETTINGS_FILE,
};
pub use registry::FileRegistry;
pub use schema::{AddressEntry, DeviceEntry};
