// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol handler abstraction.
//!
//! One [`ProtocolHandler`] implementation exists per protocol family; the
//! scheduler and pipeline never see protocol-specific code. Concrete wire
//! libraries are swapped in behind this trait without touching either.
//!
//! [`HandlerFactory`] builds handlers from device config without touching
//! the network; [`HandlerRegistry`] maps protocols to factories, mirroring
//! how drivers are registered elsewhere in the stack.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::address::AddressConfig;
use crate::device::Device;
use crate::error::HandlerError;
use crate::types::{Protocol, Settings};

// =============================================================================
// Write validation
// =============================================================================

/// Maximum accepted address-string length for writes.
pub const MAX_WRITE_ADDRESS_LEN: usize = 100;

/// Maximum accepted absolute value for writes.
pub const MAX_WRITE_MAGNITUDE: f64 = 1e10;

/// Validates a write request before any I/O.
///
/// Out-of-bound attempts are rejected as configuration errors without
/// contacting the device.
pub fn validate_write(address: &str, value: f64) -> Result<(), HandlerError> {
    if address.trim().is_empty() {
        return Err(HandlerError::config("write address must not be empty"));
    }
    if address.len() > MAX_WRITE_ADDRESS_LEN {
        return Err(HandlerError::config(format!(
            "write address exceeds {} characters",
            MAX_WRITE_ADDRESS_LEN
        )));
    }
    if !value.is_finite() || value.abs() > MAX_WRITE_MAGNITUDE {
        return Err(HandlerError::config(format!(
            "write value {} outside accepted magnitude {:e}",
            value, MAX_WRITE_MAGNITUDE
        )));
    }
    Ok(())
}

// =============================================================================
// ReadBatch
// =============================================================================

/// One address-scoped read failure within a batch.
#[derive(Debug, Clone)]
pub struct ReadFailure {
    /// The configured address that failed.
    pub address: String,
    /// Station the read targeted.
    pub station_id: u8,
    /// Failure description.
    pub message: String,
    /// True when the failure was network-level rather than a device-side
    /// rejection.
    pub network: bool,
}

/// Result of one batch read over a device's configured addresses.
#[derive(Debug, Clone, Default)]
pub struct ReadBatch {
    /// Value per storage key; `None` marks an address that produced no
    /// usable value this cycle (rejected read, decode failure).
    pub values: HashMap<String, Option<f64>>,
    /// True iff at least one address produced a protocol-level response,
    /// even if every individual read failed. Distinguishes "device
    /// reachable but address invalid" from "device unreachable".
    pub is_online: bool,
    /// Address-scoped failures, for the communication-error stream.
    pub failures: Vec<ReadFailure>,
}

impl ReadBatch {
    /// Creates an empty batch with the given capacity hint.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: HashMap::with_capacity(capacity),
            is_online: false,
            failures: Vec::new(),
        }
    }

    /// Batch representing an unreachable device: every key `None`, offline.
    pub fn offline(configs: &[AddressConfig], station_multiplexed: bool) -> Self {
        let values = configs
            .iter()
            .map(|c| (c.storage_key(station_multiplexed), None))
            .collect();
        Self {
            values,
            is_online: false,
            failures: Vec::new(),
        }
    }

    /// Records a failed address read.
    pub fn record_failure(
        &mut self,
        config: &AddressConfig,
        message: impl Into<String>,
        network: bool,
    ) {
        self.failures.push(ReadFailure {
            address: config.address.clone(),
            station_id: config.station_id,
            message: message.into(),
            network,
        });
    }

    /// Number of addresses that produced a value.
    pub fn read_count(&self) -> usize {
        self.values.values().filter(|v| v.is_some()).count()
    }
}

// =============================================================================
// ProtocolHandler
// =============================================================================

/// Protocol-specific connect/read/write semantics behind one interface.
///
/// Implementations keep their session state behind interior mutability so
/// the owning connection can share the handler across poll cycles and
/// ad-hoc writes; per-device serialization is enforced one level up.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// The protocol this handler speaks.
    fn protocol(&self) -> Protocol;

    /// Establishes the underlying session.
    ///
    /// Failures must carry enough context for network-vs-other
    /// classification (see [`HandlerError::is_network`]).
    async fn connect(&self) -> Result<(), HandlerError>;

    /// Releases the session. Idempotent.
    async fn disconnect(&self);

    /// Whether a session is currently established.
    async fn is_connected(&self) -> bool;

    /// Reads a batch of configured addresses.
    ///
    /// Each address gets a typed read per its config; a string result that
    /// fails numeric coercion yields `None` with a logged warning, never an
    /// error. Addresses are read in configured order. This method does not
    /// fail: an unreachable device is reported as an offline batch.
    async fn read_addresses(&self, configs: &[AddressConfig]) -> ReadBatch;

    /// Writes a single value.
    ///
    /// Implementations must run [`validate_write`] before dispatch and
    /// reject read-only address classes.
    async fn write_address(&self, address: &str, value: f64) -> Result<(), HandlerError>;

    /// Live-adjusts connect/receive timeouts without reconnecting.
    async fn update_timeouts(&self, connect_ms: u64, receive_ms: u64);
}

impl std::fmt::Debug for dyn ProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolHandler")
            .field("protocol", &self.protocol())
            .finish()
    }
}

// =============================================================================
// HandlerFactory
// =============================================================================

/// Builds protocol handlers from device configuration.
///
/// Construction is pure: no network I/O happens until `connect`.
pub trait HandlerFactory: Send + Sync {
    /// The protocol this factory builds handlers for.
    fn protocol(&self) -> Protocol;

    /// Builds a handler for the given device.
    fn create(
        &self,
        device: &Device,
        settings: &Settings,
    ) -> Result<Box<dyn ProtocolHandler>, HandlerError>;
}

// =============================================================================
// HandlerRegistry
// =============================================================================

/// Registry mapping protocols to handler factories.
pub struct HandlerRegistry {
    factories: RwLock<HashMap<Protocol, Box<dyn HandlerFactory>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a factory, replacing any previous one for the protocol.
    pub fn register(&self, factory: Box<dyn HandlerFactory>) {
        let mut factories = self.factories.write();
        factories.insert(factory.protocol(), factory);
    }

    /// Whether a factory is registered for the protocol.
    pub fn supports(&self, protocol: Protocol) -> bool {
        self.factories.read().contains_key(&protocol)
    }

    /// Protocols with a registered factory.
    pub fn supported_protocols(&self) -> Vec<Protocol> {
        let mut protocols: Vec<Protocol> = self.factories.read().keys().copied().collect();
        protocols.sort_by_key(|p| p.as_str());
        protocols
    }

    /// Builds a handler for the device, or fails if its protocol has no
    /// registered factory.
    pub fn create(
        &self,
        device: &Device,
        settings: &Settings,
    ) -> Result<Box<dyn ProtocolHandler>, HandlerError> {
        let factories = self.factories.read();
        let factory = factories.get(&device.protocol).ok_or_else(|| {
            HandlerError::config(format!(
                "no handler registered for protocol {}",
                device.protocol
            ))
        })?;
        factory.create(device, settings)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("protocols", &self.supported_protocols())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
