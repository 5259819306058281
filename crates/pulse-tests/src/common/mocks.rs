// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Mock implementations for testing the collector in isolation.
//!
//! The scripted handler shares its behavior script across every handler
//! the factory creates, so tests can steer devices that the collector
//! constructs internally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use pulse_core::address::AddressConfig;
use pulse_core::device::{Device, DeviceRegistry};
use pulse_core::error::{ConfigError, HandlerError};
use pulse_core::handler::{validate_write, HandlerFactory, ProtocolHandler, ReadBatch};
use pulse_core::types::{Protocol, Settings};

// =============================================================================
// HandlerScript
// =============================================================================

/// Shared behavior script for scripted handlers.
///
/// Every handler built from the same [`ScriptedHandlerFactory`] observes
/// and mutates this script, so a test can flip failure modes mid-run and
/// verify interaction counts afterwards.
#[derive(Debug, Default)]
pub struct HandlerScript {
    /// Force connect attempts to fail with a network error.
    pub fail_connect: AtomicBool,
    /// Force batches to report the device offline.
    pub offline_reads: AtomicBool,
    /// Delay injected into every batch read.
    pub read_delay: Mutex<Duration>,
    /// Values served per address string; unlisted addresses read as 1.0.
    pub values: RwLock<HashMap<String, f64>>,
    /// Total connect attempts across all handlers.
    pub connects: AtomicUsize,
    /// Total disconnects across all handlers.
    pub disconnects: AtomicUsize,
    /// Total batch reads across all handlers.
    pub reads: AtomicUsize,
    /// Writes observed, in order.
    pub writes: Mutex<Vec<(String, f64)>>,
    /// Last (connect_ms, receive_ms) pushed via `update_timeouts`.
    pub timeouts: Mutex<Option<(u64, u64)>>,
}

impl HandlerScript {
    /// A healthy script serving 1.0 for everything.
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sets the value served for an address.
    pub fn set_value(&self, address: &str, value: f64) {
        self.values.write().insert(address.to_string(), value);
    }
}

// =============================================================================
// ScriptedHandler
// =============================================================================

/// A protocol handler driven by a shared [`HandlerScript`].
pub struct ScriptedHandler {
    protocol: Protocol,
    script: Arc<HandlerScript>,
    connected: AtomicBool,
}

impl ScriptedHandler {
    /// Creates a handler bound to the script.
    pub fn new(protocol: Protocol, script: Arc<HandlerScript>) -> Self {
        Self {
            protocol,
            script,
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ProtocolHandler for ScriptedHandler {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn connect(&self) -> Result<(), HandlerError> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(HandlerError::network("connection refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.script.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_addresses(&self, configs: &[AddressConfig]) -> ReadBatch {
        self.script.reads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.script.read_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let multiplexed = self.protocol.is_station_multiplexed();
        if self.script.offline_reads.load(Ordering::SeqCst)
            || !self.connected.load(Ordering::SeqCst)
        {
            return ReadBatch::offline(configs, multiplexed);
        }

        let mut batch = ReadBatch::with_capacity(configs.len());
        batch.is_online = true;
        let values = self.script.values.read();
        for config in configs {
            let value = values.get(&config.address).copied().unwrap_or(1.0);
            batch
                .values
                .insert(config.storage_key(multiplexed), Some(value));
        }
        batch
    }

    async fn write_address(&self, address: &str, value: f64) -> Result<(), HandlerError> {
        validate_write(address, value)?;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(HandlerError::NotConnected);
        }
        self.script.writes.lock().push((address.to_string(), value));
        Ok(())
    }

    async fn update_timeouts(&self, connect_ms: u64, receive_ms: u64) {
        *self.script.timeouts.lock() = Some((connect_ms, receive_ms));
    }
}

// =============================================================================
// ScriptedHandlerFactory
// =============================================================================

/// Factory producing [`ScriptedHandler`]s bound to one shared script.
pub struct ScriptedHandlerFactory {
    protocol: Protocol,
    script: Arc<HandlerScript>,
}

impl ScriptedHandlerFactory {
    /// Creates a factory for the protocol, sharing the given script.
    pub fn new(protocol: Protocol, script: Arc<HandlerScript>) -> Self {
        Self { protocol, script }
    }
}

impl HandlerFactory for ScriptedHandlerFactory {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn create(
        &self,
        _device: &Device,
        _settings: &Settings,
    ) -> Result<Box<dyn ProtocolHandler>, HandlerError> {
        Ok(Box::new(ScriptedHandler::new(
            self.protocol,
            self.script.clone(),
        )))
    }
}

// =============================================================================
// StaticRegistry
// =============================================================================

/// A device registry backed by an in-memory list.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    devices: RwLock<Vec<Device>>,
    /// Number of snapshot calls served.
    pub calls: AtomicUsize,
    /// Force the next listing to fail.
    pub fail: AtomicBool,
}

impl StaticRegistry {
    /// Creates a registry serving the given devices.
    pub fn new(devices: Vec<Device>) -> Arc<Self> {
        Arc::new(Self {
            devices: RwLock::new(devices),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    /// Replaces the served device list.
    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.write() = devices;
    }
}

#[async_trait]
impl DeviceRegistry for StaticRegistry {
    async fn list_active_devices(&self) -> Result<Vec<Device>, ConfigError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConfigError::invalid("registry unavailable"));
        }
        Ok(self.devices.read().clone())
    }
}
