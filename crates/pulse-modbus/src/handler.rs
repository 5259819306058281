// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus protocol handler over `tokio-modbus`.
//!
//! Supports two transports behind one handler:
//!
//! - **Modbus TCP**: MBAP framing on a plain socket.
//! - **Modbus RTU-over-TCP**: RTU framing tunneled through TCP, typically
//!   fronting a serial multi-drop bus. Station IDs are multiplexed over the
//!   single socket; switching stations inserts a short settle delay to model
//!   half-duplex bus turnaround, and storage keys are station-qualified.
//!
//! Address classes follow the conventional numeric ranges: 1-9999 coils
//! (function 01), 10001-19999 discrete inputs (02, read-only), 30001-39999
//! input registers (04), 40001-49999 and bare numerics holding registers
//! (03).

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, tcp, Client, Context, Reader, Writer};
use tokio_modbus::slave::{Slave, SlaveContext};
use tokio_modbus::{Error as ModbusLibError, ExceptionCode};
use tracing::{debug, info, warn};

use pulse_core::address::AddressConfig;
use pulse_core::device::Device;
use pulse_core::error::HandlerError;
use pulse_core::handler::{validate_write, HandlerFactory, ProtocolHandler, ReadBatch};
use pulse_core::types::{DataType, Protocol, RegisterType, Settings};

use pulse_core::convert::{decode_registers, encode_registers, register_count};

/// Settle delay after switching stations on a shared RTU bus. Half-duplex
/// multi-drop wiring needs the previous exchange to drain before the next
/// station is addressed.
pub const STATION_SETTLE: Duration = Duration::from_millis(20);

// =============================================================================
// ModbusHandler
// =============================================================================

struct Timeouts {
    connect: Duration,
    receive: Duration,
}

struct ModbusSession {
    ctx: Option<Context>,
    current_station: u8,
}

/// Protocol handler for Modbus TCP and RTU-over-TCP devices.
pub struct ModbusHandler {
    device_name: String,
    host: String,
    port: u16,
    protocol: Protocol,
    addresses: Vec<AddressConfig>,
    session: Mutex<ModbusSession>,
    timeouts: RwLock<Timeouts>,
}

impl ModbusHandler {
    /// Builds a handler from device config. No I/O happens here.
    pub fn new(device: &Device, settings: &Settings) -> Result<Self, HandlerError> {
        if !matches!(
            device.protocol,
            Protocol::ModbusTcp | Protocol::ModbusRtuOverTcp
        ) {
            return Err(HandlerError::config(format!(
                "ModbusHandler cannot serve protocol {}",
                device.protocol
            )));
        }
        Ok(Self {
            device_name: device.name.clone(),
            host: device.host.clone(),
            port: device.port,
            protocol: device.protocol,
            addresses: device.addresses.clone(),
            session: Mutex::new(ModbusSession {
                ctx: None,
                current_station: 1,
            }),
            timeouts: RwLock::new(Timeouts {
                connect: settings.connect_timeout(),
                receive: settings.receive_timeout(),
            }),
        })
    }

    fn receive_timeout(&self) -> Duration {
        self.timeouts.read().receive
    }

    /// Maps a tokio-modbus transport/protocol error onto the handler
    /// taxonomy. Transport errors carry the io kind and classify as
    /// network; protocol errors mean the device answered.
    fn map_lib_error(err: ModbusLibError) -> HandlerError {
        match err {
            ModbusLibError::Transport(io_err) => io_err.into(),
            other => HandlerError::protocol(other.to_string()),
        }
    }

    fn map_exception(code: ExceptionCode) -> HandlerError {
        HandlerError::protocol(format!("modbus exception: {:?}", code))
    }

    /// Switches the active station if the address demands it, inserting the
    /// bus settle delay on multiplexed transports.
    async fn switch_station(&self, session: &mut ModbusSession, station: u8) {
        if session.current_station == station {
            return;
        }
        if let Some(ctx) = session.ctx.as_mut() {
            ctx.set_slave(Slave(station));
        }
        if self.protocol.is_station_multiplexed() {
            tokio::time::sleep(STATION_SETTLE).await;
        }
        debug!(
            device = %self.device_name,
            from = session.current_station,
            to = station,
            "switched modbus station"
        );
        session.current_station = station;
    }

    /// Performs one typed read. `Ok(None)` means the device answered but
    /// the value is unusable (decode or coercion failure).
    async fn read_one(
        &self,
        ctx: &mut Context,
        config: &AddressConfig,
    ) -> Result<Option<f64>, HandlerError> {
        let (class, offset) = config.resolve_modbus_class().ok_or_else(|| {
            HandlerError::protocol(format!("non-numeric modbus address: {}", config.address))
        })?;
        let receive = self.receive_timeout();
        let receive_ms = receive.as_millis() as u64;

        match class {
            RegisterType::Coil => {
                let bits = timeout(receive, ctx.read_coils(offset, 1))
                    .await
                    .map_err(|_| HandlerError::timeout("read_coils", receive_ms))?
                    .map_err(Self::map_lib_error)?
                    .map_err(Self::map_exception)?;
                Ok(bits.first().map(|b| if *b { 1.0 } else { 0.0 }))
            }
            RegisterType::DiscreteInput => {
                let bits = timeout(receive, ctx.read_discrete_inputs(offset, 1))
                    .await
                    .map_err(|_| HandlerError::timeout("read_discrete_inputs", receive_ms))?
                    .map_err(Self::map_lib_error)?
                    .map_err(Self::map_exception)?;
                Ok(bits.first().map(|b| if *b { 1.0 } else { 0.0 }))
            }
            RegisterType::InputRegister | RegisterType::Holding => {
                let count = register_count(config.data_type, config.string_length);
                let registers = if class == RegisterType::InputRegister {
                    timeout(receive, ctx.read_input_registers(offset, count))
                        .await
                        .map_err(|_| HandlerError::timeout("read_input_registers", receive_ms))?
                        .map_err(Self::map_lib_error)?
                        .map_err(Self::map_exception)?
                } else {
                    timeout(receive, ctx.read_holding_registers(offset, count))
                        .await
                        .map_err(|_| HandlerError::timeout("read_holding_registers", receive_ms))?
                        .map_err(Self::map_lib_error)?
                        .map_err(Self::map_exception)?
                };

                let value = decode_registers(
                    &registers,
                    config.data_type,
                    config.byte_order,
                    config.word_swap,
                );
                if value.is_none() {
                    warn!(
                        device = %self.device_name,
                        address = %config.address,
                        data_type = config.data_type.as_str(),
                        "register payload failed numeric decode"
                    );
                }
                Ok(value)
            }
        }
    }

    /// Finds the configured entry for an address, falling back to holding
    /// register defaults for unconfigured ad-hoc targets.
    fn write_config(&self, address: &str) -> AddressConfig {
        self.addresses
            .iter()
            .find(|c| c.address == address)
            .cloned()
            .unwrap_or_else(|| AddressConfig::new(address))
    }
}

#[async_trait]
impl ProtocolHandler for ModbusHandler {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn connect(&self) -> Result<(), HandlerError> {
        let mut session = self.session.lock().await;
        if session.ctx.is_some() {
            return Ok(());
        }

        let connect_to = self.timeouts.read().connect;
        let stream = timeout(
            connect_to,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| HandlerError::timeout("connect", connect_to.as_millis() as u64))?
        .map_err(HandlerError::from)?;
        stream.set_nodelay(true).ok();

        let first_station = self
            .addresses
            .first()
            .map(|a| a.station_id)
            .unwrap_or(1);
        let slave = Slave(first_station);

        let ctx = match self.protocol {
            Protocol::ModbusRtuOverTcp => rtu::attach_slave(stream, slave),
            _ => tcp::attach_slave(stream, slave),
        };

        session.ctx = Some(ctx);
        session.current_station = first_station;

        info!(
            device = %self.device_name,
            endpoint = format!("{}:{}", self.host, self.port),
            transport = %self.protocol,
            "modbus session established"
        );
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(mut ctx) = session.ctx.take() {
            if let Err(err) = ctx.disconnect().await {
                debug!(device = %self.device_name, error = %err, "error closing modbus session");
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.session.lock().await.ctx.is_some()
    }

    async fn read_addresses(&self, configs: &[AddressConfig]) -> ReadBatch {
        let multiplexed = self.protocol.is_station_multiplexed();
        let mut session = self.session.lock().await;
        if session.ctx.is_none() {
            return ReadBatch::offline(configs, multiplexed);
        }

        let mut batch = ReadBatch::with_capacity(configs.len());

        for config in configs {
            self.switch_station(&mut session, config.station_id).await;
            let key = config.storage_key(multiplexed);

            let Some(ctx) = session.ctx.as_mut() else {
                batch.values.insert(key, None);
                continue;
            };

            match self.read_one(ctx, config).await {
                Ok(value) => {
                    batch.is_online = true;
                    batch.values.insert(key, value);
                }
                Err(err) => {
                    let network = err.is_network();
                    if network {
                        warn!(
                            device = %self.device_name,
                            address = %config.address,
                            error = %err,
                            "modbus network failure"
                        );
                    } else {
                        // The device answered; only this address is bad.
                        batch.is_online = true;
                        warn!(
                            device = %self.device_name,
                            address = %config.address,
                            error = %err,
                            "modbus read rejected, device online"
                        );
                    }
                    batch.record_failure(config, err.to_string(), network);
                    batch.values.insert(key, None);
                }
            }
        }

        batch
    }

    async fn write_address(&self, address: &str, value: f64) -> Result<(), HandlerError> {
        validate_write(address, value)?;

        let config = self.write_config(address);
        let (class, offset) = config.resolve_modbus_class().ok_or_else(|| {
            HandlerError::config(format!("non-numeric modbus address: {}", address))
        })?;
        if !class.is_writable() {
            return Err(HandlerError::config(format!(
                "{} addresses are read-only",
                class.as_str()
            )));
        }

        let mut session = self.session.lock().await;
        self.switch_station(&mut session, config.station_id).await;
        let ctx = session.ctx.as_mut().ok_or(HandlerError::NotConnected)?;

        let receive = self.receive_timeout();
        let receive_ms = receive.as_millis() as u64;

        match class {
            RegisterType::Coil => {
                timeout(receive, ctx.write_single_coil(offset, value != 0.0))
                    .await
                    .map_err(|_| HandlerError::timeout("write_single_coil", receive_ms))?
                    .map_err(Self::map_lib_error)?
                    .map_err(Self::map_exception)?;
            }
            RegisterType::Holding => {
                let data_type = match config.data_type {
                    DataType::String => {
                        return Err(HandlerError::unsupported(
                            "string writes are not supported",
                        ))
                    }
                    other => other,
                };
                let registers =
                    encode_registers(value, data_type, config.byte_order, config.word_swap)
                        .ok_or_else(|| {
                            HandlerError::config(format!(
                                "value {} does not fit {}",
                                value,
                                data_type.as_str()
                            ))
                        })?;
                if registers.len() == 1 {
                    timeout(receive, ctx.write_single_register(offset, registers[0]))
                        .await
                        .map_err(|_| HandlerError::timeout("write_single_register", receive_ms))?
                        .map_err(Self::map_lib_error)?
                        .map_err(Self::map_exception)?;
                } else {
                    timeout(receive, ctx.write_multiple_registers(offset, &registers))
                        .await
                        .map_err(|_| {
                            HandlerError::timeout("write_multiple_registers", receive_ms)
                        })?
                        .map_err(Self::map_lib_error)?
                        .map_err(Self::map_exception)?;
                }
            }
            _ => unreachable!("write rejected for read-only classes above"),
        }

        info!(
            device = %self.device_name,
            address,
            value,
            station = config.station_id,
            "modbus write completed"
        );
        Ok(())
    }

    async fn update_timeouts(&self, connect_ms: u64, receive_ms: u64) {
        let mut timeouts = self.timeouts.write();
        timeouts.connect = Duration::from_millis(connect_ms);
        timeouts.receive = Duration::from_millis(receive_ms);
        debug!(
            device = %self.device_name,
            connect_ms,
            receive_ms,
            "modbus timeouts updated"
        );
    }
}

impl std::fmt::Debug for ModbusHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusHandler")
            .field("device", &self.device_name)
            .field("endpoint", &format!("{}:{}", self.host, self.port))
            .field("protocol", &self.protocol)
            .finish()
    }
}

// =============================================================================
// ModbusHandlerFactory
// =============================================================================

/// Factory for Modbus handlers. One instance per supported transport so the
/// registry can route both protocol names here.
pub struct ModbusHandlerFactory {
    protocol: Protocol,
}

impl ModbusHandlerFactory {
    /// Factory for plain Modbus TCP.
    pub fn tcp() -> Self {
        Self {
            protocol: Protocol::ModbusTcp,
        }
    }

    /// Factory for RTU framing tunneled over TCP.
    pub fn rtu_over_tcp() -> Self {
        Self {
            protocol: Protocol::ModbusRtuOverTcp,
        }
    }
}

impl HandlerFactory for ModbusHandlerFactory {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn create(
        &self,
        device: &Device,
        settings: &Settings,
    ) -> Result<Box<dyn ProtocolHandler>, HandlerError> {
        let handler = ModbusHandler::new(device, settings)?;
        Ok(Box::new(handler))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::types::{ByteOrder, DeviceId};

    fn test_device(protocol: Protocol) -> Device {
        Device {
            id: DeviceId::new(1),
            name: "press-01".to_string(),
            protocol,
            host: "127.0.0.1".to_string(),
            port: 1502,
            byte_order: ByteOrder::default(),
            addresses: vec![
                AddressConfig::new("40001"),
                AddressConfig::new("40003")
                    .with_data_type(DataType::Float)
                    .with_station(2),
            ],
            group_id: None,
        }
    }

    #[test]
    fn test_factory_protocols() {
        assert_eq!(ModbusHandlerFactory::tcp().protocol(), Protocol::ModbusTcp);
        assert_eq!(
            ModbusHandlerFactory::rtu_over_tcp().protocol(),
            Protocol::ModbusRtuOverTcp
        );
    }

    #[test]
    fn test_handler_rejects_foreign_protocol() {
        let device = test_device(Protocol::OmronFins);
        let err = ModbusHandler::new(&device, &Settings::default()).unwrap_err();
        assert!(matches!(err, HandlerError::Config { .. }));
    }

    #[test]
    fn test_write_config_lookup() {
        let device = test_device(Protocol::ModbusTcp);
        let handler = ModbusHandler::new(&device, &Settings::default()).unwrap();

        let config = handler.write_config("40003");
        assert_eq!(config.data_type, DataType::Float);
        assert_eq!(config.station_id, 2);

        // Unknown addresses fall back to holding-register defaults.
        let config = handler.write_config("40100");
        assert_eq!(config.data_type, DataType::Int16);
        assert_eq!(config.station_id, 1);
    }

    #[tokio::test]
    async fn test_offline_batch_without_session() {
        let device = test_device(Protocol::ModbusRtuOverTcp);
        let handler = ModbusHandler::new(&device, &Settings::default()).unwrap();

        let batch = handler.read_addresses(&device.addresses).await;
        assert!(!batch.is_online);
        assert_eq!(batch.values.len(), 2);
        // RTU-over-TCP keys are station-qualified.
        assert!(batch.values.contains_key("40001_s1"));
        assert!(batch.values.contains_key("40003_s2"));
    }

    #[tokio::test]
    async fn test_write_rejects_read_only_class() {
        let device = test_device(Protocol::ModbusTcp);
        let handler = ModbusHandler::new(&device, &Settings::default()).unwrap();

        let err = handler.write_address("10005", 1.0).await.unwrap_err();
        assert!(matches!(err, HandlerError::Config { .. }));
        let err = handler.write_address("30005", 1.0).await.unwrap_err();
        assert!(matches!(err, HandlerError::Config { .. }));
    }

    #[tokio::test]
    async fn test_write_requires_session() {
        let device = test_device(Protocol::ModbusTcp);
        let handler = ModbusHandler::new(&device, &Settings::default()).unwrap();

        let err = handler.write_address("40001", 5.0).await.unwrap_err();
        assert!(matches!(err, HandlerError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_failure_is_network() {
        // Nothing listens on this port; connect must classify as network.
        let mut device = test_device(Protocol::ModbusTcp);
        device.port = 1;
        let mut settings = Settings::default();
        settings.connect_timeout_ms = 200;

        let handler = ModbusHandler::new(&device, &settings).unwrap();
        let err = handler.connect().await.unwrap_err();
        assert!(err.is_network());
        assert!(!handler.is_connected().await);
    }
}
