// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Omron FINS/TCP protocol handler.
//!
//! One TCP session per device. Connecting performs the FINS node-address
//! handshake; each poll issues one memory-area read per configured address.
//! FINS carries words big-endian on the wire; multi-word assembly then
//! follows the address's byte-order configuration, same as the Modbus path.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use pulse_core::address::AddressConfig;
use pulse_core::convert::{decode_registers, encode_registers, register_count};
use pulse_core::device::Device;
use pulse_core::error::HandlerError;
use pulse_core::handler::{validate_write, HandlerFactory, ProtocolHandler, ReadBatch};
use pulse_core::types::{DataType, Protocol, Settings};

use crate::frame::{
    build_command_frame, build_node_request, build_read_params, build_write_params,
    parse_command_response, parse_node_reply, FinsAddress, CMD_MEMORY_READ, CMD_MEMORY_WRITE,
    FINS_MAGIC, TCP_CMD_FRAME, TCP_CMD_NODE_REPLY,
};

// Largest frame the collector will accept from a PLC. FINS responses top
// out well below this; anything bigger is a framing desync.
const MAX_FRAME_BYTES: u32 = 4096;

struct Timeouts {
    connect: Duration,
    receive: Duration,
}

struct FinsSession {
    stream: Option<TcpStream>,
    client_node: u8,
    server_node: u8,
    sid: u8,
}

// =============================================================================
// FinsHandler
// =============================================================================

/// Protocol handler for Omron FINS/TCP devices.
pub struct FinsHandler {
    device_name: String,
    host: String,
    port: u16,
    addresses: Vec<AddressConfig>,
    session: Mutex<FinsSession>,
    timeouts: RwLock<Timeouts>,
}

impl FinsHandler {
    /// Builds a handler from device config. No I/O happens here.
    pub fn new(device: &Device, settings: &Settings) -> Result<Self, HandlerError> {
        if device.protocol != Protocol::OmronFins {
            return Err(HandlerError::config(format!(
                "FinsHandler cannot serve protocol {}",
                device.protocol
            )));
        }
        Ok(Self {
            device_name: device.name.clone(),
            host: device.host.clone(),
            port: device.port,
            addresses: device.addresses.clone(),
            session: Mutex::new(FinsSession {
                stream: None,
                client_node: 0,
                server_node: 0,
                sid: 0,
            }),
            timeouts: RwLock::new(Timeouts {
                connect: settings.connect_timeout(),
                receive: settings.receive_timeout(),
            }),
        })
    }

    /// Receives one FINS/TCP frame, returning `(command, body)` where the
    /// body excludes the command and error words.
    async fn recv_frame(stream: &mut TcpStream, receive: Duration) -> Result<(u32, Vec<u8>), HandlerError> {
        let receive_ms = receive.as_millis() as u64;
        let mut head = [0u8; 8];
        timeout(receive, stream.read_exact(&mut head))
            .await
            .map_err(|_| HandlerError::timeout("fins_receive", receive_ms))?
            .map_err(HandlerError::from)?;

        if head[..4] != FINS_MAGIC {
            return Err(HandlerError::protocol("response lacks FINS magic"));
        }
        let length = u32::from_be_bytes([head[4], head[5], head[6], head[7]]);
        if !(8..=MAX_FRAME_BYTES).contains(&length) {
            return Err(HandlerError::protocol(format!(
                "implausible FINS frame length {}",
                length
            )));
        }

        let mut rest = vec![0u8; length as usize];
        timeout(receive, stream.read_exact(&mut rest))
            .await
            .map_err(|_| HandlerError::timeout("fins_receive", receive_ms))?
            .map_err(HandlerError::from)?;

        let command = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let error = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]);
        if error != 0 {
            return Err(HandlerError::protocol(format!(
                "FINS/TCP error code {}",
                error
            )));
        }
        Ok((command, rest.split_off(8)))
    }

    /// Sends one FINS command and returns the decoded response words.
    async fn exchange(
        &self,
        session: &mut FinsSession,
        command: u16,
        params: &[u8],
    ) -> Result<Vec<u16>, HandlerError> {
        let receive = self.timeouts.read().receive;
        session.sid = session.sid.wrapping_add(1);
        let frame = build_command_frame(
            session.client_node,
            session.server_node,
            session.sid,
            command,
            params,
        );

        let stream = session.stream.as_mut().ok_or(HandlerError::NotConnected)?;
        stream.write_all(&frame).await.map_err(HandlerError::from)?;

        let (tcp_command, body) = Self::recv_frame(stream, receive).await?;
        if tcp_command != TCP_CMD_FRAME {
            return Err(HandlerError::protocol(format!(
                "unexpected FINS/TCP command {} in data phase",
                tcp_command
            )));
        }
        parse_command_response(&body, command)
    }

    async fn read_one(
        &self,
        session: &mut FinsSession,
        config: &AddressConfig,
    ) -> Result<Option<f64>, HandlerError> {
        let address = FinsAddress::parse(&config.address).ok_or_else(|| {
            HandlerError::protocol(format!("unparseable FINS address: {}", config.address))
        })?;
        let count = register_count(config.data_type, config.string_length);
        let params = build_read_params(address, count);
        let words = self.exchange(session, CMD_MEMORY_READ, &params).await?;

        let value = decode_registers(&words, config.data_type, config.byte_order, config.word_swap);
        if value.is_none() {
            warn!(
                device = %self.device_name,
                address = %config.address,
                data_type = config.data_type.as_str(),
                "memory words failed numeric decode"
            );
        }
        Ok(value)
    }
}

#[async_trait]
impl ProtocolHandler for FinsHandler {
    fn protocol(&self) -> Protocol {
        Protocol::OmronFins
    }

    async fn connect(&self) -> Result<(), HandlerError> {
        let mut session = self.session.lock().await;
        if session.stream.is_some() {
            return Ok(());
        }

        let (connect_to, receive) = {
            let t = self.timeouts.read();
            (t.connect, t.receive)
        };
        let mut stream = timeout(
            connect_to,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| HandlerError::timeout("connect", connect_to.as_millis() as u64))?
        .map_err(HandlerError::from)?;
        stream.set_nodelay(true).ok();

        // Node-address handshake: the PLC assigns our client node.
        stream
            .write_all(&build_node_request())
            .await
            .map_err(HandlerError::from)?;
        let (command, body) = Self::recv_frame(&mut stream, receive).await?;
        if command != TCP_CMD_NODE_REPLY {
            return Err(HandlerError::protocol(format!(
                "expected node-address reply, got FINS/TCP command {}",
                command
            )));
        }
        let (client_node, server_node) = parse_node_reply(&body)?;

        session.stream = Some(stream);
        session.client_node = client_node;
        session.server_node = server_node;
        session.sid = 0;

        info!(
            device = %self.device_name,
            endpoint = format!("{}:{}", self.host, self.port),
            client_node,
            server_node,
            "FINS session established"
        );
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(mut stream) = session.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!(device = %self.device_name, error = %err, "error closing FINS session");
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.session.lock().await.stream.is_some()
    }

    async fn read_addresses(&self, configs: &[AddressConfig]) -> ReadBatch {
        let mut session = self.session.lock().await;
        if session.stream.is_none() {
            return ReadBatch::offline(configs, false);
        }

        let mut batch = ReadBatch::with_capacity(configs.len());

        for config in configs {
            let key = config.storage_key(false);
            match self.read_one(&mut session, config).await {
                Ok(value) => {
                    batch.is_online = true;
                    batch.values.insert(key, value);
                }
                Err(err) => {
                    let network = err.is_network();
                    if !network {
                        // End-code rejection: the PLC answered.
                        batch.is_online = true;
                    }
                    warn!(
                        device = %self.device_name,
                        address = %config.address,
                        error = %err,
                        network,
                        "FINS read failed"
                    );
                    batch.record_failure(config, err.to_string(), network);
                    batch.values.insert(key, None);
                }
            }
        }

        batch
    }

    async fn write_address(&self, address: &str, value: f64) -> Result<(), HandlerError> {
        validate_write(address, value)?;

        let target = FinsAddress::parse(address).ok_or_else(|| {
            HandlerError::config(format!("unparseable FINS address: {}", address))
        })?;
        if !target.area.is_writable() {
            return Err(HandlerError::config(format!(
                "area {} is read-only",
                target.area.as_str()
            )));
        }

        let config = self
            .addresses
            .iter()
            .find(|c| c.address.eq_ignore_ascii_case(address))
            .cloned()
            .unwrap_or_else(|| AddressConfig::new(address));
        let data_type = match config.data_type {
            DataType::String => {
                return Err(HandlerError::unsupported("string writes are not supported"))
            }
            other => other,
        };
        let words = encode_registers(value, data_type, config.byte_order, config.word_swap)
            .ok_or_else(|| {
                HandlerError::config(format!(
                    "value {} does not fit {}",
                    value,
                    data_type.as_str()
                ))
            })?;

        let mut session = self.session.lock().await;
        if session.stream.is_none() {
            return Err(HandlerError::NotConnected);
        }
        let params = build_write_params(target, &words);
        self.exchange(&mut session, CMD_MEMORY_WRITE, &params)
            .await?;

        info!(device = %self.device_name, address, value, "FINS write completed");
        Ok(())
    }

    async fn update_timeouts(&self, connect_ms: u64, receive_ms: u64) {
        let mut timeouts = self.timeouts.write();
        timeouts.connect = Duration::from_millis(connect_ms);
        timeouts.receive = Duration::from_millis(receive_ms);
        debug!(device = %self.device_name, connect_ms, receive_ms, "FINS timeouts updated");
    }
}

impl std::fmt::Debug for FinsHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinsHandler")
            .field("device", &self.device_name)
            .field("endpoint", &format!("{}:{}", self.host, self.port))
            .finish()
    }
}

// =============================================================================
// FinsHandlerFactory
// =============================================================================

/// Factory for FINS handlers.
#[derive(Debug, Default)]
pub struct FinsHandlerFactory;

impl HandlerFactory for FinsHandlerFactory {
    fn protocol(&self) -> Protocol {
        Protocol::OmronFins
    }

    fn create(
        &self,
        device: &Device,
        settings: &Settings,
    ) -> Result<Box<dyn ProtocolHandler>, HandlerError> {
        Ok(Box::new(FinsHandler::new(device, settings)?))
    }
}

// =============================================================================
// Tests
// =============================================================================
