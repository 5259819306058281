// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Siemens S7 protocol handler over ISO-on-TCP.
//!
//! Connecting runs the COTP connection request and the S7
//! setup-communication exchange; polling issues one read-var job per
//! configured address. The access width comes from the address token
//! (`DBW`, `DBD`, bit index), the numeric interpretation from the
//! configured data type.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use pulse_core::address::AddressConfig;
use pulse_core::device::Device;
use pulse_core::error::HandlerError;
use pulse_core::handler::{validate_write, HandlerFactory, ProtocolHandler, ReadBatch};
use pulse_core::types::{Protocol, Settings};

use crate::frame::{
    build_connect_request, build_read_request, build_setup_request, build_write_request,
    check_connect_confirm, decode_value, encode_value, parse_read_response, parse_setup_response,
    parse_write_response, S7Address, DEFAULT_RACK, DEFAULT_SLOT, TPKT_VERSION,
};

// TPKT length is 16-bit, so this is the true protocol ceiling.
const MAX_TPKT_BYTES: u16 = 8192;

struct Timeouts {
    connect: Duration,
    receive: Duration,
}

struct S7Session {
    stream: Option<TcpStream>,
    pdu_ref: u16,
    pdu_size: u16,
}

// =============================================================================
// S7Handler
// =============================================================================

/// Protocol handler for Siemens S7 devices.
pub struct S7Handler {
    device_name: String,
    host: String,
    port: u16,
    rack: u8,
    slot: u8,
    addresses: Vec<AddressConfig>,
    session: Mutex<S7Session>,
    timeouts: RwLock<Timeouts>,
}

impl S7Handler {
    /// Builds a handler from device config. No I/O happens here.
    pub fn new(device: &Device, settings: &Settings) -> Result<Self, HandlerError> {
        if device.protocol != Protocol::SiemensS7 {
            return Err(HandlerError::config(format!(
                "S7Handler cannot serve protocol {}",
                device.protocol
            )));
        }
        Ok(Self {
            device_name: device.name.clone(),
            host: device.host.clone(),
            port: device.port,
            rack: DEFAULT_RACK,
            slot: DEFAULT_SLOT,
            addresses: device.addresses.clone(),
            session: Mutex::new(S7Session {
                stream: None,
                pdu_ref: 0,
                pdu_size: 0,
            }),
            timeouts: RwLock::new(Timeouts {
                connect: settings.connect_timeout(),
                receive: settings.receive_timeout(),
            }),
        })
    }

    /// Receives one TPKT frame and returns its payload.
    async fn recv_tpkt(stream: &mut TcpStream, receive: Duration) -> Result<Vec<u8>, HandlerError> {
        let receive_ms = receive.as_millis() as u64;
        let mut head = [0u8; 4];
        timeout(receive, stream.read_exact(&mut head))
            .await
            .map_err(|_| HandlerError::timeout("s7_receive", receive_ms))?
            .map_err(HandlerError::from)?;

        if head[0] != TPKT_VERSION {
            return Err(HandlerError::protocol("response lacks TPKT header"));
        }
        let total = u16::from_be_bytes([head[2], head[3]]);
        if !(5..=MAX_TPKT_BYTES).contains(&total) {
            return Err(HandlerError::protocol(format!(
                "implausible TPKT length {}",
                total
            )));
        }

        let mut payload = vec![0u8; (total - 4) as usize];
        timeout(receive, stream.read_exact(&mut payload))
            .await
            .map_err(|_| HandlerError::timeout("s7_receive", receive_ms))?
            .map_err(HandlerError::from)?;
        Ok(payload)
    }

    /// Strips the COTP data header from a received payload, yielding the
    /// S7 PDU.
    fn strip_cotp(payload: Vec<u8>) -> Result<Vec<u8>, HandlerError> {
        if payload.len() < 3 || payload[1] != 0xF0 {
            return Err(HandlerError::protocol("response lacks COTP data header"));
        }
        Ok(payload[3..].to_vec())
    }

    /// Sends one job and returns the response S7 PDU.
    async fn exchange(
        &self,
        session: &mut S7Session,
        frame: &[u8],
    ) -> Result<Vec<u8>, HandlerError> {
        let receive = self.timeouts.read().receive;
        let stream = session.stream.as_mut().ok_or(HandlerError::NotConnected)?;
        stream.write_all(frame).await.map_err(HandlerError::from)?;
        let payload = Self::recv_tpkt(stream, receive).await?;
        Self::strip_cotp(payload)
    }

    fn next_ref(session: &mut S7Session) -> u16 {
        session.pdu_ref = session.pdu_ref.wrapping_add(1);
        session.pdu_ref
    }

    async fn read_one(
        &self,
        session: &mut S7Session,
        config: &AddressConfig,
    ) -> Result<Option<f64>, HandlerError> {
        let address = S7Address::parse(&config.address).ok_or_else(|| {
            HandlerError::protocol(format!("unparseable S7 address: {}", config.address))
        })?;
        let pdu_ref = Self::next_ref(session);
        let frame = build_read_request(pdu_ref, address);
        let pdu = self.exchange(session, &frame).await?;
        let payload = parse_read_response(&pdu)?;

        let value = decode_value(&payload, config.data_type);
        if value.is_none() {
            warn!(
                device = %self.device_name,
                address = %config.address,
                data_type = config.data_type.as_str(),
                payload_len = payload.len(),
                "payload failed numeric decode"
            );
        }
        Ok(value)
    }
}

#[async_trait]
impl ProtocolHandler for S7Handler {
    fn protocol(&self) -> Protocol {
        Protocol::SiemensS7
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

        // COTP connection request, then PDU-size negotiation.
        stream
            .write_all(&build_connect_request(self.rack, self.slot))
            .await
            .map_err(HandlerError::from)?;
        let payload = Self::recv_tpkt(&mut stream, receive).await?;
        check_connect_confirm(&payload)?;

        stream
            .write_all(&build_setup_request(1))
            .await
            .map_err(HandlerError::from)?;
        let payload = Self::recv_tpkt(&mut stream, receive).await?;
        let pdu = Self::strip_cotp(payload)?;
        let pdu_size = parse_setup_response(&pdu)?;

        session.stream = Some(stream);
        session.pdu_ref = 1;
        session.pdu_size = pdu_size;

        info!(
            device = %self.device_name,
            endpoint = format!("{}:{}", self.host, self.port),
            rack = self.rack,
            slot = self.slot,
            pdu_size,
            "S7 session established"
        );
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(mut stream) = session.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!(device = %self.device_name, error = %err, "error closing S7 session");
            }
        }
        session.pdu_size = 0;
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
                        // Item rejection: the CPU answered.
                        batch.is_online = true;
                    }
                    warn!(
                        device = %self.device_name,
                        address = %config.address,
                        error = %err,
                        network,
                        "S7 read failed"
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

        let target = S7Address::parse(address).ok_or_else(|| {
            HandlerError::config(format!("unparseable S7 address: {}", address))
        })?;
        let config = self
            .addresses
            .iter()
            .find(|c| c.address.eq_ignore_ascii_case(address))
            .cloned()
            .unwrap_or_else(|| AddressConfig::new(address));
        let payload = encode_value(value, config.data_type, target.width).ok_or_else(|| {
            HandlerError::config(format!(
                "value {} does not fit {} at {}",
                value,
                config.data_type.as_str(),
                target
            ))
        })?;

        let mut session = self.session.lock().await;
        if session.stream.is_none() {
            return Err(HandlerError::NotConnected);
        }
        let pdu_ref = Self::next_ref(&mut session);
        let frame = build_write_request(pdu_ref, target, &payload);
        let pdu = self.exchange(&mut session, &frame).await?;
        parse_write_response(&pdu)?;

        info!(device = %self.device_name, address, value, "S7 write completed");
        Ok(())
    }

    async fn update_timeouts(&self, connect_ms: u64, receive_ms: u64) {
        let mut timeouts = self.timeouts.write();
        timeouts.connect = Duration::from_millis(connect_ms);
        timeouts.receive = Duration::from_millis(receive_ms);
        debug!(device = %self.device_name, connect_ms, receive_ms, "S7 timeouts updated");
    }
}

impl std::fmt::Debug for S7Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S7Handler")
            .field("device", &self.device_name)
            .field("endpoint", &format!("{}:{}", self.host, self.port))
            .field("rack", &self.rack)
            .field("slot", &self.slot)
            .finish()
    }
}

// =============================================================================
// S7HandlerFactory
// =============================================================================

/// Factory for S7 handlers.
#[derive(Debug, Default)]
pub struct S7HandlerFactory;

impl HandlerFactory for S7HandlerFactory {
    fn protocol(&self) -> Protocol {
        Protocol::SiemensS7
    }

    fn create(
        &self,
        device: &Device,
        settings: &Settings,
    ) -> Result<Box<dyn ProtocolHandler>, HandlerError> {
        Ok(Box::new(S7Handler::new(device, settings)?))
    }
}

// =============================================================================
// Tests
// =============================================================================
