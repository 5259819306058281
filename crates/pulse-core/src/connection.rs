// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-device connection lifecycle with reconnection backoff.
//!
//! A [`DeviceConnection`] owns one protocol handler for one device and
//! tracks connectivity: status, consecutive-failure count, last attempt,
//! last error. Reconnect attempts inside the computed backoff window are
//! skipped entirely, so unreachable devices are retried opportunistically
//! without being hammered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::HandlerError;
use crate::handler::{validate_write, ProtocolHandler, ReadBatch};
use crate::store::{CommError, TimeSeriesWriter};
use crate::types::ConnectionStatus;

/// Ceiling on the exponential backoff delay, in seconds.
pub const BACKOFF_CAP_SECS: u64 = 300;

/// Backoff delay after `retry_count` consecutive failures:
/// `min(2^retry_count, 300)` seconds.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let secs = 2u64
        .checked_pow(retry_count)
        .map_or(BACKOFF_CAP_SECS, |s| s.min(BACKOFF_CAP_SECS));
    Duration::from_secs(secs)
}

// =============================================================================
// Connection state
// =============================================================================

struct ConnState {
    status: ConnectionStatus,
    retry_count: u32,
    last_attempt: Option<Instant>,
    last_error: Option<String>,
    last_connect_time: Option<DateTime<Utc>>,
}

impl ConnState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            retry_count: 0,
            last_attempt: None,
            last_error: None,
            last_connect_time: None,
        }
    }
}

/// Point-in-time view of a connection, exposed on the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    /// Whether a session is live.
    pub is_connected: bool,
    /// Current lifecycle status.
    pub status: ConnectionStatus,
    /// Consecutive failed attempts since the last success.
    pub retry_count: u32,
    /// Most recent error, cleared on successful connect.
    pub last_error: Option<String>,
    /// Timestamp of the last successful connect.
    pub last_connect_time: Option<DateTime<Utc>>,
}

/// Result of one `ensure_connected` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A session is live (pre-existing or just established).
    Connected,
    /// Still inside the backoff window; no attempt was made.
    SkippedBackoff,
    /// An attempt was made and failed.
    Failed,
}

// =============================================================================
// DeviceConnection
// =============================================================================

/// Owns one protocol handler for one device and applies the backoff state
/// machine around it.
///
/// All handler operations are serialized through an internal async mutex,
/// so a poll cycle and an ad-hoc write never interleave on the wire.
pub struct DeviceConnection {
    device: Device,
    handler: Box<dyn ProtocolHandler>,
    error_sink: Arc<dyn TimeSeriesWriter>,
    state: RwLock<ConnState>,
    op_lock: Mutex<()>,
}

impl DeviceConnection {
    /// Creates a connection in the `Disconnected` state.
    pub fn new(
        device: Device,
        handler: Box<dyn ProtocolHandler>,
        error_sink: Arc<dyn TimeSeriesWriter>,
    ) -> Self {
        Self {
            device,
            handler,
            error_sink,
            state: RwLock::new(ConnState::new()),
            op_lock: Mutex::new(()),
        }
    }

    /// The device this connection serves.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    /// Snapshot for the status surface.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.state.read();
        ConnectionSnapshot {
            is_connected: state.status.is_connected(),
            status: state.status,
            retry_count: state.retry_count,
            last_error: state.last_error.clone(),
            last_connect_time: state.last_connect_time,
        }
    }

    /// Ensures a live session, applying the backoff schedule.
    ///
    /// Inside the backoff window this is a silent skip; the device stays in
    /// `Backoff` until the window elapses. A successful connect resets the
    /// retry count and clears the last error.
    pub async fn ensure_connected(&self) -> ConnectOutcome {
        let _guard = self.op_lock.lock().await;

        {
            let state = self.state.read();
            if state.status.is_connected() {
                return ConnectOutcome::Connected;
            }
            if state.retry_count > 0 {
                if let Some(last) = state.last_attempt {
                    let window = backoff_delay(state.retry_count);
                    if last.elapsed() < window {
                        debug!(
                            device = %self.device.name,
                            retry_count = state.retry_count,
                            window_secs = window.as_secs(),
                            "reconnect suppressed inside backoff window"
                        );
                        return ConnectOutcome::SkippedBackoff;
                    }
                }
            }
        }

        {
            let mut state = self.state.write();
            state.status = ConnectionStatus::Connecting;
            state.last_attempt = Some(Instant::now());
        }

        match self.handler.connect().await {
            Ok(()) => {
                let mut state = self.state.write();
                state.status = ConnectionStatus::Connected;
                state.retry_count = 0;
                state.last_error = None;
                state.last_connect_time = Some(Utc::now());
                drop(state);
                info!(device = %self.device.name, endpoint = %self.device.endpoint(), "device connected");
                ConnectOutcome::Connected
            }
            Err(err) => {
                self.record_failure(&err).await;
                ConnectOutcome::Failed
            }
        }
    }

    /// Reads the device's configured addresses.
    ///
    /// A batch reporting `is_online = false` counts as a failed attempt:
    /// the retry count increments, a communication error is recorded, and
    /// the session is torn down so the next cycle reconnects through the
    /// backoff schedule.
    pub async fn read_addresses(&self) -> ReadBatch {
        let _guard = self.op_lock.lock().await;

        let batch = self.handler.read_addresses(&self.device.addresses).await;

        // Device-side rejections are recorded per address; network-level
        // failures collapse into the single offline event below.
        for failure in batch.failures.iter().filter(|f| !f.network) {
            let event = CommError::read_failed(
                self.device.id,
                &self.device.name,
                &failure.message,
                &failure.address,
            )
            .with_station(failure.station_id);
            if let Err(store_err) = self.error_sink.write_communication_error(&event).await {
                warn!(device = %self.device.name, error = %store_err, "failed to record read failure");
            }
        }

        if !batch.is_online {
            let err = HandlerError::network("device produced no protocol-level response");
            self.handler.disconnect().await;
            self.record_failure(&err).await;
        }

        batch
    }

    /// Writes one value to the device, serialized against in-flight polls.
    pub async fn write_value(&self, address: &str, value: f64) -> Result<(), HandlerError> {
        validate_write(address, value)?;

        let _guard = self.op_lock.lock().await;

        if !self.state.read().status.is_connected() {
            return Err(HandlerError::NotConnected);
        }

        self.handler.write_address(address, value).await
    }

    /// Live-adjusts the handler's timeouts.
    pub async fn update_timeouts(&self, connect_ms: u64, receive_ms: u64) {
        self.handler.update_timeouts(connect_ms, receive_ms).await;
    }

    /// Tears the session down and returns to `Disconnected`.
    pub async fn disconnect(&self) {
        let _guard = self.op_lock.lock().await;
        self.handler.disconnect().await;
        let mut state = self.state.write();
        state.status = ConnectionStatus::Disconnected;
    }

    /// Records a failed attempt: bumps the retry count, stores the error,
    /// transitions to `Backoff`, and emits a communication-error event.
    async fn record_failure(&self, err: &HandlerError) {
        let message = err.to_string();
        let retry_count = {
            let mut state = self.state.write();
            state.status = ConnectionStatus::Backoff;
            state.retry_count = state.retry_count.saturating_add(1);
            state.last_error = Some(message.clone());
            state.last_attempt = Some(Instant::now());
            state.retry_count
        };

        warn!(
            device = %self.device.name,
            retry_count,
            next_window_secs = backoff_delay(retry_count).as_secs(),
            error = %message,
            "device attempt failed"
        );

        let event = if err.is_network() {
            CommError::network(self.device.id, &self.device.name, &message)
        } else {
            CommError::connection(self.device.id, &self.device.name, &message)
        };
        if let Err(store_err) = self.error_sink.write_communication_error(&event).await {
            warn!(device = %self.device.name, error = %store_err, "failed to record communication error");
        }
    }
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("device", &self.device.name)
            .field("status", &self.status())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressConfig;
    use crate::error::StoreError;
    use crate::types::{ByteOrder, DataPoint, DeviceId, Protocol};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct NullSink {
        comm_errors: AtomicUsize,
    }

    impl NullSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                comm_errors: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TimeSeriesWriter for NullSink {
        async fn write_point(&self, _point: &DataPoint) -> Result<(), StoreError> {
            Ok(())
        }
        async fn write_batch(&self, points: &[DataPoint]) -> Result<usize, StoreError> {
            Ok(points.len())
        }
        async fn write_communication_error(&self, _error: &CommError) -> Result<(), StoreError> {
            self.comm_errors.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedHandler {
        fail_connect: AtomicBool,
        connect_calls: AtomicUsize,
        connected: AtomicBool,
    }

    impl ScriptedHandler {
        fn failing() -> Self {
            Self {
                fail_connect: AtomicBool::new(true),
                connect_calls: AtomicUsize::new(0),
                connected: AtomicBool::new(false),
            }
        }

        fn healthy() -> Self {
            Self {
                fail_connect: AtomicBool::new(false),
                connect_calls: AtomicUsize::new(0),
                connected: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ProtocolHandler for ScriptedHandler {
        fn protocol(&self) -> Protocol {
            Protocol::ModbusTcp
        }
        async fn connect(&self) -> Result<(), HandlerError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                Err(HandlerError::network("connection refused"))
            } else {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn read_addresses(&self, configs: &[AddressConfig]) -> ReadBatch {
            let mut batch = ReadBatch::with_capacity(configs.len());
            batch.is_online = self.connected.load(Ordering::SeqCst);
            for config in configs {
                batch
                    .values
                    .insert(config.storage_key(false), Some(42.0));
            }
            batch
        }
        async fn write_address(&self, address: &str, value: f64) -> Result<(), HandlerError> {
            validate_write(address, value)
        }
        async fn update_timeouts(&self, _connect_ms: u64, _receive_ms: u64) {}
    }

    fn test_device() -> Device {
        Device {
            id: DeviceId::new(1),
            name: "plc-01".to_string(),
            protocol: Protocol::ModbusTcp,
            host: "127.0.0.1".to_string(),
            port: 502,
            byte_order: ByteOrder::default(),
            addresses: vec![AddressConfig::new("40001")],
            group_id: None,
        }
    }

    #[test]
    fn test_backoff_formula() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(8), Duration::from_secs(256));
        // Capped at 300s from 2^9 = 512 onward.
        assert_eq!(backoff_delay(9), Duration::from_secs(300));
        assert_eq!(backoff_delay(32), Duration::from_secs(300));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_connect_success_resets_state() {
        let sink = NullSink::new();
        let conn = DeviceConnection::new(
            test_device(),
            Box::new(ScriptedHandler::healthy()),
            sink.clone(),
        );

        assert_eq!(conn.ensure_connected().await, ConnectOutcome::Connected);
        let snap = conn.snapshot();
        assert!(snap.is_connected);
        assert_eq!(snap.retry_count, 0);
        assert!(snap.last_error.is_none());
        assert!(snap.last_connect_time.is_some());
    }

    #[tokio::test]
    async fn test_failure_enters_backoff_and_suppresses_retry() {
        let sink = NullSink::new();
        let conn = DeviceConnection::new(
            test_device(),
            Box::new(ScriptedHandler::failing()),
            sink.clone(),
        );

        // First attempt fails and records an error event.
        assert_eq!(conn.ensure_connected().await, ConnectOutcome::Failed);
        let snap = conn.snapshot();
        assert_eq!(snap.status, ConnectionStatus::Backoff);
        assert_eq!(snap.retry_count, 1);
        assert!(snap.last_error.is_some());
        assert_eq!(sink.comm_errors.load(Ordering::SeqCst), 1);

        // Immediately retrying lands inside the 2-second window: no attempt.
        assert_eq!(conn.ensure_connected().await, ConnectOutcome::SkippedBackoff);
        assert_eq!(conn.snapshot().retry_count, 1);
        assert_eq!(sink.comm_errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_offline_read_tears_down_session() {
        let sink = NullSink::new();
        let handler = ScriptedHandler::healthy();
        let conn = DeviceConnection::new(test_device(), Box::new(handler), sink.clone());

        assert_eq!(conn.ensure_connected().await, ConnectOutcome::Connected);

        // Simulate the device dropping off the network mid-session.
        conn.handler.disconnect().await;
        let batch = conn.read_addresses().await;
        assert!(!batch.is_online);

        let snap = conn.snapshot();
        assert_eq!(snap.status, ConnectionStatus::Backoff);
        assert_eq!(snap.retry_count, 1);
        assert_eq!(sink.comm_errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let sink = NullSink::new();
        let conn = DeviceConnection::new(
            test_device(),
            Box::new(ScriptedHandler::healthy()),
            sink.clone(),
        );

        let err = conn.write_value("40001", 1.0).await.unwrap_err();
        assert!(matches!(err, HandlerError::NotConnected));

        conn.ensure_connected().await;
        assert!(conn.write_value("40001", 1.0).await.is_ok());

        // Validation failures are rejected before touching the device.
        let err = conn.write_value("", 1.0).await.unwrap_err();
        assert!(matches!(err, HandlerError::Config { .. }));
        let err = conn.write_value("40001", 2e10).await.unwrap_err();
        assert!(matches!(err, HandlerError::Config { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let sink = NullSink::new();
        let conn = DeviceConnection::new(
            test_device(),
            Box::new(ScriptedHandler::healthy()),
            sink,
        );

        conn.ensure_connected().await;
        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    }
}
