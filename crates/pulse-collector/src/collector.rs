// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Poll-cycle orchestration.
//!
//! The [`Collector`] owns one [`DeviceConnection`] per active device and
//! polls them all once per cycle through a bounded worker pool. Cycles
//! coalesce: if the previous cycle is still running when the next fires,
//! the new one is skipped and counted rather than stacked. Each device gets
//! a fixed time budget, and the cycle as a whole gets a hard ceiling so one
//! wedged transport cannot stall collection forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock as AsyncRwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use pulse_core::connection::{ConnectOutcome, ConnectionSnapshot, DeviceConnection};
use pulse_core::device::DeviceRegistry;
use pulse_core::error::{ConfigError, HandlerError};
use pulse_core::handler::HandlerRegistry;
use pulse_core::store::TimeSeriesWriter;
use pulse_core::types::{CollectLog, CollectOutcome, DeviceId, Settings};

use crate::pipeline::DataPipeline;

/// Devices polled concurrently within one cycle.
pub const WORKER_POOL_SIZE: usize = 10;

/// Per-device poll budget.
pub const DEVICE_TIMEOUT: Duration = Duration::from_secs(60);

/// Hard ceiling on one full poll cycle.
pub const CYCLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Weight of the historical average when folding in a new response time.
const RESPONSE_TIME_DECAY: f64 = 0.7;

// =============================================================================
// Stats & status types
// =============================================================================

/// Rolling per-device collection statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceStats {
    /// Poll attempts that stored at least one point.
    pub success_count: u64,
    /// Poll attempts that stored nothing.
    pub failure_count: u64,
    /// Exponentially weighted average poll duration in milliseconds.
    pub avg_response_ms: f64,
    /// Timestamp of the last successful poll.
    pub last_success: Option<DateTime<Utc>>,
    /// Whether the device answered on its last attempt.
    pub is_online: bool,
}

impl DeviceStats {
    fn fold_response_time(&mut self, response_ms: f64) {
        if self.avg_response_ms == 0.0 {
            self.avg_response_ms = response_ms;
        } else {
            self.avg_response_ms = RESPONSE_TIME_DECAY * self.avg_response_ms
                + (1.0 - RESPONSE_TIME_DECAY) * response_ms;
        }
    }
}

/// Per-device entry on the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    /// Device ID.
    pub id: DeviceId,
    /// Display name.
    pub name: String,
    /// Protocol name.
    pub protocol: &'static str,
    /// `host:port`.
    pub endpoint: String,
    /// Connection lifecycle snapshot.
    pub connection: ConnectionSnapshot,
    /// Rolling statistics.
    pub stats: DeviceStats,
}

/// Collector-wide status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    /// Devices under management.
    pub device_count: usize,
    /// Devices with a live session.
    pub connected_count: usize,
    /// Completed poll cycles.
    pub cycle_count: u64,
    /// Cycles skipped because the previous one was still running.
    pub skipped_cycles: u64,
    /// Active settings.
    pub settings: Settings,
    /// Per-device detail.
    pub devices: Vec<DeviceStatus>,
}

/// Per-protocol summary for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolInfo {
    /// Protocol name.
    pub protocol: &'static str,
    /// Whether a handler factory is registered.
    pub supported: bool,
    /// Devices currently using this protocol.
    pub device_count: usize,
}

/// Outcome of one completed poll cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    /// Devices attempted.
    pub attempted: usize,
    /// Attempts that stored data.
    pub succeeded: usize,
    /// Attempts that answered but stored nothing.
    pub failed: usize,
    /// Attempts that died on connect/network/timeout.
    pub errored: usize,
    /// Wall-clock cycle duration in milliseconds.
    pub duration_ms: f64,
    /// Per-device audit records.
    pub logs: Vec<CollectLog>,
}

// =============================================================================
// Collector
// =============================================================================

/// Owns device connections and runs poll cycles over them.
pub struct Collector {
    registry: Arc<dyn DeviceRegistry>,
    handlers: Arc<HandlerRegistry>,
    store: Arc<dyn TimeSeriesWriter>,
    pipeline: DataPipeline,
    settings: RwLock<Settings>,
    connections: AsyncRwLock<Vec<Arc<DeviceConnection>>>,
    cycle_lock: Mutex<()>,
    cycle_count: AtomicU64,
    skipped_cycles: AtomicU64,
    stats: DashMap<DeviceId, DeviceStats>,
    interval_tx: watch::Sender<Duration>,
}

impl Collector {
    /// Creates a collector with no devices loaded yet.
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        handlers: Arc<HandlerRegistry>,
        store: Arc<dyn TimeSeriesWriter>,
        settings: Settings,
    ) -> Self {
        let (interval_tx, _) = watch::channel(settings.collect_interval());
        Self {
            registry,
            handlers,
            store: store.clone(),
            pipeline: DataPipeline::new(store),
            settings: RwLock::new(settings),
            connections: AsyncRwLock::new(Vec::new()),
            cycle_lock: Mutex::new(()),
            cycle_count: AtomicU64::new(0),
            skipped_cycles: AtomicU64::new(0),
            stats: DashMap::new(),
            interval_tx,
        }
    }

    /// Watch handle following poll-interval changes.
    pub fn subscribe_interval(&self) -> watch::Receiver<Duration> {
        self.interval_tx.subscribe()
    }

    /// Active settings.
    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Re-fetches the device snapshot and reconciles connections.
    ///
    /// Devices are ordered by group priority then ID and capped at the
    /// connection limit; devices beyond the cap are dropped with a warning.
    /// Unchanged devices keep their live connection, changed ones are
    /// rebuilt, removed ones are disconnected.
    pub async fn reload_devices(&self) -> Result<usize, ConfigError> {
        let mut devices = self.registry.list_active_devices().await?;
        devices.sort_by_key(|d| d.priority_key());

        let settings = self.settings();
        let cap = settings.max_concurrent_connections;
        if devices.len() > cap {
            warn!(
                devices = devices.len(),
                cap,
                dropped = devices.len() - cap,
                "device count exceeds connection cap, lowest-priority devices skipped"
            );
            devices.truncate(cap);
        }

        let mut connections = self.connections.write().await;
        let mut next: Vec<Arc<DeviceConnection>> = Vec::with_capacity(devices.len());
        let mut kept = 0usize;

        for device in devices {
            if let Some(existing) = connections
                .iter()
                .find(|c| c.device() == &device)
                .cloned()
            {
                next.push(existing);
                kept += 1;
                continue;
            }
            match self.handlers.create(&device, &settings) {
                Ok(handler) => {
                    next.push(Arc::new(DeviceConnection::new(
                        device,
                        handler,
                        self.store.clone(),
                    )));
                }
                Err(err) => {
                    warn!(device = %device.name, error = %err, "device skipped, handler construction failed");
                }
            }
        }

        // Disconnect everything that did not survive the reload.
        let next_ids: Vec<DeviceId> = next.iter().map(|c| c.device().id).collect();
        for old in connections.iter() {
            let id = old.device().id;
            if !next_ids.contains(&id) || !next.iter().any(|c| Arc::ptr_eq(c, old)) {
                old.disconnect().await;
            }
            if !next_ids.contains(&id) {
                self.stats.remove(&id);
            }
        }

        let total = next.len();
        *connections = next;
        info!(devices = total, reused = kept, "device registry reloaded");
        Ok(total)
    }

    /// Runs one poll cycle over all managed devices.
    ///
    /// Returns `None` when the previous cycle was still running; the tick
    /// is then coalesced instead of queued.
    pub async fn run_cycle(&self) -> Option<CycleSummary> {
        let Ok(_cycle_guard) = self.cycle_lock.try_lock() else {
            let skipped = self.skipped_cycles.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(skipped_total = skipped, "previous poll cycle still running, tick coalesced");
            return None;
        };

        let started = Instant::now();
        let connections: Vec<Arc<DeviceConnection>> = self.connections.read().await.clone();
        let attempted = connections.len();

        let semaphore = Arc::new(Semaphore::new(WORKER_POOL_SIZE));
        let mut workers: JoinSet<CollectLog> = JoinSet::new();

        for conn in connections {
            let semaphore = semaphore.clone();
            let pipeline = self.pipeline.clone();
            workers.spawn(async move {
                let device_id = conn.device().id;
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return CollectLog::new(
                            device_id,
                            CollectOutcome::Error,
                            "worker pool closed",
                            0.0,
                        )
                    }
                };

                let poll_started = Instant::now();
                match timeout(DEVICE_TIMEOUT, Self::poll_device(&conn, &pipeline)).await {
                    Ok(log) => log,
                    Err(_) => {
                        // The in-flight operation was dropped; tear the
                        // session down so the next cycle reconnects.
                        conn.disconnect().await;
                        CollectLog::new(
                            device_id,
                            CollectOutcome::Error,
                            format!("poll exceeded {}s budget", DEVICE_TIMEOUT.as_secs()),
                            poll_started.elapsed().as_secs_f64() * 1_000.0,
                        )
                    }
                }
            });
        }

        let mut logs: Vec<CollectLog> = Vec::with_capacity(attempted);
        let ceiling = tokio::time::sleep(CYCLE_TIMEOUT);
        tokio::pin!(ceiling);
        loop {
            tokio::select! {
                _ = &mut ceiling => {
                    warn!(
                        outstanding = workers.len(),
                        "poll cycle hit the {}s ceiling, aborting stragglers",
                        CYCLE_TIMEOUT.as_secs()
                    );
                    workers.abort_all();
                    while let Some(result) = workers.join_next().await {
                        if let Ok(log) = result {
                            logs.push(log);
                        }
                    }
                    break;
                }
                next = workers.join_next() => match next {
                    None => break,
                    Some(Ok(log)) => logs.push(log),
                    Some(Err(err)) => {
                        if !err.is_cancelled() {
                            warn!(error = %err, "poll worker panicked");
                        }
                    }
                }
            }
        }

        for log in &logs {
            self.apply_log(log);
        }

        let summary = CycleSummary {
            attempted,
            succeeded: logs
                .iter()
                .filter(|l| l.outcome == CollectOutcome::Success)
                .count(),
            failed: logs
                .iter()
                .filter(|l| l.outcome == CollectOutcome::Failed)
                .count(),
            errored: logs
                .iter()
                .filter(|l| l.outcome == CollectOutcome::Error)
                .count(),
            duration_ms: started.elapsed().as_secs_f64() * 1_000.0,
            logs,
        };

        self.cycle_count.fetch_add(1, Ordering::SeqCst);
        debug!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            errored = summary.errored,
            duration_ms = summary.duration_ms,
            "poll cycle complete"
        );
        Some(summary)
    }

    /// Polls one device end to end: connect, read, pipeline.
    async fn poll_device(conn: &Arc<DeviceConnection>, pipeline: &DataPipeline) -> CollectLog {
        let started = Instant::now();
        let device = conn.device();

        match conn.ensure_connected().await {
            ConnectOutcome::Connected => {}
            ConnectOutcome::SkippedBackoff => {
                return CollectLog::new(
                    device.id,
                    CollectOutcome::Error,
                    "reconnect suppressed inside backoff window",
                    started.elapsed().as_secs_f64() * 1_000.0,
                );
            }
            ConnectOutcome::Failed => {
                let reason = conn
                    .snapshot()
                    .last_error
                    .unwrap_or_else(|| "connect failed".to_string());
                return CollectLog::new(
                    device.id,
                    CollectOutcome::Error,
                    reason,
                    started.elapsed().as_secs_f64() * 1_000.0,
                );
            }
        }

        let batch = conn.read_addresses().await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;

        if !batch.is_online {
            return CollectLog::new(
                device.id,
                CollectOutcome::Error,
                "device went offline during read",
                elapsed_ms,
            );
        }

        let written = pipeline.process(device, &batch, elapsed_ms).await;
        if written > 0 {
            CollectLog::new(
                device.id,
                CollectOutcome::Success,
                format!("stored {}/{} addresses", written, device.addresses.len()),
                elapsed_ms,
            )
        } else {
            CollectLog::new(
                device.id,
                CollectOutcome::Failed,
                format!(
                    "device online but no usable values ({} read failures)",
                    batch.failures.len()
                ),
                elapsed_ms,
            )
        }
    }

    fn apply_log(&self, log: &CollectLog) {
        let mut stats = self.stats.entry(log.device_id).or_default();
        match log.outcome {
            CollectOutcome::Success => {
                stats.success_count += 1;
                stats.last_success = Some(log.timestamp);
                stats.is_online = true;
                stats.fold_response_time(log.response_time_ms);
            }
            CollectOutcome::Failed => {
                stats.failure_count += 1;
                stats.is_online = true;
                stats.fold_response_time(log.response_time_ms);
            }
            CollectOutcome::Error => {
                stats.failure_count += 1;
                stats.is_online = false;
            }
        }
    }

    /// Writes a value to one device, serialized against in-flight polls.
    pub async fn write_address(
        &self,
        device_id: DeviceId,
        address: &str,
        value: f64,
    ) -> Result<(), HandlerError> {
        let conn = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .find(|c| c.device().id == device_id)
                .cloned()
        };
        let conn = conn.ok_or_else(|| {
            HandlerError::config(format!("no active device with id {}", device_id))
        })?;
        conn.write_value(address, value).await?;
        info!(device = %conn.device().name, address, value, "ad-hoc write completed");
        Ok(())
    }

    /// Applies new settings: timeouts propagate to live handlers, the poll
    /// interval to the scheduler, the connection cap on the next reload.
    pub async fn reload_settings(&self, new: Settings) {
        let old = {
            let mut settings = self.settings.write();
            std::mem::replace(&mut *settings, new.clone())
        };

        if self.interval_tx.send(new.collect_interval()).is_err() {
            debug!("no scheduler subscribed to interval changes");
        }

        let connections = self.connections.read().await.clone();
        for conn in connections {
            conn.update_timeouts(new.connect_timeout_ms, new.receive_timeout_ms)
                .await;
        }

        // A changed cap alters which devices may hold connections.
        if new.max_concurrent_connections != old.max_concurrent_connections {
            if let Err(err) = self.reload_devices().await {
                warn!(error = %err, "device reload after connection cap change failed");
            }
        }

        info!(
            interval_s = new.collect_interval_seconds,
            connect_ms = new.connect_timeout_ms,
            receive_ms = new.receive_timeout_ms,
            prev_interval_s = old.collect_interval_seconds,
            "settings reloaded"
        );
    }

    /// Point-in-time status snapshot.
    pub async fn status(&self) -> CollectorStatus {
        let connections = self.connections.read().await;
        let devices: Vec<DeviceStatus> = connections
            .iter()
            .map(|conn| {
                let device = conn.device();
                DeviceStatus {
                    id: device.id,
                    name: device.name.clone(),
                    protocol: device.protocol.as_str(),
                    endpoint: device.endpoint(),
                    connection: conn.snapshot(),
                    stats: self
                        .stats
                        .get(&device.id)
                        .map(|s| s.value().clone())
                        .unwrap_or_default(),
                }
            })
            .collect();

        CollectorStatus {
            device_count: devices.len(),
            connected_count: devices.iter().filter(|d| d.connection.is_connected).count(),
            cycle_count: self.cycle_count.load(Ordering::SeqCst),
            skipped_cycles: self.skipped_cycles.load(Ordering::SeqCst),
            settings: self.settings(),
            devices,
        }
    }

    /// Protocol support and usage summary.
    pub async fn protocol_info(&self) -> Vec<ProtocolInfo> {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        {
            let connections = self.connections.read().await;
            for conn in connections.iter() {
                *counts.entry(conn.device().protocol.as_str()).or_insert(0) += 1;
            }
        }

        let mut info: Vec<ProtocolInfo> = self
            .handlers
            .supported_protocols()
            .into_iter()
            .map(|p| ProtocolInfo {
                protocol: p.as_str(),
                supported: true,
                device_count: counts.remove(p.as_str()).unwrap_or(0),
            })
            .collect();
        // Devices whose protocol lost its factory still show up.
        for (protocol, device_count) in counts {
            info.push(ProtocolInfo {
                protocol,
                supported: false,
                device_count,
            });
        }
        info.sort_by_key(|i| i.protocol);
        info
    }

    /// Disconnects every device. Called once on shutdown.
    pub async fn shutdown(&self) {
        let connections = self.connections.read().await.clone();
        for conn in connections {
            conn.disconnect().await;
        }
        info!("all device connections closed");
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("cycles", &self.cycle_count.load(Ordering::SeqCst))
            .field("skipped", &self.skipped_cycles.load(Ordering::SeqCst))
            .finish()
    }
}
