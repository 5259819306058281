// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Time-series store contracts.
//!
//! The store itself is an external collaborator; the collector only depends
//! on these traits. [`TimeSeriesWriter`] covers the produced calls (points,
//! batches, communication errors), [`TimeSeriesReader`] the consumed range
//! and stats queries, and [`RetentionStore`] the daily cleanup.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{DataPoint, DeviceId};

/// Measurement name for collected process data.
pub const MEASUREMENT_PLC_DATA: &str = "plc_data";

/// Measurement name for the communication-error stream.
pub const MEASUREMENT_COMM_ERRORS: &str = "communication_errors";

// =============================================================================
// Severity
// =============================================================================

/// Severity attached to communication errors and derived anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// Needs attention.
    Medium,
    /// Operational impact.
    High,
}

impl Severity {
    /// Lowercase name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

// =============================================================================
// CommError
// =============================================================================

/// Classification of a communication-error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommErrorType {
    /// Session establishment failed.
    ConnectionError,
    /// Device stopped answering mid-session.
    NetworkError,
    /// Device answered but the read was rejected.
    ReadFailed,
}

impl CommErrorType {
    /// Snake-case name as stored in the error-stream tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionError => "connection_error",
            Self::NetworkError => "network_error",
            Self::ReadFailed => "read_failed",
        }
    }
}

/// One event in the communication-error stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommError {
    /// Affected device.
    pub device_id: DeviceId,
    /// Device display name.
    pub device_name: String,
    /// Failure description.
    pub message: String,
    /// Error classification.
    pub error_type: CommErrorType,
    /// Recorded severity; replayed as-is by the anomaly detector.
    pub severity: Severity,
    /// Address involved, when the failure was address-scoped.
    pub address: Option<String>,
    /// Station involved, when known.
    pub station_id: Option<u8>,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
}

impl CommError {
    /// Connection failure for a device. Severity defaults to high.
    pub fn connection(
        device_id: DeviceId,
        device_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            message: message.into(),
            error_type: CommErrorType::ConnectionError,
            severity: Severity::High,
            address: None,
            station_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Network failure during an established session. Severity high.
    pub fn network(
        device_id: DeviceId,
        device_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            message: message.into(),
            error_type: CommErrorType::NetworkError,
            severity: Severity::High,
            address: None,
            station_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Address-scoped read rejection while the device stayed online.
    /// Severity medium.
    pub fn read_failed(
        device_id: DeviceId,
        device_name: impl Into<String>,
        message: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            message: message.into(),
            error_type: CommErrorType::ReadFailed,
            severity: Severity::Medium,
            address: Some(address.into()),
            station_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Attaches a station ID (builder style).
    pub fn with_station(mut self, station_id: u8) -> Self {
        self.station_id = Some(station_id);
        self
    }
}

// =============================================================================
// StoredPoint
// =============================================================================

/// Minimal shape returned by range queries: enough for windowed analysis
/// without dragging full point metadata back out of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPoint {
    /// Point timestamp.
    pub timestamp: DateTime<Utc>,
    /// Storage key (address, optionally station-qualified).
    pub key: String,
    /// Scaled value.
    pub value: f64,
}

// =============================================================================
// Store traits
// =============================================================================

/// Write side of the time-series store.
#[async_trait]
pub trait TimeSeriesWriter: Send + Sync {
    /// Writes one point.
    async fn write_point(&self, point: &DataPoint) -> Result<(), StoreError>;

    /// Writes a batch, returning how many points were accepted.
    async fn write_batch(&self, points: &[DataPoint]) -> Result<usize, StoreError>;

    /// Appends to the communication-error stream.
    async fn write_communication_error(&self, error: &CommError) -> Result<(), StoreError>;
}

/// Query side of the time-series store.
#[async_trait]
pub trait TimeSeriesReader: Send + Sync {
    /// Points for one device within `[start, end]`, ordered by timestamp.
    async fn query_range(
        &self,
        device_id: DeviceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredPoint>, StoreError>;

    /// Communication errors for one device within `[start, end]`, ordered
    /// by timestamp.
    async fn query_comm_errors(
        &self,
        device_id: DeviceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CommError>, StoreError>;

    /// Per-key point counts for one device within `[start, end]`.
    async fn query_stats(
        &self,
        device_id: DeviceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, StoreError>;
}

/// Retention cleanup.
#[async_trait]
pub trait RetentionStore: Send + Sync {
    /// Deletes everything older than `cutoff`, returning the deleted count.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Full store capability, for components that need all three sides.
pub trait TimeSeriesStore: TimeSeriesWriter + TimeSeriesReader + RetentionStore {}

impl<T: TimeSeriesWriter + TimeSeriesReader + RetentionStore> TimeSeriesStore for T {}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_error_defaults() {
        let err = CommError::connection(DeviceId::new(1), "plc-01", "connection refused");
        assert_eq!(err.error_type, CommErrorType::ConnectionError);
        assert_eq!(err.severity, Severity::High);
        assert!(err.address.is_none());

        let err = CommError::read_failed(DeviceId::new(1), "plc-01", "illegal address", "40099");
        assert_eq!(err.error_type, CommErrorType::ReadFailed);
        assert_eq!(err.severity, Severity::Medium);
        assert_eq!(err.address.as_deref(), Some("40099"));
    }

    #[test]
    fn test_station_builder() {
        let err = CommError::network(DeviceId::new(2), "bus", "reset").with_station(3);
        assert_eq!(err.station_id, Some(3));
    }

    #[test]
    fn test_severity_strings() {
        assert_eq!(Severity::High.as_str(), "high");
        assert_eq!(CommErrorType::NetworkError.as_str(), "network_error");
    }
}
