// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory time-series store.
//!
//! Backs the collector when no external store is configured and carries the
//! integration tests. Points and communication errors live in plain vectors
//! behind `parking_lot` locks; a capacity cap drops the oldest entries so a
//! long-running process without retention cleanup cannot grow unbounded.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use pulse_core::error::StoreError;
use pulse_core::store::{CommError, RetentionStore, StoredPoint, TimeSeriesReader, TimeSeriesWriter};
use pulse_core::types::{DataPoint, DeviceId};

/// Default cap on retained points before the oldest are evicted.
pub const DEFAULT_CAPACITY: usize = 1_000_000;

// =============================================================================
// MemoryStore
// =============================================================================

/// Time-series store holding everything in process memory.
pub struct MemoryStore {
    points: RwLock<Vec<DataPoint>>,
    errors: RwLock<Vec<CommError>>,
    capacity: usize,
}

impl MemoryStore {
    /// Creates a store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a store evicting the oldest points beyond `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: RwLock::new(Vec::new()),
            errors: RwLock::new(Vec::new()),
            capacity,
        }
    }

    /// Number of retained points.
    pub fn point_count(&self) -> usize {
        self.points.read().len()
    }

    /// Number of retained communication errors.
    pub fn error_count(&self) -> usize {
        self.errors.read().len()
    }

    fn evict(points: &mut Vec<DataPoint>, capacity: usize) {
        if points.len() > capacity {
            let excess = points.len() - capacity;
            points.drain(..excess);
            debug!(evicted = excess, "memory store evicted oldest points");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeSeriesWriter for MemoryStore {
    async fn write_point(&self, point: &DataPoint) -> Result<(), StoreError> {
        let mut points = self.points.write();
        points.push(point.clone());
        Self::evict(&mut points, self.capacity);
        Ok(())
    }

    async fn write_batch(&self, batch: &[DataPoint]) -> Result<usize, StoreError> {
        let mut points = self.points.write();
        points.extend_from_slice(batch);
        Self::evict(&mut points, self.capacity);
        Ok(batch.len())
    }

    async fn write_communication_error(&self, error: &CommError) -> Result<(), StoreError> {
        let mut errors = self.errors.write();
        errors.push(error.clone());
        if errors.len() > self.capacity {
            let excess = errors.len() - self.capacity;
            errors.drain(..excess);
        }
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesReader for MemoryStore {
    async fn query_range(
        &self,
        device_id: DeviceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredPoint>, StoreError> {
        let points = self.points.read();
        let mut result: Vec<StoredPoint> = points
            .iter()
            .filter(|p| p.device_id == device_id && p.timestamp >= start && p.timestamp <= end)
            .map(|p| StoredPoint {
                timestamp: p.timestamp,
                key: p.key.clone(),
                value: p.scaled_value,
            })
            .collect();
        result.sort_by_key(|p| p.timestamp);
        Ok(result)
    }

    async fn query_comm_errors(
        &self,
        device_id: DeviceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CommError>, StoreError> {
        let errors = self.errors.read();
        let mut result: Vec<CommError> = errors
            .iter()
            .filter(|e| e.device_id == device_id && e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect();
        result.sort_by_key(|e| e.timestamp);
        Ok(result)
    }

    async fn query_stats(
        &self,
        device_id: DeviceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>, StoreError> {
        let points = self.points.read();
        let mut stats: HashMap<String, u64> = HashMap::new();
        for point in points
            .iter()
            .filter(|p| p.device_id == device_id && p.timestamp >= start && p.timestamp <= end)
        {
            *stats.entry(point.key.clone()).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[async_trait]
impl RetentionStore for MemoryStore {
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut deleted = 0u64;
        {
            let mut points = self.points.write();
            let before = points.len();
            points.retain(|p| p.timestamp >= cutoff);
            deleted += (before - points.len()) as u64;
        }
        {
            let mut errors = self.errors.write();
            let before = errors.len();
            errors.retain(|e| e.timestamp >= cutoff);
            deleted += (before - errors.len()) as u64;
        }
        Ok(deleted)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pulse_core::types::{ByteOrder, DataQuality, DataType, RegisterType};

    fn point(device: i64, key: &str, value: f64, age_secs: i64) -> DataPoint {
        DataPoint {
            device_id: DeviceId::new(device),
            device_name: format!("dev-{}", device),
            key: key.to_string(),
            address: key.to_string(),
            raw_value: value,
            scaled_value: value,
            quality: DataQuality::Good,
            response_time_ms: 1.0,
            timestamp: Utc::now() - Duration::seconds(age_secs),
            station_id: 1,
            register_type: RegisterType::Holding,
            function_code: 3,
            data_type: DataType::Int16,
            unit: String::new(),
            byte_order: ByteOrder::Cdab,
        }
    }

    #[tokio::test]
    async fn test_write_and_query_range() {
        let store = MemoryStore::new();
        store.write_point(&point(1, "40001", 10.0, 30)).await.unwrap();
        store.write_point(&point(1, "40001", 20.0, 10)).await.unwrap();
        store.write_point(&point(2, "40001", 99.0, 10)).await.unwrap();

        let start = Utc::now() - Duration::seconds(60);
        let result = store
            .query_range(DeviceId::new(1), start, Utc::now())
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
        // Ordered oldest first.
        assert!(result[0].timestamp <= result[1].timestamp);
        assert_eq!(result[0].value, 10.0);
    }

    #[tokio::test]
    async fn test_batch_write_returns_count() {
        let store = MemoryStore::new();
        let batch = vec![point(1, "a", 1.0, 0), point(1, "b", 2.0, 0)];
        assert_eq!(store.write_batch(&batch).await.unwrap(), 2);
        assert_eq!(store.point_count(), 2);
    }

    #[tokio::test]
    async fn test_stats_count_per_key() {
        let store = MemoryStore::new();
        store.write_point(&point(1, "a", 1.0, 5)).await.unwrap();
        store.write_point(&point(1, "a", 2.0, 4)).await.unwrap();
        store.write_point(&point(1, "b", 3.0, 3)).await.unwrap();

        let start = Utc::now() - Duration::seconds(60);
        let stats = store
            .query_stats(DeviceId::new(1), start, Utc::now())
            .await
            .unwrap();
        assert_eq!(stats.get("a"), Some(&2));
        assert_eq!(stats.get("b"), Some(&1));
    }

    #[tokio::test]
    async fn test_retention_deletes_old_entries() {
        let store = MemoryStore::new();
        store.write_point(&point(1, "a", 1.0, 3_600)).await.unwrap();
        store.write_point(&point(1, "a", 2.0, 10)).await.unwrap();
        let err = CommError::connection(DeviceId::new(1), "dev-1", "refused");
        store.write_communication_error(&err).await.unwrap();

        let cutoff = Utc::now() - Duration::seconds(600);
        let deleted = store.delete_before(cutoff).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.point_count(), 1);
        assert_eq!(store.error_count(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = MemoryStore::with_capacity(3);
        for i in 0..5 {
            store
                .write_point(&point(1, "a", f64::from(i), 100 - i64::from(i)))
                .await
                .unwrap();
        }
        assert_eq!(store.point_count(), 3);

        let start = Utc::now() - Duration::seconds(600);
        let result = store
            .query_range(DeviceId::new(1), start, Utc::now())
            .await
            .unwrap();
        // The two oldest writes were evicted.
        assert_eq!(result.first().map(|p| p.value), Some(2.0));
    }

    #[tokio::test]
    async fn test_comm_error_query_scoped_by_device() {
        let store = MemoryStore::new();
        store
            .write_communication_error(&CommError::connection(DeviceId::new(1), "a", "x"))
            .await
            .unwrap();
        store
            .write_communication_error(&CommError::network(DeviceId::new(2), "b", "y"))
            .await
            .unwrap();

        let start = Utc::now() - Duration::seconds(60);
        let errors = store
            .query_comm_errors(DeviceId::new(1), start, Utc::now())
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].device_name, "a");
    }
}
