// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Read-batch to time-series pipeline.
//!
//! Turns one device's [`ReadBatch`] into scaled [`DataPoint`]s and persists
//! them. Small batches go through per-point writes so one rejected point
//! never drags its siblings down; larger batches use the store's batch
//! write. Store failures degrade to zero points written, never to a cycle
//! failure.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use pulse_core::device::Device;
use pulse_core::handler::ReadBatch;
use pulse_core::store::TimeSeriesWriter;
use pulse_core::types::{DataPoint, DataQuality, RegisterType};

/// Address-count threshold above which points are written as one batch.
pub const BATCH_THRESHOLD: usize = 10;

// =============================================================================
// DataPipeline
// =============================================================================

/// Scales raw readings and writes them to the time-series store.
#[derive(Clone)]
pub struct DataPipeline {
    store: Arc<dyn TimeSeriesWriter>,
}

impl DataPipeline {
    /// Creates a pipeline writing to the given store.
    pub fn new(store: Arc<dyn TimeSeriesWriter>) -> Self {
        Self { store }
    }

    /// Builds scaled points from a read batch. Addresses that produced no
    /// value this cycle are skipped, not stored as bad points.
    pub fn build_points(
        &self,
        device: &Device,
        batch: &ReadBatch,
        response_time_ms: f64,
    ) -> Vec<DataPoint> {
        let multiplexed = device.protocol.is_station_multiplexed();
        let timestamp = Utc::now();
        let mut points = Vec::with_capacity(batch.read_count());

        for config in &device.addresses {
            let key = config.storage_key(multiplexed);
            let Some(Some(raw)) = batch.values.get(&key) else {
                continue;
            };
            let scaled = config.scale_value(*raw);

            // Modbus numeric ranges resolve the true class; other protocols
            // keep the configured hint.
            let (register_type, function_code) = config
                .resolve_modbus_class()
                .map(|(class, _)| (class, class.function_code()))
                .unwrap_or((RegisterType::Holding, config.function_code));

            points.push(DataPoint {
                device_id: device.id,
                device_name: device.name.clone(),
                key,
                address: config.address.clone(),
                raw_value: *raw,
                scaled_value: scaled,
                quality: DataQuality::Good,
                response_time_ms,
                timestamp,
                station_id: config.station_id,
                register_type,
                function_code,
                data_type: config.data_type,
                unit: config.unit.clone(),
                byte_order: config.byte_order,
            });
        }

        points
    }

    /// Persists the points, choosing per-point or batch writes by size.
    /// Returns how many points reached the store.
    pub async fn store_points(&self, device: &Device, points: &[DataPoint]) -> usize {
        if points.is_empty() {
            return 0;
        }

        if points.len() > BATCH_THRESHOLD {
            match self.store.write_batch(points).await {
                Ok(written) => written,
                Err(err) => {
                    warn!(device = %device.name, error = %err, "batch write failed, cycle data dropped");
                    0
                }
            }
        } else {
            let mut written = 0;
            for point in points {
                match self.store.write_point(point).await {
                    Ok(()) => written += 1,
                    Err(err) => {
                        // Per-point isolation: siblings still get stored.
                        warn!(
                            device = %device.name,
                            key = %point.key,
                            error = %err,
                            "point write failed"
                        );
                    }
                }
            }
            written
        }
    }

    /// Full pipeline: scale, assemble, persist. Returns the stored count.
    pub async fn process(
        &self,
        device: &Device,
        batch: &ReadBatch,
        response_time_ms: f64,
    ) -> usize {
        let points = self.build_points(device, batch, response_time_ms);
        let written = self.store_points(device, &points).await;
        debug!(
            device = %device.name,
            read = batch.read_count(),
            written,
            "pipeline processed batch"
        );
        written
    }
}

impl std::fmt::Debug for DataPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPipeline").finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_core::address::{AddressConfig, ScalingConfig};
    use pulse_core::error::StoreError;
    use pulse_core::store::CommError;
    use pulse_core::types::{ByteOrder, DataType, DeviceId, Protocol};
    use pulse_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn device_with(addresses: Vec<AddressConfig>, protocol: Protocol) -> Device {
        Device {
            id: DeviceId::new(1),
            name: "press-01".to_string(),
            protocol,
            host: "10.0.0.5".to_string(),
            port: 502,
            byte_order: ByteOrder::default(),
            addresses,
            group_id: None,
        }
    }

    fn batch_for(device: &Device, value: f64) -> ReadBatch {
        let multiplexed = device.protocol.is_station_multiplexed();
        let mut batch = ReadBatch::with_capacity(device.addresses.len());
        batch.is_online = true;
        for config in &device.addresses {
            batch
                .values
                .insert(config.storage_key(multiplexed), Some(value));
        }
        batch
    }

    #[test]
    fn test_points_carry_scaling() {
        let mut config = AddressConfig::new("40001").with_scaling(ScalingConfig {
            enabled: true,
            input_min: 0.0,
            input_max: 100.0,
            output_min: 0.0,
            output_max: 10.0,
        });
        config.unit = "bar".to_string();
        let device = device_with(vec![config], Protocol::ModbusTcp);
        let pipeline = DataPipeline::new(Arc::new(MemoryStore::new()));

        let points = pipeline.build_points(&device, &batch_for(&device, 50.0), 12.5);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].raw_value, 50.0);
        assert_eq!(points[0].scaled_value, 5.0);
        assert_eq!(points[0].unit, "bar");
        assert_eq!(points[0].function_code, 3);
        assert_eq!(points[0].quality, DataQuality::Good);
    }

    #[test]
    fn test_unreadable_addresses_are_skipped() {
        let device = device_with(
            vec![AddressConfig::new("40001"), AddressConfig::new("40002")],
            Protocol::ModbusTcp,
        );
        let pipeline = DataPipeline::new(Arc::new(MemoryStore::new()));

        let mut batch = batch_for(&device, 7.0);
        batch.values.insert("40002".to_string(), None);

        let points = pipeline.build_points(&device, &batch, 1.0);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].key, "40001");
    }

    #[test]
    fn test_station_qualified_keys_for_rtu() {
        let device = device_with(
            vec![
                AddressConfig::new("40001").with_station(1),
                AddressConfig::new("40001").with_station(2),
            ],
            Protocol::ModbusRtuOverTcp,
        );
        let pipeline = DataPipeline::new(Arc::new(MemoryStore::new()));

        let points = pipeline.build_points(&device, &batch_for(&device, 1.0), 1.0);
        let keys: Vec<&str> = points.iter().map(|p| p.key.as_str()).collect();
        assert!(keys.contains(&"40001_s1"));
        assert!(keys.contains(&"40001_s2"));
    }

    #[tokio::test]
    async fn test_small_batch_uses_per_point_writes() {
        struct CountingStore {
            singles: AtomicUsize,
            batches: AtomicUsize,
        }

        #[async_trait]
        impl TimeSeriesWriter for CountingStore {
            async fn write_point(&self, _point: &DataPoint) -> Result<(), StoreError> {
                self.singles.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn write_batch(&self, points: &[DataPoint]) -> Result<usize, StoreError> {
                self.batches.fetch_add(1, Ordering::SeqCst);
                Ok(points.len())
            }
            async fn write_communication_error(&self, _e: &CommError) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let store = Arc::new(CountingStore {
            singles: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
        });
        let pipeline = DataPipeline::new(store.clone());

        // 10 addresses: at the threshold, still per-point.
        let addresses: Vec<AddressConfig> = (0..10)
            .map(|i| AddressConfig::new(format!("{}", 40_001 + i)))
            .collect();
        let device = device_with(addresses, Protocol::ModbusTcp);
        let written = pipeline
            .process(&device, &batch_for(&device, 1.0), 1.0)
            .await;
        assert_eq!(written, 10);
        assert_eq!(store.singles.load(Ordering::SeqCst), 10);
        assert_eq!(store.batches.load(Ordering::SeqCst), 0);

        // 11 addresses: one batch write.
        let addresses: Vec<AddressConfig> = (0..11)
            .map(|i| AddressConfig::new(format!("{}", 40_001 + i)))
            .collect();
        let device = device_with(addresses, Protocol::ModbusTcp);
        let written = pipeline
            .process(&device, &batch_for(&device, 1.0), 1.0)
            .await;
        assert_eq!(written, 11);
        assert_eq!(store.singles.load(Ordering::SeqCst), 10);
        assert_eq!(store.batches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_point_failure_isolated() {
        struct FlakyStore {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl TimeSeriesWriter for FlakyStore {
            async fn write_point(&self, _point: &DataPoint) -> Result<(), StoreError> {
                // Every second write fails.
                if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                    Err(StoreError::write("disk full"))
                } else {
                    Ok(())
                }
            }
            async fn write_batch(&self, points: &[DataPoint]) -> Result<usize, StoreError> {
                Ok(points.len())
            }
            async fn write_communication_error(&self, _e: &CommError) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let pipeline = DataPipeline::new(Arc::new(FlakyStore {
            calls: AtomicUsize::new(0),
        }));
        let addresses: Vec<AddressConfig> = (0..4)
            .map(|i| AddressConfig::new(format!("{}", 40_001 + i)))
            .collect();
        let device = device_with(addresses, Protocol::ModbusTcp);

        let written = pipeline
            .process(&device, &batch_for(&device, 1.0), 1.0)
            .await;
        assert_eq!(written, 2);
    }
}
