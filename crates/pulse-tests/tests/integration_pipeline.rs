// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Pipeline Integration Tests
//!
//! Scale-and-store pipeline against the real in-memory store:
//!
//! - batch-vs-per-point persistence around the threshold
//! - linear scaling applied end to end
//! - skipped (`None`) values never reaching the store

use std::sync::Arc;

use pulse_collector::{DataPipeline, BATCH_THRESHOLD};
use pulse_core::handler::ReadBatch;
use pulse_core::TimeSeriesReader;
use pulse_store::MemoryStore;

use pulse_tests::prelude::*;

fn online_batch(device: &pulse_core::Device, value: f64) -> ReadBatch {
    let mut batch = ReadBatch::with_capacity(device.addresses.len());
    batch.is_online = true;
    for config in &device.addresses {
        batch.values.insert(config.storage_key(false), Some(value));
    }
    batch
}

#[tokio::test]
async fn test_small_batch_stored_per_point() {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let pipeline = DataPipeline::new(store.clone());

    let device = modbus_device(1, BATCH_THRESHOLD);
    let batch = online_batch(&device, 7.0);

    let written = pipeline.process(&device, &batch, 3.0).await;
    assert_eq!(written, BATCH_THRESHOLD);
    assert_eq!(store.point_count(), BATCH_THRESHOLD);
}

#[tokio::test]
async fn test_large_batch_stored_in_one_write() {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let pipeline = DataPipeline::new(store.clone());

    let device = modbus_device(1, BATCH_THRESHOLD + 1);
    let batch = online_batch(&device, 7.0);

    let written = pipeline.process(&device, &batch, 3.0).await;
    assert_eq!(written, BATCH_THRESHOLD + 1);
    assert_eq!(store.point_count(), BATCH_THRESHOLD + 1);
}

#[tokio::test]
async fn test_scaling_applied_before_storage() {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let pipeline = DataPipeline::new(store.clone());

    let mut device = modbus_device(1, 0);
    device.addresses = vec![scaled_address("40001")];

    let mut batch = ReadBatch::with_capacity(1);
    batch.is_online = true;
    batch.values.insert("40001".to_string(), Some(2000.0));

    assert_eq!(pipeline.process(&device, &batch, 1.0).await, 1);

    let now = chrono::Utc::now();
    let points = store
        .query_range(device.id, now - chrono::Duration::minutes(1), now)
        .await
        .unwrap();
    assert_eq!(points.len(), 1);
    // 2000 raw within 0..4000 maps to 50.0 within 0..100.
    assert!((points[0].value - 50.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_skipped_values_not_stored() {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let pipeline = DataPipeline::new(store.clone());

    let device = modbus_device(1, 3);
    let mut batch = online_batch(&device, 5.0);
    // One address produced no usable value this cycle.
    batch.values.insert("40002".to_string(), None);

    assert_eq!(pipeline.process(&device, &batch, 1.0).await, 2);
    assert_eq!(store.point_count(), 2);
}
