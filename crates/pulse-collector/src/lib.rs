// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # pulse-collector
//!
//! Poll-cycle orchestration for the PULSE collector: the device polling
//! engine with its bounded worker pool, the scale-and-store data pipeline,
//! and the interval/retention scheduler.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod collector;
pub mod pipeline;
pub mod scheduler;

pub use collector::{
    Collector, CollectorStatus, CycleSummary, DeviceStats, DeviceStatus, ProtocolInfo,
    CYCLE_TIMEOUT, DEVICE_TIMEOUT, WORKER_POOL_SIZE,
};
pub use pipeline::{DataPipeline, BATCH_THRESHOLD};
pub use scheduler::{next_retention_run, Scheduler, RETENTION_HOUR};
