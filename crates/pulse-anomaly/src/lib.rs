// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # pulse-anomaly
//!
//! Retrospective anomaly detection for the PULSE collector: data
//! interruptions, statistical spikes, out-of-range values, and replayed
//! communication errors, all derived from the time-series store.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod detector;

pub use detector::{Anomaly, AnomalyDetector, AnomalyReport, AnomalyType, DetectionPolicy};
