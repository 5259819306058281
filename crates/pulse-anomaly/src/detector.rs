// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Windowed anomaly detection over stored points and communication errors.
//!
//! Detection is purely retrospective: the detector queries the store for a
//! time window and derives anomalies from what it finds. Four rules run per
//! window:
//!
//! - **Data interruption**: per storage key, a gap between consecutive
//!   points longer than the policy threshold.
//! - **Value spike**: per storage key, a value more than N sample standard
//!   deviations from the window mean, given enough samples and non-zero
//!   spread.
//! - **Out of range**: a value outside the configured plausible band.
//! - **Communication error replay**: stored communication errors surface
//!   as anomalies with their recorded severity.
//!
//! An unreachable store never fails the call: the report comes back empty
//! with the `error` field set, so status surfaces degrade instead of
//! erroring.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use pulse_core::store::{Severity, TimeSeriesReader};
use pulse_core::types::DeviceId;

// =============================================================================
// Policy
// =============================================================================

/// Tunable thresholds for the detection rules.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionPolicy {
    /// Gap between consecutive points that counts as an interruption.
    pub gap_secs: i64,
    /// Gaps at or beyond this length escalate to high severity.
    pub gap_high_secs: i64,
    /// Spike threshold in standard deviations.
    pub spike_sigma: f64,
    /// Minimum samples per key before spike detection applies.
    pub spike_min_samples: usize,
    /// Plausible value band; `None` disables the range rule.
    pub range: Option<(f64, f64)>,
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self {
            gap_secs: 300,
            gap_high_secs: 1_800,
            spike_sigma: 3.0,
            spike_min_samples: 3,
            range: Some((0.0, 1_000.0)),
        }
    }
}

// =============================================================================
// Anomalies
// =============================================================================

/// Kind of detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    /// Collection stopped for longer than the gap threshold.
    DataInterruption,
    /// Statistical outlier within the window.
    ValueSpike,
    /// Value outside the plausible band.
    OutOfRange,
    /// Replayed communication error.
    CommunicationError,
}

impl AnomalyType {
    /// Snake-case name used as the `by_type` key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataInterruption => "data_interruption",
            Self::ValueSpike => "value_spike",
            Self::OutOfRange => "out_of_range",
            Self::CommunicationError => "communication_error",
        }
    }
}

/// One detected anomaly.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    /// Rule that fired.
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    /// Assigned severity.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Storage key involved, when key-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Offending value, when value-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// When the anomaly occurred.
    pub timestamp: DateTime<Utc>,
}

/// Detection result for one device and window.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    /// Device analyzed.
    pub device_id: DeviceId,
    /// Detected anomalies, newest first.
    pub anomalies: Vec<Anomaly>,
    /// Total anomaly count.
    pub total: usize,
    /// Count per anomaly type.
    pub by_type: HashMap<&'static str, usize>,
    /// Set when the store could not be queried; anomalies are then empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnomalyReport {
    fn from_anomalies(device_id: DeviceId, mut anomalies: Vec<Anomaly>) -> Self {
        anomalies.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let mut by_type: HashMap<&'static str, usize> = HashMap::new();
        for anomaly in &anomalies {
            *by_type.entry(anomaly.anomaly_type.as_str()).or_insert(0) += 1;
        }
        Self {
            device_id,
            total: anomalies.len(),
            anomalies,
            by_type,
            error: None,
        }
    }

    fn unavailable(device_id: DeviceId, message: String) -> Self {
        Self {
            device_id,
            anomalies: Vec::new(),
            total: 0,
            by_type: HashMap::new(),
            error: Some(message),
        }
    }
}

// =============================================================================
// Detector
// =============================================================================

/// Runs the detection rules against a time-series reader.
pub struct AnomalyDetector {
    reader: Arc<dyn TimeSeriesReader>,
    policy: DetectionPolicy,
}

impl AnomalyDetector {
    /// Creates a detector with the default policy.
    pub fn new(reader: Arc<dyn TimeSeriesReader>) -> Self {
        Self::with_policy(reader, DetectionPolicy::default())
    }

    /// Creates a detector with an explicit policy.
    pub fn with_policy(reader: Arc<dyn TimeSeriesReader>, policy: DetectionPolicy) -> Self {
        Self { reader, policy }
    }

    /// The active policy.
    pub fn policy(&self) -> &DetectionPolicy {
        &self.policy
    }

    /// Analyzes one device over `[start, end]`.
    pub async fn detect(
        &self,
        device_id: DeviceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AnomalyReport {
        let points = match self.reader.query_range(device_id, start, end).await {
            Ok(points) => points,
            Err(err) => {
                warn!(device_id = %device_id, error = %err, "anomaly detection skipped, store unavailable");
                return AnomalyReport::unavailable(device_id, err.to_string());
            }
        };

        let mut anomalies = Vec::new();
        self.detect_interruptions(&points, &mut anomalies);
        self.detect_spikes(&points, &mut anomalies);
        self.detect_out_of_range(&points, &mut anomalies);

        match self.reader.query_comm_errors(device_id, start, end).await {
            Ok(errors) => {
                for err in errors {
                    anomalies.push(Anomaly {
                        anomaly_type: AnomalyType::CommunicationError,
                        severity: err.severity,
                        message: format!("{}: {}", err.error_type.as_str(), err.message),
                        key: err.address,
                        value: None,
                        timestamp: err.timestamp,
                    });
                }
            }
            Err(err) => {
                warn!(device_id = %device_id, error = %err, "communication-error replay skipped");
                let mut report = AnomalyReport::from_anomalies(device_id, anomalies);
                report.error = Some(err.to_string());
                return report;
            }
        }

        AnomalyReport::from_anomalies(device_id, anomalies)
    }

    /// Per-key gaps between consecutive points. Each key's series is
    /// scanned independently, so one healthy address never masks an
    /// interruption on a sibling.
    fn detect_interruptions(
        &self,
        points: &[pulse_core::store::StoredPoint],
        out: &mut Vec<Anomaly>,
    ) {
        let mut by_key: HashMap<&str, Vec<&pulse_core::store::StoredPoint>> = HashMap::new();
        for point in points {
            by_key.entry(point.key.as_str()).or_default().push(point);
        }

        for (key, series) in by_key {
            for pair in series.windows(2) {
                let gap = (pair[1].timestamp - pair[0].timestamp).num_seconds();
                if gap > self.policy.gap_secs {
                    let severity = if gap >= self.policy.gap_high_secs {
                        Severity::High
                    } else {
                        Severity::Medium
                    };
                    // Stamped with the last point seen before the gap.
                    out.push(Anomaly {
                        anomaly_type: AnomalyType::DataInterruption,
                        severity,
                        message: format!("no data collected for {}s", gap),
                        key: Some(key.to_string()),
                        value: Some(pair[0].value),
                        timestamp: pair[0].timestamp,
                    });
                }
            }
        }
    }

    /// Per-key 3-sigma outliers, requiring enough samples and real spread.
    fn detect_spikes(&self, points: &[pulse_core::store::StoredPoint], out: &mut Vec<Anomaly>) {
        let mut by_key: HashMap<&str, Vec<&pulse_core::store::StoredPoint>> = HashMap::new();
        for point in points {
            by_key.entry(point.key.as_str()).or_default().push(point);
        }

        for (key, series) in by_key {
            if series.len() < self.policy.spike_min_samples {
                continue;
            }
            let n = series.len() as f64;
            let mean = series.iter().map(|p| p.value).sum::<f64>() / n;
            // Sample standard deviation; min_samples >= 3 keeps n - 1 > 0.
            let variance = series
                .iter()
                .map(|p| (p.value - mean).powi(2))
                .sum::<f64>()
                / (n - 1.0);
            let stdev = variance.sqrt();
            if stdev <= 0.0 {
                continue;
            }

            for point in series {
                let deviation = (point.value - mean).abs();
                if deviation > self.policy.spike_sigma * stdev {
                    out.push(Anomaly {
                        anomaly_type: AnomalyType::ValueSpike,
                        severity: Severity::High,
                        message: format!(
                            "value {:.3} deviates {:.1} sigma from mean {:.3}",
                            point.value,
                            deviation / stdev,
                            mean
                        ),
                        key: Some(key.to_string()),
                        value: Some(point.value),
                        timestamp: point.timestamp,
                    });
                }
            }
        }
    }

    /// Values outside the configured plausible band.
    fn detect_out_of_range(
        &self,
        points: &[pulse_core::store::StoredPoint],
        out: &mut Vec<Anomaly>,
    ) {
        let Some((min, max)) = self.policy.range else {
            return;
        };
        for point in points {
            if point.value < min || point.value > max {
                out.push(Anomaly {
                    anomaly_type: AnomalyType::OutOfRange,
                    severity: Severity::Medium,
                    message: format!(
                        "value {:.3} outside plausible range [{}, {}]",
                        point.value, min, max
                    ),
                    key: Some(point.key.clone()),
                    value: Some(point.value),
                    timestamp: point.timestamp,
                });
            }
        }
    }
}

impl std::fmt::Debug for AnomalyDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnomalyDetector")
            .field("policy", &self.policy)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use parking_lot::Mutex;
    use pulse_core::error::StoreError;
    use pulse_core::store::{CommError, StoredPoint};

    struct FixtureReader {
        points: Mutex<Vec<StoredPoint>>,
        errors: Mutex<Vec<CommError>>,
        unavailable: bool,
    }

    impl FixtureReader {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                points: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
                unavailable: false,
            })
        }

        fn down() -> Arc<Self> {
            Arc::new(Self {
                points: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
                unavailable: true,
            })
        }

        fn push_series(&self, key: &str, values: &[f64], step_secs: i64) {
            let base = Utc::now() - Duration::seconds(step_secs * values.len() as i64);
            let mut points = self.points.lock();
            for (i, value) in values.iter().enumerate() {
                points.push(StoredPoint {
                    timestamp: base + Duration::seconds(step_secs * i as i64),
                    key: key.to_string(),
                    value: *value,
                });
            }
        }
    }

    #[async_trait]
    impl TimeSeriesReader for FixtureReader {
        async fn query_range(
            &self,
            _device_id: DeviceId,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<StoredPoint>, StoreError> {
            if self.unavailable {
                return Err(StoreError::unavailable("store down"));
            }
            let mut points = self.points.lock().clone();
            points.sort_by_key(|p| p.timestamp);
            Ok(points)
        }

        async fn query_comm_errors(
            &self,
            _device_id: DeviceId,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<CommError>, StoreError> {
            if self.unavailable {
                return Err(StoreError::unavailable("store down"));
            }
            Ok(self.errors.lock().clone())
        }

        async fn query_stats(
            &self,
            _device_id: DeviceId,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<HashMap<String, u64>, StoreError> {
            Ok(HashMap::new())
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (Utc::now() - Duration::hours(24), Utc::now())
    }

    #[tokio::test]
    async fn test_quiet_series_yields_no_anomalies() {
        let reader = FixtureReader::new();
        reader.push_series("40001", &[10.0, 10.5, 9.8, 10.2, 10.1], 5);

        let detector = AnomalyDetector::new(reader);
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;
        assert_eq!(report.total, 0);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_gap_detection_with_severity_split() {
        let reader = FixtureReader::new();
        let now = Utc::now();
        {
            let mut points = reader.points.lock();
            for (key, age) in [("a", 4_000i64), ("a", 3_400), ("a", 600), ("a", 595)] {
                points.push(StoredPoint {
                    timestamp: now - Duration::seconds(age),
                    key: key.to_string(),
                    value: 1.0,
                });
            }
        }

        let detector = AnomalyDetector::new(reader);
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;

        let gaps: Vec<&Anomaly> = report
            .anomalies
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::DataInterruption)
            .collect();
        assert_eq!(gaps.len(), 2);
        // Newest first: the 2800s gap (high) precedes the 600s gap (medium).
        assert_eq!(gaps[0].severity, Severity::High);
        assert_eq!(gaps[1].severity, Severity::Medium);
        // Each carries the pre-gap point's key, value, and timestamp.
        assert_eq!(gaps[0].key.as_deref(), Some("a"));
        assert_eq!(gaps[0].value, Some(1.0));
        assert_eq!(gaps[0].timestamp, now - Duration::seconds(3_400));
    }

    #[tokio::test]
    async fn test_gap_on_one_key_not_masked_by_sibling() {
        let reader = FixtureReader::new();
        let now = Utc::now();
        {
            let mut points = reader.points.lock();
            // Key "a" goes quiet for 400s while "b" keeps reporting.
            for age in [500i64, 100] {
                points.push(StoredPoint {
                    timestamp: now - Duration::seconds(age),
                    key: "a".to_string(),
                    value: 1.0,
                });
            }
            for age in (0i64..=500).step_by(100) {
                points.push(StoredPoint {
                    timestamp: now - Duration::seconds(age),
                    key: "b".to_string(),
                    value: 2.0,
                });
            }
        }

        let detector = AnomalyDetector::new(reader);
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;

        let gaps: Vec<&Anomaly> = report
            .anomalies
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::DataInterruption)
            .collect();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].key.as_deref(), Some("a"));
        assert_eq!(gaps[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_spike_detection() {
        let reader = FixtureReader::new();
        // Ten steady samples plus one outlier: deviation 3.02 sample sigma.
        let mut values = vec![10.0; 10];
        values.push(500.0);
        reader.push_series("40001", &values, 5);

        let detector = AnomalyDetector::new(reader);
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;

        let spikes: Vec<&Anomaly> = report
            .anomalies
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::ValueSpike)
            .collect();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].severity, Severity::High);
        assert_eq!(spikes[0].value, Some(500.0));
        assert_eq!(spikes[0].key.as_deref(), Some("40001"));
    }

    #[tokio::test]
    async fn test_spike_uses_sample_stdev() {
        let reader = FixtureReader::new();
        // 12.7 sits at 3.00 population sigma but only 2.86 sample sigma,
        // so it must stay below the threshold.
        reader.push_series(
            "40001",
            &[10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.6, 9.4, 12.7],
            5,
        );

        let detector = AnomalyDetector::new(reader);
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;

        assert!(report
            .anomalies
            .iter()
            .all(|a| a.anomaly_type != AnomalyType::ValueSpike));
    }

    #[tokio::test]
    async fn test_spike_needs_samples_and_spread() {
        let reader = FixtureReader::new();
        // Two samples: below the minimum, no spike regardless of values.
        reader.push_series("a", &[1.0, 100.0], 5);
        // Constant series: zero stdev, no spike.
        reader.push_series("b", &[5.0, 5.0, 5.0, 5.0], 5);

        let detector = AnomalyDetector::new(reader);
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;
        assert!(report
            .anomalies
            .iter()
            .all(|a| a.anomaly_type != AnomalyType::ValueSpike));
    }

    #[tokio::test]
    async fn test_out_of_range_detection() {
        let reader = FixtureReader::new();
        reader.push_series("40001", &[500.0, 1_500.0, -2.0], 5);

        let detector = AnomalyDetector::new(reader);
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;

        let range: Vec<&Anomaly> = report
            .anomalies
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::OutOfRange)
            .collect();
        assert_eq!(range.len(), 2);
        assert!(range.iter().all(|a| a.severity == Severity::Medium));
    }

    #[tokio::test]
    async fn test_range_rule_disabled() {
        let reader = FixtureReader::new();
        reader.push_series("40001", &[5_000.0, 5_001.0, 5_002.0], 5);

        let policy = DetectionPolicy {
            range: None,
            ..DetectionPolicy::default()
        };
        let detector = AnomalyDetector::with_policy(reader, policy);
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;
        assert_eq!(report.total, 0);
    }

    #[tokio::test]
    async fn test_comm_error_replay_keeps_severity() {
        let reader = FixtureReader::new();
        reader.errors.lock().push(CommError::read_failed(
            DeviceId::new(1),
            "dev",
            "illegal address",
            "40099",
        ));
        reader
            .errors
            .lock()
            .push(CommError::connection(DeviceId::new(1), "dev", "refused"));

        let detector = AnomalyDetector::new(reader);
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;

        let replayed: Vec<&Anomaly> = report
            .anomalies
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::CommunicationError)
            .collect();
        assert_eq!(replayed.len(), 2);
        let severities: Vec<Severity> = replayed.iter().map(|a| a.severity).collect();
        assert!(severities.contains(&Severity::Medium));
        assert!(severities.contains(&Severity::High));
    }

    #[tokio::test]
    async fn test_store_unavailable_degrades() {
        let detector = AnomalyDetector::new(FixtureReader::down());
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;

        assert_eq!(report.total, 0);
        assert!(report.anomalies.is_empty());
        assert!(report.error.as_deref().unwrap_or_default().contains("store down"));
    }

    #[tokio::test]
    async fn test_report_ordering_and_counts() {
        let reader = FixtureReader::new();
        let mut values = vec![10.0; 10];
        values.push(2_000.0);
        reader.push_series("a", &values, 5);

        let detector = AnomalyDetector::new(reader);
        let (start, end) = window();
        let report = detector.detect(DeviceId::new(1), start, end).await;

        // The outlier trips both spike and range rules.
        assert_eq!(report.by_type.get("value_spike"), Some(&1));
        assert_eq!(report.by_type.get("out_of_range"), Some(&1));
        assert_eq!(report.total, 2);
        for pair in report.anomalies.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }
}
