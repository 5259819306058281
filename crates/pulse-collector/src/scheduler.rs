// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Collection scheduler: the poll-interval loop and the daily retention job.
//!
//! Runs until the shutdown signal flips, then drains: every device is
//! disconnected before the loop returns. Interval changes pushed through
//! the collector's watch channel take effect on the next tick without a
//! restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use pulse_core::store::RetentionStore;

use crate::collector::Collector;

/// UTC hour of the daily retention sweep.
pub const RETENTION_HOUR: u32 = 2;

/// Next retention run strictly after `now`: today or tomorrow at the
/// configured UTC hour.
pub fn next_retention_run(now: DateTime<Utc>) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(RETENTION_HOUR, 0, 0).unwrap_or_default();
    let candidate = Utc.from_utc_datetime(&now.date_naive().and_time(at));
    if candidate <= now {
        candidate + chrono::Duration::days(1)
    } else {
        candidate
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Drives poll cycles and retention cleanup.
pub struct Scheduler {
    collector: Arc<Collector>,
    retention: Arc<dyn RetentionStore>,
}

impl Scheduler {
    /// Creates a scheduler over the given collector and retention store.
    pub fn new(collector: Arc<Collector>, retention: Arc<dyn RetentionStore>) -> Self {
        Self {
            collector,
            retention,
        }
    }

    /// Runs until `shutdown` turns true, then drains connections.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval_rx = self.collector.subscribe_interval();
        let mut period = *interval_rx.borrow();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut retention_at = next_retention_run(Utc::now());
        info!(
            interval_s = period.as_secs(),
            next_retention = %retention_at,
            "scheduler started"
        );

        loop {
            let until_retention = (retention_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = ticker.tick() => {
                    self.collector.run_cycle().await;
                }
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    period = *interval_rx.borrow();
                    ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    info!(interval_s = period.as_secs(), "poll interval updated");
                }
                _ = tokio::time::sleep(until_retention) => {
                    self.run_retention().await;
                    retention_at = next_retention_run(Utc::now());
                    debug!(next_retention = %retention_at, "retention rescheduled");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopping, draining connections");
        self.collector.shutdown().await;
    }

    /// Deletes data older than the configured retention horizon.
    async fn run_retention(&self) {
        let retention_days = self.collector.settings().data_retention_days;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));

        match self.retention.delete_before(cutoff).await {
            Ok(deleted) => {
                info!(deleted, retention_days, cutoff = %cutoff, "retention sweep complete");
            }
            Err(err) => {
                warn!(error = %err, "retention sweep failed, will retry tomorrow");
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_retention_before_hour() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 0, 30, 0).unwrap();
        let next = next_retention_run(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_next_retention_after_hour_rolls_over() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 1).unwrap();
        let next = next_retention_run(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 11, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_next_retention_exactly_at_hour() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 0).unwrap();
        let next = next_retention_run(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 11, 2, 0, 0).unwrap());
    }
}
