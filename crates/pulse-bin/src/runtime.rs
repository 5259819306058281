// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Collector runtime orchestration.
//!
//! Assembles all PULSE components in order:
//!
//! - Configuration loading (devices + settings)
//! - Handler registry with the built-in protocol factories
//! - Time-series store and collector
//! - Scheduler with graceful shutdown coordination

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use pulse_collector::{Collector, Scheduler};
use pulse_config::{load_settings, FileRegistry, SETTINGS_FILE};
use pulse_core::handler::HandlerRegistry;
use pulse_core::types::Settings;
use pulse_fins::FinsHandlerFactory;
use pulse_modbus::ModbusHandlerFactory;
use pulse_s7::S7HandlerFactory;
use pulse_store::MemoryStore;

use crate::error::BinResult;
use crate::shutdown::ShutdownCoordinator;

// =============================================================================
// CollectorRuntime
// =============================================================================

/// The main runtime that wires the collector together and runs it until
/// shutdown.
pub struct CollectorRuntime {
    config_dir: PathBuf,
    settings: Settings,
    shutdown: ShutdownCoordinator,
    skip_connect: bool,
}

impl CollectorRuntime {
    /// Creates a runtime rooted at the given configuration directory.
    pub fn new(config_dir: impl AsRef<Path>) -> BinResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        let settings = load_settings(&config_dir.join(SETTINGS_FILE))?;
        Ok(Self {
            config_dir,
            settings,
            shutdown: ShutdownCoordinator::new(),
            skip_connect: false,
        })
    }

    /// Defers device connection to the first poll cycle.
    pub fn with_skip_connect(mut self, skip: bool) -> Self {
        self.skip_connect = skip;
        self
    }

    /// Builds the handler registry with all built-in protocol factories.
    pub fn build_handler_registry() -> HandlerRegistry {
        let registry = HandlerRegistry::new();
        registry.register(Box::new(ModbusHandlerFactory::tcp()));
        registry.register(Box::new(ModbusHandlerFactory::rtu_over_tcp()));
        registry.register(Box::new(FinsHandlerFactory));
        registry.register(Box::new(S7HandlerFactory));
        registry
    }

    /// Runs the collector until a shutdown signal arrives.
    pub async fn run(self) -> BinResult<()> {
        info!(version = pulse_core::VERSION, "starting PULSE collector");

        let registry = Arc::new(FileRegistry::new(&self.config_dir));
        let store = Arc::new(MemoryStore::new());
        let handlers = Arc::new(Self::build_handler_registry());

        let collector = Arc::new(Collector::new(
            registry,
            handlers,
            store.clone(),
            self.settings.clone(),
        ));

        let loaded = collector.reload_devices().await?;
        info!(devices = loaded, "device registry loaded");

        if !self.skip_connect {
            // Prime connections so the first cycle reads immediately.
            if let Some(summary) = collector.run_cycle().await {
                info!(
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "initial collection cycle complete"
                );
            }
        }

        let scheduler = Scheduler::new(collector.clone(), store);
        let scheduler_task = tokio::spawn(scheduler.run(self.shutdown.subscribe()));

        info!(
            interval_secs = self.settings.collect_interval_seconds,
            "PULSE collector is ready"
        );
        self.shutdown.wait_for_shutdown().await;

        info!("shutdown initiated, draining connections");
        if let Err(err) = scheduler_task.await {
            return Err(crate::error::BinError::runtime(format!(
                "scheduler task failed: {err}"
            )));
        }

        info!("PULSE collector shutdown complete");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::types::Protocol;

    #[test]
    fn test_handler_registry_covers_all_protocols() {
        let registry = CollectorRuntime::build_handler_registry();
        let supported = registry.supported_protocols();
        assert!(supported.contains(&Protocol::ModbusTcp));
        assert!(supported.contains(&Protocol::ModbusRtuOverTcp));
        assert!(supported.contains(&Protocol::OmronFins));
        assert!(supported.contains(&Protocol::SiemensS7));
    }

    #[test]
    fn test_missing_settings_file_uses_defaults() {
        let runtime = CollectorRuntime::new(std::env::temp_dir().join("pulse-no-such-dir"));
        let runtime = runtime.unwrap();
        assert_eq!(runtime.settings, Settings::default());
    }
}
