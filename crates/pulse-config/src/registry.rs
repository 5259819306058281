// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! File-backed device registry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use pulse_core::device::{Device, DeviceRegistry};
use pulse_core::error::ConfigError;

use crate::loader::{parse_devices, DEVICES_FILE};

/// Device registry that re-reads `devices.json` on every listing.
///
/// Reading per call keeps edits to the file visible on the next poll
/// cycle without a reload signal or file watcher.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    devices_path: PathBuf,
}

impl FileRegistry {
    /// Creates a registry rooted at the given config directory.
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            devices_path: config_dir.as_ref().join(DEVICES_FILE),
        }
    }

    /// Creates a registry from an explicit file path.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            devices_path: path.into(),
        }
    }

    /// Path of the backing registry file.
    pub fn path(&self) -> &Path {
        &self.devices_path
    }
}

#[async_trait]
impl DeviceRegistry for FileRegistry {
    async fn list_active_devices(&self) -> Result<Vec<Device>, ConfigError> {
        let bytes = tokio::fs::read(&self.devices_path).await?;
        let devices = parse_devices(&bytes)?;
        debug!(
            path = %self.devices_path.display(),
            devices = devices.len(),
            "registry snapshot"
        );
        Ok(devices)
    }
}

// =============================================================================
// Tests
// =============================================================================
