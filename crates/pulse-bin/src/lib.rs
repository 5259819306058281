// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # pulse-bin
//!
//! CLI binary for the PULSE collector, providing:
//!
//! - CLI argument parsing with clap (`run`, `validate`, `version`)
//! - Runtime assembly: registry, store, handler factories, collector,
//!   and scheduler
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//! - Logging initialization

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::CollectorRuntime;
pub use shutdown::ShutdownCoordinator;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
