// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # PULSE Integration Tests
//!
//! Integration tests for the PULSE collector, exercising the poll engine,
//! data pipeline, anomaly detection, and configuration loading against the
//! in-memory store and scripted protocol handlers.
//!
//! ## Module Structure
//!
//! - [`common`]: shared fixtures and mocks
//!   - `fixtures`: pre-built devices, addresses, and stored points
//!   - `mocks`: scripted protocol handlers and a static device registry
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p pulse-tests
//!
//! # Run a specific suite
//! cargo test -p pulse-tests --test integration_collector
//! cargo test -p pulse-tests --test integration_anomaly
//! cargo test -p pulse-tests --test integration_config
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::mocks::*;
    pub use crate::common::*;
}
