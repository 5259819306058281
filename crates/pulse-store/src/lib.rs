// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # pulse-store
//!
//! Time-series store implementations for the PULSE collector. Currently
//! ships [`MemoryStore`]; external backends plug in through the store
//! traits in `pulse-core`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod memory;

pub use memory::{MemoryStore, DEFAULT_CAPACITY};
