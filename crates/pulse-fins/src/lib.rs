// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # pulse-fins
//!
//! Omron FINS/TCP protocol handler for the PULSE collector. The wire
//! framing is small enough that it is implemented directly over a tokio
//! TCP stream rather than pulling in a protocol crate.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod frame;
pub mod handler;

pub use handler::{FinsHandler, FinsHandlerFactory};
