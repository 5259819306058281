// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # pulse-s7
//!
//! Siemens S7 protocol handler for the PULSE collector, speaking S7comm
//! over ISO-on-TCP (TPKT + COTP) directly on a tokio TCP stream.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod frame;
pub mod handler;

pub use handler::{S7Handler, S7HandlerFactory};
