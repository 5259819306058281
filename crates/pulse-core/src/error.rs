// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for the PULSE collector.
//!
//! The taxonomy follows failure handling policy, not module layout:
//!
//! - [`ConfigError`]: rejected before any I/O, surfaced synchronously
//! - [`HandlerError`]: protocol-handler failures, split into network-level
//!   (device transitions to backoff, retried automatically) and
//!   protocol-level (device stays connected, the one address yields nothing)
//! - [`StoreError`]: time-series persistence failures; callers degrade to
//!   "0 points written" rather than aborting a cycle
//!
//! Failures are isolated at the smallest unit (one address, one device) and
//! never allowed to fail a whole poll cycle.

use thiserror::Error;

// =============================================================================
// Network classification
// =============================================================================

/// Message substrings that mark a failure as network-level rather than a
/// device-side rejection. Matches the classification used across all
/// protocol handlers.
const NETWORK_ERROR_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "socket",
    "unreachable",
    "refused",
    "reset",
    "closed",
    "broken pipe",
];

/// Returns true when an error message reads as a network-level failure.
///
/// Network failures take the device offline and into backoff; anything else
/// means the device answered and stays online even if the read was rejected.
pub fn is_network_error_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    NETWORK_ERROR_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

// =============================================================================
// HandlerError
// =============================================================================

/// Errors raised by protocol handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Invalid parameters rejected before any I/O.
    #[error("configuration error: {message}")]
    Config {
        /// What was rejected and why.
        message: String,
    },

    /// Transport-level failure: the device did not answer.
    #[error("network error: {message}")]
    Network {
        /// Underlying failure description.
        message: String,
    },

    /// An operation exceeded its allotted time. Treated as a network
    /// failure for connectivity bookkeeping.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// Configured limit in milliseconds.
        timeout_ms: u64,
    },

    /// The device answered but rejected the request (bad address, access
    /// violation, decode failure). The connection itself is healthy.
    #[error("protocol error: {message}")]
    Protocol {
        /// Device-side rejection detail.
        message: String,
    },

    /// Operation attempted without an established session.
    #[error("not connected")]
    NotConnected,

    /// The handler does not support the requested operation.
    #[error("unsupported operation: {message}")]
    Unsupported {
        /// What was requested.
        message: String,
    },
}

impl HandlerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unsupported-operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Classifies a raw failure message: network errors become
    /// [`HandlerError::Network`], everything else [`HandlerError::Protocol`].
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_network_error_message(&message) {
            Self::Network { message }
        } else {
            Self::Protocol { message }
        }
    }

    /// True for failures that mean the device is unreachable.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::NotConnected
        )
    }

    /// True for failures that a later attempt may clear.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config { .. } | Self::Unsupported { .. })
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout {
                operation: "io".to_string(),
                timeout_ms: 0,
            },
            ErrorKind::NotConnected => Self::NotConnected,
            _ => Self::Network {
                message: err.to_string(),
            },
        }
    }
}

// =============================================================================
// StoreError
// =============================================================================

/// Errors raised by the time-series store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached at all.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Underlying failure description.
        message: String,
    },

    /// A write was rejected or lost.
    #[error("write failed: {message}")]
    Write {
        /// Underlying failure description.
        message: String,
    },

    /// A range/stats query failed.
    #[error("query failed: {message}")]
    Query {
        /// Underlying failure description.
        message: String,
    },
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a write error.
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
        }
    }

    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Errors raised while loading registry and settings files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// File content is not valid JSON.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Content parsed but failed validation.
    #[error("invalid configuration: {message}")]
    Invalid {
        /// What failed validation.
        message: String,
    },
}

impl ConfigError {
    /// Creates a validation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

// =============================================================================
// PulseError
// =============================================================================

/// Top-level error type aggregating the per-concern hierarchies.
#[derive(Debug, Error)]
pub enum PulseError {
    /// Protocol-handler failure.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Time-series store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Anything that does not fit the taxonomy. Logged at the process
    /// level; never crashes the scheduler.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience result alias for the top-level error.
pub type PulseResult<T> = Result<T, PulseError>;

// =============================================================================
// Tests
// =============================================================================
