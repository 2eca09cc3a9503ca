// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker error value.
//!
//! The retry decision is a field of the error, not a type distinction:
//! the queue retries transient errors with backoff and fails the job on
//! permanent ones.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known error codes.
pub mod codes {
    pub const NETWORK: &str = "NETWORK";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const EXTRACTION_FAILED: &str = "EXTRACTION_FAILED";
    pub const UNSUPPORTED_LANGUAGE: &str = "UNSUPPORTED_LANGUAGE";
    pub const MISSING_INPUT: &str = "MISSING_INPUT";
    pub const TOOL_FAILED: &str = "TOOL_FAILED";
    pub const CANCELED: &str = "CANCELED";
}

/// Error raised by a worker attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct WorkerError {
    pub code: String,
    pub message: String,
    /// Transient errors are retried by the queue with backoff.
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl WorkerError {
    /// Network/timeout/rate-limit class: retried by the queue.
    pub fn transient(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            retryable: true,
            stack: None,
        }
    }

    /// Unrecoverable: fails the job once surfaced.
    pub fn permanent(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            retryable: false,
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}
