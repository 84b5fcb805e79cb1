// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Domain
//!
//! Typed outcome of running one [`CodeArtifact`](crate::domain::artifact::CodeArtifact)
//! against a [`VerificationPack`](crate::domain::verification::VerificationPack),
//! plus the [`Executor`] port through which the isolated sandbox is reached.
//!
//! ## Status Table
//! | Status | Meaning |
//! |--------|---------|
//! | `Success` | Process exited 0, every assertion held |
//! | `Failure` | Code-level failure: parse error, exception, or failed assertion |
//! | `Timeout` | Hard wall-clock limit hit, partial output kept |
//! | `Crash` | Sandbox-level death (OOM kill, signal) rather than a code error |
//!
//! Code-level failures are data, never `Err`. Only sandbox unavailability is
//! raised, as [`AdapterError`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Line prefix the verification harness writes to stderr for every failed
/// assertion. The reflector keys `assertion-failure` classification off it.
pub const ASSERTION_MARKER: &str = "ASSERTION FAILED";

/// Line prefix for an assertion whose evaluation raised something other than
/// `AssertionError`. The candidate crashed rather than returned a wrong value,
/// so this marker classifies as `runtime` or `syntax`.
pub const ASSERTION_ERROR_MARKER: &str = "ASSERTION ERRORED";

/// File name the harness compiles candidate source under, so tracebacks
/// name it.
pub const SOLUTION_FILE: &str = "solution.py";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
    Crash,
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Last `max_chars` characters of stderr, trimmed. Used for the event
    /// stream, where the tail of a traceback carries the useful part.
    pub fn stderr_snippet(&self, max_chars: usize) -> String {
        tail_chars(self.stderr.trim(), max_chars)
    }
}

pub(crate) fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// One sandboxed run: candidate source plus assertion sources.
#[derive(Debug, Clone)]
pub struct ExecutorRequest {
    pub source: String,
    pub assertions: Vec<String>,
    pub timeout: Duration,
}

/// Raw sandbox output before it is mapped onto an [`ExecutionStatus`].
#[derive(Debug, Clone, Default)]
pub struct ExecutorOutput {
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub oom_killed: bool,
}

/// Port to the isolated execution environment. Every call must run in a
/// fresh sandbox with no state carried over from earlier calls.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, request: ExecutorRequest) -> Result<ExecutorOutput, ExecutorError>;
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
    #[error("sandbox failed while running: {0}")]
    Internal(String),
}

/// Raised by the execution adapter only when the sandbox itself could not be
/// provisioned or driven. Ordinary code failures never surface here.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("execution substrate unavailable: {0}")]
    Unavailable(String),
}

impl From<ExecutorError> for AdapterError {
    fn from(err: ExecutorError) -> Self {
        AdapterError::Unavailable(err.to_string())
    }
}
