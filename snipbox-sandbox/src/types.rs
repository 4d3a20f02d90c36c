//! Core types for sandbox execution

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to run a program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Program source text
    pub source: String,

    /// Text fed to the program's standard input
    #[serde(default)]
    pub stdin: String,
}

impl RunRequest {
    /// Create a request with empty stdin
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            stdin: String::new(),
        }
    }

    /// Set standard input
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    /// Reject requests that must never reach the sandbox
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source.trim().is_empty() {
            return Err(ValidationError::EmptySource);
        }
        Ok(())
    }
}

/// Request rejected before any workspace is allocated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No code provided!")]
    EmptySource,
}

/// Outcome of a single run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult {
    /// Exit status 0 and nothing written to stderr
    Success { stdout: String },

    /// Interpreter ran but exited non-zero or produced diagnostics
    Failure { stderr: String, exit_code: i32 },

    /// Wall-clock limit reached; the process tree was killed
    TimedOut,

    /// The process could not be run at all
    SystemError { message: String },
}

impl RunResult {
    /// Check if the run succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success { .. })
    }

    /// Short outcome label for logs and counters
    pub fn label(&self) -> &'static str {
        match self {
            RunResult::Success { .. } => "success",
            RunResult::Failure { .. } => "failure",
            RunResult::TimedOut => "timed_out",
            RunResult::SystemError { .. } => "system_error",
        }
    }
}
