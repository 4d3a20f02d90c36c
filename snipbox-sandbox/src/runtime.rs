//! Runtime trait and implementations

mod process;

use crate::error::SandboxResult;
use crate::limits::ResourceLimits;
use crate::types::{ExecutionId, RunRequest, RunResult};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use process::ProcessRuntime;

/// Runtime abstraction for running one program to completion
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Run `request` under `limits` and classify the outcome.
    ///
    /// Program misbehaviour is reported through [`RunResult`]; an `Err` means
    /// the runtime itself failed. When `cancel` fires the process tree is
    /// killed, the workspace removed and [`crate::SandboxError::Cancelled`]
    /// returned.
    async fn execute(
        &self,
        id: ExecutionId,
        request: &RunRequest,
        limits: &ResourceLimits,
        cancel: CancellationToken,
    ) -> SandboxResult<RunResult>;

    /// Get runtime name
    fn name(&self) -> &str;
}
