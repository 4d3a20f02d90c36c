//! Run coordinator - admission, bookkeeping and fault containment for runs

use crate::error::{SandboxError, SandboxResult};
use crate::limits::ResourceLimits;
use crate::policy::SandboxConfig;
use crate::runtime::{ProcessRuntime, Runtime};
use crate::types::{ExecutionId, RunRequest, RunResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Concurrency settings for the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Runs executing at once; later requests wait in arrival order
    pub max_concurrent_runs: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
        }
    }
}

/// Counters describing coordinator activity
#[derive(Debug, Default)]
pub struct RunStats {
    admitted: AtomicU64,
    in_flight: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    system_errors: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`RunStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatsSnapshot {
    pub admitted: u64,
    pub in_flight: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub system_errors: u64,
    pub rejected: u64,
}

impl RunStats {
    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            system_errors: self.system_errors.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &RunResult) {
        let counter = match result {
            RunResult::Success { .. } => &self.succeeded,
            RunResult::Failure { .. } => &self.failed,
            RunResult::TimedOut => &self.timed_out,
            RunResult::SystemError { .. } => &self.system_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decrements `in_flight` however the run task ends
struct InFlight(Arc<RunStats>);

impl InFlight {
    fn enter(stats: Arc<RunStats>) -> Self {
        stats.admitted.fetch_add(1, Ordering::Relaxed);
        stats.in_flight.fetch_add(1, Ordering::Relaxed);
        Self(stats)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Admits runs through a FIFO gate and hands them to a [`Runtime`].
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct RunCoordinator {
    runtime: Arc<dyn Runtime>,
    limits: ResourceLimits,
    gate: Arc<Semaphore>,
    max_concurrent_runs: usize,
    stats: Arc<RunStats>,
}

impl RunCoordinator {
    /// Create a coordinator over any runtime
    pub fn new(
        runtime: Arc<dyn Runtime>,
        limits: ResourceLimits,
        config: CoordinatorConfig,
    ) -> Self {
        // Zero would deadlock every request
        let max_concurrent_runs = config.max_concurrent_runs.max(1);
        Self {
            runtime,
            limits,
            gate: Arc::new(Semaphore::new(max_concurrent_runs)),
            max_concurrent_runs,
            stats: Arc::new(RunStats::default()),
        }
    }

    /// Create a coordinator over a [`ProcessRuntime`] checked against the
    /// host; fails when runs could not be confined to their workspace.
    pub async fn from_config(
        sandbox: SandboxConfig,
        limits: ResourceLimits,
        config: CoordinatorConfig,
    ) -> SandboxResult<Self> {
        let runtime = ProcessRuntime::detect(sandbox).await?;
        Ok(Self::new(Arc::new(runtime), limits, config))
    }

    /// Run one program.
    ///
    /// Invalid requests are refused before any resource is allocated. Every
    /// admitted run ends in a [`RunResult`]; infrastructure faults, including
    /// a panicking runtime, become `SystemError`. Dropping the returned
    /// future kills the program and removes its workspace.
    pub async fn handle_run(&self, request: RunRequest) -> Result<RunResult, ValidationError> {
        if let Err(e) = request.validate() {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let id = ExecutionId::new();
        let cancel = CancellationToken::new();
        let _disconnect = cancel.clone().drop_guard();

        let queued = Instant::now();
        let Ok(permit) = Arc::clone(&self.gate).acquire_owned().await else {
            tracing::error!(execution_id = %id, "Run gate closed");
            return Ok(RunResult::SystemError {
                message: "Run coordinator is shut down".to_string(),
            });
        };

        tracing::debug!(
            execution_id = %id,
            runtime = self.runtime.name(),
            code_len = request.source.len(),
            stdin_len = request.stdin.len(),
            queued_ms = queued.elapsed().as_millis() as u64,
            "Run admitted"
        );

        let runtime = Arc::clone(&self.runtime);
        let limits = self.limits.clone();
        let in_flight = InFlight::enter(Arc::clone(&self.stats));
        let task = tokio::spawn(async move {
            // Both held until the child is reaped and its workspace gone
            let _permit = permit;
            let _in_flight = in_flight;
            runtime.execute(id, &request, &limits, cancel).await
        });

        let started = Instant::now();
        let result = match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(SandboxError::Cancelled)) => RunResult::SystemError {
                message: SandboxError::Cancelled.public_message(),
            },
            Ok(Err(e)) => {
                tracing::error!(execution_id = %id, error = %e, "Sandbox failure");
                RunResult::SystemError {
                    message: e.public_message(),
                }
            }
            Err(e) => {
                tracing::error!(execution_id = %id, error = %e, "Run task panicked");
                RunResult::SystemError {
                    message: "Internal error while running program".to_string(),
                }
            }
        };
        self.stats.record(&result);

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            RunResult::TimedOut => tracing::warn!(
                execution_id = %id,
                duration_ms,
                timeout_secs = self.limits.timeout.as_secs(),
                "Run timed out"
            ),
            RunResult::SystemError { message } => tracing::error!(
                execution_id = %id,
                duration_ms,
                message = %message,
                "Run ended in system error"
            ),
            _ => tracing::info!(
                execution_id = %id,
                outcome = result.label(),
                duration_ms,
                "Run completed"
            ),
        }

        Ok(result)
    }

    pub fn stats(&self) -> RunStatsSnapshot {
        self.stats.snapshot()
    }

    /// Get the runtime name
    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn max_concurrent_runs(&self) -> usize {
        self.max_concurrent_runs
    }

    /// Permits not currently held by a run
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }
}
