//! Snipbox Sandbox - isolated execution of untrusted programs
//!
//! Each run gets a private workspace, an interpreter process confined to it
//! by bubblewrap or Landlock, rlimits and its own process group, a wall-clock
//! timeout and capped output capture. [`RunCoordinator`] bounds how many runs
//! execute at once.

mod coordinator;
mod error;
mod isolation;
#[cfg(target_os = "linux")]
mod landlock;
mod limits;
mod policy;
mod runtime;
mod types;
mod workspace;

pub use coordinator::{CoordinatorConfig, RunCoordinator, RunStats, RunStatsSnapshot};
pub use error::{SandboxError, SandboxResult};
pub use isolation::{kill_process_group, probe_bubblewrap, probe_network_isolation, BWRAP_MOUNT_POINT};
pub use limits::ResourceLimits;
pub use policy::{landlock_supported, Confinement, NetworkIsolation, SandboxConfig};
pub use runtime::{ProcessRuntime, Runtime};
pub use types::{ExecutionId, RunRequest, RunResult, ValidationError};
pub use workspace::Workspace;
