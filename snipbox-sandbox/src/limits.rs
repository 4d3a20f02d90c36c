//! Resource limits configuration for sandboxed execution

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource limits for a single run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Wall-clock limit before the process tree is killed
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Bytes captured per stream; more output aborts the run
    pub max_output_bytes: usize,

    /// Address-space limit (RLIMIT_AS)
    pub max_memory_bytes: Option<u64>,

    /// CPU seconds (RLIMIT_CPU)
    pub max_cpu_secs: Option<u64>,

    /// RLIMIT_NPROC. The kernel counts every process and thread of the
    /// service's uid against it, not just this run's tree, so it only fits a
    /// dedicated service account sized for `max_concurrent_runs`. Off by
    /// default; a run's processes are bounded by its process group being
    /// killed at the end and, under bubblewrap, by a private pid namespace.
    pub max_processes: Option<u64>,

    /// Largest file the program may write (RLIMIT_FSIZE)
    pub max_file_size_bytes: Option<u64>,

    /// Open descriptors (RLIMIT_NOFILE)
    pub max_open_files: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_output_bytes: 1024 * 1024,            // 1 MiB
            max_memory_bytes: Some(256 * 1024 * 1024), // 256 MiB
            max_cpu_secs: Some(10),
            max_processes: None,
            max_file_size_bytes: Some(10 * 1024 * 1024), // 10 MiB
            max_open_files: Some(64),
        }
    }
}

impl ResourceLimits {
    /// Create strict limits for hostile workloads
    pub fn strict() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_output_bytes: 64 * 1024,
            max_memory_bytes: Some(128 * 1024 * 1024),
            max_cpu_secs: Some(5),
            max_processes: None,
            max_file_size_bytes: Some(1024 * 1024),
            max_open_files: Some(32),
        }
    }

    /// Create permissive limits for trusted code
    pub fn permissive() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_output_bytes: 8 * 1024 * 1024,
            max_memory_bytes: Some(1024 * 1024 * 1024),
            max_cpu_secs: Some(60),
            max_processes: None,
            max_file_size_bytes: Some(100 * 1024 * 1024),
            max_open_files: Some(256),
        }
    }

    /// Override the wall-clock timeout, keeping the CPU limit no tighter than it
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        if let Some(cpu) = self.max_cpu_secs.as_mut() {
            *cpu = (*cpu).max(crate::isolation::cpu_floor(timeout));
        }
        self
    }

    /// Override the output cap
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}
