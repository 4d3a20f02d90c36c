//! Common test utilities shared across integration and E2E tests


pub use test_server::*;

use snipbox_sandbox::{NetworkIsolation, ResourceLimits, SandboxConfig};
use snipbox_server::AppConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("snipbox_sandbox=debug,snipbox_server=debug,snipbox_store=debug")
        .with_test_writer()
        .try_init();
}

/// The python3 interpreter, when the host has one
pub fn python3() -> Option<PathBuf> {
    which::which("python3").ok()
}

/// Returns early from a test when python3 is missing
#[macro_export]
macro_rules! require_python {
    () => {
        match $crate::common::python3() {
            Some(path) => path,
            None => {
                eprintln!("skipping: python3 not found on PATH");
                return;
            }
        }
    };
}

/// Sandbox settings that behave the same on any Linux host or container
pub fn test_sandbox_config(workspace_root: &Path, interpreter: PathBuf) -> SandboxConfig {
    SandboxConfig::unconfined()
        .with_interpreter(interpreter)
        .with_workspace_root(workspace_root)
        .with_network(NetworkIsolation::Disabled)
}

/// Shipped default limits with a test-sized timeout
pub fn test_limits(timeout: Duration) -> ResourceLimits {
    ResourceLimits::default().with_timeout(timeout)
}

/// Full server config listening on an ephemeral loopback port
pub fn test_app_config(workspace_root: &Path, interpreter: PathBuf) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.bind_address = "127.0.0.1".to_string();
    config.server.port = 0;
    config.sandbox = test_sandbox_config(workspace_root, interpreter);
    config.limits = test_limits(Duration::from_secs(5));
    config
}

/// Number of entries left under a workspace root
pub fn leftover_workspaces(root: &Path) -> usize {
    std::fs::read_dir(root).map(|dir| dir.count()).unwrap_or(0)
}

/// True once `pid` is gone or only a zombie awaiting its reaper
pub fn process_is_dead(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .map(|state| state == "Z" || state == "X")
            .unwrap_or(false),
    }
}

/// Poll `process_is_dead` for up to `within`
pub async fn wait_for_death(pid: u32, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if process_is_dead(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    process_is_dead(pid)
}
