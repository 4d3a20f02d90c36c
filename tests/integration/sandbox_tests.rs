//! Integration tests for the sandbox with a real python3 interpreter
//!
//! Every test skips itself when python3 is not installed.

use assert_matches::assert_matches;
use snipbox_sandbox::{
    landlock_supported, probe_bubblewrap, Confinement, CoordinatorConfig, NetworkIsolation,
    ProcessRuntime, ResourceLimits, RunCoordinator, RunRequest, RunResult, SandboxConfig,
    SandboxError, ValidationError,
};
use snipbox_tests::common::{
    leftover_workspaces, setup_test_logging, test_limits, test_sandbox_config, wait_for_death,
};
use snipbox_tests::require_python;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn coordinator_with(root: &Path, python: PathBuf, limits: ResourceLimits, max: usize) -> RunCoordinator {
    let runtime = ProcessRuntime::new(test_sandbox_config(root, python));
    RunCoordinator::new(
        Arc::new(runtime),
        limits,
        CoordinatorConfig {
            max_concurrent_runs: max,
        },
    )
}

fn coordinator(root: &Path, python: PathBuf) -> RunCoordinator {
    coordinator_with(root, python, test_limits(Duration::from_secs(5)), 4)
}

#[tokio::test]
async fn test_print_hi() {
    setup_test_logging();
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let coordinator = coordinator(root.path(), python);

    let result = coordinator
        .handle_run(RunRequest::new("print('hi')"))
        .await
        .unwrap();
    assert_eq!(result, RunResult::Success { stdout: "hi\n".into() });
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_stdin_is_visible_to_program() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let coordinator = coordinator(root.path(), python);

    let result = coordinator
        .handle_run(RunRequest::new("n = int(input())\nprint(n * 2)").with_stdin("5\n"))
        .await
        .unwrap();
    assert_eq!(result, RunResult::Success { stdout: "10\n".into() });
}

#[tokio::test]
async fn test_reading_empty_stdin_fails_cleanly() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let coordinator = coordinator(root.path(), python);

    let result = coordinator
        .handle_run(RunRequest::new("input()"))
        .await
        .unwrap();
    assert_matches!(result, RunResult::Failure { stderr, exit_code: 1 } => {
        assert!(stderr.contains("EOFError"));
    });
}

#[tokio::test]
async fn test_exception_reports_traceback_without_paths() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let coordinator = coordinator(root.path(), python);

    let result = coordinator
        .handle_run(RunRequest::new("print(1/0)"))
        .await
        .unwrap();
    assert_matches!(result, RunResult::Failure { stderr, exit_code } => {
        assert_eq!(exit_code, 1);
        assert!(stderr.contains("ZeroDivisionError"));
        assert!(stderr.contains("File \"main.py\""));
        assert!(!stderr.contains(&root.path().display().to_string()));
    });
}

#[tokio::test]
async fn test_validation_allocates_nothing() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let coordinator = coordinator(root.path(), python);

    let result = coordinator.handle_run(RunRequest::new(" \n\t")).await;
    assert_eq!(result, Err(ValidationError::EmptySource));
    assert_eq!(leftover_workspaces(root.path()), 0);
    assert_eq!(coordinator.stats().admitted, 0);
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let coordinator =
        coordinator_with(root.path(), python, test_limits(Duration::from_secs(1)), 4);

    let started = Instant::now();
    let result = coordinator
        .handle_run(RunRequest::new("while True: pass"))
        .await
        .unwrap();
    assert_eq!(result, RunResult::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_timeout_leaves_no_orphans() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let marker = TempDir::new().unwrap();
    let pid_file = marker.path().join("child.pid");
    let coordinator =
        coordinator_with(root.path(), python, test_limits(Duration::from_secs(1)), 4);

    let source = format!(
        "import subprocess\n\
         child = subprocess.Popen(['sleep', '60'])\n\
         open({:?}, 'w').write(str(child.pid))\n\
         while True: pass\n",
        pid_file.display().to_string()
    );
    let result = coordinator.handle_run(RunRequest::new(source)).await.unwrap();
    assert_eq!(result, RunResult::TimedOut);

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(wait_for_death(pid, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_background_child_dies_with_finished_run() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let coordinator = coordinator(root.path(), python);

    let source = "import subprocess\n\
                  child = subprocess.Popen(['sleep', '60'], stdout=subprocess.DEVNULL)\n\
                  print(child.pid)\n";
    let result = coordinator.handle_run(RunRequest::new(source)).await.unwrap();
    let pid: u32 = assert_matches!(result, RunResult::Success { stdout } => {
        stdout.trim().parse().unwrap()
    });
    assert!(wait_for_death(pid, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_concurrent_runs_keep_their_own_output() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let coordinator = Arc::new(coordinator_with(
        root.path(),
        python,
        test_limits(Duration::from_secs(10)),
        3,
    ));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let source = "import sys, time\n\
                              data = sys.stdin.read()\n\
                              time.sleep(0.1)\n\
                              print('run', data)\n";
                coordinator
                    .handle_run(RunRequest::new(source).with_stdin(i.to_string()))
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, RunResult::Success { stdout: format!("run {}\n", i) });
    }
    assert_eq!(coordinator.stats().succeeded, 8);
    assert_eq!(coordinator.stats().in_flight, 0);
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_output_flood_is_capped() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let limits = test_limits(Duration::from_secs(10)).with_max_output_bytes(64 * 1024);
    let coordinator = coordinator_with(root.path(), python, limits, 4);

    let started = Instant::now();
    let result = coordinator
        .handle_run(RunRequest::new("while True: print('x' * 1000)"))
        .await
        .unwrap();
    assert_matches!(result, RunResult::Failure { stderr, .. } => {
        assert!(stderr.ends_with("[output truncated: exceeded 65536 bytes]"));
    });
    // Killed on overflow, long before the timeout
    assert!(started.elapsed() < Duration::from_secs(5));

    let result = coordinator
        .handle_run(RunRequest::new("print('still alive')"))
        .await
        .unwrap();
    assert!(result.is_success());
}

#[tokio::test]
async fn test_signal_death_is_reported() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let coordinator = coordinator(root.path(), python);

    let result = coordinator
        .handle_run(RunRequest::new("import os, signal\nos.kill(os.getpid(), signal.SIGKILL)"))
        .await
        .unwrap();
    assert_eq!(
        result,
        RunResult::Failure {
            stderr: "Process terminated by signal 9".into(),
            exit_code: 137
        }
    );
}

#[tokio::test]
async fn test_network_is_unreachable_when_isolated() {
    let python = require_python!();
    if snipbox_sandbox::probe_network_isolation().await.is_err() {
        eprintln!("skipping: kernel refuses unprivileged network namespaces");
        return;
    }
    let root = TempDir::new().unwrap();
    let runtime = ProcessRuntime::new(
        test_sandbox_config(root.path(), python).with_network(NetworkIsolation::Required),
    );
    let coordinator = RunCoordinator::new(
        Arc::new(runtime),
        test_limits(Duration::from_secs(5)),
        CoordinatorConfig::default(),
    );

    let source = "import socket\nsocket.create_connection(('1.1.1.1', 53), timeout=2)\nprint('connected')";
    let result = coordinator.handle_run(RunRequest::new(source)).await.unwrap();
    assert_matches!(result, RunResult::Failure { stderr, .. } => {
        assert!(stderr.contains("Error"));
    });
}

#[tokio::test]
async fn test_missing_interpreter_is_system_error() {
    let root = TempDir::new().unwrap();
    let coordinator = coordinator(root.path(), PathBuf::from("/nonexistent/python3"));

    let result = coordinator
        .handle_run(RunRequest::new("print('hi')"))
        .await
        .unwrap();
    assert_matches!(result, RunResult::SystemError { message } => {
        assert!(message.starts_with("Failed to launch interpreter"));
        assert!(!message.contains("/nonexistent"));
    });
    assert_eq!(coordinator.stats().system_errors, 1);
    assert_eq!(leftover_workspaces(root.path()), 0);
}

/// Coordinator whose runtime uses `confinement` instead of running unconfined
fn confined_coordinator(root: &Path, python: PathBuf, confinement: Confinement) -> RunCoordinator {
    let config = SandboxConfig {
        allow_unconfined: false,
        ..test_sandbox_config(root, python)
    }
    .with_confinement(confinement);
    coordinator_with_runtime(ProcessRuntime::new(config))
}

fn coordinator_with_runtime(runtime: ProcessRuntime) -> RunCoordinator {
    RunCoordinator::new(
        Arc::new(runtime),
        test_limits(Duration::from_secs(5)),
        CoordinatorConfig::default(),
    )
}

async fn usable_bubblewrap() -> Option<PathBuf> {
    let Ok(path) = which::which("bwrap") else {
        eprintln!("skipping: bwrap not found on PATH");
        return None;
    };
    match probe_bubblewrap(&path).await {
        Ok(()) => Some(path),
        Err(e) => {
            eprintln!("skipping: bubblewrap cannot create namespaces here: {}", e);
            None
        }
    }
}

/// Program that writes `target` and reports whether it managed to
fn write_attempt(target: &Path) -> String {
    format!(
        "open({:?}, 'w').write('hijack')\nprint('wrote')",
        target.display().to_string()
    )
}

#[tokio::test]
async fn test_bubblewrap_confined_runs() {
    setup_test_logging();
    let python = require_python!();
    let Some(bwrap) = usable_bubblewrap().await else {
        return;
    };
    let root = TempDir::new().unwrap();
    let coordinator =
        confined_coordinator(root.path(), python, Confinement::Bubblewrap { path: bwrap });
    assert_eq!(coordinator.runtime_name(), "bubblewrap");

    let result = coordinator
        .handle_run(RunRequest::new("print('hi')"))
        .await
        .unwrap();
    assert_eq!(result, RunResult::Success { stdout: "hi\n".into() });

    let result = coordinator
        .handle_run(RunRequest::new("print(1/0)"))
        .await
        .unwrap();
    assert_matches!(result, RunResult::Failure { stderr, exit_code: 1 } => {
        assert!(stderr.contains("ZeroDivisionError"));
        assert!(stderr.contains("File \"main.py\""));
        assert!(!stderr.contains("/sandbox"));
    });

    let elsewhere = TempDir::new().unwrap();
    let target = elsewhere.path().join("escaped.txt");
    let result = coordinator
        .handle_run(RunRequest::new(write_attempt(&target)))
        .await
        .unwrap();
    assert!(!result.is_success());
    assert!(!target.exists());
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_landlock_confined_runs() {
    let python = require_python!();
    if !landlock_supported() {
        eprintln!("skipping: Landlock unavailable on this kernel");
        return;
    }
    let root = TempDir::new().unwrap();
    let coordinator = confined_coordinator(root.path(), python, Confinement::Landlock);
    assert_eq!(coordinator.runtime_name(), "landlock");

    let result = coordinator
        .handle_run(RunRequest::new("print('hi')"))
        .await
        .unwrap();
    assert_eq!(result, RunResult::Success { stdout: "hi\n".into() });

    let elsewhere = TempDir::new().unwrap();
    let target = elsewhere.path().join("escaped.txt");
    let result = coordinator
        .handle_run(RunRequest::new(write_attempt(&target)))
        .await
        .unwrap();
    assert_matches!(result, RunResult::Failure { stderr, .. } => {
        assert!(stderr.contains("PermissionError"));
    });
    assert!(!target.exists());
}

#[tokio::test]
async fn test_landlock_hides_sibling_workspace() {
    let python = require_python!();
    if !landlock_supported() {
        eprintln!("skipping: Landlock unavailable on this kernel");
        return;
    }
    let root = TempDir::new().unwrap();
    let coordinator = Arc::new(confined_coordinator(
        root.path(),
        python,
        Confinement::Landlock,
    ));

    let victim = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .handle_run(RunRequest::new(
                    "# SECRET_TOKEN_42\nimport time\ntime.sleep(1.5)\nprint('victim')",
                ))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;

    let intruder = "import os\n\
        for name in os.listdir('..'):\n    \
            print(open(os.path.join('..', name, 'main.py')).read())";
    let result = coordinator
        .handle_run(RunRequest::new(intruder))
        .await
        .unwrap();
    assert_matches!(result, RunResult::Failure { stderr, .. } => {
        assert!(stderr.contains("PermissionError"));
        assert!(!stderr.contains("SECRET_TOKEN_42"));
    });

    let victim = victim.await.unwrap().unwrap();
    assert_eq!(victim, RunResult::Success { stdout: "victim\n".into() });
}

#[tokio::test]
async fn test_default_limits_allow_subprocesses_and_threads() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let coordinator = coordinator_with(
        root.path(),
        python,
        ResourceLimits::default().with_timeout(Duration::from_secs(10)),
        4,
    );

    let source = "import subprocess, sys, threading\n\
        threads = [threading.Thread(target=lambda: None) for _ in range(2)]\n\
        [t.start() for t in threads]\n\
        [t.join() for t in threads]\n\
        out = subprocess.run([sys.executable, '-c', 'print(41 + 1)'], capture_output=True, text=True)\n\
        print(out.stdout.strip())";
    let result = coordinator.handle_run(RunRequest::new(source)).await.unwrap();
    assert_eq!(result, RunResult::Success { stdout: "42\n".into() });
}

#[tokio::test]
async fn test_auto_never_settles_for_unconfined() {
    let python = require_python!();
    let root = TempDir::new().unwrap();
    let config = SandboxConfig {
        allow_unconfined: false,
        ..test_sandbox_config(root.path(), python)
    }
    .with_confinement(Confinement::Auto);

    let coordinator = RunCoordinator::from_config(
        config,
        test_limits(Duration::from_secs(5)),
        CoordinatorConfig::default(),
    )
    .await;
    match coordinator {
        Ok(coordinator) => {
            assert_ne!(coordinator.runtime_name(), "process");
            let result = coordinator
                .handle_run(RunRequest::new("print('hi')"))
                .await
                .unwrap();
            assert_eq!(result, RunResult::Success { stdout: "hi\n".into() });
        }
        Err(e) => assert_matches!(e, SandboxError::Unconfined),
    }
}
