//! Process-based runtime

use crate::error::{SandboxError, SandboxResult};
use crate::isolation::{
    apply_environment, bubblewrap_args, confine_child, interpreter_prefixes, kill_process_group,
    probe_bubblewrap, BWRAP_MOUNT_POINT,
};
use crate::limits::ResourceLimits;
use crate::policy::{landlock_supported, Confinement, NetworkIsolation, SandboxConfig};
use crate::types::{ExecutionId, RunRequest, RunResult};
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long pipe readers may keep draining after the process group is gone.
/// A descendant that escaped the group can hold a pipe open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Reported exit code when a run is aborted for exceeding the output cap
const OUTPUT_LIMIT_EXIT_CODE: i32 = -1;

const READ_CHUNK: usize = 8 * 1024;

/// Landlock ruleset kept open until the child has been spawned
#[cfg(target_os = "linux")]
type FsRuleset = crate::landlock::Ruleset;

#[cfg(not(target_os = "linux"))]
type FsRuleset = ();

#[cfg(target_os = "linux")]
fn prepare_landlock(workspace: &Path, read_only: &[PathBuf]) -> std::io::Result<(FsRuleset, i32)> {
    let ruleset = FsRuleset::for_workspace(workspace, read_only)?;
    let fd = ruleset.raw_fd();
    Ok((ruleset, fd))
}

#[cfg(not(target_os = "linux"))]
fn prepare_landlock(_workspace: &Path, _read_only: &[PathBuf]) -> std::io::Result<(FsRuleset, i32)> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "Landlock is only available on Linux",
    ))
}

/// Process-based runtime - runs the interpreter as a confined child process
#[derive(Debug)]
pub struct ProcessRuntime {
    config: SandboxConfig,
    /// `config.confinement` with `Auto` resolved against the host
    confinement: Confinement,
    /// `config.interpreter` looked up on the service's PATH
    interpreter: PathBuf,
    /// Read-only locations granted to confined runs besides system dirs
    read_only: Vec<PathBuf>,
}

impl ProcessRuntime {
    /// Create a runtime, resolving `Auto` confinement against the host.
    ///
    /// Performs no startup checks; servers should use [`ProcessRuntime::detect`].
    pub fn new(config: SandboxConfig) -> Self {
        let confinement = config.confinement.resolve();
        let interpreter =
            which::which(&config.interpreter).unwrap_or_else(|_| config.interpreter.clone());
        let mut read_only = config.read_only_paths.clone();
        for prefix in interpreter_prefixes(&interpreter) {
            if !read_only.contains(&prefix) {
                read_only.push(prefix);
            }
        }
        Self {
            config,
            confinement,
            interpreter,
            read_only,
        }
    }

    /// Like [`ProcessRuntime::new`], but checks the confinement against the
    /// host. An auto-detected bubblewrap that cannot create namespaces gives
    /// way to Landlock. Ending up with no filesystem confinement is an error
    /// unless the config sets `allow_unconfined`.
    pub async fn detect(config: SandboxConfig) -> SandboxResult<Self> {
        let mut runtime = Self::new(config);
        if runtime.config.confinement == Confinement::Auto {
            if let Confinement::Bubblewrap { path } = &runtime.confinement {
                if let Err(e) = probe_bubblewrap(path).await {
                    let fallback = if landlock_supported() {
                        Confinement::Landlock
                    } else {
                        Confinement::None
                    };
                    tracing::warn!(
                        bwrap = %path.display(),
                        error = %e,
                        fallback = fallback.name(),
                        "bubblewrap found but unusable"
                    );
                    runtime.confinement = fallback;
                }
            }
        }

        if runtime.confinement == Confinement::Landlock && !landlock_supported() {
            tracing::error!("Landlock confinement requested but this kernel does not support it");
            return Err(SandboxError::Unconfined);
        }

        if !runtime.confinement.restricts_filesystem() {
            if !runtime.config.allow_unconfined {
                tracing::error!(
                    "Neither bubblewrap nor Landlock is usable; refusing to run programs unconfined"
                );
                return Err(SandboxError::Unconfined);
            }
            tracing::warn!(
                "UNCONFINED SANDBOX: programs can read and write every file the service user can, \
                 including other runs' workspaces"
            );
        }

        tracing::info!(
            confinement = runtime.confinement.name(),
            interpreter = %runtime.interpreter.display(),
            "Sandbox runtime ready"
        );
        Ok(runtime)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Confinement actually used for runs
    pub fn confinement(&self) -> &Confinement {
        &self.confinement
    }

    fn direct_command(&self, workspace: &Workspace) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.config.interpreter_args)
            .arg(workspace.source_file_name());
        cmd
    }

    /// The command for one run, plus the Landlock ruleset it needs kept
    /// open until `spawn` returns
    fn build_command(
        &self,
        workspace: &mut Workspace,
        limits: &ResourceLimits,
    ) -> SandboxResult<(Command, Option<FsRuleset>)> {
        let mut ruleset = None;
        let mut landlock_fd = None;
        let (mut cmd, home, network) = match &self.confinement {
            Confinement::Bubblewrap { path } => {
                workspace.set_mount_point(BWRAP_MOUNT_POINT);
                let mut cmd = Command::new(path);
                cmd.args(bubblewrap_args(
                    workspace.path(),
                    &self.interpreter,
                    &self.config.interpreter_args,
                    workspace.source_file_name(),
                    &self.read_only,
                    self.config.network,
                ));
                // bwrap creates the namespaces itself
                (cmd, PathBuf::from(BWRAP_MOUNT_POINT), NetworkIsolation::Disabled)
            }
            Confinement::Landlock => {
                let (prepared, fd) = prepare_landlock(workspace.path(), &self.read_only)
                    .map_err(SandboxError::Confine)?;
                ruleset = Some(prepared);
                landlock_fd = Some(fd);
                let cmd = self.direct_command(workspace);
                (cmd, workspace.path().to_path_buf(), self.config.network)
            }
            Confinement::None | Confinement::Auto => {
                let cmd = self.direct_command(workspace);
                (cmd, workspace.path().to_path_buf(), self.config.network)
            }
        };

        apply_environment(&mut cmd, &home);
        cmd.current_dir(workspace.path());
        confine_child(&mut cmd, limits, network, landlock_fd);
        Ok((cmd, ruleset))
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl super::Runtime for ProcessRuntime {
    async fn execute(
        &self,
        id: ExecutionId,
        request: &RunRequest,
        limits: &ResourceLimits,
        cancel: CancellationToken,
    ) -> SandboxResult<RunResult> {
        let mut workspace = Workspace::create(
            &self.config.workspace_root,
            id,
            &self.config.source_file_name,
            &self.config.input_file_name,
        )
        .map_err(SandboxError::Workspace)?;
        workspace
            .write_source(&request.source)
            .await
            .map_err(SandboxError::Workspace)?;
        workspace
            .write_stdin(&request.stdin)
            .await
            .map_err(SandboxError::Workspace)?;
        let stdin = workspace.open_stdin().map_err(SandboxError::Workspace)?;

        let (mut cmd, ruleset) = self.build_command(&mut workspace, limits)?;
        cmd.stdin(Stdio::from(stdin))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let spawned = cmd.spawn();
        drop(ruleset);
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                let err = SandboxError::Spawn { source };
                tracing::error!(execution_id = %id, error = %err, "Interpreter did not start");
                return Ok(RunResult::SystemError {
                    message: err.public_message(),
                });
            }
        };
        let pgid = child.id();
        tracing::debug!(execution_id = %id, pid = ?pgid, "Interpreter started");

        let cap = limits.max_output_bytes;
        let stop_reading = CancellationToken::new();
        let (overflow_tx, mut overflow_rx) = mpsc::channel::<()>(2);
        let stdout_task = child.stdout.take().map(|pipe| {
            tokio::spawn(read_capped(pipe, cap, overflow_tx.clone(), stop_reading.clone()))
        });
        let stderr_task = child.stderr.take().map(|pipe| {
            tokio::spawn(read_capped(pipe, cap, overflow_tx.clone(), stop_reading.clone()))
        });
        drop(overflow_tx);

        let stop = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Stop::Exited(status),
                Err(e) => Stop::WaitFailed(e),
            },
            _ = tokio::time::sleep(limits.timeout) => Stop::TimedOut,
            Some(()) = overflow_rx.recv() => Stop::OutputLimit,
            _ = cancel.cancelled() => Stop::Cancelled,
        };

        // Takes out anything the program left running, whatever the outcome
        if let Some(pgid) = pgid {
            kill_process_group(pgid);
        }
        let status = match &stop {
            Stop::Exited(status) => Some(*status),
            _ => {
                let _ = child.kill().await;
                None
            }
        };

        let drain_timer = {
            let stop_reading = stop_reading.clone();
            tokio::spawn(async move {
                tokio::time::sleep(OUTPUT_DRAIN_GRACE).await;
                stop_reading.cancel();
            })
        };
        let (stdout, stderr) = tokio::join!(join_reader(stdout_task), join_reader(stderr_task));
        drain_timer.abort();

        let elapsed = start.elapsed();
        let result = match stop {
            Stop::Cancelled => {
                tracing::info!(
                    execution_id = %id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Run cancelled, process group killed"
                );
                return Err(SandboxError::Cancelled);
            }
            Stop::WaitFailed(e) => return Err(SandboxError::Wait(e)),
            Stop::TimedOut => RunResult::TimedOut,
            Stop::OutputLimit | Stop::Exited(_) => {
                classify(status, &stdout, &stderr, cap, |text| workspace.scrub(text))
            }
        };

        match &result {
            RunResult::Success { .. } | RunResult::Failure { .. } => tracing::info!(
                execution_id = %id,
                outcome = result.label(),
                duration_ms = elapsed.as_millis() as u64,
                stdout_bytes = stdout.bytes.len(),
                stderr_bytes = stderr.bytes.len(),
                "Run finished"
            ),
            _ => tracing::warn!(
                execution_id = %id,
                outcome = result.label(),
                duration_ms = elapsed.as_millis() as u64,
                "Run stopped by the sandbox"
            ),
        }

        Ok(result)
    }

    fn name(&self) -> &str {
        match self.confinement {
            Confinement::Bubblewrap { .. } => "bubblewrap",
            Confinement::Landlock => "landlock",
            Confinement::None | Confinement::Auto => "process",
        }
    }
}

/// Why the wait on the child ended
enum Stop {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut,
    OutputLimit,
    Cancelled,
}

/// Bytes read from one pipe
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Drain `reader` keeping at most `cap` bytes. Reaching the cap signals
/// `overflow` and stops reading at once.
async fn read_capped<R>(
    mut reader: R,
    cap: usize,
    overflow: mpsc::Sender<()>,
    stop: CancellationToken,
) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured {
        bytes: Vec::with_capacity(cap.min(READ_CHUNK)),
        truncated: false,
    };
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = tokio::select! {
            read = reader.read(&mut chunk) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
            _ = stop.cancelled() => break,
        };

        let room = cap.saturating_sub(captured.bytes.len());
        if n > room {
            captured.bytes.extend_from_slice(&chunk[..room]);
            captured.truncated = true;
            let _ = overflow.try_send(());
            break;
        }
        captured.bytes.extend_from_slice(&chunk[..n]);
    }

    captured
}

async fn join_reader(task: Option<JoinHandle<Captured>>) -> Captured {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Captured::default(),
    }
}

/// Turn an exit status and captured streams into a [`RunResult`].
///
/// `status` is `None` when the sandbox killed the process itself.
fn classify(
    status: Option<ExitStatus>,
    stdout: &Captured,
    stderr: &Captured,
    cap: usize,
    scrub: impl Fn(&str) -> String,
) -> RunResult {
    let stderr_text = scrub(&stderr.text());

    if stdout.truncated || stderr.truncated {
        let mut message = stderr_text;
        if !message.is_empty() && !message.ends_with('\n') {
            message.push('\n');
        }
        message.push_str(&format!("[output truncated: exceeded {} bytes]", cap));
        return RunResult::Failure {
            stderr: message,
            exit_code: OUTPUT_LIMIT_EXIT_CODE,
        };
    }

    let Some(status) = status else {
        return RunResult::Failure {
            stderr: stderr_text,
            exit_code: OUTPUT_LIMIT_EXIT_CODE,
        };
    };

    let (exit_code, fallback) = match (status.code(), termination_signal(&status)) {
        (Some(code), _) => (code, format!("Process exited with status {}", code)),
        (None, Some(signal)) => (
            128 + signal,
            format!("Process terminated by signal {}", signal),
        ),
        (None, None) => (
            OUTPUT_LIMIT_EXIT_CODE,
            "Process ended without an exit status".to_string(),
        ),
    };

    if exit_code == 0 && stderr.bytes.is_empty() {
        return RunResult::Success {
            stdout: scrub(&stdout.text()),
        };
    }

    RunResult::Failure {
        stderr: if stderr_text.is_empty() {
            fallback
        } else {
            stderr_text
        },
        exit_code,
    }
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
