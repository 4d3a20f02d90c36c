//! OS-level isolation primitives
//!
//! Resource limits, namespace setup and the Landlock ruleset are applied in
//! the forked child right before `exec`, so they bind the interpreter and
//! everything it spawns.

use crate::limits::ResourceLimits;
use crate::policy::NetworkIsolation;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[cfg(unix)]
use std::os::fd::RawFd;

/// Where the workspace appears inside a bubblewrap sandbox
pub const BWRAP_MOUNT_POINT: &str = "/sandbox";

/// Fixed search path handed to the child
const CHILD_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Directories every confined run can already read
const SYSTEM_DIRS: &[&str] = &["/usr", "/bin", "/sbin", "/lib", "/lib64"];

/// Limits copied into the `pre_exec` closure
#[derive(Debug, Clone, Copy, Default)]
struct ChildLimits {
    memory_bytes: Option<u64>,
    cpu_secs: Option<u64>,
    processes: Option<u64>,
    file_size_bytes: Option<u64>,
    open_files: Option<u64>,
}

impl From<&ResourceLimits> for ChildLimits {
    fn from(limits: &ResourceLimits) -> Self {
        Self {
            memory_bytes: limits.max_memory_bytes,
            // SIGXCPU must never fire before the wall-clock timeout would
            cpu_secs: limits
                .max_cpu_secs
                .map(|cpu| cpu.max(cpu_floor(limits.timeout))),
            processes: limits.max_processes,
            file_size_bytes: limits.max_file_size_bytes,
            open_files: limits.max_open_files,
        }
    }
}

/// Smallest RLIMIT_CPU that cannot fire before `timeout` elapses: whole
/// seconds rounded up, plus one
pub(crate) fn cpu_floor(timeout: std::time::Duration) -> u64 {
    timeout.as_secs_f64().ceil() as u64 + 1
}

/// Replace the inherited environment with a minimal fixed one
pub(crate) fn apply_environment(cmd: &mut Command, home: &Path) {
    cmd.env_clear()
        .env("PATH", CHILD_PATH)
        .env("HOME", home)
        .env("TMPDIR", home)
        .env("LANG", "C.UTF-8")
        .env("PYTHONUNBUFFERED", "1")
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .env("PYTHONIOENCODING", "utf-8");
}

/// Put the child in its own process group and install the pre-exec hook
/// that applies rlimits, a private network namespace if requested, and the
/// Landlock ruleset behind `landlock_fd` if one was prepared.
///
/// The ruleset descriptor must stay open until `spawn` returns.
#[cfg(unix)]
pub(crate) fn confine_child(
    cmd: &mut Command,
    limits: &ResourceLimits,
    network: NetworkIsolation,
    landlock_fd: Option<RawFd>,
) {
    let child_limits = ChildLimits::from(limits);

    cmd.process_group(0);

    // SAFETY: the closure only issues raw syscalls on copied plain data,
    // which is async-signal-safe between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            apply_rlimits(&child_limits)?;
            unshare_network(network)?;
            if let Some(fd) = landlock_fd {
                restrict_filesystem(fd)?;
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(crate) fn confine_child(
    _cmd: &mut Command,
    _limits: &ResourceLimits,
    _network: NetworkIsolation,
    _landlock_fd: Option<i32>,
) {
}

#[cfg(target_os = "linux")]
fn restrict_filesystem(ruleset_fd: RawFd) -> io::Result<()> {
    crate::landlock::restrict_self(ruleset_fd)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn restrict_filesystem(_ruleset_fd: RawFd) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Landlock is only available on Linux",
    ))
}

/// Install prefixes of `interpreter` outside the system directories, such as
/// `/opt/conda` for `/opt/conda/bin/python3`. Both the path as given and its
/// symlink target count, so virtualenvs keep their base installation.
pub(crate) fn interpreter_prefixes(interpreter: &Path) -> Vec<PathBuf> {
    let mut prefixes: Vec<PathBuf> = Vec::new();
    let candidates = [Some(interpreter.to_path_buf()), interpreter.canonicalize().ok()];
    for exe in candidates.into_iter().flatten() {
        let Some(prefix) = exe.parent().and_then(Path::parent) else {
            continue;
        };
        if !prefix.is_absolute()
            || prefix == Path::new("/")
            || SYSTEM_DIRS.iter().any(|dir| prefix.starts_with(dir))
        {
            continue;
        }
        if !prefixes.iter().any(|p| p == prefix) {
            prefixes.push(prefix.to_path_buf());
        }
    }
    prefixes
}

#[cfg(unix)]
macro_rules! set_limit {
    ($resource:expr, $value:expr) => {{
        let value = $value as libc::rlim_t;
        let lim = libc::rlimit {
            rlim_cur: value,
            rlim_max: value,
        };
        if unsafe { libc::setrlimit($resource, &lim) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }};
}

#[cfg(unix)]
fn apply_rlimits(limits: &ChildLimits) -> io::Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    if let Some(bytes) = limits.memory_bytes {
        set_limit!(libc::RLIMIT_AS, bytes);
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let _ = limits.memory_bytes;

    if let Some(secs) = limits.cpu_secs {
        set_limit!(libc::RLIMIT_CPU, secs);
    }
    if let Some(procs) = limits.processes {
        set_limit!(libc::RLIMIT_NPROC, procs);
    }
    if let Some(bytes) = limits.file_size_bytes {
        set_limit!(libc::RLIMIT_FSIZE, bytes);
    }
    if let Some(fds) = limits.open_files {
        set_limit!(libc::RLIMIT_NOFILE, fds);
    }
    set_limit!(libc::RLIMIT_CORE, 0);

    Ok(())
}

#[cfg(target_os = "linux")]
fn unshare_network(network: NetworkIsolation) -> io::Result<()> {
    if network == NetworkIsolation::Disabled {
        return Ok(());
    }
    // A fresh user namespace lets unprivileged callers own the new netns
    if unsafe { libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) } != 0 {
        let err = io::Error::last_os_error();
        if network == NetworkIsolation::Required {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn unshare_network(network: NetworkIsolation) -> io::Result<()> {
    if network == NetworkIsolation::Required {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "network namespaces are only available on Linux",
        ));
    }
    Ok(())
}

/// SIGKILL every process in the group led by `pgid`
#[cfg(unix)]
pub fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    if pgid <= 1 {
        return;
    }
    // ESRCH just means the group is already gone
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn kill_process_group(_pgid: u32) {}

/// Arguments that run `interpreter args... source` inside bubblewrap.
///
/// Namespaces are all unshared (network included unless the policy disables
/// isolation), the system directories are bound read-only and the workspace
/// is the only writable mount.
pub(crate) fn bubblewrap_args(
    workspace: &Path,
    interpreter: &Path,
    interpreter_args: &[String],
    source_file_name: &str,
    read_only: &[PathBuf],
    network: NetworkIsolation,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |items: &[&str]| args.extend(items.iter().map(OsString::from));

    push(&["--unshare-all", "--die-with-parent", "--new-session"]);
    if network == NetworkIsolation::Disabled {
        push(&["--share-net"]);
    }
    push(&["--ro-bind", "/usr", "/usr"]);
    for dir in ["/bin", "/sbin", "/lib", "/lib64", "/etc/alternatives"] {
        push(&["--ro-bind-try", dir, dir]);
    }
    push(&["--proc", "/proc", "--dev", "/dev", "--tmpfs", "/tmp"]);
    for path in read_only {
        args.push("--ro-bind-try".into());
        args.push(path.as_os_str().to_owned());
        args.push(path.as_os_str().to_owned());
    }

    args.push("--bind".into());
    args.push(workspace.as_os_str().to_owned());
    args.push(BWRAP_MOUNT_POINT.into());
    args.extend(["--chdir", BWRAP_MOUNT_POINT, "--"].map(OsString::from));

    args.push(interpreter.as_os_str().to_owned());
    args.extend(interpreter_args.iter().map(OsString::from));
    args.push(source_file_name.into());
    args
}

/// Check whether this host lets an unprivileged child enter a private
/// network namespace. Runs `true` under the same hook the sandbox uses.
#[cfg(unix)]
pub async fn probe_network_isolation() -> io::Result<()> {
    let mut cmd = Command::new("true");
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    confine_child(&mut cmd, &ResourceLimits::default(), NetworkIsolation::Required, None);

    let status = cmd.status().await?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("isolation probe exited with {}", status),
        ))
    }
}

/// Check that bubblewrap can actually create its namespaces here; it is
/// often installed but unusable inside containers.
pub async fn probe_bubblewrap(bwrap: &Path) -> io::Result<()> {
    let status = Command::new(bwrap)
        .args(["--unshare-all", "--die-with-parent", "--ro-bind", "/", "/", "true"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("bubblewrap probe exited with {}", status),
        ))
    }
}

#[cfg(not(unix))]
pub async fn probe_network_isolation() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process isolation requires a Unix host",
    ))
}
