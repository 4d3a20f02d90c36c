//! Landlock filesystem confinement
//!
//! Landlock lets an unprivileged process restrict its own filesystem access.
//! The ruleset is built in the parent before spawning, since opening paths
//! allocates; the forked child only calls `landlock_restrict_self` on the
//! inherited descriptor right before `exec`.
//!
//! | ABI | Kernel | Adds |
//! |-----|--------|------|
//! | 1 | 5.13 | basic filesystem access |
//! | 2 | 5.19 | `REFER` |
//! | 3 | 6.2 | `TRUNCATE` |
//! | 4 | 6.7 | `IOCTL_DEV` |
//! | 5 | 6.12 | signal and abstract socket scoping |

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

const SYS_LANDLOCK_CREATE_RULESET: libc::c_long = 444;
const SYS_LANDLOCK_ADD_RULE: libc::c_long = 445;
const SYS_LANDLOCK_RESTRICT_SELF: libc::c_long = 446;

const LANDLOCK_CREATE_RULESET_VERSION: u32 = 1 << 0;
const LANDLOCK_RULE_PATH_BENEATH: u32 = 1;

// ABI 1
const ACCESS_FS_EXECUTE: u64 = 1 << 0;
const ACCESS_FS_WRITE_FILE: u64 = 1 << 1;
const ACCESS_FS_READ_FILE: u64 = 1 << 2;
const ACCESS_FS_READ_DIR: u64 = 1 << 3;
const ACCESS_FS_REMOVE_DIR: u64 = 1 << 4;
const ACCESS_FS_REMOVE_FILE: u64 = 1 << 5;
const ACCESS_FS_MAKE_CHAR: u64 = 1 << 6;
const ACCESS_FS_MAKE_DIR: u64 = 1 << 7;
const ACCESS_FS_MAKE_REG: u64 = 1 << 8;
const ACCESS_FS_MAKE_SOCK: u64 = 1 << 9;
const ACCESS_FS_MAKE_FIFO: u64 = 1 << 10;
const ACCESS_FS_MAKE_BLOCK: u64 = 1 << 11;
const ACCESS_FS_MAKE_SYM: u64 = 1 << 12;
// ABI 2
const ACCESS_FS_REFER: u64 = 1 << 13;
// ABI 3
const ACCESS_FS_TRUNCATE: u64 = 1 << 14;
// ABI 4
const ACCESS_FS_IOCTL_DEV: u64 = 1 << 15;
// ABI 5
const SCOPE_ABSTRACT_UNIX_SOCKET: u64 = 1 << 0;
const SCOPE_SIGNAL: u64 = 1 << 1;

const READ_ACCESS: u64 = ACCESS_FS_EXECUTE | ACCESS_FS_READ_FILE | ACCESS_FS_READ_DIR;

const WRITE_ACCESS: u64 = READ_ACCESS
    | ACCESS_FS_WRITE_FILE
    | ACCESS_FS_REMOVE_DIR
    | ACCESS_FS_REMOVE_FILE
    | ACCESS_FS_MAKE_DIR
    | ACCESS_FS_MAKE_REG
    | ACCESS_FS_MAKE_SYM
    | ACCESS_FS_MAKE_FIFO
    | ACCESS_FS_MAKE_SOCK
    | ACCESS_FS_REFER
    | ACCESS_FS_TRUNCATE;

/// Readable (never writable) system locations
const SYSTEM_READ_PATHS: &[&str] = &["/usr", "/bin", "/sbin", "/lib", "/lib64", "/etc"];

#[repr(C)]
#[derive(Debug, Default)]
struct RulesetAttr {
    handled_access_fs: u64,
    handled_access_net: u64,
    scoped: u64,
}

#[repr(C)]
#[derive(Debug)]
struct PathBeneathAttr {
    allowed_access: u64,
    parent_fd: RawFd,
}

/// Landlock ABI version the kernel supports, or an error when Landlock is
/// compiled out or disabled at boot
pub fn abi_version() -> io::Result<u32> {
    // SAFETY: null attr with size 0 and the VERSION flag only queries the ABI
    let ret = unsafe {
        libc::syscall(
            SYS_LANDLOCK_CREATE_RULESET,
            std::ptr::null::<RulesetAttr>(),
            0usize,
            LANDLOCK_CREATE_RULESET_VERSION,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as u32)
    }
}

fn handled_fs_for_abi(abi: u32) -> u64 {
    let mut access = ACCESS_FS_EXECUTE
        | ACCESS_FS_WRITE_FILE
        | ACCESS_FS_READ_FILE
        | ACCESS_FS_READ_DIR
        | ACCESS_FS_REMOVE_DIR
        | ACCESS_FS_REMOVE_FILE
        | ACCESS_FS_MAKE_CHAR
        | ACCESS_FS_MAKE_DIR
        | ACCESS_FS_MAKE_REG
        | ACCESS_FS_MAKE_SOCK
        | ACCESS_FS_MAKE_FIFO
        | ACCESS_FS_MAKE_BLOCK
        | ACCESS_FS_MAKE_SYM;
    if abi >= 2 {
        access |= ACCESS_FS_REFER;
    }
    if abi >= 3 {
        access |= ACCESS_FS_TRUNCATE;
    }
    if abi >= 4 {
        access |= ACCESS_FS_IOCTL_DEV;
    }
    access
}

fn scope_for_abi(abi: u32) -> u64 {
    if abi >= 5 {
        SCOPE_ABSTRACT_UNIX_SOCKET | SCOPE_SIGNAL
    } else {
        0
    }
}

/// A prepared Landlock ruleset: system paths read-only, one workspace
/// read-write, nothing else reachable.
#[derive(Debug)]
pub(crate) struct Ruleset {
    fd: OwnedFd,
    handled: u64,
}

impl Ruleset {
    /// Build the ruleset for a run confined to `workspace`.
    ///
    /// `read_only` adds locations outside the system directories, such as an
    /// interpreter installed under `/opt`. Missing paths are skipped.
    pub(crate) fn for_workspace(workspace: &Path, read_only: &[PathBuf]) -> io::Result<Self> {
        let abi = abi_version()?;
        let handled = handled_fs_for_abi(abi);
        let attr = RulesetAttr {
            handled_access_fs: handled,
            handled_access_net: 0,
            scoped: scope_for_abi(abi),
        };
        // Kernels before ABI 5 reject a non-zero tail, so only pass `scoped`
        // when it is understood
        let size = if abi >= 5 {
            std::mem::size_of::<RulesetAttr>()
        } else {
            2 * std::mem::size_of::<u64>()
        };

        // SAFETY: attr is valid for `size` bytes
        let ret = unsafe {
            libc::syscall(
                SYS_LANDLOCK_CREATE_RULESET,
                &attr as *const RulesetAttr,
                size,
                0u32,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: on success the syscall returns a fresh owned descriptor
        let fd = unsafe { OwnedFd::from_raw_fd(ret as RawFd) };
        let ruleset = Self { fd, handled };

        for path in SYSTEM_READ_PATHS {
            ruleset.allow_if_present(Path::new(path), READ_ACCESS)?;
        }
        for path in read_only {
            ruleset.allow_if_present(path, READ_ACCESS)?;
        }
        ruleset.allow_if_present(
            Path::new("/proc"),
            ACCESS_FS_READ_FILE | ACCESS_FS_READ_DIR,
        )?;
        ruleset.allow_if_present(
            Path::new("/dev"),
            ACCESS_FS_READ_FILE
                | ACCESS_FS_READ_DIR
                | ACCESS_FS_WRITE_FILE
                | ACCESS_FS_TRUNCATE
                | ACCESS_FS_IOCTL_DEV,
        )?;
        ruleset.allow(workspace, WRITE_ACCESS)?;

        Ok(ruleset)
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn allow_if_present(&self, path: &Path, access: u64) -> io::Result<()> {
        match self.allow(path, access) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn allow(&self, path: &Path, access: u64) -> io::Result<()> {
        let target = open_path(path)?;
        let mut allowed = access & self.handled;
        if !target.metadata()?.is_dir() {
            // Directory-only rights are rejected on file rules
            allowed &= ACCESS_FS_EXECUTE
                | ACCESS_FS_WRITE_FILE
                | ACCESS_FS_READ_FILE
                | ACCESS_FS_TRUNCATE
                | ACCESS_FS_IOCTL_DEV;
        }
        let rule = PathBeneathAttr {
            allowed_access: allowed,
            parent_fd: target.as_raw_fd(),
        };
        // SAFETY: both descriptors are open and rule outlives the call
        let ret = unsafe {
            libc::syscall(
                SYS_LANDLOCK_ADD_RULE,
                self.fd.as_raw_fd(),
                LANDLOCK_RULE_PATH_BENEATH,
                &rule as *const PathBeneathAttr,
                0u32,
            )
        };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

fn open_path(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_PATH | libc::O_CLOEXEC)
        .open(path)
}

/// Enforce the ruleset behind `ruleset_fd` on the calling process.
///
/// Runs between fork and exec, so it only issues raw syscalls.
pub(crate) fn restrict_self(ruleset_fd: RawFd) -> io::Result<()> {
    // SAFETY: plain syscalls on integers
    unsafe {
        if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::syscall(SYS_LANDLOCK_RESTRICT_SELF, ruleset_fd, 0u32) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
