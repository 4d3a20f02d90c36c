//! Security policy for interpreter runs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the interpreter is confined beyond rlimits and a scrubbed environment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Confinement {
    /// Bubblewrap when a `bwrap` binary is on PATH, else Landlock when the
    /// kernel supports it. Never falls back to `None` unless
    /// [`SandboxConfig::allow_unconfined`] is set.
    #[default]
    Auto,
    /// rlimits, process group, cleared environment and workspace cwd only.
    /// The program can read and write anything the service user can.
    None,
    /// Landlock ruleset applied before `exec`: system directories readable,
    /// the workspace the only writable path, nothing else reachable
    Landlock,
    /// Wrap the interpreter in bubblewrap: read-only system root, the
    /// workspace as the only writable path, all namespaces unshared
    Bubblewrap { path: PathBuf },
}

impl Confinement {
    /// Resolve `Auto` against the host
    pub fn resolve(&self) -> Confinement {
        match self {
            Confinement::Auto => match which::which("bwrap") {
                Ok(path) => Confinement::Bubblewrap { path },
                Err(_) if landlock_supported() => Confinement::Landlock,
                Err(_) => Confinement::None,
            },
            other => other.clone(),
        }
    }

    /// Whether the program is kept out of the rest of the filesystem
    pub fn restricts_filesystem(&self) -> bool {
        matches!(self, Confinement::Landlock | Confinement::Bubblewrap { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Confinement::Auto => "auto",
            Confinement::None => "none",
            Confinement::Landlock => "landlock",
            Confinement::Bubblewrap { .. } => "bubblewrap",
        }
    }
}

/// Whether this kernel accepts Landlock rulesets
#[cfg(target_os = "linux")]
pub fn landlock_supported() -> bool {
    crate::landlock::abi_version().is_ok()
}

#[cfg(not(target_os = "linux"))]
pub fn landlock_supported() -> bool {
    false
}

/// Network access policy for the child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkIsolation {
    /// Refuse to run when a private network namespace cannot be created
    Required,
    /// Try to create a private network namespace, run anyway if refused
    #[default]
    BestEffort,
    /// Leave the host network visible
    Disabled,
}

/// Interpreter and workspace settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter binary (resolved through PATH when not absolute)
    pub interpreter: PathBuf,

    /// Arguments placed before the source file name
    pub interpreter_args: Vec<String>,

    /// Logical source file name, also what callers see in diagnostics
    pub source_file_name: String,

    /// Name of the stdin file inside the workspace
    pub input_file_name: String,

    /// Parent directory for per-run workspaces
    pub workspace_root: PathBuf,

    pub confinement: Confinement,

    /// Let `Auto` run programs without filesystem confinement when neither
    /// bubblewrap nor Landlock is usable
    pub allow_unconfined: bool,

    /// Extra read-only locations for confined runs, on top of the system
    /// directories and the interpreter's install prefix
    pub read_only_paths: Vec<PathBuf>,

    pub network: NetworkIsolation,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python3"),
            interpreter_args: Vec::new(),
            source_file_name: "main.py".to_string(),
            input_file_name: "input.txt".to_string(),
            workspace_root: std::env::temp_dir(),
            confinement: Confinement::default(),
            allow_unconfined: false,
            read_only_paths: Vec::new(),
            network: NetworkIsolation::default(),
        }
    }
}

impl SandboxConfig {
    /// Configuration with no filesystem confinement at all
    pub fn unconfined() -> Self {
        Self {
            confinement: Confinement::None,
            allow_unconfined: true,
            ..Self::default()
        }
    }

    /// Configuration confined by Landlock
    pub fn landlocked() -> Self {
        Self {
            confinement: Confinement::Landlock,
            ..Self::default()
        }
    }

    pub fn with_confinement(mut self, confinement: Confinement) -> Self {
        self.confinement = confinement;
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_network(mut self, network: NetworkIsolation) -> Self {
        self.network = network;
        self
    }
}
