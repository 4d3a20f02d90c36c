use std::io;
use thiserror::Error;

/// Infrastructure failures inside the sandbox layer.
///
/// Program misbehaviour is never an error here; it is a [`crate::RunResult`].
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] io::Error),

    #[error("failed to launch interpreter: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for interpreter: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to prepare filesystem confinement: {0}")]
    Confine(#[source] io::Error),

    #[error(
        "no filesystem confinement available: install bubblewrap, enable Landlock, \
         or set sandbox.allow_unconfined"
    )]
    Unconfined,

    #[error("run cancelled by caller")]
    Cancelled,
}

impl SandboxError {
    /// Caller-safe description that never carries host paths
    pub fn public_message(&self) -> String {
        match self {
            SandboxError::Workspace(e) => format!("Failed to prepare workspace: {}", e.kind()),
            SandboxError::Spawn { source } => {
                format!("Failed to launch interpreter: {}", source.kind())
            }
            SandboxError::Wait(e) => format!("Failed to collect process status: {}", e.kind()),
            SandboxError::Confine(e) => format!("Failed to confine interpreter: {}", e.kind()),
            SandboxError::Unconfined => "Sandbox is not available".to_string(),
            SandboxError::Cancelled => "Run cancelled".to_string(),
        }
    }
}

pub type SandboxResult<T> = Result<T, SandboxError>;
