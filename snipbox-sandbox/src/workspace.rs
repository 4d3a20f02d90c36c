//! Per-run scratch directories
//!
//! Every run gets its own directory holding the program and its stdin. The
//! directory is removed when the [`Workspace`] is dropped, whichever way the
//! run ends.

use crate::types::ExecutionId;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Ephemeral, uniquely named directory for exactly one run
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    source_file_name: String,
    input_file_name: String,
    /// Path the directory is visible under inside a confinement wrapper
    mount_point: Option<PathBuf>,
    /// Host spellings of the directory, longest first
    host_paths: Vec<String>,
}

impl Workspace {
    /// Allocate a fresh directory under `root`.
    ///
    /// The name combines the execution id with tempfile's random suffix, so
    /// concurrent runs can never share a directory or a file path.
    pub fn create(
        root: &Path,
        id: ExecutionId,
        source_file_name: &str,
        input_file_name: &str,
    ) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("snipbox-{}-", id))
            .tempdir_in(root)?;

        let mut host_paths = vec![dir.path().to_string_lossy().into_owned()];
        if let Ok(canonical) = dir.path().canonicalize() {
            let canonical = canonical.to_string_lossy().into_owned();
            if !host_paths.contains(&canonical) {
                host_paths.push(canonical);
            }
        }
        host_paths.sort_by_key(|p| std::cmp::Reverse(p.len()));

        Ok(Self {
            dir,
            source_file_name: source_file_name.to_string(),
            input_file_name: input_file_name.to_string(),
            mount_point: None,
            host_paths,
        })
    }

    /// Record where a confinement wrapper exposes this directory
    pub fn set_mount_point(&mut self, mount_point: impl Into<PathBuf>) {
        self.mount_point = Some(mount_point.into());
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_file_name(&self) -> &str {
        &self.source_file_name
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.path().join(&self.source_file_name)
    }

    pub fn input_path(&self) -> PathBuf {
        self.dir.path().join(&self.input_file_name)
    }

    /// Write the program text
    pub async fn write_source(&self, source: &str) -> io::Result<()> {
        tokio::fs::write(self.source_path(), source).await
    }

    /// Write the standard input text (possibly empty)
    pub async fn write_stdin(&self, stdin: &str) -> io::Result<()> {
        tokio::fs::write(self.input_path(), stdin).await
    }

    /// Open the input file for wiring to the child's stdin
    pub fn open_stdin(&self) -> io::Result<File> {
        File::open(self.input_path())
    }

    /// Rewrite workspace paths in `text` so the host layout never leaks.
    ///
    /// `<workspace>/main.py` becomes `main.py`, other files lose the directory
    /// prefix, and the bare directory becomes `.`.
    pub fn scrub(&self, text: &str) -> String {
        let mut prefixes: Vec<String> = self.host_paths.clone();
        if let Some(mount) = &self.mount_point {
            prefixes.push(mount.to_string_lossy().into_owned());
        }

        let mut out = text.to_string();
        for prefix in &prefixes {
            if prefix.is_empty() || !out.contains(prefix.as_str()) {
                continue;
            }
            let source = format!("{}/{}", prefix, self.source_file_name);
            out = out
                .replace(&source, &self.source_file_name)
                .replace(&format!("{}/", prefix), "")
                .replace(prefix.as_str(), ".");
        }
        out
    }
}
