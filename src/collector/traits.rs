//! Abstractions over the host so the collector can run against mocks.
//!
//! The `FileSystem` trait covers the static kstat snapshot files under
//! `/proc/spl/kstat/zfs`, and `CommandRunner` covers one-shot commands such as
//! `zpool list`. Both have a real implementation here and a mock one in
//! [`crate::collector::mock`].

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

/// Abstraction for filesystem operations.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }
}

/// Errors from running a one-shot command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started at all.
    #[error("{program} was not found or not executable: {source}")]
    NotFound {
        program: String,
        #[source]
        source: io::Error,
    },
    /// The program ran and exited with a non-zero status.
    #[error("{program} error: {stderr}")]
    Failed { program: String, stderr: String },
}

/// Runs a command to completion and returns its stdout split into lines.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<String>, CommandError>;
}

/// Runs commands on the host via `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<String>, CommandError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::NotFound {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                program: program.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim().split('\n').map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_fs_read_to_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io");
        std::fs::write(&path, "header\nnread nwritten\n1 2\n").unwrap();

        let fs = RealFs::new();
        let content = fs.read_to_string(&path).unwrap();
        assert!(content.contains("nwritten"));
    }

    #[test]
    fn test_real_fs_exists() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFs::new();
        assert!(fs.exists(dir.path()));
        assert!(!fs.exists(Path::new("/nonexistent/path/12345")));
    }

    #[test]
    fn test_real_fs_read_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tank")).unwrap();
        std::fs::create_dir(dir.path().join("rpool")).unwrap();

        let fs = RealFs::new();
        let entries = fs.read_dir(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_system_runner_captures_lines() {
        let lines = SystemRunner.run("sh", &["-c", "printf 'a\\nb\\n'"]).unwrap();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_system_runner_missing_program() {
        let err = SystemRunner
            .run("/nonexistent/zpool-12345", &["list"])
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound { .. }));
        assert!(err.to_string().contains("not found or not executable"));
    }

    #[test]
    fn test_system_runner_nonzero_exit_reports_stderr() {
        let err = SystemRunner
            .run("sh", &["-c", "echo 'no pools available' >&2; exit 1"])
            .unwrap_err();
        match err {
            CommandError::Failed { program, stderr } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "no pools available");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
