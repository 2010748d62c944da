//! Scripted command runner for testing one-shot command collectors.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use crate::collector::traits::{CommandError, CommandRunner};

#[derive(Debug, Clone)]
enum Scripted {
    Output(String),
    Failure(String),
    Missing,
}

/// Returns canned output per program name and records every invocation.
#[derive(Debug, Default)]
pub struct MockRunner {
    scripts: HashMap<String, Scripted>,
    calls: Mutex<Vec<String>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `program` succeed with the given stdout.
    pub fn with_output(mut self, program: &str, stdout: impl Into<String>) -> Self {
        self.scripts
            .insert(program.to_string(), Scripted::Output(stdout.into()));
        self
    }

    /// Makes `program` exit non-zero with the given stderr.
    pub fn with_failure(mut self, program: &str, stderr: impl Into<String>) -> Self {
        self.scripts
            .insert(program.to_string(), Scripted::Failure(stderr.into()));
        self
    }

    /// Makes `program` behave as if it is not installed.
    pub fn with_missing(mut self, program: &str) -> Self {
        self.scripts.insert(program.to_string(), Scripted::Missing);
        self
    }

    /// Command lines seen so far, program and arguments joined by spaces.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<String>, CommandError> {
        let mut line = vec![program];
        line.extend_from_slice(args);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.join(" "));

        match self.scripts.get(program) {
            Some(Scripted::Output(stdout)) => {
                Ok(stdout.trim().split('\n').map(str::to_string).collect())
            }
            Some(Scripted::Failure(stderr)) => Err(CommandError::Failed {
                program: program.to_string(),
                stderr: stderr.trim().to_string(),
            }),
            Some(Scripted::Missing) | None => Err(CommandError::NotFound {
                program: program.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
            }),
        }
    }
}
