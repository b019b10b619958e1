//! Interpreter process management (startup/IO/teardown).

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};

pub mod python;

/// How to launch an interpreter for one sandboxed run.
#[derive(Debug, Clone)]
pub struct InterpreterSpec {
    pub program: String,
    /// Extra environment for the child, applied after the scrub.
    pub env: Vec<(String, String)>,
}

impl InterpreterSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), env: Vec::new() }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A spawned interpreter with all three standard streams piped.
/// The child is killed when the handle is dropped.
pub struct ProcessHandle {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}
