//! Python interpreter process bootstrap and I/O glue.

use anyhow::{anyhow, Context, Result};
use tokio::process::{Child, Command};

use super::{InterpreterSpec, ProcessHandle};

/// Environment that would let the child load code from outside the sandbox.
const SCRUBBED_ENV: &[&str] = &["PYTHONSTARTUP", "PYTHONPATH", "PYTHONHOME", "PYTHONINSPECT"];

pub fn start_python(spec: &InterpreterSpec, bootstrap: &str) -> Result<ProcessHandle> {
    let mut cmd = Command::new(&spec.program);
    cmd.arg("-B") // no .pyc next to user code
        .arg("-u") // unbuffered
        .arg("-c")
        .arg(bootstrap)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    for key in SCRUBBED_ENV {
        cmd.env_remove(key);
    }
    cmd.env("MPLBACKEND", "Agg").env("PYTHONIOENCODING", "utf-8");
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }

    let mut child: Child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn interpreter `{}`", spec.program))?;
    let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("no stderr"))?;

    Ok(ProcessHandle {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Whether `program` can be started at all; used to skip interpreter-backed tests.
pub fn interpreter_available(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("-c")
        .arg("pass")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
