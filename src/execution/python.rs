//! Python execution over an NDJSON protocol.
//!
//! The child reads one JSON request on stdin and writes one frame per line
//! on stdout: `{"ev":"stdout"|"stderr","data":..}` while user code runs, then
//! a single `{"ev":"done","manifest":..,"error":..}`. Lines that are not
//! frames are kept as plain stdout.

use std::{
    path::{Path, PathBuf},
    process::ExitStatus,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout},
};
use tracing::{debug, warn};

use super::{CodeRunner, EngineError, Manifest, RunOutput};
use crate::{
    config::Config,
    dataset::{ColumnKind, Dataset},
    process::{python::start_python, InterpreterSpec, ProcessHandle},
};

const BOOTSTRAP: &str = include_str!("bootstrap.py");

#[derive(Serialize)]
struct Request<'a> {
    code: &'a str,
    data_path: &'a Path,
    datetime_columns: Vec<&'a str>,
    artifacts_dir: &'a Path,
}

#[derive(Deserialize)]
#[serde(tag = "ev", rename_all = "lowercase")]
enum Frame {
    Stdout {
        data: String,
    },
    Stderr {
        data: String,
    },
    Done {
        #[serde(default)]
        manifest: Value,
        #[serde(default)]
        error: Option<Raised>,
    },
}

#[derive(Deserialize)]
struct Raised {
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    traceback: String,
}

#[derive(Default)]
struct Transcript {
    stdout: String,
    stderr: String,
    raw_stderr: Vec<u8>,
    done: Option<(Value, Option<Raised>)>,
}

impl Transcript {
    fn into_output(self, error: Option<EngineError>) -> RunOutput {
        let mut stderr = self.stderr;
        stderr.push_str(&String::from_utf8_lossy(&self.raw_stderr));
        RunOutput { stdout: self.stdout, stderr, manifest: Manifest::default(), error }
    }
}

fn apply_line(line: &str, stdout: &mut String, stderr: &mut String, done: &mut Option<(Value, Option<Raised>)>) {
    match serde_json::from_str::<Frame>(line) {
        Ok(Frame::Stdout { data }) => stdout.push_str(&data),
        Ok(Frame::Stderr { data }) => stderr.push_str(&data),
        Ok(Frame::Done { manifest, error }) => *done = Some((manifest, error)),
        Err(_) => {
            stdout.push_str(line);
            stdout.push('\n');
        }
    }
}

/// Runs code in a fresh `python3` process per call with a hard deadline.
#[derive(Debug, Clone)]
pub struct PythonRunner {
    interpreter: InterpreterSpec,
    timeout: Duration,
    artifacts_dir: PathBuf,
}

impl PythonRunner {
    pub fn new(program: impl Into<String>, timeout: Duration, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: InterpreterSpec::new(program),
            timeout,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.python_bin(), cfg.exec_timeout(), cfg.artifacts_path())
    }

    async fn run_at(&self, code: &str, dataset: &Dataset, scratch: &Path) -> RunOutput {
        let data_path = scratch.join("data.csv");
        if let Err(e) = dataset.write_csv(&data_path) {
            return Transcript::default().into_output(Some(EngineError::SpawnFailed(format!(
                "could not materialize dataset: {e}"
            ))));
        }
        // matplotlib caches fonts under its config dir; keep that out of $HOME
        let interpreter = self.interpreter.clone().env("MPLCONFIGDIR", scratch.join("mpl").display().to_string());

        let request = Request {
            code,
            data_path: &data_path,
            datetime_columns: dataset.columns_of(ColumnKind::Datetime).map(|c| c.name.as_str()).collect(),
            artifacts_dir: &self.artifacts_dir,
        };
        let payload = match serde_json::to_vec(&request) {
            Ok(p) => p,
            Err(e) => {
                return Transcript::default().into_output(Some(EngineError::Protocol(e.to_string())));
            }
        };

        let ProcessHandle { mut child, stdin, stdout, stderr } = match start_python(&interpreter, BOOTSTRAP) {
            Ok(h) => h,
            Err(e) => {
                return Transcript::default().into_output(Some(EngineError::SpawnFailed(format!("{e:#}"))));
            }
        };
        debug!(pid = ?child.id(), timeout = ?self.timeout, "interpreter started");

        let mut transcript = Transcript::default();
        let outcome = tokio::time::timeout(
            self.timeout,
            drive(&mut child, stdin, stdout, stderr, payload, &mut transcript),
        )
        .await;

        let error = match outcome {
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed-out interpreter");
                }
                Some(EngineError::Timeout { secs: self.timeout.as_secs() })
            }
            Ok(Err(e)) => Some(EngineError::Protocol(e.to_string())),
            Ok(Ok(status)) => finish(&mut transcript, status),
        };

        let manifest = match (&error, transcript.done.take()) {
            (None, Some((manifest, _))) => Manifest::from_value(manifest),
            _ => Manifest::default(),
        };
        RunOutput { manifest, ..transcript.into_output(error) }
    }
}

/// Error carried by a completed process, if any.
fn finish(transcript: &mut Transcript, status: ExitStatus) -> Option<EngineError> {
    match &mut transcript.done {
        Some((_, raised)) => raised.take().map(|r| EngineError::Raised {
            kind: r.kind,
            message: r.message,
            traceback: r.traceback,
        }),
        None => Some(EngineError::InterpreterCrashed {
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&transcript.raw_stderr).trim().to_string(),
        }),
    }
}

async fn drive(
    child: &mut Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    payload: Vec<u8>,
    transcript: &mut Transcript,
) -> std::io::Result<ExitStatus> {
    let Transcript { stdout: out, stderr: err, raw_stderr, done } = transcript;

    let write = async move {
        let mut stdin = stdin;
        stdin.write_all(&payload).await?;
        stdin.shutdown().await
    };
    let frames = async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            apply_line(&line, out, err, done);
        }
        Ok::<_, std::io::Error>(())
    };
    let raw = async move {
        let mut stderr = stderr;
        stderr.read_to_end(raw_stderr).await.map(|_| ())
    };

    let (written, read, raw_read) = tokio::join!(write, frames, raw);
    if let Err(e) = written {
        // the child may exit before consuming stdin; its exit status tells the rest
        debug!(error = %e, "interpreter closed stdin early");
    }
    read?;
    raw_read?;
    child.wait().await
}

#[async_trait]
impl CodeRunner for PythonRunner {
    /// The child always loads the table as this crate parsed it, so names and
    /// cells it sees match the evidence computed here.
    async fn run(&self, code: &str, dataset: &Dataset) -> RunOutput {
        let scratch = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => return Transcript::default().into_output(Some(EngineError::SpawnFailed(e.to_string()))),
        };
        self.run_at(code, dataset, scratch.path()).await
    }
}
