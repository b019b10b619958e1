//! Sandboxed execution of analysis code: gate, engine, evidence, lint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    dataset::Dataset,
    evidence::{self, Evidence},
    lint::{self, FlagCode, LinterFlag},
};

pub mod gate;
pub mod manifest;
pub mod python;

pub use manifest::Manifest;
pub use python::PythonRunner;

/// Interpreter faults. These are recorded in an [`ExecutionResult`], never
/// returned to the caller of [`Sandbox::execute`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{kind}: {message}")]
    Raised {
        kind: String,
        message: String,
        traceback: String,
    },

    #[error("execution exceeded the {secs}s deadline")]
    Timeout { secs: u64 },

    #[error("interpreter exited ({status}) before completing: {stderr}")]
    InterpreterCrashed { status: String, stderr: String },

    #[error("failed to start interpreter: {0}")]
    SpawnFailed(String),

    #[error("malformed interpreter output: {0}")]
    Protocol(String),
}

impl EngineError {
    fn flag(&self) -> LinterFlag {
        match self {
            Self::Raised { message, .. } => LinterFlag::error(FlagCode::ExecutionError, message.clone()),
            Self::Timeout { .. } => LinterFlag::error(FlagCode::ExecutionTimeout, self.to_string()),
            _ => LinterFlag::error(FlagCode::ExecutionError, self.to_string()),
        }
    }

    /// Full error text: kind and message, then the traceback when there is one.
    fn describe(&self) -> String {
        match self {
            Self::Raised { traceback, .. } if !traceback.is_empty() => {
                format!("{self}\n{traceback}")
            }
            _ => self.to_string(),
        }
    }
}

/// Raw outcome of one interpreter run, before evidence and linting.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub manifest: Manifest,
    pub error: Option<EngineError>,
}

/// Runs a code string against a dataset. Implementations convert every
/// fault into `RunOutput::error`.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, code: &str, dataset: &Dataset) -> RunOutput;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exec_ok: bool,
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Serialized as `""` on success.
    #[serde(default, with = "empty_as_none")]
    pub error: Option<String>,
    pub manifest: Manifest,
    pub evidence: Evidence,
    pub linter_flags: Vec<LinterFlag>,
}

impl ExecutionResult {
    fn rejected(violation: &gate::Violation) -> Self {
        let msg = format!("Code contains forbidden operations: {violation}");
        Self {
            exec_ok: false,
            error: Some(msg.clone()),
            linter_flags: vec![LinterFlag::error(FlagCode::ForbiddenCode, msg)],
            ..Self::default()
        }
    }

    fn failed(out: RunOutput, err: &EngineError) -> Self {
        Self {
            exec_ok: false,
            stdout: out.stdout,
            stderr: out.stderr,
            error: Some(err.describe()),
            linter_flags: vec![err.flag()],
            ..Self::default()
        }
    }

    pub fn has_flag(&self, code: FlagCode) -> bool {
        self.linter_flags.iter().any(|f| f.code == code)
    }

    pub fn has_error_flag(&self) -> bool {
        self.linter_flags.iter().any(LinterFlag::is_error)
    }

    /// Whether the run failed on indentation alone, which a reformat can fix.
    pub fn is_indentation_fault(&self) -> bool {
        let Some(err) = self.error.as_deref() else {
            return false;
        };
        !self.exec_ok
            && (err.starts_with("IndentationError")
                || err.starts_with("TabError")
                || err.contains("unexpected indent"))
    }
}

mod empty_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_deref().unwrap_or_default())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<String>::deserialize(d)?.filter(|e| !e.is_empty()))
    }
}

/// Sequences the security gate, the execution engine, the evidence
/// generator and the linter into a single call.
pub struct Sandbox<R = PythonRunner> {
    runner: R,
}

impl<R: CodeRunner> Sandbox<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// `manifest_schema` describes what the code is expected to bind; it is
    /// logged but not enforced.
    pub async fn execute(&self, code: &str, dataset: &Dataset, manifest_schema: &Value) -> ExecutionResult {
        if let Err(violation) = gate::check(code) {
            warn!(%violation, "code rejected by security gate");
            return ExecutionResult::rejected(&violation);
        }
        debug!(schema = %manifest_schema, "executing analysis code");

        let out = self.runner.run(code, dataset).await;
        if let Some(err) = out.error.clone() {
            warn!(error = %err, "analysis code failed");
            return ExecutionResult::failed(out, &err);
        }

        let evidence = evidence::compute(dataset, &out.manifest);
        let linter_flags = lint::lint(&out.manifest, &evidence);
        info!(
            manifest_id = out.manifest.id().unwrap_or("-"),
            flags = linter_flags.len(),
            "analysis code executed"
        );
        ExecutionResult {
            exec_ok: true,
            stdout: out.stdout,
            stderr: out.stderr,
            error: None,
            manifest: out.manifest,
            evidence,
            linter_flags,
        }
    }
}
