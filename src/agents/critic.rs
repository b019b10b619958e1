use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{log_unavailable, AgentError, AgentLlm, CodeArtifact};
use crate::{execution::ExecutionResult, lint::FlagCode, role::AgentRole};

/// Warnings that send an otherwise successful run back to the coder.
const BLOCKING_WARNINGS: [FlagCode; 3] = [FlagCode::HighSkewNoLog, FlagCode::MissingLabels, FlagCode::EmptyPlot];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CritiqueStatus {
    #[default]
    Ok,
    Fix,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub status: CritiqueStatus,
    #[serde(default)]
    pub fix_patch: String,
    #[serde(default)]
    pub notes: String,
}

impl Critique {
    pub fn ok(notes: impl Into<String>) -> Self {
        Self { status: CritiqueStatus::Ok, fix_patch: String::new(), notes: notes.into() }
    }

    pub fn fix(fix_patch: impl Into<String>, notes: impl Into<String>) -> Self {
        Self { status: CritiqueStatus::Fix, fix_patch: fix_patch.into(), notes: notes.into() }
    }

    pub fn wants_fix(&self) -> bool {
        self.status == CritiqueStatus::Fix
    }

    fn from_reply(v: &Value) -> Result<Self, AgentError> {
        let status = match v.get("status").and_then(Value::as_str).map(str::to_ascii_lowercase).as_deref() {
            Some("ok") => CritiqueStatus::Ok,
            Some("fix") => CritiqueStatus::Fix,
            other => return Err(AgentError::Parse(format!("unknown critique status {other:?}"))),
        };
        let text = |k: &str| v.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
        Ok(Self { status, fix_patch: text("fix_patch"), notes: text("notes") })
    }
}

#[async_trait]
pub trait Critic: Send + Sync {
    async fn critique(&self, artifact: &CodeArtifact, result: &ExecutionResult) -> Critique;
}

pub struct LlmCritic {
    llm: Arc<AgentLlm>,
}

impl LlmCritic {
    pub fn new(llm: Arc<AgentLlm>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Critic for LlmCritic {
    async fn critique(&self, artifact: &CodeArtifact, result: &ExecutionResult) -> Critique {
        let request = json!({
            "role": "critic",
            "step": "critique",
            "code": artifact,
            "exec_result": result,
            "output_contract": "Return {\"status\":\"ok|fix\",\"fix_patch\":\"<if any>\",\"notes\":\"...\"}",
        });
        let reply = match self.llm.ask(AgentRole::Critic, &request).await {
            Ok(v) => Critique::from_reply(&v),
            Err(e) => Err(e),
        };
        match reply {
            Ok(c) => {
                debug!(status = ?c.status, "critic reviewed result");
                c
            }
            Err(e) => {
                log_unavailable(AgentRole::Critic, &e);
                fallback_critique(result)
            }
        }
    }
}

pub struct FallbackCritic;

#[async_trait]
impl Critic for FallbackCritic {
    async fn critique(&self, _artifact: &CodeArtifact, result: &ExecutionResult) -> Critique {
        fallback_critique(result)
    }
}

fn messages<'a>(flags: impl Iterator<Item = &'a crate::lint::LinterFlag>) -> String {
    flags.map(|f| f.msg.as_str()).collect::<Vec<_>>().join("; ")
}

/// `fix` on a failed run, any error-level flag, or a blocking warning.
pub fn fallback_critique(result: &ExecutionResult) -> Critique {
    if !result.exec_ok {
        let err = result.error.as_deref().unwrap_or("Unknown error");
        return Critique::fix("# Code execution failed - needs debugging", format!("Execution error: {err}"));
    }

    if result.has_error_flag() {
        let msgs = messages(result.linter_flags.iter().filter(|f| f.is_error()));
        return Critique::fix("# Critical linter errors detected", format!("Critical issues: {msgs}"));
    }

    let blocking = result.linter_flags.iter().filter(|f| BLOCKING_WARNINGS.contains(&f.code));
    let msgs = messages(blocking);
    if !msgs.is_empty() {
        return Critique::fix("# High priority warnings detected", format!("Warnings to address: {msgs}"));
    }

    Critique::ok("Code executed successfully with no critical issues")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lint::LinterFlag;

    fn ok_result(flags: Vec<LinterFlag>) -> ExecutionResult {
        ExecutionResult { exec_ok: true, linter_flags: flags, ..ExecutionResult::default() }
    }

    #[test]
    fn failed_run_needs_fix() {
        let r = ExecutionResult { error: Some("NameError: x".into()), ..ExecutionResult::default() };
        let c = fallback_critique(&r);
        assert!(c.wants_fix());
        assert_eq!(c.notes, "Execution error: NameError: x");
    }

    #[test]
    fn blocking_and_benign_warnings() {
        let c = fallback_critique(&ok_result(vec![LinterFlag::warn(FlagCode::ManyTicks, "ticks")]));
        assert_eq!(c.status, CritiqueStatus::Ok);

        let c = fallback_critique(&ok_result(vec![
            LinterFlag::warn(FlagCode::ManyTicks, "ticks"),
            LinterFlag::warn(FlagCode::EmptyPlot, "Plot has only 3 rows"),
        ]));
        assert!(c.wants_fix());
        assert_eq!(c.notes, "Warnings to address: Plot has only 3 rows");
    }

    #[test]
    fn error_flags_on_ok_run() {
        let c = fallback_critique(&ok_result(vec![LinterFlag::error(FlagCode::ForbiddenCode, "nope")]));
        assert_eq!(c.fix_patch, "# Critical linter errors detected");
    }

    #[test]
    fn reply_parsing() {
        let c = Critique::from_reply(&json!({"status": "FIX", "fix_patch": "ax.set_xscale('log')"})).unwrap();
        assert!(c.wants_fix());
        assert_eq!(c.notes, "");
        assert!(Critique::from_reply(&json!({"status": "maybe"})).is_err());
        assert!(Critique::from_reply(&json!({})).is_err());
    }
}
