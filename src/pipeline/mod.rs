//! Plan, then code, execute and critique each item with bounded retries, then
//! report.
//!
//! A [`RunContext`] carries everything a single run accumulates. Agent and
//! interpreter faults are data inside the execution log; only bookkeeping
//! faults (I/O on the output directories, serialization) abort a run.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    agents::{Agents, CodeArtifact, Critique, Feedback, Highlight, PlanItem, Report},
    cache::RunHistory,
    config::Config,
    dataset::{Dataset, DatasetError},
    execution::{CodeRunner, ExecutionResult, Sandbox},
    profile::{self, Profile},
    utils::reformat_indentation,
};

const DEFAULT_NOTES: &str = "Analysis completed successfully";

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize run log: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RunError + '_ {
    move |source| RunError::Io { path: path.to_path_buf(), source }
}

/// How a `fix` critique turns into the next attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegenStrategy {
    /// Append the critic's `fix_patch` to the previous code.
    Patch,
    /// Ask the coder again with the failure as feedback.
    #[default]
    Regenerate,
}

impl FromStr for RegenStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patch" => Ok(Self::Patch),
            "regenerate" | "regen" => Ok(Self::Regenerate),
            other => Err(format!("unknown regeneration strategy '{other}'")),
        }
    }
}

impl fmt::Display for RegenStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Patch => "patch",
            Self::Regenerate => "regenerate",
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub goal: String,
    pub max_items: usize,
    pub max_retries: usize,
    pub strategy: RegenStrategy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            goal: "General EDA".into(),
            max_items: 8,
            max_retries: 3,
            strategy: RegenStrategy::Regenerate,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(cfg: &Config) -> Self {
        let strategy = match cfg.get("REGEN_STRATEGY").map(|s| s.parse::<RegenStrategy>()) {
            Some(Ok(s)) => s,
            Some(Err(e)) => {
                warn!(error = %e, "using default regeneration strategy");
                RegenStrategy::default()
            }
            None => RegenStrategy::default(),
        };
        Self {
            max_retries: cfg.max_retries(),
            strategy,
            ..Self::default()
        }
    }
}

/// Where a run writes its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirs {
    pub artifacts: PathBuf,
    pub logs: PathBuf,
    pub report: PathBuf,
}

impl RunDirs {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            artifacts: cfg.artifacts_path(),
            logs: cfg.logs_path(),
            report: cfg.report_path(),
        }
    }

    /// All three under one root, for tests and scratch runs.
    pub fn under(root: &Path) -> Self {
        Self {
            artifacts: root.join("artifacts"),
            logs: root.join("logs"),
            report: root.join("report"),
        }
    }
}

/// One plan item's final attempt, as it appears in the execution log.
#[derive(Debug, Clone, Serialize)]
pub struct ItemRecord {
    pub item: PlanItem,
    pub code_output: CodeArtifact,
    pub exec_result: ExecutionResult,
    pub critique_result: Critique,
    pub retries: usize,
    pub accepted: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionLog {
    pub timestamp: String,
    pub goal: String,
    pub csv_path: Option<PathBuf>,
    pub profile: Option<Profile>,
    pub eda_plan: Vec<PlanItem>,
    pub exec_results: Vec<ItemRecord>,
    pub final_report: Option<Report>,
}

/// State of a single run, threaded through every stage.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub started: DateTime<Local>,
    pub dirs: RunDirs,
    pub log: ExecutionLog,
    pub highlights: Vec<Highlight>,
}

impl RunContext {
    pub fn new(goal: &str, csv_path: Option<&Path>, dirs: RunDirs) -> Self {
        let started = Local::now();
        Self {
            run_id: started.format("%Y%m%d_%H%M%S_%3f").to_string(),
            started,
            dirs,
            log: ExecutionLog {
                timestamp: started.to_rfc3339(),
                goal: goal.to_string(),
                csv_path: csv_path.map(Path::to_path_buf),
                ..ExecutionLog::default()
            },
            highlights: Vec::new(),
        }
    }

    pub fn last_run_path(&self) -> PathBuf {
        self.dirs.logs.join("last_run.json")
    }

    pub fn error_run_path(&self) -> PathBuf {
        self.dirs.logs.join("error_run.json")
    }

    pub fn report_file(&self) -> PathBuf {
        self.dirs.report.join("report.md")
    }

    fn prepare_dirs(&self) -> Result<(), RunError> {
        for dir in [&self.dirs.artifacts, &self.dirs.logs, &self.dirs.report] {
            fs::create_dir_all(dir).map_err(io_err(dir))?;
        }
        Ok(())
    }

    fn log_value(&self) -> Result<Value, RunError> {
        Ok(serde_json::to_value(&self.log)?)
    }

    fn write_log(&self) -> Result<PathBuf, RunError> {
        let path = self.last_run_path();
        let text = serde_json::to_string_pretty(&self.log)?;
        fs::write(&path, text).map_err(io_err(&path))?;
        Ok(path)
    }

    fn write_report(&self, report: &Report) -> Result<PathBuf, RunError> {
        let path = self.report_file();
        fs::write(&path, &report.markdown).map_err(io_err(&path))?;
        Ok(path)
    }

    /// Best effort: the run has already failed.
    fn write_failure(&self, err: &RunError) {
        let path = self.error_run_path();
        let body = serde_json::json!({
            "timestamp": self.log.timestamp,
            "run_id": self.run_id,
            "code": "RUN_FAILURE",
            "error": err.to_string(),
            "goal": self.log.goal,
            "csv_path": self.log.csv_path,
            "execution_log": self.log,
        });
        let written = fs::create_dir_all(&self.dirs.logs)
            .and_then(|_| fs::write(&path, serde_json::to_string_pretty(&body).unwrap_or_default()));
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "could not write error log");
        }
    }
}

/// What `run_eda` hands back on success.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub success: bool,
    pub highlights: Vec<Highlight>,
    pub report: Report,
    pub report_path: PathBuf,
    pub log_path: PathBuf,
    pub artifacts_dir: PathBuf,
}

/// Final state of one plan item.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub artifact: CodeArtifact,
    pub result: ExecutionResult,
    pub critique: Critique,
    pub retries: usize,
}

impl ItemOutcome {
    pub fn accepted(&self) -> bool {
        self.result.exec_ok
    }

    /// Chart paths the code declared, or the expected outputs when it
    /// declared none.
    fn artifacts(&self) -> Vec<String> {
        let declared: Vec<String> = self
            .result
            .manifest
            .charts()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.saved_path)
            .collect();
        if declared.is_empty() {
            self.artifact.expected_outputs.clone()
        } else {
            declared
        }
    }

    fn highlight(&self, item: &PlanItem) -> Highlight {
        let title = if self.artifact.title.is_empty() { item.goal.clone() } else { self.artifact.title.clone() };
        let stdout = self.result.stdout.trim();
        Highlight {
            title,
            artifacts: self.artifacts(),
            manifest: self.result.manifest.clone(),
            evidence: self.result.evidence.clone(),
            notes: if stdout.is_empty() { DEFAULT_NOTES.to_string() } else { stdout.to_string() },
        }
    }
}

pub struct Pipeline<R: CodeRunner> {
    sandbox: Sandbox<R>,
    agents: Agents,
    opts: PipelineOptions,
    history: Option<RunHistory>,
}

impl<R: CodeRunner> Pipeline<R> {
    pub fn new(runner: R, agents: Agents, opts: PipelineOptions) -> Self {
        Self { sandbox: Sandbox::new(runner), agents, opts, history: None }
    }

    pub fn with_history(mut self, history: RunHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn sandbox(&self) -> &Sandbox<R> {
        &self.sandbox
    }

    /// Load the CSV at `csv_path` and run the whole pipeline over it. On
    /// failure the error is also persisted as `error_run.json`.
    pub async fn run_eda(&self, csv_path: &Path, dirs: RunDirs) -> Result<RunSummary, RunError> {
        let mut ctx = RunContext::new(&self.opts.goal, Some(csv_path), dirs);
        let result = match Dataset::from_csv(csv_path) {
            Ok(dataset) => self.run_in(&mut ctx, &dataset).await,
            Err(e) => Err(e.into()),
        };
        self.finish(&ctx, result)
    }

    /// Same as [`run_eda`](Self::run_eda) for a dataset already in memory.
    pub async fn run_dataset(&self, dataset: &Dataset, dirs: RunDirs) -> Result<RunSummary, RunError> {
        let mut ctx = RunContext::new(&self.opts.goal, dataset.source(), dirs);
        let result = self.run_in(&mut ctx, dataset).await;
        self.finish(&ctx, result)
    }

    fn finish(&self, ctx: &RunContext, result: Result<RunSummary, RunError>) -> Result<RunSummary, RunError> {
        if let Err(e) = &result {
            error!(run_id = %ctx.run_id, code = "RUN_FAILURE", error = %e, "run failed");
            ctx.write_failure(e);
        }
        result
    }

    async fn run_in(&self, ctx: &mut RunContext, dataset: &Dataset) -> Result<RunSummary, RunError> {
        ctx.prepare_dirs()?;
        info!(run_id = %ctx.run_id, rows = dataset.rows(), columns = dataset.columns().len(), "starting run");

        let profile = profile::profile(dataset);
        ctx.log.profile = Some(profile.clone());

        let plan = self.agents.planner.plan(&profile, &self.opts.goal, self.opts.max_items).await;
        info!(items = plan.len(), "plan ready");
        ctx.log.eda_plan = plan.clone();

        for (i, item) in plan.iter().enumerate() {
            info!(item = %item.id, n = i + 1, of = plan.len(), "processing plan item");
            let outcome = self.process_item(item, &profile, dataset).await;
            let accepted = outcome.accepted();
            if accepted {
                warn_missing_outputs(&outcome.artifact);
                ctx.highlights.push(outcome.highlight(item));
            } else {
                warn!(item = %item.id, retries = outcome.retries, "item produced no highlight");
            }
            ctx.log.exec_results.push(ItemRecord {
                item: item.clone(),
                code_output: outcome.artifact,
                exec_result: outcome.result,
                critique_result: outcome.critique,
                retries: outcome.retries,
                accepted,
            });
        }

        let report = self.agents.reporter.report(&ctx.highlights, &profile).await;
        ctx.log.final_report = Some(report.clone());

        let report_path = ctx.write_report(&report)?;
        let log_path = ctx.write_log()?;
        if let Some(history) = &self.history {
            match history.save(&ctx.run_id, &ctx.log_value()?) {
                Ok(p) => debug!(path = %p.display(), "run saved to history"),
                Err(e) => warn!(error = %e, "could not save run to history"),
            }
        }
        info!(
            run_id = %ctx.run_id,
            highlights = ctx.highlights.len(),
            report = %report_path.display(),
            "run complete"
        );

        Ok(RunSummary {
            run_id: ctx.run_id.clone(),
            success: true,
            highlights: ctx.highlights.clone(),
            report,
            report_path,
            log_path,
            artifacts_dir: ctx.dirs.artifacts.clone(),
        })
    }

    /// Code, execute and critique one item until the critic is satisfied or
    /// the retry budget runs out.
    pub async fn process_item(&self, item: &PlanItem, profile: &Profile, dataset: &Dataset) -> ItemOutcome {
        let budget = self.opts.max_retries;
        let mut retries = 0;
        let mut reformatted = false;
        let mut artifact = self.agents.coder.write_code(item, profile, None).await;

        loop {
            let mut result = self.sandbox.execute(&artifact.code, dataset, &artifact.manifest_schema).await;

            if result.is_indentation_fault() && !reformatted && retries < budget {
                reformatted = true;
                retries += 1;
                info!(item = %item.id, retries, "reformatting indentation");
                artifact.code = reformat_indentation(&artifact.code);
                result = self.sandbox.execute(&artifact.code, dataset, &artifact.manifest_schema).await;
            }

            let critique = self.agents.critic.critique(&artifact, &result).await;
            if !critique.wants_fix() || retries >= budget {
                debug!(item = %item.id, exec_ok = result.exec_ok, retries, "attempt accepted");
                return ItemOutcome { artifact, result, critique, retries };
            }

            retries += 1;
            info!(item = %item.id, retries, notes = %critique.notes, "critic asked for a fix");
            artifact = self.revise(item, profile, artifact, &result, &critique).await;
        }
    }

    async fn revise(
        &self,
        item: &PlanItem,
        profile: &Profile,
        mut artifact: CodeArtifact,
        result: &ExecutionResult,
        critique: &Critique,
    ) -> CodeArtifact {
        if self.opts.strategy == RegenStrategy::Patch && !critique.fix_patch.trim().is_empty() {
            artifact.code = format!("{}\n{}\n", artifact.code.trim_end(), critique.fix_patch.trim_end());
            return artifact;
        }
        let feedback = Feedback {
            previous_code: artifact.code,
            error: result.error.clone(),
            critique_notes: critique.notes.clone(),
            linter_flags: result
                .linter_flags
                .iter()
                .map(|f| format!("{}: {}", f.code.as_str(), f.msg))
                .collect(),
        };
        self.agents.coder.write_code(item, profile, Some(&feedback)).await
    }
}

fn warn_missing_outputs(artifact: &CodeArtifact) {
    for out in &artifact.expected_outputs {
        if !Path::new(out).exists() {
            warn!(path = %out, "expected output was not written");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parsing() {
        assert_eq!("patch".parse::<RegenStrategy>(), Ok(RegenStrategy::Patch));
        assert_eq!(" Regenerate ".parse::<RegenStrategy>(), Ok(RegenStrategy::Regenerate));
        assert!("rewrite".parse::<RegenStrategy>().is_err());
        assert_eq!(RegenStrategy::Patch.to_string(), "patch");
    }

    #[test]
    fn options_from_config() {
        let mut cfg = Config::defaults();
        cfg.set("REGEN_STRATEGY", "patch");
        cfg.set("MAX_RETRIES", "5");
        let opts = PipelineOptions::from_config(&cfg);
        assert_eq!(opts.strategy, RegenStrategy::Patch);
        assert_eq!(opts.max_retries, 5);

        cfg.set("REGEN_STRATEGY", "bogus");
        assert_eq!(PipelineOptions::from_config(&cfg).strategy, RegenStrategy::Regenerate);
    }

    #[test]
    fn highlight_notes_and_artifacts() {
        let item = PlanItem { id: "a".into(), goal: "Goal".into(), ..PlanItem::default() };
        let mut outcome = ItemOutcome {
            artifact: CodeArtifact { expected_outputs: vec!["out/a.png".into()], ..CodeArtifact::default() },
            result: ExecutionResult { exec_ok: true, ..ExecutionResult::default() },
            critique: Critique::ok(""),
            retries: 0,
        };
        let h = outcome.highlight(&item);
        assert_eq!(h.title, "Goal");
        assert_eq!(h.notes, DEFAULT_NOTES);
        assert_eq!(h.artifacts, ["out/a.png"]);

        outcome.result.stdout = "mean 3.2\n".into();
        outcome.result.manifest = crate::execution::Manifest::from_value(serde_json::json!({
            "charts": [{"saved_path": "out/b.png"}]
        }));
        let h = outcome.highlight(&item);
        assert_eq!(h.notes, "mean 3.2");
        assert_eq!(h.artifacts, ["out/b.png"]);
    }

    #[test]
    fn context_paths() {
        let ctx = RunContext::new("g", None, RunDirs::under(Path::new("/tmp/x")));
        assert_eq!(ctx.last_run_path(), Path::new("/tmp/x/logs/last_run.json"));
        assert_eq!(ctx.report_file(), Path::new("/tmp/x/report/report.md"));
        assert_eq!(ctx.log.goal, "g");
    }
}
