//! Run handler: wires the sandbox, agents and history into one pipeline run.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use is_terminal::IsTerminal;

use edagent::{
    agents::{AgentLlm, Agents},
    cache::RunHistory,
    config::Config,
    execution::PythonRunner,
    pipeline::{Pipeline, PipelineOptions, RunDirs, RunSummary},
    printer::{MarkdownPrinter, TextPrinter},
    process::python::interpreter_available,
};

pub struct RunHandler;

impl RunHandler {
    pub async fn run(
        cfg: &Config,
        csv: &Path,
        goal: &str,
        max_items: usize,
        offline: bool,
        caching: bool,
        markdown: bool,
    ) -> Result<()> {
        let python = cfg.python_bin();
        if !interpreter_available(&python) {
            anyhow::bail!("python interpreter `{python}` not found; set PYTHON_BIN");
        }

        let dirs = RunDirs::from_config(cfg);
        let llm = Arc::new(AgentLlm::from_config(cfg, offline, caching));
        let agents = if llm.is_online() {
            Agents::llm(llm, &dirs.artifacts)
        } else {
            Agents::fallback(&dirs.artifacts)
        };
        let opts = PipelineOptions {
            goal: goal.to_string(),
            max_items,
            ..PipelineOptions::from_config(cfg)
        };
        let status = TextPrinter::new("cyan");
        status.field("Dataset", csv.display());
        status.field("Goal", goal);
        status.field("Strategy", opts.strategy);

        let pipeline = Pipeline::new(PythonRunner::from_config(cfg), agents, opts)
            .with_history(RunHistory::from_config(cfg));
        let summary = pipeline
            .run_eda(csv, dirs.clone())
            .await
            .with_context(|| format!("analysis of {} failed; see {}", csv.display(), dirs.logs.join("error_run.json").display()))?;

        Self::print_summary(&summary, markdown);
        Ok(())
    }

    fn print_summary(summary: &RunSummary, markdown: bool) {
        if markdown && std::io::stdout().is_terminal() {
            MarkdownPrinter::default().print(&summary.report.markdown);
        } else {
            println!("{}", summary.report.markdown);
        }

        let done = TextPrinter::new("green");
        done.field("Run", &summary.run_id);
        done.field("Highlights", summary.highlights.len());
        done.field("Report", summary.report_path.display());
        done.field("Log", summary.log_path.display());
        done.field("Artifacts", summary.artifacts_dir.display());
    }
}
