//! `--list-runs` and `--show-run`.

use anyhow::Result;
use serde_json::Value;

use edagent::{
    cache::RunHistory,
    config::Config,
    printer::{MarkdownPrinter, TextPrinter},
};

pub struct HistoryHandler;

impl HistoryHandler {
    pub fn list(cfg: &Config) -> Result<()> {
        let history = RunHistory::from_config(cfg);
        let runs = history.list();
        if runs.is_empty() {
            TextPrinter::new("yellow").print("no stored runs");
            return Ok(());
        }
        let id = TextPrinter::new("cyan");
        for run in runs {
            let goal = history
                .read(&run)
                .ok()
                .and_then(|log| log.get("goal").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default();
            println!("{}  {goal}", id.paint(&run));
        }
        Ok(())
    }

    pub fn show(cfg: &Config, run_id: &str, markdown: bool) -> Result<()> {
        let log = RunHistory::from_config(cfg).read(run_id)?;
        let report = log
            .pointer("/final_report/markdown")
            .and_then(Value::as_str)
            .filter(|_| markdown);
        match report {
            Some(md) => MarkdownPrinter::default().print(md),
            None => println!("{}", serde_json::to_string_pretty(&log)?),
        }
        Ok(())
    }
}
