use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "edagent", about = "Automated exploratory data analysis of a CSV file", version)]
#[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
#[command(group(ArgGroup::new("cache_switch").args(["cache", "no_cache"]).multiple(false)))]
#[command(group(ArgGroup::new("history").args(["list_runs", "show_run"]).multiple(false)))]
pub struct Cli {
    /// CSV file to analyse.
    #[arg(value_name = "CSV", required_unless_present_any = ["list_runs", "show_run"])]
    pub csv: Option<PathBuf>,

    /// What the analysis should focus on.
    #[arg(long, default_value = "General EDA")]
    pub goal: String,

    /// Upper bound on plan items.
    #[arg(long = "max-items", default_value_t = 8)]
    pub max_items: usize,

    /// Large language model to use.
    #[arg(long)]
    pub model: Option<String>,

    /// Randomness of agent output.
    #[arg(long, value_parser = clap::value_parser!(f32))]
    pub temperature: Option<f32>,

    /// Retries per plan item after the first attempt.
    #[arg(long = "max-retries")]
    pub max_retries: Option<usize>,

    /// Wall-clock limit for one execution, in seconds.
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Directory for generated charts.
    #[arg(long = "artifacts-dir")]
    pub artifacts_dir: Option<PathBuf>,

    /// Never call the chat endpoint; every agent uses its rule-based fallback.
    #[arg(long)]
    pub offline: bool,

    /// Cache agent replies.
    #[arg(long)]
    pub cache: bool,
    /// Disable caching of agent replies.
    #[arg(long = "no-cache")]
    pub no_cache: bool,

    /// Render the final report as Markdown in the terminal.
    #[arg(long)]
    pub md: bool,
    /// Print the raw Markdown report instead.
    #[arg(long = "no-md")]
    pub no_md: bool,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// List stored runs.
    #[arg(long = "list-runs")]
    pub list_runs: bool,

    /// Show a stored run log by id.
    #[arg(long = "show-run", value_name = "ID")]
    pub show_run: Option<String>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// `--md`/`--no-md` over the config default.
    pub fn markdown(&self, default: bool) -> bool {
        if self.no_md {
            false
        } else if self.md {
            true
        } else {
            default
        }
    }

    /// Caching is on unless `--no-cache`.
    pub fn caching(&self) -> bool {
        !self.no_cache
    }
}
