//! Agent roles and their system prompts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    Coder,
    Critic,
    Reporter,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Critic => "critic",
            Self::Reporter => "reporter",
        }
    }

    /// Config key that replaces this role's system prompt, e.g. `EDA_CODER_PROMPT`.
    fn override_key(self) -> String {
        format!("EDA_{}_PROMPT", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const BASE_PROMPT: &str = "You are a precise tool-builder. You must return **valid JSON** that exactly matches the requested schema. Do not include any prose outside JSON. You **do not** have access to images; reason only from structured inputs.";

pub fn system_prompt(cfg: &Config, role: AgentRole) -> String {
    if let Some(custom) = cfg.get(&role.override_key()).filter(|s| !s.trim().is_empty()) {
        return custom;
    }
    let save_dir = cfg.artifacts_path();
    let save_dir = save_dir.display();
    match role {
        AgentRole::Planner => format!(
            "{BASE_PROMPT}\nBased on the profile, create a prioritized EDA plan. Focus on data quality issues (missing values, outliers), distributions of numeric columns, categorical columns, relationships between variables and time series patterns if applicable.\nEach plan item has: id, goal, plots, priority (1=highest), columns, notes."
        ),
        AgentRole::Coder => format!(
            "{BASE_PROMPT}\nPrefer simple, robust Python (pandas + matplotlib). The DataFrame `df` is already loaded and `pd`, `np`, `plt`, `stats` are available. Do not import os, sys, subprocess or any file/network module and never call open, eval or exec.\nLabel axes and titles, handle missing values, do not use seaborn. Figures must save under `{save_dir}/`, which is bound as the string `ARTIFACTS_DIR`; build paths from it. Never call `plt.show()`.\nBind a variable named `manifest` describing every chart: saved_path, chart_type, title, columns_used, n_rows_plotted, axis {{x, y, log_x, log_y, x_ticks, y_ticks}}, encodings, params and notes containing `NA dropped: X.X%`."
        ),
        AgentRole::Critic => format!(
            "{BASE_PROMPT}\nReview the code execution result. Check for missing or incorrect manifest information, poor visualization choices (e.g. high skew without log scale) and missing labels or titles. If issues are found set status to \"fix\" and provide a fix_patch with corrected code; otherwise return status \"ok\"."
        ),
        AgentRole::Reporter => format!(
            "{BASE_PROMPT}\nGenerate a comprehensive EDA report in markdown: executive summary, data quality assessment, distribution results, relationship insights and next questions. Reference figures using only the filename (e.g. \"fig_q1_1.png\")."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coder_prompt_names_save_dir() {
        let mut cfg = Config::defaults();
        cfg.set("ARTIFACTS_DIR", "/tmp/figs");
        assert!(system_prompt(&cfg, AgentRole::Coder).contains("/tmp/figs/"));
    }

    #[test]
    fn prompts_can_be_overridden() {
        let mut cfg = Config::defaults();
        cfg.set("EDA_CRITIC_PROMPT", "be strict");
        assert_eq!(system_prompt(&cfg, AgentRole::Critic), "be strict");
        assert!(system_prompt(&cfg, AgentRole::Planner).starts_with("You are a precise"));
    }
}
