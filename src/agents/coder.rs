use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{log_unavailable, AgentError, AgentLlm, PlanItem};
use crate::{profile::Profile, role::AgentRole, utils::strip_code_fences};

/// Code for one plan item, as the coder returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeArtifact {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "python")]
    pub code: String,
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    #[serde(default)]
    pub manifest_schema: Value,
}

/// What went wrong with the previous attempt, for regeneration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Feedback {
    pub previous_code: String,
    pub error: Option<String>,
    pub critique_notes: String,
    pub linter_flags: Vec<String>,
}

#[async_trait]
pub trait Coder: Send + Sync {
    async fn write_code(&self, item: &PlanItem, profile: &Profile, feedback: Option<&Feedback>) -> CodeArtifact;
}

pub struct LlmCoder {
    llm: Arc<AgentLlm>,
    save_dir: PathBuf,
}

impl LlmCoder {
    pub fn new(llm: Arc<AgentLlm>, save_dir: impl Into<PathBuf>) -> Self {
        Self { llm, save_dir: save_dir.into() }
    }

    async fn ask(&self, item: &PlanItem, profile: &Profile, feedback: Option<&Feedback>) -> Result<CodeArtifact, AgentError> {
        let mut request = json!({
            "role": "coder",
            "step": "code",
            "item": item,
            "profile": profile,
            "constraints": {
                "save_dir": self.save_dir,
                "rules": [
                    "No seaborn", "Label axes and titles", "Handle missing values",
                    "Use df already loaded", "Save PNG under save_dir; do not call plt.show()"
                ]
            },
            "output_contract": "Return {\"title\",\"python\",\"expected_outputs\":[\"...png\"],\"manifest_schema\":{...}}",
        });
        if let Some(fb) = feedback {
            request["step"] = json!("fix");
            request["previous_attempt"] = json!(fb);
        }

        let mut artifact: CodeArtifact = self.llm.ask_typed(AgentRole::Coder, &request).await?;
        artifact.code = strip_code_fences(&artifact.code).to_string();
        if artifact.code.trim().is_empty() {
            return Err(AgentError::Parse("empty python".into()));
        }
        if artifact.title.is_empty() {
            artifact.title = item.goal.clone();
        }
        Ok(artifact)
    }
}

#[async_trait]
impl Coder for LlmCoder {
    async fn write_code(&self, item: &PlanItem, profile: &Profile, feedback: Option<&Feedback>) -> CodeArtifact {
        match self.ask(item, profile, feedback).await {
            Ok(a) => {
                debug!(item = %item.id, bytes = a.code.len(), "coder produced code");
                a
            }
            Err(e) => {
                log_unavailable(AgentRole::Coder, &e);
                fallback_code(item, &self.save_dir)
            }
        }
    }
}

pub struct FallbackCoder {
    save_dir: PathBuf,
}

impl FallbackCoder {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self { save_dir: save_dir.into() }
    }
}

#[async_trait]
impl Coder for FallbackCoder {
    async fn write_code(&self, item: &PlanItem, _profile: &Profile, _feedback: Option<&Feedback>) -> CodeArtifact {
        fallback_code(item, &self.save_dir)
    }
}

/// Python single-quoted string literal.
fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Template {
    Histogram,
    Boxplot,
    TopValues,
}

impl Template {
    fn for_item(item: &PlanItem) -> Self {
        let has = |p: &str| item.plots.iter().any(|x| x == p);
        match () {
            _ if has("histogram") && !item.columns.is_empty() => Self::Histogram,
            _ if has("boxplot") && !item.columns.is_empty() => Self::Boxplot,
            _ => Self::TopValues,
        }
    }
}

/// Histogram, boxplot or top-10 bar chart of the item's first column, with a
/// complete manifest.
pub fn fallback_code(item: &PlanItem, save_dir: &Path) -> CodeArtifact {
    let id = if item.id.is_empty() { "unknown" } else { item.id.as_str() };
    let col = item.columns.first().map(String::as_str).unwrap_or("unknown");
    let saved = save_dir.join(format!("fig_{id}_1.png")).display().to_string();
    let template = Template::for_item(item);

    let (c, file) = (py_str(col), py_str(&format!("/fig_{id}_1.png")));
    let (chart_type, title, plot, x_label, y_label) = match template {
        Template::Histogram => (
            "histogram",
            format!("Distribution of {col}"),
            "ax.hist(series, bins=50, alpha=0.7, edgecolor='black')".to_string(),
            c.clone(),
            "'Frequency'".to_string(),
        ),
        Template::Boxplot => (
            "box",
            format!("Boxplot of {col}"),
            "ax.boxplot(series)".to_string(),
            "'Box'".to_string(),
            c.clone(),
        ),
        Template::TopValues => (
            "bar",
            format!("Top 10 values in {col}"),
            [
                "counts = series.value_counts().head(10)",
                "ax.bar(range(len(counts)), counts.values)",
                "ax.set_xticks(range(len(counts)))",
                "ax.set_xticklabels([str(v) for v in counts.index], rotation=45)",
            ]
            .join("\n"),
            c.clone(),
            "'Count'".to_string(),
        ),
    };
    let t = py_str(&title);
    let bins = if template == Template::Histogram { "50" } else { "None" };

    let code = format!(
        r#"import matplotlib.pyplot as plt

fig_path = ARTIFACTS_DIR.rstrip('/') + {file}
series = df[{c}].dropna()
fig, ax = plt.subplots(figsize=(10, 6))
{plot}
ax.set_xlabel({x_label})
ax.set_ylabel({y_label})
ax.set_title({t})
plt.tight_layout()
x_ticks = len(ax.get_xticks())
y_ticks = len(ax.get_yticks())
plt.savefig(fig_path, dpi=100, bbox_inches='tight')
plt.close(fig)

na_pct = df[{c}].isnull().sum() / max(len(df), 1) * 100
manifest = {{
    "id": {id_lit},
    "charts": [{{
        "saved_path": fig_path,
        "chart_type": {chart_type_lit},
        "title": {t},
        "columns_used": [{c}],
        "n_rows_plotted": int(len(series)),
        "axis": {{
            "x": {x_label},
            "y": {y_label},
            "log_x": False,
            "log_y": False,
            "x_ticks": int(x_ticks),
            "y_ticks": int(y_ticks),
        }},
        "encodings": {{"hue": None, "facet": None}},
        "params": {{"bins": {bins}, "clip_quantiles": [0.01, 0.99], "rolling_window": None}},
        "notes": "NA dropped: %.1f%%" % na_pct,
    }}],
}}
"#,
        id_lit = py_str(id),
        chart_type_lit = py_str(chart_type),
    );

    let goal = if item.goal.is_empty() { "Visualization".to_string() } else { item.goal.clone() };
    CodeArtifact {
        title: goal,
        code,
        expected_outputs: vec![saved.clone()],
        manifest_schema: json!({
            "id": id,
            "charts": [{
                "saved_path": saved,
                "chart_type": item.plots.first().map(String::as_str).unwrap_or("bar"),
                "columns_used": item.columns,
                "n_rows_plotted": 0,
                "axis": {"x": col, "y": "y", "log_x": false, "log_y": false, "x_ticks": 0, "y_ticks": 0},
                "encodings": {"hue": null, "facet": null},
                "params": {"bins": 50, "clip_quantiles": [0.01, 0.99], "rolling_window": null},
                "notes": "Generated by fallback code"
            }]
        }),
    }
}
