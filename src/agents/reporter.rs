use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{log_unavailable, AgentError, AgentLlm};
use crate::{evidence::Evidence, execution::Manifest, profile::Profile, role::AgentRole};

const NEXT_QUESTIONS: [&str; 5] = [
    "What are the strongest correlations between variables?",
    "Are there any temporal patterns in the data?",
    "What are the main outliers and their potential causes?",
    "How do categorical variables interact with numeric ones?",
    "What additional features could be engineered from existing data?",
];

/// An accepted plan item, promoted for the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub title: String,
    pub artifacts: Vec<String>,
    pub manifest: Manifest,
    pub evidence: Evidence,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub markdown: String,
    #[serde(default)]
    pub next_questions: Vec<String>,
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, highlights: &[Highlight], profile: &Profile) -> Report;
}

pub struct LlmReporter {
    llm: Arc<AgentLlm>,
}

impl LlmReporter {
    pub fn new(llm: Arc<AgentLlm>) -> Self {
        Self { llm }
    }

    async fn ask(&self, highlights: &[Highlight], profile: &Profile) -> Result<Report, AgentError> {
        let request = json!({
            "role": "reporter",
            "step": "report",
            "inputs": {"highlights": highlights, "profile": profile},
            "output_contract": "Return {\"markdown\":\"...\",\"next_questions\":[\"...\"]}",
        });
        let reply: Value = self.llm.ask(AgentRole::Reporter, &request).await?;
        let report: Report = serde_json::from_value(reply).map_err(|e| AgentError::Parse(e.to_string()))?;
        if report.markdown.trim().is_empty() {
            return Err(AgentError::Parse("empty markdown".into()));
        }
        Ok(report)
    }
}

#[async_trait]
impl Reporter for LlmReporter {
    async fn report(&self, highlights: &[Highlight], profile: &Profile) -> Report {
        match self.ask(highlights, profile).await {
            Ok(r) => r,
            Err(e) => {
                log_unavailable(AgentRole::Reporter, &e);
                fallback_report(highlights, profile)
            }
        }
    }
}

pub struct FallbackReporter;

#[async_trait]
impl Reporter for FallbackReporter {
    async fn report(&self, highlights: &[Highlight], profile: &Profile) -> Report {
        fallback_report(highlights, profile)
    }
}

fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

pub fn fallback_report(highlights: &[Highlight], profile: &Profile) -> Report {
    let mut md = vec!["# EDA Analysis Report".to_string(), String::new()];

    md.push("## Data Overview".into());
    md.push(format!("- **Total Rows**: {}", thousands(profile.rows_total)));
    md.push(format!("- **Total Columns**: {}", profile.columns.len()));
    md.push(String::new());

    if !profile.columns.is_empty() {
        md.push("### Column Summary".into());
        for col in profile.columns.iter().take(10) {
            let pct = if profile.rows_total > 0 {
                col.missing as f64 / profile.rows_total as f64 * 100.0
            } else {
                0.0
            };
            md.push(format!("- **{}**: {} ({pct:.1}% missing)", col.name, col.dtype));
        }
        md.push(String::new());
    }

    if !highlights.is_empty() {
        md.push("## Analysis Results".into());
        for (i, h) in highlights.iter().enumerate() {
            let title = if h.title.is_empty() { format!("Analysis {}", i + 1) } else { h.title.clone() };
            md.push(format!("### {title}"));
            if !h.notes.is_empty() {
                md.push(h.notes.trim_end().to_string());
            }
            if !h.artifacts.is_empty() {
                md.push("**Generated Figures:**".into());
                md.extend(h.artifacts.iter().map(|a| format!("- {}", file_name(a))));
            }
            md.push(String::new());
        }
    }

    md.push("## Next Questions".into());
    md.extend(NEXT_QUESTIONS.iter().map(|q| format!("- {q}")));

    Report {
        markdown: md.join("\n"),
        next_questions: NEXT_QUESTIONS.iter().map(|q| q.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::{Column, Dataset},
        profile::profile,
    };

    #[test]
    fn thousands_separator() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }

    #[test]
    fn fallback_report_sections() {
        let ds = Dataset::new(vec![
            Column::numeric("price", vec![Some(1.0), None, Some(3.0), Some(4.0)]),
        ])
        .unwrap();
        let h = Highlight {
            title: "Distribution analysis for price".into(),
            artifacts: vec!["./artifacts/fig_dist_price_1.png".into()],
            manifest: Manifest::default(),
            evidence: Evidence::default(),
            notes: "Analysis completed successfully".into(),
        };
        let r = fallback_report(&[h], &profile(&ds));
        assert!(r.markdown.starts_with("# EDA Analysis Report"));
        assert!(r.markdown.contains("- **Total Rows**: 4"));
        assert!(r.markdown.contains("- **price**: float64 (25.0% missing)"));
        assert!(r.markdown.contains("### Distribution analysis for price"));
        assert!(r.markdown.contains("- fig_dist_price_1.png"));
        assert!(!r.markdown.contains("./artifacts"));
        assert_eq!(r.next_questions.len(), 5);
    }

    #[test]
    fn empty_highlights_still_report() {
        let ds = Dataset::new(vec![Column::numeric("x", vec![Some(1.0)])]).unwrap();
        let r = fallback_report(&[], &profile(&ds));
        assert!(!r.markdown.contains("## Analysis Results"));
        assert!(r.markdown.ends_with(NEXT_QUESTIONS[4]));
    }
}
