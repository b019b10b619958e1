//! Deterministic dataset profile handed to the planner, coder and reporter.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{Column, ColumnKind, Dataset},
    evidence::{quantile, Moments},
};

const TOP_VALUES: usize = 10;
/// Numeric columns with fewer distinct values than this also get top values.
const LOW_CARDINALITY: usize = 20;
const TARGET_KEYWORDS: &[&str] = &["target", "label", "outcome", "result", "class", "category"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub rows_total: usize,
    pub rows_sampled: usize,
    pub memory_estimate_mb: f64,
    pub columns: Vec<ColumnProfile>,
    pub suspected_target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: String,
    pub missing: usize,
    pub numeric: Option<NumericSummary>,
    #[serde(default)]
    pub top_values: IndexMap<String, usize>,
}

impl ColumnProfile {
    pub fn is_numeric(&self) -> bool {
        self.numeric.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: Option<f64>,
    /// Keyed `"0.0"`, `"0.25"`, `"0.5"`, `"0.75"`, `"1.0"`.
    pub quantiles: IndexMap<String, f64>,
}

pub fn profile(dataset: &Dataset) -> Profile {
    let columns: Vec<ColumnProfile> = dataset.columns().iter().map(|c| profile_column(c, dataset.rows())).collect();
    let suspected_target = suspected_target(dataset, &columns);
    Profile {
        rows_total: dataset.rows(),
        rows_sampled: dataset.rows(),
        memory_estimate_mb: (memory_estimate(dataset) / 1024.0 / 1024.0 * 100.0).round() / 100.0,
        columns,
        suspected_target,
    }
}

fn profile_column(col: &Column, rows: usize) -> ColumnProfile {
    let kind = col.kind();
    let counts = value_counts(col, rows);
    let numeric = (kind == ColumnKind::Numeric).then(|| numeric_summary(&col.numeric_values()));

    let top_values = if kind != ColumnKind::Numeric || counts.len() < LOW_CARDINALITY {
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().take(TOP_VALUES).collect()
    } else {
        IndexMap::new()
    };

    ColumnProfile {
        name: col.name.clone(),
        dtype: kind.dtype().to_string(),
        missing: col.missing(),
        numeric,
        top_values,
    }
}

fn numeric_summary(values: &[f64]) -> NumericSummary {
    const QUANTILE_POINTS: [(&str, f64); 5] = [("0.0", 0.0), ("0.25", 0.25), ("0.5", 0.5), ("0.75", 0.75), ("1.0", 1.0)];

    if values.is_empty() {
        return NumericSummary {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            std: Some(0.0),
            quantiles: QUANTILE_POINTS.iter().map(|(k, _)| (k.to_string(), 0.0)).collect(),
        };
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let m = Moments::of(values);
    NumericSummary {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: m.mean,
        std: m.sample_std(),
        quantiles: QUANTILE_POINTS
            .iter()
            .map(|(k, p)| (k.to_string(), quantile(&sorted, *p)))
            .collect(),
    }
}

/// Distinct non-missing renderings in first-appearance order.
fn value_counts(col: &Column, rows: usize) -> IndexMap<String, usize> {
    let mut counts = IndexMap::new();
    for row in 0..rows {
        if let Some(v) = col.cell(row) {
            *counts.entry(v).or_insert(0) += 1;
        }
    }
    counts
}

/// Rough in-memory footprint, in bytes, of the same table as a DataFrame.
fn memory_estimate(dataset: &Dataset) -> f64 {
    let rows = dataset.rows();
    let mut bytes = 128.0;
    for col in dataset.columns() {
        bytes += match col.kind() {
            ColumnKind::Numeric | ColumnKind::Datetime => 8.0 * rows as f64,
            ColumnKind::Categorical => (0..rows)
                .map(|r| col.cell(r).map(|s| 49.0 + s.len() as f64).unwrap_or(16.0))
                .sum(),
        };
    }
    bytes
}

fn name_suggests_target(name: &str) -> bool {
    let lower = name.to_lowercase();
    TARGET_KEYWORDS.iter().any(|k| lower.contains(k))
        || lower.split(|c: char| !c.is_ascii_alphanumeric()).any(|tok| tok == "y")
}

/// Highest-scoring candidate; ties go to the earlier column.
fn suspected_target(dataset: &Dataset, columns: &[ColumnProfile]) -> Option<String> {
    let rows = dataset.rows();
    let mut best: Option<(&str, f64)> = None;
    for (col, prof) in dataset.columns().iter().zip(columns) {
        if prof.missing as f64 > rows as f64 * 0.5 {
            continue;
        }
        let distinct = value_counts(col, rows).len();
        let mut score: Option<f64> = None;
        let mut consider = |s: f64| score = Some(score.map_or(s, |cur: f64| cur.max(s)));
        if name_suggests_target(&col.name) {
            consider(0.9);
        }
        if distinct == 2 {
            consider(0.7);
        }
        if col.kind() != ColumnKind::Numeric && (2..=20).contains(&distinct) {
            consider(0.5);
        }
        if let Some(s) = score {
            if best.map_or(true, |(_, b)| s > b) {
                best = Some((col.name.as_str(), s));
            }
        }
    }
    best.map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let n = 40;
        Dataset::new(vec![
            Column::numeric("price", (0..n).map(|i| Some(i as f64)).collect()),
            Column::numeric("is_churn", (0..n).map(|i| Some((i % 2) as f64)).collect()),
            Column::categorical("city", (0..n).map(|i| Some(["a", "b", "c"][i % 3])).collect()),
            Column::numeric("sparse", (0..n).map(|i| (i == 0).then_some(1.0)).collect()),
        ])
        .unwrap()
    }

    #[test]
    fn column_profiles() {
        let p = profile(&sample());
        assert_eq!(p.rows_total, 40);
        assert_eq!(p.rows_sampled, 40);
        assert_eq!(p.columns.len(), 4);

        let price = &p.columns[0];
        assert_eq!(price.dtype, "float64");
        let num = price.numeric.as_ref().unwrap();
        assert_eq!(num.min, 0.0);
        assert_eq!(num.max, 39.0);
        assert_eq!(num.quantiles["0.5"], 19.5);
        // 40 distinct numeric values: no top values
        assert!(price.top_values.is_empty());

        let churn = &p.columns[1];
        assert_eq!(churn.top_values.len(), 2);

        let city = &p.columns[2];
        assert_eq!(city.dtype, "object");
        assert!(city.numeric.is_none());
        assert_eq!(city.top_values.get_index(0), Some((&"a".to_string(), &14)));

        assert_eq!(p.columns[3].missing, 39);
    }

    #[test]
    fn binary_column_is_target_over_categorical() {
        let p = profile(&sample());
        assert_eq!(p.suspected_target.as_deref(), Some("is_churn"));
    }

    #[test]
    fn keyword_beats_binary_and_sparse_is_skipped() {
        let ds = Dataset::new(vec![
            Column::numeric("flag", vec![Some(0.0), Some(1.0), Some(0.0), Some(1.0)]),
            Column::numeric("label_score", vec![Some(0.1), Some(0.5), Some(0.7), Some(0.2)]),
            Column::categorical("target", vec![None, None, None, Some("x")]),
        ])
        .unwrap();
        assert_eq!(profile(&ds).suspected_target.as_deref(), Some("label_score"));
    }

    #[test]
    fn y_must_be_a_whole_token() {
        assert!(name_suggests_target("y"));
        assert!(name_suggests_target("train_y"));
        assert!(!name_suggests_target("city"));
        assert!(!name_suggests_target("day"));
    }

    #[test]
    fn all_missing_numeric_summary_is_zeroed() {
        let s = numeric_summary(&[]);
        assert_eq!(s.mean, 0.0);
        assert_eq!(s.quantiles.len(), 5);
    }

    #[test]
    fn serializes_for_agents() {
        let v = serde_json::to_value(profile(&sample())).unwrap();
        assert!(v["columns"][0]["numeric"]["quantiles"]["0.25"].is_number());
        assert!(v["columns"][2]["numeric"].is_null());
        assert!(v["memory_estimate_mb"].is_number());
    }
}
