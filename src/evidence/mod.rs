//! Evidence generator: ground-truth descriptive statistics recomputed from the
//! dataset on every execution, independent of what the executed code did.

mod stats;

use chrono::{Datelike, NaiveDateTime, Timelike};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{ColumnData, ColumnKind, Dataset},
    execution::manifest::Manifest,
};

pub use stats::{pearson, quantile, Moments};

const TOP_K: usize = 10;
const CORR_TOP: usize = 10;
/// Minimum non-missing timestamps before a resampling granularity is inferred.
const TS_MIN_POINTS: usize = 30;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default)]
    pub numeric: IndexMap<String, NumericEvidence>,
    #[serde(default)]
    pub categorical: IndexMap<String, CategoricalEvidence>,
    #[serde(default)]
    pub relationships: Relationships,
    #[serde(default)]
    pub timeseries: TimeseriesEvidence,
}

impl Evidence {
    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty()
            && self.categorical.is_empty()
            && self.relationships.corr_pearson_top.is_empty()
            && self.timeseries.primary_ts_col.is_none()
    }
}

/// Undefined statistics (std of a single value, skew of a constant column)
/// are `None` and serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericEvidence {
    pub count: usize,
    pub mean: f64,
    pub std: Option<f64>,
    pub min: f64,
    pub p01: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
    pub skew: Option<f64>,
    pub kurtosis: Option<f64>,
    pub n_outliers_z3: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEvidence {
    pub cardinality: usize,
    pub top_k: Vec<TopValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopValue {
    pub value: String,
    pub count: usize,
    pub share: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationships {
    /// `(col_a, col_b, r)`, sorted by `|r|` descending.
    #[serde(default)]
    pub corr_pearson_top: Vec<(String, String, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resample {
    #[serde(rename = "H")]
    Hourly,
    #[serde(rename = "D")]
    Daily,
    #[serde(rename = "M")]
    Monthly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesEvidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_ts_col: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resample: Option<Resample>,
}

/// Compute evidence for the columns the manifest says it used, or for every
/// column when the manifest names none.
pub fn compute(dataset: &Dataset, manifest: &Manifest) -> Evidence {
    let used = manifest.used_columns();
    let wanted = |name: &str| used.is_empty() || used.iter().any(|u| u == name);

    let mut evidence = Evidence::default();

    for col in dataset.columns_of(ColumnKind::Numeric) {
        if !wanted(&col.name) {
            continue;
        }
        if let Some(ev) = numeric_evidence(&col.numeric_values()) {
            evidence.numeric.insert(col.name.clone(), ev);
        }
    }

    for col in dataset.columns_of(ColumnKind::Categorical) {
        if !wanted(&col.name) {
            continue;
        }
        if let ColumnData::Categorical(values) = &col.data {
            if let Some(ev) = categorical_evidence(values) {
                evidence.categorical.insert(col.name.clone(), ev);
            }
        }
    }

    evidence.relationships.corr_pearson_top = top_correlations(dataset);
    evidence.timeseries = timeseries_evidence(dataset);
    evidence
}

fn numeric_evidence(values: &[f64]) -> Option<NumericEvidence> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q = |p: f64| quantile(&sorted, p);
    let m = Moments::of(values);

    Some(NumericEvidence {
        count: values.len(),
        mean: m.mean,
        std: m.sample_std(),
        min: sorted[0],
        p01: q(0.01),
        p25: q(0.25),
        p50: q(0.50),
        p75: q(0.75),
        p95: q(0.95),
        p99: q(0.99),
        max: sorted[sorted.len() - 1],
        skew: m.skew(),
        kurtosis: m.excess_kurtosis(),
        n_outliers_z3: m.outliers_beyond(values, 3.0),
    })
}

/// Value counts over non-missing cells; ties keep first-appearance order.
fn categorical_evidence(values: &[Option<String>]) -> Option<CategoricalEvidence> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    let mut total = 0usize;
    for v in values.iter().flatten() {
        *counts.entry(v.as_str()).or_default() += 1;
        total += 1;
    }
    if total == 0 {
        return None;
    }
    let cardinality = counts.len();
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    // stable sort keeps first appearance among equal counts
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let top_k = ranked
        .into_iter()
        .take(TOP_K)
        .map(|(value, count)| TopValue {
            value: value.to_string(),
            count,
            share: count as f64 / total as f64,
        })
        .collect();
    Some(CategoricalEvidence { cardinality, top_k })
}

fn top_correlations(dataset: &Dataset) -> Vec<(String, String, f64)> {
    let numeric: Vec<(&str, &[Option<f64>])> = dataset
        .columns()
        .iter()
        .filter_map(|c| match &c.data {
            ColumnData::Numeric(v) => Some((c.name.as_str(), v.as_slice())),
            _ => None,
        })
        .collect();
    if numeric.len() < 2 {
        return Vec::new();
    }

    let mut pairs = Vec::new();
    for i in 0..numeric.len() {
        for j in (i + 1)..numeric.len() {
            let (a, xs) = numeric[i];
            let (b, ys) = numeric[j];
            if let Some(r) = pearson(xs, ys) {
                pairs.push((a.to_string(), b.to_string(), r));
            }
        }
    }
    pairs.sort_by(|l, r| r.2.abs().total_cmp(&l.2.abs()));
    pairs.truncate(CORR_TOP);
    pairs
}

fn timeseries_evidence(dataset: &Dataset) -> TimeseriesEvidence {
    let Some(col) = dataset.columns_of(ColumnKind::Datetime).next() else {
        return TimeseriesEvidence::default();
    };
    let ColumnData::Datetime(values) = &col.data else {
        return TimeseriesEvidence::default();
    };

    let stamps: Vec<_> = values.iter().flatten().collect();
    let mut ts = TimeseriesEvidence {
        primary_ts_col: Some(col.name.clone()),
        resample: None,
    };
    if stamps.len() > TS_MIN_POINTS {
        ts.resample = if distinct_count(&stamps, |t| t.hour()) > 1 {
            Some(Resample::Hourly)
        } else if distinct_count(&stamps, |t| t.day()) > 1 {
            Some(Resample::Daily)
        } else if distinct_count(&stamps, |t| t.month()) > 1 {
            Some(Resample::Monthly)
        } else {
            None
        };
    }
    ts
}

fn distinct_count(stamps: &[&NaiveDateTime], part: impl Fn(&NaiveDateTime) -> u32) -> usize {
    let mut seen: Vec<u32> = stamps.iter().map(|&t| part(t)).collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}
