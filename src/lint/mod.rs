//! Chart linter: heuristic quality rules over a manifest and its evidence.
//!
//! Linter flags are always `warn`. Error-level flags (`FORBIDDEN_CODE`,
//! `EXECUTION_ERROR`, `EXECUTION_TIMEOUT`) are synthesized by the sandbox,
//! never by a rule here, so linting can inform a retry but never abort one.

use std::{fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    evidence::Evidence,
    execution::manifest::{Chart, Manifest},
};

const MAX_CARDINALITY: usize = 15;
const MAX_ABS_SKEW: f64 = 2.0;
const MAX_TICKS: i64 = 20;
const MAX_NA_DROP_PCT: f64 = 20.0;
const MIN_ROWS_PLOTTED: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagLevel {
    Error,
    Warn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagCode {
    ForbiddenCode,
    ExecutionError,
    ExecutionTimeout,
    MissingLabels,
    HighCardinality,
    HighSkewNoLog,
    ManyTicks,
    HighNaDrop,
    EmptyPlot,
}

impl FlagCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ForbiddenCode => "FORBIDDEN_CODE",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::ExecutionTimeout => "EXECUTION_TIMEOUT",
            Self::MissingLabels => "MISSING_LABELS",
            Self::HighCardinality => "HIGH_CARDINALITY",
            Self::HighSkewNoLog => "HIGH_SKEW_NO_LOG",
            Self::ManyTicks => "MANY_TICKS",
            Self::HighNaDrop => "HIGH_NA_DROP",
            Self::EmptyPlot => "EMPTY_PLOT",
        }
    }
}

impl fmt::Display for FlagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinterFlag {
    pub level: FlagLevel,
    pub code: FlagCode,
    pub msg: String,
}

impl LinterFlag {
    pub fn warn(code: FlagCode, msg: impl Into<String>) -> Self {
        Self { level: FlagLevel::Warn, code, msg: msg.into() }
    }

    pub fn error(code: FlagCode, msg: impl Into<String>) -> Self {
        Self { level: FlagLevel::Error, code, msg: msg.into() }
    }

    pub fn is_error(&self) -> bool {
        self.level == FlagLevel::Error
    }
}

/// Flags in insertion order: chart by chart, rule by rule within a chart.
pub fn lint(manifest: &Manifest, evidence: &Evidence) -> Vec<LinterFlag> {
    let Some(charts) = manifest.charts() else {
        return Vec::new();
    };
    let mut flags = Vec::new();
    for chart in &charts {
        lint_chart(chart, evidence, &mut flags);
    }
    flags
}

fn lint_chart(chart: &Chart, evidence: &Evidence, flags: &mut Vec<LinterFlag>) {
    if !chart.has_labels() {
        flags.push(LinterFlag::warn(FlagCode::MissingLabels, "Missing axis labels or title"));
    }

    for col in &chart.columns_used {
        if let Some(cat) = evidence.categorical.get(col) {
            if cat.cardinality > MAX_CARDINALITY {
                flags.push(LinterFlag::warn(
                    FlagCode::HighCardinality,
                    format!("Column {col} has {} unique values, consider top-k", cat.cardinality),
                ));
            }
        }
    }

    for col in &chart.columns_used {
        let skew = evidence.numeric.get(col).and_then(|n| n.skew).map(f64::abs);
        if let Some(skew) = skew {
            if skew > MAX_ABS_SKEW && !chart.axis.log_x {
                flags.push(LinterFlag::warn(
                    FlagCode::HighSkewNoLog,
                    format!("Column {col} has skew {skew:.2}, consider log scale"),
                ));
            }
        }
    }

    let (x_ticks, y_ticks) = (chart.axis.x_ticks, chart.axis.y_ticks);
    if x_ticks > MAX_TICKS || y_ticks > MAX_TICKS {
        flags.push(LinterFlag::warn(
            FlagCode::ManyTicks,
            format!("Too many ticks ({x_ticks}x{y_ticks}), consider thinning"),
        ));
    }

    if let Some(pct) = na_dropped_pct(&chart.notes) {
        if pct > MAX_NA_DROP_PCT {
            flags.push(LinterFlag::warn(FlagCode::HighNaDrop, format!("High NA drop: {pct}%")));
        }
    }

    if chart.n_rows_plotted < MIN_ROWS_PLOTTED {
        flags.push(LinterFlag::warn(
            FlagCode::EmptyPlot,
            format!("Plot has only {} rows", chart.n_rows_plotted),
        ));
    }
}

/// Parses the `NA dropped: N%` marker the coder writes into chart notes.
pub fn na_dropped_pct(notes: &str) -> Option<f64> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let re = MARKER.get_or_init(|| {
        Regex::new(r"NA dropped: (\d+(?:\.\d+)?)%").expect("static regex")
    });
    re.captures(notes)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{CategoricalEvidence, NumericEvidence};
    use serde_json::{json, Value};

    fn clean_chart() -> Value {
        json!({
            "title": "Distribution of price",
            "columns_used": ["price"],
            "n_rows_plotted": 100,
            "axis": {"x": "price", "y": "Frequency", "log_x": false, "x_ticks": 10, "y_ticks": 5},
            "notes": "NA dropped: 0.0%"
        })
    }

    fn with_chart(chart: Value) -> Manifest {
        Manifest::from_value(json!({"id": "q1", "charts": [chart]}))
    }

    fn numeric(skew: f64) -> NumericEvidence {
        NumericEvidence {
            count: 100, mean: 0.0, std: Some(1.0), min: 0.0, p01: 0.0, p25: 0.0, p50: 0.0,
            p75: 0.0, p95: 0.0, p99: 0.0, max: 0.0, skew: Some(skew), kurtosis: Some(0.0),
            n_outliers_z3: 0,
        }
    }

    fn codes(flags: &[LinterFlag]) -> Vec<FlagCode> {
        flags.iter().map(|f| f.code).collect()
    }

    #[test]
    fn no_charts_no_flags() {
        assert!(lint(&Manifest::default(), &Evidence::default()).is_empty());
        let m = Manifest::from_value(json!({"id": "x"}));
        assert!(lint(&m, &Evidence::default()).is_empty());
    }

    #[test]
    fn clean_chart_passes() {
        let mut ev = Evidence::default();
        ev.numeric.insert("price".into(), numeric(0.3));
        assert!(lint(&with_chart(clean_chart()), &ev).is_empty());
    }

    #[test]
    fn unknown_columns_are_skipped() {
        let mut chart = clean_chart();
        chart["columns_used"] = json!(["ghost", "also_missing"]);
        assert!(lint(&with_chart(chart), &Evidence::default()).is_empty());
    }

    #[test]
    fn missing_title_or_x_label() {
        let mut chart = clean_chart();
        chart.as_object_mut().unwrap().remove("title");
        assert_eq!(codes(&lint(&with_chart(chart), &Evidence::default())), vec![FlagCode::MissingLabels]);

        let mut chart = clean_chart();
        chart["axis"]["x"] = json!("");
        assert_eq!(codes(&lint(&with_chart(chart), &Evidence::default())), vec![FlagCode::MissingLabels]);
    }

    #[test]
    fn cardinality_threshold() {
        let mut ev = Evidence::default();
        ev.categorical.insert("price".into(), CategoricalEvidence { cardinality: 16, top_k: vec![] });
        let flags = lint(&with_chart(clean_chart()), &ev);
        assert_eq!(codes(&flags), vec![FlagCode::HighCardinality]);
        assert!(flags[0].msg.contains("16 unique values"));

        ev.categorical.insert("price".into(), CategoricalEvidence { cardinality: 15, top_k: vec![] });
        assert!(lint(&with_chart(clean_chart()), &ev).is_empty());
    }

    #[test]
    fn skew_needs_log_x() {
        let mut ev = Evidence::default();
        ev.numeric.insert("price".into(), numeric(-3.5));
        let flags = lint(&with_chart(clean_chart()), &ev);
        assert_eq!(codes(&flags), vec![FlagCode::HighSkewNoLog]);
        assert!(flags[0].msg.contains("skew 3.50"));

        let mut chart = clean_chart();
        chart["axis"]["log_x"] = json!(true);
        assert!(lint(&with_chart(chart), &ev).is_empty());
    }

    #[test]
    fn tick_threshold() {
        let mut chart = clean_chart();
        chart["axis"]["y_ticks"] = json!(21);
        let flags = lint(&with_chart(chart), &Evidence::default());
        assert_eq!(codes(&flags), vec![FlagCode::ManyTicks]);
        assert_eq!(flags[0].msg, "Too many ticks (10x21), consider thinning");

        let mut chart = clean_chart();
        chart["axis"]["x_ticks"] = json!(20);
        assert!(lint(&with_chart(chart), &Evidence::default()).is_empty());
    }

    #[test]
    fn na_drop_boundary() {
        let mut chart = clean_chart();
        chart["notes"] = json!("NA dropped: 20.0%");
        assert!(lint(&with_chart(chart), &Evidence::default()).is_empty());

        let mut chart = clean_chart();
        chart["notes"] = json!("binned; NA dropped: 20.5% of rows");
        let flags = lint(&with_chart(chart), &Evidence::default());
        assert_eq!(codes(&flags), vec![FlagCode::HighNaDrop]);
        assert_eq!(flags[0].msg, "High NA drop: 20.5%");

        assert_eq!(na_dropped_pct("NA dropped: n/a"), None);
        assert_eq!(na_dropped_pct("NA dropped: 35%"), Some(35.0));
    }

    #[test]
    fn empty_plot_boundary() {
        let mut chart = clean_chart();
        chart["n_rows_plotted"] = json!(10);
        let flags = lint(&with_chart(chart), &Evidence::default());
        assert_eq!(codes(&flags), vec![FlagCode::EmptyPlot]);
        assert_eq!(flags[0].msg, "Plot has only 10 rows");

        let mut chart = clean_chart();
        chart["n_rows_plotted"] = json!(50);
        assert!(lint(&with_chart(chart), &Evidence::default()).is_empty());
    }

    #[test]
    fn rule_order_within_and_across_charts() {
        let mut ev = Evidence::default();
        ev.numeric.insert("price".into(), numeric(5.0));
        let bad = json!({
            "columns_used": ["price"],
            "axis": {"x_ticks": 50},
            "notes": "NA dropped: 40%"
        });
        let m = Manifest::from_value(json!({"charts": [bad, clean_chart()]}));
        let flags = lint(&m, &ev);
        assert_eq!(
            codes(&flags),
            vec![
                FlagCode::MissingLabels,
                FlagCode::HighSkewNoLog,
                FlagCode::ManyTicks,
                FlagCode::HighNaDrop,
                FlagCode::EmptyPlot,
                FlagCode::HighSkewNoLog,
            ]
        );
        assert!(flags.iter().all(|f| f.level == FlagLevel::Warn));
    }

    #[test]
    fn flag_wire_format() {
        let f = LinterFlag::error(FlagCode::ExecutionError, "boom");
        assert_eq!(
            serde_json::to_value(&f).unwrap(),
            json!({"level": "error", "code": "EXECUTION_ERROR", "msg": "boom"})
        );
    }
}
