//! Loosely-typed view over the `manifest` object bound by executed code.
//!
//! The raw JSON is kept verbatim for logging and for the critic; the typed
//! accessors never fail and treat wrongly-typed fields as absent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Value);

impl Default for Manifest {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

impl Manifest {
    /// Anything that is not a JSON object collapses to the empty manifest.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => Self(value),
            _ => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_object().map(Map::is_empty).unwrap_or(true)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// `None` when there is no `charts` array at all.
    pub fn charts(&self) -> Option<Vec<Chart>> {
        self.0
            .get("charts")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(Chart::from_value).collect())
    }

    /// Union of `charts[*].columns_used`, first-seen order.
    pub fn used_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for chart in self.charts().unwrap_or_default() {
            for c in chart.columns_used {
                if !out.contains(&c) {
                    out.push(c);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chart {
    pub saved_path: Option<String>,
    pub chart_type: Option<String>,
    pub title: Option<String>,
    pub columns_used: Vec<String>,
    pub n_rows_plotted: i64,
    pub axis: Axis,
    pub encodings: Encodings,
    pub params: Params,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Axis {
    pub x: Option<String>,
    pub y: Option<String>,
    pub log_x: bool,
    pub log_y: bool,
    pub x_ticks: i64,
    pub y_ticks: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Encodings {
    pub hue: Option<String>,
    pub facet: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub bins: Option<i64>,
    pub clip_quantiles: Option<(f64, f64)>,
    pub rolling_window: Option<i64>,
}

impl Chart {
    pub fn from_value(v: &Value) -> Self {
        let axis = v.get("axis").map(Axis::from_value).unwrap_or_default();
        let encodings = v.get("encodings");
        let params = v.get("params");
        Self {
            saved_path: str_field(v, "saved_path"),
            chart_type: str_field(v, "chart_type"),
            title: str_field(v, "title"),
            columns_used: v
                .get("columns_used")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            n_rows_plotted: int_field(v, "n_rows_plotted").unwrap_or(0),
            axis,
            encodings: Encodings {
                hue: encodings.and_then(|e| str_field(e, "hue")),
                facet: encodings.and_then(|e| str_field(e, "facet")),
            },
            params: Params {
                bins: params.and_then(|p| int_field(p, "bins")),
                clip_quantiles: params.and_then(|p| p.get("clip_quantiles")).and_then(pair),
                rolling_window: params.and_then(|p| int_field(p, "rolling_window")),
            },
            notes: str_field(v, "notes").unwrap_or_default(),
        }
    }

    /// Non-empty x label and non-empty title.
    pub fn has_labels(&self) -> bool {
        let filled = |s: &Option<String>| s.as_deref().map(|t| !t.is_empty()).unwrap_or(false);
        filled(&self.axis.x) && filled(&self.title)
    }
}

impl Axis {
    fn from_value(v: &Value) -> Self {
        Self {
            x: str_field(v, "x"),
            y: str_field(v, "y"),
            log_x: v.get("log_x").and_then(Value::as_bool).unwrap_or(false),
            log_y: v.get("log_y").and_then(Value::as_bool).unwrap_or(false),
            x_ticks: int_field(v, "x_ticks").unwrap_or(0),
            y_ticks: int_field(v, "y_ticks").unwrap_or(0),
        }
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Integers may arrive as floats (numpy scalars); truncate those.
fn int_field(v: &Value, key: &str) -> Option<i64> {
    let f = v.get(key)?;
    f.as_i64().or_else(|| f.as_f64().filter(|x| x.is_finite()).map(|x| x as i64))
}

fn pair(v: &Value) -> Option<(f64, f64)> {
    match v.as_array()?.as_slice() {
        [lo, hi] => Some((lo.as_f64()?, hi.as_f64()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_object_is_empty() {
        assert!(Manifest::from_value(json!([1, 2])).is_empty());
        assert!(Manifest::from_value(Value::Null).is_empty());
        assert_eq!(serde_json::to_value(Manifest::default()).unwrap(), json!({}));
    }

    #[test]
    fn charts_absent_vs_empty() {
        assert!(Manifest::from_value(json!({"id": "q1"})).charts().is_none());
        assert_eq!(Manifest::from_value(json!({"charts": []})).charts(), Some(vec![]));
    }

    #[test]
    fn permissive_chart_parsing() {
        let m = Manifest::from_value(json!({
            "charts": [{
                "title": "Dist",
                "columns_used": ["a", 3, "b"],
                "n_rows_plotted": 120.0,
                "axis": {"x": "a", "log_x": "yes", "x_ticks": 30},
                "params": {"bins": 50, "clip_quantiles": [0.01, 0.99]},
                "encodings": null,
                "notes": 7
            }]
        }));
        let c = &m.charts().unwrap()[0];
        assert_eq!(c.columns_used, vec!["a", "b"]);
        assert_eq!(c.n_rows_plotted, 120);
        assert!(!c.axis.log_x);
        assert_eq!(c.axis.x_ticks, 30);
        assert_eq!(c.params.clip_quantiles, Some((0.01, 0.99)));
        assert_eq!(c.notes, "");
        assert!(c.has_labels());
    }

    #[test]
    fn used_columns_deduplicated() {
        let m = Manifest::from_value(json!({
            "charts": [{"columns_used": ["a", "b"]}, {"columns_used": ["b", "c"]}, {}]
        }));
        assert_eq!(m.used_columns(), vec!["a", "b", "c"]);
    }
}
