//! In-memory columnar dataset loaded from CSV.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Cells that read as missing, on top of the empty string.
const NA_MARKERS: &[&str] = &["NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "None", "#N/A"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("CSV file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("CSV has no header row: {0}")]
    NoHeader(PathBuf),

    #[error("column {name} has {got} rows, expected {expected}")]
    RaggedColumn { name: String, got: usize, expected: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Datetime,
}

impl ColumnKind {
    /// The pandas dtype name the interpreter side reports for this kind.
    pub fn dtype(self) -> &'static str {
        match self {
            Self::Numeric => "float64",
            Self::Categorical => "object",
            Self::Datetime => "datetime64[ns]",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
    Datetime(Vec<Option<NaiveDateTime>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Categorical(v) => v.len(),
            Self::Datetime(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self { name: name.into(), data: ColumnData::Numeric(values) }
    }

    pub fn categorical<S: Into<String>>(name: impl Into<String>, values: Vec<Option<S>>) -> Self {
        let values = values.into_iter().map(|v| v.map(Into::into)).collect();
        Self { name: name.into(), data: ColumnData::Categorical(values) }
    }

    pub fn datetime(name: impl Into<String>, values: Vec<Option<NaiveDateTime>>) -> Self {
        Self { name: name.into(), data: ColumnData::Datetime(values) }
    }

    pub fn kind(&self) -> ColumnKind {
        match self.data {
            ColumnData::Numeric(_) => ColumnKind::Numeric,
            ColumnData::Categorical(_) => ColumnKind::Categorical,
            ColumnData::Datetime(_) => ColumnKind::Datetime,
        }
    }

    pub fn missing(&self) -> usize {
        match &self.data {
            ColumnData::Numeric(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Categorical(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Datetime(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Non-missing numeric values, in row order. Empty for other kinds.
    pub fn numeric_values(&self) -> Vec<f64> {
        match &self.data {
            ColumnData::Numeric(v) => v.iter().flatten().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Text rendering of a cell, as it would be written back to CSV.
    pub fn cell(&self, row: usize) -> Option<String> {
        match &self.data {
            ColumnData::Numeric(v) => v.get(row).copied().flatten().map(format_number),
            ColumnData::Categorical(v) => v.get(row).cloned().flatten(),
            ColumnData::Datetime(v) => v
                .get(row)
                .copied()
                .flatten()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

/// Columnar table shared read-only by every stage of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: usize,
    source: Option<PathBuf>,
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> Result<Self, DatasetError> {
        let rows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        for c in &columns {
            if c.data.len() != rows {
                return Err(DatasetError::RaggedColumn {
                    name: c.name.clone(),
                    got: c.data.len(),
                    expected: rows,
                });
            }
        }
        Ok(Self { columns, rows, source: None })
    }

    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DatasetError::NotFound(path.to_path_buf()));
        }
        let csv_err = |source| DatasetError::Csv { path: path.to_path_buf(), source };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() || headers.iter().all(String::is_empty) {
            return Err(DatasetError::NoHeader(path.to_path_buf()));
        }

        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            for (i, col) in raw.iter_mut().enumerate() {
                col.push(record.get(i).and_then(normalize_cell));
            }
        }

        let columns = headers
            .into_iter()
            .zip(raw)
            .map(|(name, cells)| infer_column(name, cells))
            .collect();
        let mut ds = Self::new(columns)?;
        ds.source = Some(path.to_path_buf());
        Ok(ds)
    }

    /// Materialize to CSV so an interpreter process can load the same table.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), csv::Error> {
        let file = File::create(path.as_ref())?;
        let mut writer = csv::WriterBuilder::new().from_writer(file);
        writer.write_record(self.columns.iter().map(|c| c.name.as_str()))?;
        for row in 0..self.rows {
            writer.write_record(self.columns.iter().map(|c| c.cell(row).unwrap_or_default()))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn columns_of(&self, kind: ColumnKind) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(move |c| c.kind() == kind)
    }
}

fn normalize_cell(raw: &str) -> Option<String> {
    let v = raw.trim();
    if v.is_empty() || NA_MARKERS.contains(&v) {
        None
    } else {
        Some(v.to_string())
    }
}

fn infer_column(name: String, cells: Vec<Option<String>>) -> Column {
    let present: Vec<&str> = cells.iter().flatten().map(String::as_str).collect();
    if present.is_empty() {
        return Column { name, data: ColumnData::Categorical(cells) };
    }
    if present.iter().all(|s| s.parse::<f64>().is_ok()) {
        let values = cells
            .iter()
            .map(|c| c.as_deref().and_then(|s| s.parse::<f64>().ok()))
            .collect();
        return Column { name, data: ColumnData::Numeric(values) };
    }
    if present.iter().all(|s| parse_datetime(s).is_some()) {
        let values = cells.iter().map(|c| c.as_deref().and_then(parse_datetime)).collect();
        return Column { name, data: ColumnData::Datetime(values) };
    }
    Column { name, data: ColumnData::Categorical(cells) }
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    for fmt in DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t);
        }
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, body: &str) -> PathBuf {
        let p = dir.join("data.csv");
        fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn infers_kinds_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(
            dir.path(),
            "price,city,when\n1.5,Paris,2024-01-01\nNA,Rome,2024-01-02 10:00:00\n3,,\n",
        );
        let ds = Dataset::from_csv(&p).unwrap();
        assert_eq!(ds.rows(), 3);
        assert_eq!(ds.column("price").unwrap().kind(), ColumnKind::Numeric);
        assert_eq!(ds.column("city").unwrap().kind(), ColumnKind::Categorical);
        assert_eq!(ds.column("when").unwrap().kind(), ColumnKind::Datetime);
        assert_eq!(ds.column("price").unwrap().missing(), 1);
        assert_eq!(ds.column("city").unwrap().missing(), 1);
        assert_eq!(ds.column("price").unwrap().numeric_values(), vec![1.5, 3.0]);
        assert_eq!(ds.source(), Some(p.as_path()));
    }

    #[test]
    fn mixed_column_is_categorical() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "code\n1\nA2\n3\n");
        let ds = Dataset::from_csv(&p).unwrap();
        assert_eq!(ds.column("code").unwrap().kind(), ColumnKind::Categorical);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = Dataset::from_csv("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, DatasetError::NotFound(_)));
    }

    #[test]
    fn ragged_columns_rejected() {
        let err = Dataset::new(vec![
            Column::numeric("a", vec![Some(1.0)]),
            Column::numeric("b", vec![Some(1.0), None]),
        ])
        .unwrap_err();
        assert!(matches!(err, DatasetError::RaggedColumn { .. }));
    }

    #[test]
    fn write_csv_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let ds = Dataset::new(vec![
            Column::numeric("x", vec![Some(1.0), None, Some(2.5)]),
            Column::categorical("c", vec![Some("a"), Some("b"), None]),
        ])
        .unwrap();
        let p = dir.path().join("out.csv");
        ds.write_csv(&p).unwrap();
        let back = Dataset::from_csv(&p).unwrap();
        assert_eq!(back.columns(), ds.columns());
    }
}
