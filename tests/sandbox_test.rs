use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use edagent::{
    dataset::{Column, Dataset},
    execution::{PythonRunner, Sandbox},
    lint::FlagCode,
    process::python::interpreter_available,
};

const PYTHON: &str = "python3";

fn sandbox(dir: &std::path::Path, timeout_secs: u64) -> Sandbox<PythonRunner> {
    Sandbox::new(PythonRunner::new(PYTHON, Duration::from_secs(timeout_secs), dir.join("artifacts")))
}

fn prices() -> Result<Dataset> {
    Ok(Dataset::new(vec![
        Column::numeric("price", (1..=60).map(|i| Some(i as f64)).collect()),
        Column::categorical("city", (0..60).map(|i| Some(["Oslo", "Rome", "Lima"][i % 3])).collect()),
    ])?)
}

macro_rules! require_python {
    () => {
        if !interpreter_available(PYTHON) {
            println!("Warning: {PYTHON} not found on PATH, skipping");
            return Ok(());
        }
    };
}

#[tokio::test]
async fn clean_run_returns_manifest_and_evidence() -> Result<()> {
    require_python!();
    let dir = tempfile::tempdir()?;
    let code = r#"
total = 0
for v in [1, 2, 3]:
    total += v
print("total", total)
manifest = {
    "id": "q1",
    "charts": [{
        "title": "Price",
        "axis": {"x": "price", "y": "count"},
        "columns_used": ["price"],
        "n_rows_plotted": 60,
    }],
}
"#;
    let r = sandbox(dir.path(), 30).execute(code.trim_start(), &prices()?, &json!({})).await;

    assert!(r.exec_ok, "{:?}", r.error);
    assert_eq!(r.stdout, "total 6\n");
    assert_eq!(r.manifest.id(), Some("q1"));
    assert_eq!(r.evidence.numeric["price"].count, 60);
    assert!(!r.evidence.categorical.contains_key("city"));
    assert!(r.linter_flags.is_empty(), "{:?}", r.linter_flags);
    Ok(())
}

#[tokio::test]
async fn forbidden_code_never_reaches_the_interpreter() -> Result<()> {
    // no interpreter needed: the gate answers first
    let dir = tempfile::tempdir()?;
    let sb = Sandbox::new(PythonRunner::new("definitely-not-python", Duration::from_secs(1), dir.path()));
    let r = sb.execute("import numpy as np, os\nprint(os.getcwd())", &prices()?, &json!({})).await;

    assert!(!r.exec_ok);
    assert!(r.error.as_deref().unwrap_or_default().starts_with("Code contains forbidden operations"));
    assert_eq!(r.linter_flags.len(), 1);
    assert_eq!(r.linter_flags[0].code, FlagCode::ForbiddenCode);
    assert!(r.linter_flags[0].is_error());
    assert!(r.stdout.is_empty());
    Ok(())
}

#[tokio::test]
async fn raised_error_keeps_earlier_output() -> Result<()> {
    require_python!();
    let dir = tempfile::tempdir()?;
    let code = "print('before')\nraise ValueError('bad value')\n";
    let r = sandbox(dir.path(), 30).execute(code, &prices()?, &json!({})).await;

    assert!(!r.exec_ok);
    assert_eq!(r.stdout, "before\n");
    let err = r.error.as_deref().unwrap_or_default();
    assert!(err.starts_with("ValueError: bad value"), "{err}");
    assert!(err.contains("Traceback"));
    assert!(r.has_flag(FlagCode::ExecutionError));
    assert_eq!(r.linter_flags[0].msg, "bad value");
    assert!(r.manifest.is_empty());
    Ok(())
}

#[tokio::test]
async fn runaway_code_hits_the_deadline() -> Result<()> {
    require_python!();
    let dir = tempfile::tempdir()?;
    let code = "print('started')\nwhile True:\n    pass\n";
    let started = std::time::Instant::now();
    let r = sandbox(dir.path(), 8).execute(code, &prices()?, &json!({})).await;

    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(!r.exec_ok);
    assert!(r.has_flag(FlagCode::ExecutionTimeout));
    assert_eq!(r.stdout, "started\n");
    Ok(())
}

#[tokio::test]
async fn indentation_fault_is_recognised() -> Result<()> {
    require_python!();
    let dir = tempfile::tempdir()?;
    let r = sandbox(dir.path(), 30).execute("    x = 1\n    print(x)\n", &prices()?, &json!({})).await;

    assert!(!r.exec_ok);
    assert!(r.is_indentation_fault(), "{:?}", r.error);

    let fixed = edagent::utils::reformat_indentation("    x = 1\n    print(x)\n");
    let r = sandbox(dir.path(), 30).execute(&fixed, &prices()?, &json!({})).await;
    assert!(r.exec_ok, "{:?}", r.error);
    assert_eq!(r.stdout, "1\n");
    Ok(())
}

#[tokio::test]
async fn runtime_import_guard_backs_up_the_gate() -> Result<()> {
    require_python!();
    let dir = tempfile::tempdir()?;
    // passes the static gate, refused by the interpreter-side import hook
    let code = "imp = __builtins__['__imp' + 'ort__']\nimp('o' + 's')\n";
    let r = sandbox(dir.path(), 30).execute(code, &prices()?, &json!({})).await;

    assert!(!r.has_flag(FlagCode::ForbiddenCode));
    assert!(!r.exec_ok);
    let err = r.error.as_deref().unwrap_or_default();
    assert!(err.starts_with("ImportError: import of module 'os' is not allowed"), "{err}");
    Ok(())
}

#[tokio::test]
async fn non_dict_manifest_is_empty() -> Result<()> {
    require_python!();
    let dir = tempfile::tempdir()?;
    let r = sandbox(dir.path(), 30).execute("manifest = [1, 2]\n", &prices()?, &json!({})).await;
    assert!(r.exec_ok);
    assert!(r.manifest.is_empty());
    assert!(r.linter_flags.is_empty());
    Ok(())
}

#[tokio::test]
async fn child_sees_the_table_as_loaded_here() -> Result<()> {
    require_python!();
    let dir = tempfile::tempdir()?;
    let csv = dir.path().join("padded.csv");
    std::fs::write(
        &csv,
        "id, price , city,when\n1, 12 , Oslo ,2024-01-02\n2,13, NA ,2024-01-03\n3,14,Lima,2024-01-04\n",
    )?;
    let ds = Dataset::from_csv(&csv)?;
    let code = r#"
print(list(df.keys()))
print(df['price'][0] + 1 == 13)
print(df['city'][0] == 'Oslo')
v = df['city'][1]
print(v is None or v != v)
print(str(df['when'][0])[:10])
"#;
    let r = sandbox(dir.path(), 30).execute(code.trim_start(), &ds, &json!({})).await;

    assert!(r.exec_ok, "{:?}", r.error);
    assert_eq!(r.stdout, "['id', 'price', 'city', 'when']\nTrue\nTrue\nTrue\n2024-01-02\n");
    Ok(())
}

#[tokio::test]
async fn unbound_manifest_serializes_as_empty_object() -> Result<()> {
    require_python!();
    let dir = tempfile::tempdir()?;
    let r = sandbox(dir.path(), 30).execute("x = 1\n", &prices()?, &json!({})).await;

    assert!(r.exec_ok, "{:?}", r.error);
    assert!(r.manifest.is_empty());
    assert_eq!(serde_json::to_value(&r.manifest)?, json!({}));
    assert!(r.linter_flags.is_empty(), "{:?}", r.linter_flags);
    Ok(())
}

fn with_missing(missing: usize) -> Result<Dataset> {
    let v = (0..100).map(|i| if i < missing { None } else { Some((i % 10) as f64) }).collect();
    Ok(Dataset::new(vec![Column::numeric("v", v)])?)
}

const NA_DROP_CODE: &str = r#"
col = df['v']
missing = sum(1 for x in col if x is None or x != x)
na_pct = missing / len(col) * 100
manifest = {"charts": [{
    "title": "V",
    "axis": {"x": "v", "y": "count"},
    "columns_used": ["v"],
    "n_rows_plotted": len(col) - missing,
    "notes": "NA dropped: %.1f%%" % na_pct,
}]}
"#;

#[tokio::test]
async fn na_drop_flag_starts_above_twenty_percent() -> Result<()> {
    require_python!();
    let dir = tempfile::tempdir()?;
    let sb = sandbox(dir.path(), 30);

    let r = sb.execute(NA_DROP_CODE.trim_start(), &with_missing(20)?, &json!({})).await;
    assert!(r.exec_ok, "{:?}", r.error);
    let charts = r.manifest.charts().unwrap_or_default();
    assert_eq!(charts[0].notes, "NA dropped: 20.0%");
    assert_eq!(charts[0].n_rows_plotted, 80);
    assert!(r.linter_flags.is_empty(), "{:?}", r.linter_flags);

    let r = sb.execute(NA_DROP_CODE.trim_start(), &with_missing(21)?, &json!({})).await;
    assert!(r.exec_ok, "{:?}", r.error);
    assert_eq!(r.linter_flags.len(), 1, "{:?}", r.linter_flags);
    assert_eq!(r.linter_flags[0].code, FlagCode::HighNaDrop);
    assert_eq!(r.linter_flags[0].msg, "High NA drop: 21%");
    Ok(())
}
