use assert_cmd::Command;

use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SMALL_SUITE: &str = r#"
configVersion: 1
suite: cli_smoke
dataset:
  source: sales
  generate:
    rows: 300
    seed: 7
variants:
  - id: clustered
    strategy: clustered
    keys: [sale_id]
  - id: heap
    strategy: heap
  - id: columnstore
    strategy: columnstore
baseline: clustered
settings:
  retries: 1
  retry_delay_ms: 1
"#;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("layoutbench.yaml");
    fs::write(&path, body).unwrap();
    path
}

fn layoutbench() -> Command {
    let mut cmd = Command::cargo_bin("layoutbench").unwrap();
    cmd.env_remove("LAYOUTBENCH_RETRIES")
        .env_remove("LAYOUTBENCH_TIMEOUT_SECONDS")
        .env_remove("LAYOUTBENCH_PARALLEL");
    cmd
}

#[test]
fn test_init_writes_sample_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/layoutbench.yaml");

    layoutbench()
        .arg("init")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stderr(contains("created"));
    assert!(fs::read_to_string(&path).unwrap().contains("baseline: clustered"));

    layoutbench()
        .arg("init")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stderr(contains("already exists"));
}

#[test]
fn test_validate_sample_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("layoutbench.yaml");
    layoutbench().arg("init").arg("--config").arg(&path).assert().success();

    layoutbench()
        .arg("validate")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("ok: suite 'storage_layouts'"));
}

#[test]
fn test_unknown_strategy_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        &SMALL_SUITE.replace("strategy: heap", "strategy: foo"),
    );

    layoutbench()
        .arg("validate")
        .arg("--config")
        .arg(&path)
        .assert()
        .code(2)
        .stderr(contains("foo"));

    layoutbench()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .arg("--no-store")
        .assert()
        .code(2);
}

#[test]
fn test_strict_rejects_unknown_fields() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), &format!("{}\nextra_knob: 1\n", SMALL_SUITE));

    layoutbench()
        .arg("validate")
        .arg("--config")
        .arg(&path)
        .assert()
        .success();
    layoutbench()
        .arg("validate")
        .arg("--config")
        .arg(&path)
        .arg("--strict")
        .assert()
        .code(2)
        .stderr(contains("extra_knob"));
}

#[test]
fn test_run_prints_json_report() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), SMALL_SUITE);

    let out = layoutbench()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .arg("--no-store")
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["suite"], "cli_smoke");
    assert_eq!(report["baseline"], "clustered");
    assert!(report.get("run_id").is_none());
    let sections = report["sections"].as_array().unwrap();
    assert_eq!(sections.len(), 4);
    for s in sections {
        assert_eq!(s["records"][0]["variant_id"], "clustered");
        assert_eq!(s["ratios"].as_array().unwrap().len(), 2);
    }
}

#[test]
fn test_stored_run_can_be_rebaselined() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), SMALL_SUITE);
    let db = dir.path().join("state/results.db");
    let md = dir.path().join("out/report.md");

    layoutbench()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .arg("--db")
        .arg(&db)
        .arg("--format")
        .arg("markdown")
        .arg("--out")
        .arg(&md)
        .assert()
        .success();
    assert!(fs::read_to_string(&md).unwrap().contains("cli_smoke"));

    let out = layoutbench()
        .arg("report")
        .arg("--db")
        .arg(&db)
        .arg("--baseline")
        .arg("heap")
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["baseline"], "heap");
    assert_eq!(report["run_id"], 1);
    assert_eq!(report["sections"][0]["records"][0]["variant_id"], "heap");

    layoutbench()
        .arg("report")
        .arg("--db")
        .arg(&db)
        .arg("--baseline")
        .arg("nope")
        .assert()
        .code(2);
}

#[test]
fn test_report_without_db_is_an_error() {
    let dir = TempDir::new().unwrap();
    layoutbench()
        .arg("report")
        .arg("--db")
        .arg(dir.path().join("missing.db"))
        .assert()
        .code(2)
        .stderr(contains("no results database"));
}

#[test]
fn test_version() {
    layoutbench()
        .arg("version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}
