use layoutbench_core::config::{apply_overrides, load_config, validate, write_sample_config};
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

const MINIMAL: &str = r#"
configVersion: 1
suite: test
dataset:
  source: sales
variants:
  - id: heap
    strategy: heap
  - id: clustered
    strategy: clustered
    keys: [sale_id]
baseline: heap
"#;

fn write(content: &str) -> anyhow::Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new()?;
    write!(tmp, "{}", content)?;
    Ok(tmp)
}

#[test]
fn test_minimal_config_loads_with_defaults() -> anyhow::Result<()> {
    let tmp = write(MINIMAL)?;
    let cfg = load_config(tmp.path(), false)?;
    assert_eq!(cfg.version, 1);
    assert!(cfg.database.is_memory());
    assert_eq!(cfg.variant_ids(), vec!["heap", "clustered"]);

    let catalog = validate(&cfg)?;
    assert_eq!(catalog.len(), 4, "no queries declared: standard catalog");
    Ok(())
}

#[test]
fn test_missing_version_rejected() -> anyhow::Result<()> {
    let tmp = write(&MINIMAL.replace("configVersion: 1\n", ""))?;
    let err = load_config(tmp.path(), false).unwrap_err();
    assert!(err.0.contains("unsupported config version 0"), "{}", err);
    Ok(())
}

#[test]
fn test_unknown_fields_warn_or_fail_in_strict() -> anyhow::Result<()> {
    let tmp = write(&format!("{}\nmystery: 1\n", MINIMAL))?;
    assert!(load_config(tmp.path(), false).is_ok());

    let err = load_config(tmp.path(), true).unwrap_err();
    assert!(err.0.contains("mystery"), "{}", err);
    Ok(())
}

#[test]
fn test_unknown_strategy_is_config_error() -> anyhow::Result<()> {
    let tmp = write(&MINIMAL.replace("strategy: heap", "strategy: foo"))?;
    let cfg = load_config(tmp.path(), false)?;
    let err = validate(&cfg).unwrap_err();
    assert!(err.0.contains("unknown strategy 'foo'"), "{}", err);
    Ok(())
}

#[test]
fn test_baseline_must_be_declared() -> anyhow::Result<()> {
    let tmp = write(&MINIMAL.replace("baseline: heap", "baseline: columnstore"))?;
    let cfg = load_config(tmp.path(), false)?;
    assert!(validate(&cfg).is_err());
    Ok(())
}

#[test]
fn test_relative_database_path_resolves_against_config_dir() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("bench.yaml");
    std::fs::write(
        &path,
        MINIMAL.replace("suite: test", "suite: test\ndatabase:\n  path: data/bench.db"),
    )?;
    let cfg = load_config(&path, false)?;
    assert_eq!(
        std::path::PathBuf::from(&cfg.database.path),
        dir.path().join("data/bench.db")
    );
    Ok(())
}

#[test]
fn test_env_overrides() -> anyhow::Result<()> {
    let tmp = write(MINIMAL)?;
    let mut cfg = load_config(tmp.path(), false)?;
    apply_overrides(&mut cfg, |k| match k {
        "LAYOUTBENCH_RETRIES" => Some("5".into()),
        "LAYOUTBENCH_PARALLEL" => Some("3".into()),
        _ => None,
    })?;
    assert_eq!(cfg.settings.retries, Some(5));
    assert_eq!(cfg.settings.parallel, Some(3));
    assert_eq!(cfg.settings.timeout_seconds, None);

    let bad = apply_overrides(&mut cfg, |k| {
        (k == "LAYOUTBENCH_TIMEOUT_SECONDS").then(|| "soon".to_string())
    });
    assert!(bad.is_err());
    Ok(())
}

#[test]
fn test_sample_config_is_valid() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("layoutbench.yaml");
    write_sample_config(&path)?;
    let cfg = load_config(&path, true)?;
    validate(&cfg)?;
    assert_eq!(cfg.baseline.as_deref(), Some("clustered"));
    Ok(())
}
