use crate::catalog::QueryCatalog;
use crate::errors::ConfigError;
use crate::model::BenchConfig;
use crate::provision::plan_variants;
use std::path::Path;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

pub const ENV_RETRIES: &str = "LAYOUTBENCH_RETRIES";
pub const ENV_TIMEOUT_SECONDS: &str = "LAYOUTBENCH_TIMEOUT_SECONDS";
pub const ENV_PARALLEL: &str = "LAYOUTBENCH_PARALLEL";

pub fn load_config(path: &Path, strict: bool) -> Result<BenchConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;

    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(&raw);
    let mut cfg: BenchConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    // YAML anchors and extension keys are allowed to go unused.
    let unknown: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    if !unknown.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields in strict mode: {:?} (file: {})",
                unknown,
                path.display()
            )));
        }
        tracing::warn!(
            event = "layoutbench.config.unknown_fields",
            fields = ?unknown,
            file = %path.display(),
            "ignoring unknown config fields"
        );
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }

    normalize_paths(&mut cfg, path);
    Ok(cfg)
}

/// A relative `database.path` is taken relative to the config file.
fn normalize_paths(cfg: &mut BenchConfig, config_path: &Path) {
    if cfg.database.is_memory() {
        return;
    }
    let p = Path::new(&cfg.database.path);
    if p.is_relative() {
        let base = config_path.parent().unwrap_or(Path::new("."));
        cfg.database.path = base.join(p).to_string_lossy().into_owned();
    }
}

pub fn apply_env_overrides(cfg: &mut BenchConfig) -> Result<(), ConfigError> {
    apply_overrides(cfg, |k| std::env::var(k).ok())
}

/// `lookup` returns the raw value of an override variable, if set.
pub fn apply_overrides<F>(cfg: &mut BenchConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: std::str::FromStr>(key: &str, v: &str) -> Result<T, ConfigError> {
        v.trim()
            .parse()
            .map_err(|_| ConfigError(format!("{} has invalid value '{}'", key, v)))
    }

    if let Some(v) = lookup(ENV_RETRIES) {
        cfg.settings.retries = Some(parse(ENV_RETRIES, &v)?);
    }
    if let Some(v) = lookup(ENV_TIMEOUT_SECONDS) {
        cfg.settings.timeout_seconds = Some(parse(ENV_TIMEOUT_SECONDS, &v)?);
    }
    if let Some(v) = lookup(ENV_PARALLEL) {
        cfg.settings.parallel = Some(parse(ENV_PARALLEL, &v)?);
    }
    Ok(())
}

/// Everything that must hold before the database is touched. Returns the
/// catalog the run will use.
pub fn validate(cfg: &BenchConfig) -> Result<QueryCatalog, ConfigError> {
    if cfg.suite.trim().is_empty() {
        return Err(ConfigError("suite must not be empty".into()));
    }
    plan_variants(&cfg.dataset, &cfg.variants)?;

    let baseline = cfg.baseline_id()?;
    if !cfg.variants.iter().any(|v| v.id == baseline) {
        return Err(ConfigError(format!(
            "baseline '{}' is not a declared variant (have: {})",
            baseline,
            cfg.variant_ids().join(", ")
        )));
    }
    if cfg.settings.parallel == Some(0) {
        return Err(ConfigError("settings.parallel must be >= 1".into()));
    }
    QueryCatalog::from_defs(&cfg.queries)
}

pub const SAMPLE_CONFIG: &str = r#"configVersion: 1
suite: storage_layouts
database:
  path: ":memory:"
dataset:
  source: sales
  generate:
    rows: 20000
    seed: 42
variants:
  - id: clustered
    strategy: clustered
    keys: [sale_id]
  - id: heap
    strategy: heap
  - id: columnstore
    strategy: columnstore
  # - id: by_region
  #   strategy: custom
  #   statements:
  #     - "CREATE TABLE {table} AS SELECT * FROM {source} ORDER BY region"
  #     - "CREATE INDEX idx_by_region ON {table}(region)"
baseline: clustered
settings:
  parallel: 1
  timeout_seconds: 600
  query_timeout_seconds: 60
  retries: 2
  retry_delay_ms: 250
  explain: false
# queries default to full_scan, ordered_scan, equality_filter, filtered_aggregate
"#;

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}
