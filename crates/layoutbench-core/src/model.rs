use crate::errors::ConfigError;
use crate::naming::PhysicalName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default, rename = "configVersion", alias = "version")]
    pub version: u32,
    pub suite: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub dataset: DatasetSpec,
    #[serde(default)]
    pub variants: Vec<VariantSpec>,
    #[serde(default)]
    pub baseline: Option<String>,
    #[serde(default, skip_serializing_if = "is_default_settings")]
    pub settings: Settings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<QueryDef>,
}

impl BenchConfig {
    pub fn baseline_id(&self) -> Result<&str, ConfigError> {
        self.baseline
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| ConfigError("config has no baseline variant".into()))
    }

    pub fn variant_ids(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    ":memory:".to_string()
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

/// Where the logical dataset comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetSpec {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<GenerateSpec>,
}

/// Fill `source` with the synthetic sales dataset before provisioning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateSpec {
    pub rows: u64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VariantSpec {
    pub id: String,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statements: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<usize>,
    /// Global budget for the whole run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_variants: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<bool>,
}

fn is_default_settings(s: &Settings) -> bool {
    s == &Settings::default()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryDef {
    pub id: String,
    pub sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    Heap,
    Clustered,
    Columnstore,
    Custom,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::Heap => "heap",
            StrategyTag::Clustered => "clustered",
            StrategyTag::Columnstore => "columnstore",
            StrategyTag::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heap" => Some(StrategyTag::Heap),
            "clustered" => Some(StrategyTag::Clustered),
            "columnstore" => Some(StrategyTag::Columnstore),
            "custom" => Some(StrategyTag::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical organization of one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Strategy {
    Heap,
    /// Rows stored in `keys` order; the key is declared unique.
    Clustered { keys: Vec<String> },
    Columnstore,
    /// DDL with `{table}` and `{source}` placeholders.
    Custom { statements: Vec<String> },
}

impl Strategy {
    pub fn tag(&self) -> StrategyTag {
        match self {
            Strategy::Heap => StrategyTag::Heap,
            Strategy::Clustered { .. } => StrategyTag::Clustered,
            Strategy::Columnstore => StrategyTag::Columnstore,
            Strategy::Custom { .. } => StrategyTag::Custom,
        }
    }

    pub fn from_spec(spec: &VariantSpec) -> Result<Self, ConfigError> {
        let tag = StrategyTag::parse(&spec.strategy).ok_or_else(|| {
            ConfigError(format!(
                "variant '{}': unknown strategy '{}' (expected heap, clustered, columnstore or custom)",
                spec.id, spec.strategy
            ))
        })?;

        match tag {
            StrategyTag::Heap | StrategyTag::Columnstore => {
                if !spec.keys.is_empty() {
                    return Err(ConfigError(format!(
                        "variant '{}': keys are only valid for the clustered strategy",
                        spec.id
                    )));
                }
                Ok(if tag == StrategyTag::Heap {
                    Strategy::Heap
                } else {
                    Strategy::Columnstore
                })
            }
            StrategyTag::Clustered => {
                if spec.keys.is_empty() {
                    return Err(ConfigError(format!(
                        "variant '{}': clustered strategy requires at least one key column",
                        spec.id
                    )));
                }
                for k in &spec.keys {
                    crate::naming::validate_identifier("key column", k)?;
                }
                Ok(Strategy::Clustered {
                    keys: spec.keys.clone(),
                })
            }
            StrategyTag::Custom => {
                if spec.statements.iter().all(|s| s.trim().is_empty()) {
                    return Err(ConfigError(format!(
                        "variant '{}': custom strategy requires setup statements",
                        spec.id
                    )));
                }
                Ok(Strategy::Custom {
                    statements: spec.statements.clone(),
                })
            }
        }
    }
}

/// One physically realized copy of the logical dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variant {
    pub id: String,
    pub strategy: Strategy,
    pub source: PhysicalName,
    pub physical: PhysicalName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, decl_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decl_type: decl_type.into(),
        }
    }
}

/// Engine-reported cost, in whatever unit the backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub cpu_cost: f64,
    pub io_cost: f64,
    pub total_cost: f64,
}

impl CostBreakdown {
    pub fn new(cpu_cost: f64, io_cost: f64) -> Self {
        Self {
            cpu_cost,
            io_cost,
            total_cost: cpu_cost + io_cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub variant_id: String,
    pub template_id: String,
    /// Wall-clock seconds, full precision.
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostBreakdown>,
    pub rows: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<String>,
}

impl RunRecord {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs.max(0.0))
    }

    pub fn total_cost(&self) -> Option<f64> {
        self.cost.map(|c| c.total_cost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStage {
    Provision,
    Execution,
    Budget,
}

impl MissingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingStage::Provision => "provision",
            MissingStage::Execution => "execution",
            MissingStage::Budget => "budget",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "provision" => MissingStage::Provision,
            "budget" => MissingStage::Budget,
            _ => MissingStage::Execution,
        }
    }
}

/// A (variant, template) pair that produced no record, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingPair {
    pub variant_id: String,
    pub template_id: String,
    pub stage: MissingStage,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(strategy: &str) -> VariantSpec {
        VariantSpec {
            id: "v1".into(),
            strategy: strategy.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let err = Strategy::from_spec(&spec("foo")).unwrap_err();
        assert!(err.0.contains("unknown strategy 'foo'"));
    }

    #[test]
    fn test_clustered_requires_keys() {
        assert!(Strategy::from_spec(&spec("clustered")).is_err());

        let mut s = spec("Clustered");
        s.keys = vec!["sale_id".into()];
        assert_eq!(
            Strategy::from_spec(&s).unwrap(),
            Strategy::Clustered {
                keys: vec!["sale_id".into()]
            }
        );
    }

    #[test]
    fn test_keys_rejected_for_heap() {
        let mut s = spec("heap");
        s.keys = vec!["sale_id".into()];
        assert!(Strategy::from_spec(&s).is_err());
    }

    #[test]
    fn test_cost_total_is_sum() {
        let c = CostBreakdown::new(1.10, 9.18);
        assert!((c.total_cost - 10.28).abs() < 1e-9);
    }
}
