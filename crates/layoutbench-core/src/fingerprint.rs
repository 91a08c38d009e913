use crate::catalog::QueryCatalog;
use crate::model::BenchConfig;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub hex: String,
    pub components: Vec<String>,
}

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Identifies what a run measured: dataset, physical layouts and query texts.
/// Runs sharing a fingerprint are directly comparable. Scheduling knobs
/// (parallelism, retries, timeouts) are left out.
pub fn compute(cfg: &BenchConfig, catalog: &QueryCatalog) -> Fingerprint {
    let mut parts = Vec::new();

    parts.push(format!("suite={}", cfg.suite));
    parts.push(format!("source={}", cfg.dataset.source));
    match &cfg.dataset.generate {
        Some(g) => parts.push(format!("generate=rows:{},seed:{}", g.rows, g.seed)),
        None => parts.push("generate=".to_string()),
    }

    for v in &cfg.variants {
        parts.push(format!(
            "variant={}:{}:{}:{}",
            v.id,
            v.strategy.trim().to_ascii_lowercase(),
            v.keys.join(","),
            v.statements.join(";")
        ));
    }

    for t in catalog.all() {
        parts.push(format!("query={}:{}", t.id, t.sql()));
    }

    parts.push(format!(
        "layoutbench_version={}",
        env!("CARGO_PKG_VERSION")
    ));

    let raw = parts.join("\n");
    Fingerprint {
        hex: sha256_hex(&raw),
        components: parts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatabaseConfig, DatasetSpec, Settings, VariantSpec};

    fn cfg(parallel: Option<usize>) -> BenchConfig {
        BenchConfig {
            version: 1,
            suite: "s".into(),
            database: DatabaseConfig::default(),
            dataset: DatasetSpec {
                source: "sales".into(),
                generate: None,
            },
            variants: vec![VariantSpec {
                id: "heap".into(),
                strategy: "heap".into(),
                ..Default::default()
            }],
            baseline: Some("heap".into()),
            settings: Settings {
                parallel,
                ..Default::default()
            },
            queries: vec![],
        }
    }

    #[test]
    fn test_scheduling_knobs_do_not_change_fingerprint() {
        let c = QueryCatalog::standard();
        assert_eq!(compute(&cfg(None), &c).hex, compute(&cfg(Some(4)), &c).hex);
    }

    #[test]
    fn test_layout_change_changes_fingerprint() {
        let c = QueryCatalog::standard();
        let mut other = cfg(None);
        other.variants[0].strategy = "columnstore".into();
        assert_ne!(compute(&cfg(None), &c).hex, compute(&other, &c).hex);
        assert_eq!(compute(&cfg(None), &c).hex.len(), 64);
    }
}
