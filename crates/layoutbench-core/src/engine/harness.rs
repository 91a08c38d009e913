//! Harness context: owns the collaborator, config, catalog and deadline for
//! one benchmark run. Teardown runs on every path once variants exist.

use crate::catalog::QueryCatalog;
use crate::db::Database;
use crate::engine::runner::{RunPolicy, Runner};
use crate::errors::{ConfigError, HarnessError};
use crate::model::{BenchConfig, MissingPair, MissingStage, RunRecord, Variant};
use crate::provision::Provisioner;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

#[derive(Debug)]
pub struct HarnessOutcome {
    pub suite: String,
    pub baseline: String,
    /// Every registered variant id, registration order.
    pub variant_order: Vec<String>,
    pub template_order: Vec<String>,
    /// Variants that were actually provisioned.
    pub variants: Vec<Variant>,
    pub records: Vec<RunRecord>,
    pub missing: Vec<MissingPair>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct Harness {
    cfg: BenchConfig,
    db: Arc<dyn Database>,
    catalog: Arc<QueryCatalog>,
    policy: RunPolicy,
    baseline: String,
}

impl Harness {
    /// Validates the whole configuration. Nothing touches the database here.
    pub fn new(cfg: BenchConfig, db: Arc<dyn Database>) -> Result<Self, ConfigError> {
        let catalog = crate::config::validate(&cfg)?;
        let baseline = cfg.baseline_id()?.to_string();
        let policy = RunPolicy::from_settings(&cfg.settings);
        Ok(Self {
            cfg,
            db,
            catalog: Arc::new(catalog),
            policy,
            baseline,
        })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.cfg
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    pub fn variant_order(&self) -> Vec<String> {
        self.cfg.variant_ids()
    }

    pub fn template_order(&self) -> Vec<String> {
        self.catalog.ids()
    }

    pub async fn run(&self) -> Result<HarnessOutcome, HarnessError> {
        let started_at = Utc::now();
        let deadline = self
            .cfg
            .settings
            .timeout_seconds
            .filter(|s| *s > 0)
            .map(|s| Instant::now() + Duration::from_secs(s));

        tracing::info!(
            event = "layoutbench.harness.start",
            suite = %self.cfg.suite,
            backend = self.db.backend_name(),
            variants = self.cfg.variants.len(),
            templates = self.catalog.len(),
            parallel = self.policy.parallel,
            "benchmark starting"
        );

        let provisioner = Provisioner::new(self.db.clone());
        let provisioned = provisioner
            .provision(&self.cfg.dataset, &self.cfg.variants)
            .await?;

        let mut warnings = Vec::new();
        let mut missing = Vec::new();
        for failure in &provisioned.failures {
            let Some(variant_id) = failure.variant() else {
                continue;
            };
            if variant_id == self.baseline {
                warnings.push(format!(
                    "baseline variant '{}' could not be provisioned; ratios are unavailable",
                    variant_id
                ));
            }
            for template in self.catalog.all() {
                missing.push(MissingPair {
                    variant_id: variant_id.to_string(),
                    template_id: template.id.clone(),
                    stage: MissingStage::Provision,
                    reason: failure.to_string(),
                });
            }
        }

        let runner = Runner::new(self.db.clone(), self.policy.clone());
        let result = runner
            .run_catalog(&provisioned.variants, self.catalog.clone(), deadline)
            .await;

        if self.cfg.settings.keep_variants.unwrap_or(false) {
            tracing::info!(
                event = "layoutbench.harness.keep_variants",
                kept = provisioned.variants.len(),
                "leaving variants in place"
            );
        } else {
            provisioner.teardown(&provisioned.variants).await;
        }

        let output = result?;
        missing.extend(output.missing);
        warnings.extend(output.warnings);

        let variant_order = self.variant_order();
        let template_order = self.template_order();
        let pos = |list: &[String], id: &str| list.iter().position(|x| x == id).unwrap_or(usize::MAX);
        missing.sort_by_key(|m| {
            (
                pos(&template_order, &m.template_id),
                pos(&variant_order, &m.variant_id),
            )
        });

        tracing::info!(
            event = "layoutbench.harness.done",
            suite = %self.cfg.suite,
            records = output.records.len(),
            missing = missing.len(),
            "benchmark finished"
        );

        Ok(HarnessOutcome {
            suite: self.cfg.suite.clone(),
            baseline: self.baseline.clone(),
            variant_order,
            template_order,
            variants: provisioned.variants,
            records: output.records,
            missing,
            warnings,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
