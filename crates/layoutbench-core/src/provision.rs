//! Dataset Provisioner: one logical dataset, several physical copies.

use crate::dataset::{sales_columns, SalesGenerator, BATCH_ROWS};
use crate::db::Database;
use crate::errors::{ConfigError, HarnessError, ProvisionError};
use crate::model::{ColumnInfo, DatasetSpec, GenerateSpec, Strategy, Variant, VariantSpec};
use crate::naming::{validate_identifier, PhysicalName};
use std::collections::HashSet;
use std::sync::Arc;

/// Result of a provisioning pass. `failures` are variant-scoped only.
#[derive(Debug, Default)]
pub struct Provisioned {
    pub variants: Vec<Variant>,
    pub failures: Vec<ProvisionError>,
}

/// Validate every variant spec and derive physical names. Touches no database.
pub fn plan_variants(
    dataset: &DatasetSpec,
    specs: &[VariantSpec],
) -> Result<(PhysicalName, Vec<Variant>), ConfigError> {
    let source = PhysicalName::parse(&dataset.source)?;
    if let Some(gen) = &dataset.generate {
        if gen.rows == 0 {
            return Err(ConfigError("dataset.generate.rows must be > 0".into()));
        }
    }
    if specs.is_empty() {
        return Err(ConfigError("at least one variant is required".into()));
    }

    let mut seen = HashSet::new();
    let mut variants = Vec::with_capacity(specs.len());
    for spec in specs {
        validate_identifier("variant id", &spec.id)?;
        if spec.id.contains("__") {
            return Err(ConfigError(format!(
                "variant id '{}' must not contain '__'",
                spec.id
            )));
        }
        // SQLite folds identifier case, so `a` and `A` name the same table.
        if !seen.insert(spec.id.to_ascii_lowercase()) {
            return Err(ConfigError(format!("duplicate variant id '{}'", spec.id)));
        }
        let strategy = Strategy::from_spec(spec)?;
        let physical = PhysicalName::for_variant(&spec.id)?;
        if physical == source {
            return Err(ConfigError(format!(
                "variant '{}' would overwrite source table '{}'",
                spec.id, source
            )));
        }
        variants.push(Variant {
            id: spec.id.clone(),
            strategy,
            source: source.clone(),
            physical,
        });
    }
    Ok((source, variants))
}

fn names(columns: &[ColumnInfo]) -> Vec<String> {
    columns.iter().map(|c| c.name.clone()).collect()
}

pub struct Provisioner {
    db: Arc<dyn Database>,
}

impl Provisioner {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Config errors and fatal source errors are returned; a variant that
    /// cannot be built lands in [`Provisioned::failures`] and the rest proceed.
    pub async fn provision(
        &self,
        dataset: &DatasetSpec,
        specs: &[VariantSpec],
    ) -> Result<Provisioned, HarnessError> {
        let (source, planned) = plan_variants(dataset, specs)?;

        if let Some(gen) = &dataset.generate {
            self.generate(&source, gen).await?;
        }
        let columns = self.check_source(&source).await?;

        let mut out = Provisioned::default();
        for variant in planned {
            match self.materialize(&variant, &columns).await {
                Ok(()) => {
                    tracing::info!(
                        event = "layoutbench.provision.variant",
                        variant = %variant.id,
                        strategy = %variant.strategy.tag(),
                        table = %variant.physical,
                        "variant ready"
                    );
                    out.variants.push(variant);
                }
                Err(e) => {
                    tracing::warn!(
                        event = "layoutbench.provision.failed",
                        variant = %variant.id,
                        strategy = %variant.strategy.tag(),
                        error = %e,
                        "variant skipped"
                    );
                    out.failures.push(e);
                }
            }
        }
        Ok(out)
    }

    async fn generate(&self, source: &PhysicalName, gen: &GenerateSpec) -> Result<(), ProvisionError> {
        let unavailable = |reason: String| ProvisionError::SourceUnavailable {
            table: source.to_string(),
            reason,
        };
        let columns = sales_columns();
        self.db
            .create_table(source, &columns)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let mut generator = SalesGenerator::new(gen.seed, gen.rows);
        while generator.remaining() > 0 {
            let batch = generator.next_batch(BATCH_ROWS);
            self.db
                .insert_rows(source, &columns, batch)
                .await
                .map_err(|e| unavailable(e.to_string()))?;
        }
        tracing::info!(
            event = "layoutbench.provision.generated",
            table = %source,
            rows = gen.rows,
            seed = gen.seed,
            "source dataset generated"
        );
        Ok(())
    }

    async fn check_source(&self, source: &PhysicalName) -> Result<Vec<ColumnInfo>, ProvisionError> {
        let columns = self
            .db
            .columns(source)
            .await
            .map_err(|e| ProvisionError::SourceUnavailable {
                table: source.to_string(),
                reason: e.to_string(),
            })?;
        if columns.is_empty() {
            return Err(ProvisionError::SourceUnavailable {
                table: source.to_string(),
                reason: "table does not exist".into(),
            });
        }
        let rows = self
            .db
            .row_count(source)
            .await
            .map_err(|e| ProvisionError::SourceUnavailable {
                table: source.to_string(),
                reason: e.to_string(),
            })?;
        if rows == 0 {
            return Err(ProvisionError::EmptySource {
                table: source.to_string(),
            });
        }
        Ok(columns)
    }

    async fn materialize(&self, variant: &Variant, expected: &[ColumnInfo]) -> Result<(), ProvisionError> {
        self.db
            .materialize(&variant.source, &variant.physical, &variant.strategy)
            .await
            .map_err(|e| ProvisionError::Materialize {
                variant: variant.id.clone(),
                strategy: variant.strategy.tag(),
                reason: e.to_string(),
            })?;

        let found = self
            .db
            .columns(&variant.physical)
            .await
            .map_err(|e| ProvisionError::Materialize {
                variant: variant.id.clone(),
                strategy: variant.strategy.tag(),
                reason: e.to_string(),
            })?;
        let (expected, found) = (names(expected), names(&found));
        if expected != found {
            let _ = self.db.drop_variant(&variant.physical).await;
            return Err(ProvisionError::SchemaMismatch {
                variant: variant.id.clone(),
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Drops every variant's objects. Returns how many were dropped cleanly.
    pub async fn teardown(&self, variants: &[Variant]) -> usize {
        let mut dropped = 0;
        for v in variants {
            match self.db.drop_variant(&v.physical).await {
                Ok(()) => dropped += 1,
                Err(e) => tracing::warn!(
                    event = "layoutbench.teardown.failed",
                    variant = %v.id,
                    error = %e,
                    "could not drop variant"
                ),
            }
        }
        tracing::debug!(event = "layoutbench.teardown", dropped, "teardown complete");
        dropped
    }
}
