//! Error taxonomy for the harness.
//!
//! Only [`ConfigError`] is fatal for a whole run. Provisioning failures abort a
//! single variant (except when the source itself is unusable) and execution
//! failures abort a single (variant, template) pair.

use crate::model::StrategyTag;

/// Malformed configuration: unknown strategy, missing baseline, bad template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    #[error("source table '{table}' is unavailable: {reason}")]
    SourceUnavailable { table: String, reason: String },

    #[error("source table '{table}' is empty")]
    EmptySource { table: String },

    #[error("variant '{variant}' ({strategy}) could not be materialized: {reason}")]
    Materialize {
        variant: String,
        strategy: StrategyTag,
        reason: String,
    },

    #[error("variant '{variant}' exposes columns {found:?}, source has {expected:?}")]
    SchemaMismatch {
        variant: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
}

impl ProvisionError {
    /// Source-level failures leave nothing to benchmark.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProvisionError::SourceUnavailable { .. } | ProvisionError::EmptySource { .. }
        )
    }

    /// Variant the failure belongs to, if it is variant-scoped.
    pub fn variant(&self) -> Option<&str> {
        match self {
            ProvisionError::Materialize { variant, .. }
            | ProvisionError::SchemaMismatch { variant, .. } => Some(variant),
            _ => None,
        }
    }
}

/// A single query gave up: retries exhausted or a permanent query failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{variant}/{template} failed after {attempts} attempt(s): {reason}")]
pub struct ExecutionError {
    pub variant: String,
    pub template: String,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
