//! Metrics Aggregator.
//!
//! Ratios are baseline / variant: a value above 1 means the compared variant
//! is faster (or cheaper) than the baseline. The reciprocal, how many times
//! slower or costlier the variant is, is exposed for presentation.

use crate::model::RunRecord;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationWarning {
    pub template_id: String,
    pub message: String,
}

impl fmt::Display for AggregationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.template_id, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantRatio {
    pub variant_id: String,
    /// baseline duration / variant duration.
    pub duration_ratio: Option<f64>,
    /// baseline total cost / variant total cost.
    pub cost_ratio: Option<f64>,
}

fn reciprocal(r: Option<f64>) -> Option<f64> {
    r.filter(|r| *r > 0.0).map(|r| 1.0 / r)
}

impl VariantRatio {
    /// How many times slower than the baseline.
    pub fn slowdown(&self) -> Option<f64> {
        reciprocal(self.duration_ratio)
    }

    /// How many times costlier than the baseline.
    pub fn cost_increase(&self) -> Option<f64> {
        reciprocal(self.cost_ratio)
    }
}

/// All records for one template, baseline first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub template_id: String,
    pub baseline_id: String,
    pub records: Vec<RunRecord>,
    pub ratios: Vec<VariantRatio>,
}

impl ComparisonRow {
    pub fn record(&self, variant_id: &str) -> Option<&RunRecord> {
        self.records.iter().find(|r| r.variant_id == variant_id)
    }

    pub fn ratio(&self, variant_id: &str) -> Option<&VariantRatio> {
        self.ratios.iter().find(|r| r.variant_id == variant_id)
    }

    pub fn baseline(&self) -> Option<&RunRecord> {
        self.record(&self.baseline_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregation {
    pub rows: Vec<ComparisonRow>,
    pub warnings: Vec<AggregationWarning>,
}

fn ratio(baseline: f64, variant: f64) -> Option<f64> {
    if baseline > 0.0 && variant > 0.0 && baseline.is_finite() && variant.is_finite() {
        Some(baseline / variant)
    } else {
        None
    }
}

pub fn compare(baseline: &RunRecord, other: &RunRecord) -> VariantRatio {
    VariantRatio {
        variant_id: other.variant_id.clone(),
        duration_ratio: ratio(baseline.duration_secs, other.duration_secs),
        cost_ratio: match (baseline.total_cost(), other.total_cost()) {
            (Some(b), Some(v)) => ratio(b, v),
            _ => None,
        },
    }
}

/// Groups `records` by template (first-appearance order) and derives ratios
/// against `baseline_id`. A group without a baseline record is skipped with a
/// warning.
pub fn aggregate(records: &[RunRecord], baseline_id: &str) -> Aggregation {
    let mut groups: Vec<(String, Vec<RunRecord>)> = Vec::new();
    let mut warnings = Vec::new();

    for r in records {
        let idx = match groups.iter().position(|(t, _)| *t == r.template_id) {
            Some(i) => i,
            None => {
                groups.push((r.template_id.clone(), Vec::new()));
                groups.len() - 1
            }
        };
        let group = &mut groups[idx].1;
        if group.iter().any(|x| x.variant_id == r.variant_id) {
            warnings.push(AggregationWarning {
                template_id: r.template_id.clone(),
                message: format!("duplicate record for variant '{}' ignored", r.variant_id),
            });
            continue;
        }
        group.push(r.clone());
    }

    let mut rows = Vec::with_capacity(groups.len());
    for (template_id, mut group) in groups {
        let Some(bpos) = group.iter().position(|r| r.variant_id == baseline_id) else {
            warnings.push(AggregationWarning {
                template_id,
                message: format!("baseline '{}' has no record; ratios skipped", baseline_id),
            });
            continue;
        };
        let baseline = group.remove(bpos);
        let ratios = group.iter().map(|r| compare(&baseline, r)).collect();
        group.insert(0, baseline);
        rows.push(ComparisonRow {
            template_id,
            baseline_id: baseline_id.to_string(),
            records: group,
            ratios,
        });
    }

    Aggregation { rows, warnings }
}
