use crate::aggregate::{aggregate, AggregationWarning, ComparisonRow, VariantRatio};
use crate::model::{MissingPair, RunRecord};
use serde::Serialize;
use std::str::FromStr;

pub mod console;
pub mod markdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "console" => Ok(ReportFormat::Text),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!(
                "unknown report format '{}' (expected text, markdown or json)",
                other
            )),
        }
    }
}

/// Everything a rendered report needs. Built once, rendered any number of times.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub suite: String,
    pub baseline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    pub variants: Vec<String>,
    pub sections: Vec<ComparisonRow>,
    pub warnings: Vec<AggregationWarning>,
    pub notes: Vec<String>,
    pub missing: Vec<MissingPair>,
}

fn rank(order: &[String], id: &str) -> usize {
    order.iter().position(|x| x == id).unwrap_or(usize::MAX)
}

impl Report {
    /// Records are put in (template order, variant order) before aggregation,
    /// so sections and rows come out the same regardless of how they arrived.
    pub fn build(
        suite: &str,
        baseline: &str,
        variant_order: &[String],
        template_order: &[String],
        records: &[RunRecord],
        missing: &[MissingPair],
        notes: &[String],
    ) -> Self {
        let key = |template: &str, variant: &str| {
            (
                rank(template_order, template),
                template.to_string(),
                rank(variant_order, variant),
                variant.to_string(),
            )
        };
        let mut sorted = records.to_vec();
        sorted.sort_by_cached_key(|r| key(&r.template_id, &r.variant_id));
        let mut missing = missing.to_vec();
        missing.sort_by_cached_key(|m| key(&m.template_id, &m.variant_id));

        let agg = aggregate(&sorted, baseline);
        Self {
            suite: suite.to_string(),
            baseline: baseline.to_string(),
            run_id: None,
            variants: variant_order.to_vec(),
            sections: agg.rows,
            warnings: agg.warnings,
            notes: notes.to_vec(),
            missing,
        }
    }

    pub fn with_run_id(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn render(&self, format: ReportFormat) -> anyhow::Result<String> {
        Ok(match format {
            ReportFormat::Text => console::render_report(self),
            ReportFormat::Markdown => markdown::render_report(self),
            ReportFormat::Json => {
                let mut s = serde_json::to_string_pretty(self)?;
                s.push('\n');
                s
            }
        })
    }

    /// Nothing missing and nothing to warn about.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.warnings.is_empty() && self.notes.is_empty()
    }
}

/// Plain-text sections for a set of comparison rows.
pub fn render(rows: &[ComparisonRow]) -> String {
    console::render_sections(rows)
}

/// The single highest-impact finding of a section: the widest cost gap,
/// or the widest duration gap when no cost ratio is available.
pub fn summary(row: &ComparisonRow) -> String {
    let widest = |pick: fn(&VariantRatio) -> Option<f64>| {
        let mut best: Option<(&str, f64)> = None;
        for r in &row.ratios {
            if let Some(v) = pick(r) {
                if best.map_or(true, |(_, b)| v.ln().abs() > b.ln().abs()) {
                    best = Some((&r.variant_id, v));
                }
            }
        }
        best
    };

    let (metric, variant, r, worse, better) =
        if let Some((variant, r)) = widest(|r| r.cost_ratio) {
            ("cost", variant, r, "costlier", "cheaper")
        } else if let Some((variant, r)) = widest(|r| r.duration_ratio) {
            ("duration", variant, r, "slower", "faster")
        } else {
            return "no comparison available".to_string();
        };

    if r < 1.0 {
        format!(
            "largest {} gap: {} is {:.2}x {} than {}",
            metric,
            variant,
            1.0 / r,
            worse,
            row.baseline_id
        )
    } else {
        format!(
            "largest {} gap: {} is {:.2}x {} than {}",
            metric, variant, r, better, row.baseline_id
        )
    }
}

pub(crate) fn fmt_opt(v: Option<f64>, precision: usize) -> String {
    v.map(|x| format!("{:.*}", precision, x))
        .unwrap_or_else(|| "n/a".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CostBreakdown, MissingStage};

    fn rec(variant: &str, template: &str, secs: f64, cpu: f64, io: f64) -> RunRecord {
        RunRecord {
            variant_id: variant.into(),
            template_id: template.into(),
            duration_secs: secs,
            cost: Some(CostBreakdown::new(cpu, io)),
            rows: 100,
            attempts: 1,
            plan: vec![],
        }
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> Report {
        let records = vec![
            rec("heap", "scan", 5.909, 30.06, 397.50),
            rec("clustered", "scan", 1.161, 1.10, 9.18),
            rec("columnstore", "scan", 0.8, 2.0, 3.0),
        ];
        let missing = vec![MissingPair {
            variant_id: "heap".into(),
            template_id: "point".into(),
            stage: MissingStage::Execution,
            reason: "heap/point failed after 3 attempt(s): timed out".into(),
        }];
        Report::build(
            "layouts",
            "clustered",
            &ids(&["clustered", "heap", "columnstore"]),
            &ids(&["scan", "point"]),
            &records,
            &missing,
            &[],
        )
    }

    #[test]
    fn test_build_orders_baseline_then_registration() {
        let r = sample();
        let order: Vec<_> = r.sections[0]
            .records
            .iter()
            .map(|x| x.variant_id.as_str())
            .collect();
        assert_eq!(order, vec!["clustered", "heap", "columnstore"]);
    }

    #[test]
    fn test_render_is_idempotent() {
        let r = sample();
        for f in [ReportFormat::Text, ReportFormat::Markdown, ReportFormat::Json] {
            assert_eq!(r.render(f).unwrap(), r.render(f).unwrap());
        }
        assert_eq!(render(&r.sections), render(&r.sections));
    }

    #[test]
    fn test_summary_names_largest_cost_gap() {
        let r = sample();
        assert_eq!(
            summary(&r.sections[0]),
            "largest cost gap: heap is 41.59x costlier than clustered"
        );
    }

    #[test]
    fn test_missing_pairs_are_listed() {
        let text = sample().render(ReportFormat::Text).unwrap();
        assert!(text.contains("heap / point"));
        assert!(text.contains("timed out"));
        assert!(!sample().is_clean());
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("MD".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
