use super::{fmt_opt, summary, Report};

fn escape(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

pub fn render_report(report: &Report) -> String {
    let mut out = format!("# layoutbench: {}\n\n", escape(&report.suite));
    out.push_str(&format!("Baseline: `{}`", report.baseline));
    if let Some(id) = report.run_id {
        out.push_str(&format!(" · run #{}", id));
    }
    out.push_str("\n\nRatios are baseline / variant: below 1.00 the variant is slower or costlier.\n");

    for row in &report.sections {
        out.push_str(&format!("\n## {}\n\n", row.template_id));
        out.push_str("| variant | time (s) | cpu | io | total cost | rows | time ratio | cost ratio |\n");
        out.push_str("|---|---:|---:|---:|---:|---:|---:|---:|\n");
        for r in &row.records {
            let is_baseline = r.variant_id == row.baseline_id;
            let (dr, cr) = if is_baseline {
                (Some(1.0), r.cost.map(|_| 1.0))
            } else {
                row.ratio(&r.variant_id)
                    .map(|x| (x.duration_ratio, x.cost_ratio))
                    .unwrap_or((None, None))
            };
            let name = if is_baseline {
                format!("**{}**", r.variant_id)
            } else {
                r.variant_id.clone()
            };
            out.push_str(&format!(
                "| {} | {:.3} | {} | {} | {} | {} | {} | {} |\n",
                name,
                r.duration_secs,
                fmt_opt(r.cost.map(|c| c.cpu_cost), 2),
                fmt_opt(r.cost.map(|c| c.io_cost), 2),
                fmt_opt(r.cost.map(|c| c.total_cost), 2),
                r.rows,
                fmt_opt(dr, 2),
                fmt_opt(cr, 2),
            ));
        }
        out.push_str(&format!("\n> {}\n", summary(row)));
    }

    if !report.warnings.is_empty() || !report.notes.is_empty() {
        out.push_str("\n## Warnings\n\n");
        for w in &report.warnings {
            out.push_str(&format!("- {}\n", escape(&w.to_string())));
        }
        for n in &report.notes {
            out.push_str(&format!("- {}\n", escape(n)));
        }
    }

    if !report.missing.is_empty() {
        out.push_str("\n## Missing results\n\n");
        out.push_str("| variant | template | stage | reason |\n|---|---|---|---|\n");
        for m in &report.missing {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                m.variant_id,
                m.template_id,
                m.stage.as_str(),
                escape(&m.reason)
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::report::{Report, ReportFormat};

    #[test]
    fn test_empty_report_has_header_only() {
        let r = Report::build("s", "b", &["b".to_string()], &[], &[], &[], &[]);
        let md = r.render(ReportFormat::Markdown).unwrap();
        assert!(md.starts_with("# layoutbench: s"));
        assert!(!md.contains("## Missing"));
    }
}
