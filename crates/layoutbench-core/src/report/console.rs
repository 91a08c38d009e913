use super::{fmt_opt, summary, Report};
use crate::aggregate::ComparisonRow;

fn section(out: &mut String, row: &ComparisonRow) {
    out.push_str(&format!("\n== {} ==\n", row.template_id));
    out.push_str(&format!(
        "  {:<16} {:>10} {:>10} {:>10} {:>10} {:>9} {:>8} {:>8}\n",
        "variant", "time (s)", "cpu", "io", "total", "rows", "x time", "x cost"
    ));
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
            format!("{}*", r.variant_id)
        } else {
            r.variant_id.clone()
        };
        out.push_str(&format!(
            "  {:<16} {:>10.3} {:>10} {:>10} {:>10} {:>9} {:>8} {:>8}\n",
            name,
            r.duration_secs,
            fmt_opt(r.cost.map(|c| c.cpu_cost), 2),
            fmt_opt(r.cost.map(|c| c.io_cost), 2),
            fmt_opt(r.cost.map(|c| c.total_cost), 2),
            r.rows,
            fmt_opt(dr, 2),
            fmt_opt(cr, 2),
        ));
        if r.attempts > 1 {
            out.push_str(&format!("      ({} attempts)\n", r.attempts));
        }
        for line in &r.plan {
            out.push_str(&format!("      plan: {}\n", line));
        }
    }
    out.push_str(&format!("  -> {}\n", summary(row)));
}

pub fn render_sections(rows: &[ComparisonRow]) -> String {
    let mut out = String::new();
    for row in rows {
        section(&mut out, row);
    }
    out
}

pub fn render_report(report: &Report) -> String {
    let mut out = format!(
        "Suite: {}  (baseline: {}, ratios are baseline/variant; * marks the baseline)\n",
        report.suite, report.baseline
    );
    if let Some(id) = report.run_id {
        out.push_str(&format!("Run: #{}\n", id));
    }
    out.push_str(&render_sections(&report.sections));

    if !report.warnings.is_empty() || !report.notes.is_empty() {
        out.push_str("\nWarnings:\n");
        for w in &report.warnings {
            out.push_str(&format!("  - {}\n", w));
        }
        for n in &report.notes {
            out.push_str(&format!("  - {}\n", n));
        }
    }

    if !report.missing.is_empty() {
        out.push_str(&format!("\nMissing results ({}):\n", report.missing.len()));
        for m in &report.missing {
            out.push_str(&format!(
                "  - {} / {} [{}]: {}\n",
                m.variant_id,
                m.template_id,
                m.stage.as_str(),
                m.reason
            ));
        }
    }
    out
}
