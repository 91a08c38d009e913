use super::{decide_exit_code, exit_codes, write_output};
use crate::cli::args::ReportArgs;
use layoutbench_core::report::{Report, ReportFormat};
use layoutbench_core::storage::Store;

/// Rebuilds the report of a recorded run. With `--baseline` the stored records
/// are re-aggregated against another variant; nothing is re-executed.
pub async fn run(args: ReportArgs) -> anyhow::Result<i32> {
    let format = match args.format.parse::<ReportFormat>() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    if !args.db.exists() {
        eprintln!("error: no results database at {}", args.db.display());
        return Ok(exit_codes::CONFIG_ERROR);
    }

    let store = Store::open(&args.db)?;
    store.init_schema()?;

    let run_id = match args.run_id {
        Some(id) => id,
        None => match store.latest_run_id(args.suite.as_deref())? {
            Some(id) => id,
            None => {
                eprintln!("error: no runs recorded in {}", args.db.display());
                return Ok(exit_codes::CONFIG_ERROR);
            }
        },
    };
    let stored = store.load_run(run_id)?;

    let baseline = args.baseline.unwrap_or_else(|| stored.baseline.clone());
    if !stored.variants.contains(&baseline) {
        eprintln!(
            "config error: baseline '{}' is not a variant of run {} (have: {})",
            baseline,
            run_id,
            stored.variants.join(", ")
        );
        return Ok(exit_codes::CONFIG_ERROR);
    }

    tracing::debug!(
        event = "layoutbench.report.replay",
        run_id,
        suite = %stored.suite,
        baseline = %baseline,
        records = stored.records.len(),
        "rebuilding report"
    );

    let report = Report::build(
        &stored.suite,
        &baseline,
        &stored.variants,
        &stored.templates,
        &stored.records,
        &stored.missing,
        &stored.notes,
    )
    .with_run_id(run_id);

    write_output(args.out.as_deref(), &report.render(format)?)?;
    Ok(decide_exit_code(&report, false))
}
