use super::args::*;
use layoutbench_core::config::{apply_env_overrides, load_config};
use layoutbench_core::db::sqlite::SqliteDatabase;
use layoutbench_core::db::Database;
use layoutbench_core::engine::Harness;
use layoutbench_core::errors::HarnessError;
use layoutbench_core::fingerprint;
use layoutbench_core::report::{Report, ReportFormat};
use layoutbench_core::storage::Store;
use std::path::Path;
use std::sync::Arc;

pub mod report;
pub mod validate;

pub mod exit_codes {
    pub const OK: i32 = 0;
    /// Run finished but some (variant, template) pairs have no result,
    /// or warnings were raised under --strict.
    pub const BENCH_INCOMPLETE: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => cmd_init(args).await,
        Command::Run(args) => cmd_run(args).await,
        Command::Report(args) => report::run(args).await,
        Command::Validate(args) => validate::run(args).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

async fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    write_sample_config_if_missing(&args.config)?;
    Ok(exit_codes::OK)
}

fn write_sample_config_if_missing(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        ensure_parent_dir(path)?;
        layoutbench_core::config::write_sample_config(path)?;
        eprintln!("created {}", path.display());
    } else {
        eprintln!("note: {} already exists", path.display());
    }
    Ok(())
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<i32> {
    let format = match args.format.parse::<ReportFormat>() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let mut cfg = match load_config(&args.config, args.strict) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    if let Err(e) = apply_env_overrides(&mut cfg) {
        eprintln!("config error: {}", e);
        return Ok(exit_codes::CONFIG_ERROR);
    }
    if let Some(b) = &args.baseline {
        cfg.baseline = Some(b.clone());
    }
    if let Some(p) = args.parallel {
        cfg.settings.parallel = Some(p);
    }

    if let Err(e) = layoutbench_core::config::validate(&cfg) {
        eprintln!("config error: {}", e);
        return Ok(exit_codes::CONFIG_ERROR);
    }

    let pool_size = cfg.settings.parallel.unwrap_or(1).max(1);
    let db = SqliteDatabase::open(&cfg.database.path, pool_size)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", cfg.database.path, e))?;
    let db: Arc<dyn Database> = Arc::new(db);

    let harness = match Harness::new(cfg.clone(), db.clone()) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let baseline = cfg.baseline_id()?.to_string();

    let store = if args.no_store {
        None
    } else {
        ensure_parent_dir(&args.db)?;
        let store = Store::open(&args.db)?;
        store.init_schema()?;
        let fp = fingerprint::compute(&cfg, harness.catalog());
        let run_id = store.create_run(&cfg, &baseline, db.backend_name(), &fp.hex)?;
        store.record_layout(run_id, &cfg.variants, &harness.template_order())?;
        Some((store, run_id))
    };

    let outcome = match harness.run().await {
        Ok(o) => o,
        Err(e) => {
            if let Some((store, run_id)) = &store {
                store.finalize_run(*run_id, "failed", &[e.to_string()])?;
            }
            return match e {
                HarnessError::Config(e) => {
                    eprintln!("config error: {}", e);
                    Ok(exit_codes::CONFIG_ERROR)
                }
                HarnessError::Provision(e) => {
                    eprintln!("error: {}", e);
                    Ok(exit_codes::BENCH_INCOMPLETE)
                }
                HarnessError::Other(e) => Err(e),
            };
        }
    };

    let mut report = Report::build(
        &outcome.suite,
        &outcome.baseline,
        &outcome.variant_order,
        &outcome.template_order,
        &outcome.records,
        &outcome.missing,
        &outcome.warnings,
    );

    if let Some((store, run_id)) = &store {
        store.save_outcome(*run_id, &outcome)?;
        let status = if outcome.missing.is_empty() {
            "complete"
        } else {
            "partial"
        };
        store.finalize_run(*run_id, status, &outcome.warnings)?;
        report = report.with_run_id(*run_id);
        tracing::info!(
            event = "layoutbench.store.recorded",
            run_id = *run_id,
            status,
            db = %args.db.display(),
            "run recorded"
        );
    }

    write_output(args.out.as_deref(), &report.render(format)?)?;
    Ok(decide_exit_code(&report, args.strict))
}

pub(crate) fn decide_exit_code(report: &Report, strict: bool) -> i32 {
    if !report.missing.is_empty() {
        return exit_codes::BENCH_INCOMPLETE;
    }
    if strict && !report.is_clean() {
        return exit_codes::BENCH_INCOMPLETE;
    }
    exit_codes::OK
}

pub(crate) fn write_output(out: Option<&Path>, content: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            ensure_parent_dir(path)?;
            std::fs::write(path, content)?;
            eprintln!("wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
