use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "layoutbench",
    version,
    about = "Compare heap, clustered and columnstore table layouts on one dataset"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,

    /// log filter, tracing EnvFilter syntax (e.g. info, layoutbench_core=debug)
    #[arg(long, global = true, env = "LAYOUTBENCH_LOG", default_value = "warn")]
    pub log_level: String,

    /// emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Provision variants, run the query catalog and print the report
    Run(RunArgs),
    /// Re-render a stored run, optionally against another baseline
    Report(ReportArgs),
    /// Check a config without touching the database
    Validate(ValidateArgs),
    /// Write a sample config
    Init(InitArgs),
    Version,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "layoutbench.yaml")]
    pub config: PathBuf,

    /// results database (run log)
    #[arg(long, default_value = ".layoutbench/results.db")]
    pub db: PathBuf,

    /// do not record the run in the results database
    #[arg(long)]
    pub no_store: bool,

    /// text|markdown|json
    #[arg(long, default_value = "text")]
    pub format: String,

    /// write the report here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// override the configured baseline variant
    #[arg(long)]
    pub baseline: Option<String>,

    /// run this many variants concurrently (default: sequential)
    #[arg(long)]
    pub parallel: Option<usize>,

    /// unknown config fields are errors; warnings fail the run (exit 1)
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Clone)]
pub struct ReportArgs {
    #[arg(long, default_value = ".layoutbench/results.db")]
    pub db: PathBuf,

    /// run to render (default: latest)
    #[arg(long)]
    pub run_id: Option<i64>,

    /// pick the latest run of this suite
    #[arg(long)]
    pub suite: Option<String>,

    /// compare against this variant instead of the recorded baseline
    #[arg(long)]
    pub baseline: Option<String>,

    #[arg(long, default_value = "text")]
    pub format: String,

    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Clone)]
pub struct ValidateArgs {
    #[arg(long, default_value = "layoutbench.yaml")]
    pub config: PathBuf,

    #[arg(long)]
    pub strict: bool,

    /// text|json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "layoutbench.yaml")]
    pub config: PathBuf,
}
