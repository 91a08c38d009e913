use super::exit_codes;
use crate::cli::args::ValidateArgs;
use layoutbench_core::config::{apply_env_overrides, load_config, validate};
use layoutbench_core::model::BenchConfig;
use serde_json::json;

pub async fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let checked = load_config(&args.config, args.strict).and_then(|mut cfg| {
        apply_env_overrides(&mut cfg)?;
        let catalog = validate(&cfg)?;
        Ok((cfg, catalog.ids()))
    });

    match checked {
        Ok((cfg, templates)) => {
            print_ok(&cfg, &templates, &args.format);
            Ok(exit_codes::OK)
        }
        Err(e) => {
            if args.format == "json" {
                let out = json!({
                    "ok": false,
                    "file": args.config,
                    "errors": [e.to_string()],
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                eprintln!("config error: {}", e);
            }
            Ok(exit_codes::CONFIG_ERROR)
        }
    }
}

fn print_ok(cfg: &BenchConfig, templates: &[String], format: &str) {
    let baseline = cfg.baseline.as_deref().unwrap_or_default();
    if format == "json" {
        let out = json!({
            "ok": true,
            "suite": cfg.suite,
            "baseline": baseline,
            "variants": cfg.variant_ids(),
            "templates": templates,
            "errors": [],
        });
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
    } else {
        println!(
            "ok: suite '{}', {} variants (baseline '{}'), {} queries",
            cfg.suite,
            cfg.variants.len(),
            baseline,
            templates.len()
        );
    }
}
