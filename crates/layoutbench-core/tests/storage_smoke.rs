use layoutbench_core::catalog::QueryCatalog;
use layoutbench_core::db::fake::FakeDatabase;
use layoutbench_core::engine::{Harness, HarnessOutcome};
use layoutbench_core::fingerprint;
use layoutbench_core::model::{
    BenchConfig, ColumnInfo, CostBreakdown, DatabaseConfig, DatasetSpec, RunRecord, Settings,
    VariantSpec,
};
use layoutbench_core::report::{Report, ReportFormat};
use layoutbench_core::storage::Store;
use std::sync::Arc;
use tempfile::tempdir;

fn config() -> BenchConfig {
    BenchConfig {
        version: 1,
        suite: "smoke".into(),
        database: DatabaseConfig::default(),
        dataset: DatasetSpec {
            source: "sales".into(),
            generate: None,
        },
        variants: vec![
            VariantSpec {
                id: "clustered".into(),
                strategy: "clustered".into(),
                keys: vec!["sale_id".into()],
                ..Default::default()
            },
            VariantSpec {
                id: "heap".into(),
                strategy: "heap".into(),
                ..Default::default()
            },
        ],
        baseline: Some("clustered".into()),
        settings: Settings::default(),
        queries: vec![],
    }
}

#[tokio::test]
async fn test_store_roundtrip_and_rebaseline() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = Store::open(&dir.path().join("results.db"))?;
    store.init_schema()?;

    let cfg = config();
    let db = Arc::new(
        FakeDatabase::new()
            .table("sales", vec![ColumnInfo::new("sale_id", "INTEGER")], 50)
            .cost("\"lb_heap\"", CostBreakdown::new(30.06, 397.50))
            .cost("\"lb_clustered\"", CostBreakdown::new(1.10, 9.18)),
    );
    let harness = Harness::new(cfg.clone(), db)?;
    let fp = fingerprint::compute(&cfg, &QueryCatalog::standard());

    let run_id = store.create_run(&cfg, "clustered", "fake", &fp.hex)?;
    store.record_layout(run_id, &cfg.variants, &harness.template_order())?;
    let outcome = harness.run().await?;
    store.save_outcome(run_id, &outcome)?;
    store.finalize_run(run_id, "complete", &outcome.warnings)?;

    assert_eq!(store.latest_run_id(Some("smoke"))?, Some(run_id));
    assert_eq!(store.latest_run_id(Some("other"))?, None);

    let stored = store.load_run(run_id)?;
    assert_eq!(stored.status, "complete");
    assert_eq!(stored.variants, vec!["clustered", "heap"]);
    assert_eq!(stored.templates, harness.template_order());
    assert_eq!(stored.records, outcome.records);
    assert_eq!(stored.config_fingerprint, fp.hex);
    assert_eq!(stored.started_at, outcome.started_at.to_rfc3339());
    assert_eq!(stored.finished_at, Some(outcome.finished_at.to_rfc3339()));

    let live = Report::build(
        &outcome.suite,
        &outcome.baseline,
        &outcome.variant_order,
        &outcome.template_order,
        &outcome.records,
        &outcome.missing,
        &outcome.warnings,
    );
    let replayed = Report::build(
        &stored.suite,
        &stored.baseline,
        &stored.variants,
        &stored.templates,
        &stored.records,
        &stored.missing,
        &stored.notes,
    );
    assert_eq!(
        live.render(ReportFormat::Json)?,
        replayed.render(ReportFormat::Json)?
    );

    // Re-baselining flips every ratio.
    let flipped = Report::build(
        &stored.suite,
        "heap",
        &stored.variants,
        &stored.templates,
        &stored.records,
        &stored.missing,
        &stored.notes,
    );
    let a = live.sections[0].ratio("heap").unwrap().cost_ratio.unwrap();
    let b = flipped.sections[0].ratio("clustered").unwrap().cost_ratio.unwrap();
    assert!((a * b - 1.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn test_missing_run_is_an_error() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    assert!(store.load_run(42).is_err());
    assert_eq!(store.latest_run_id(None)?, None);
    Ok(())
}

#[test]
fn test_reported_total_cost_survives_replay() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let cfg = config();
    let run_id = store.create_run(&cfg, "clustered", "fake", "fp")?;

    // Total is not cpu + io for this backend.
    let record = RunRecord {
        variant_id: "heap".into(),
        template_id: "full_scan".into(),
        duration_secs: 0.5,
        cost: Some(CostBreakdown {
            cpu_cost: 1.0,
            io_cost: 2.0,
            total_cost: 10.0,
        }),
        rows: 3,
        attempts: 1,
        plan: vec![],
    };
    let now = chrono::Utc::now();
    let outcome = HarnessOutcome {
        suite: cfg.suite.clone(),
        baseline: "clustered".into(),
        variant_order: cfg.variant_ids(),
        template_order: vec!["full_scan".into()],
        variants: vec![],
        records: vec![record.clone()],
        missing: vec![],
        warnings: vec![],
        started_at: now,
        finished_at: now,
    };
    store.save_outcome(run_id, &outcome)?;
    store.finalize_run(run_id, "complete", &[])?;

    let stored = store.load_run(run_id)?;
    assert_eq!(stored.records, vec![record]);
    Ok(())
}
