use crate::engine::harness::HarnessOutcome;
use crate::model::{BenchConfig, CostBreakdown, MissingPair, MissingStage, RunRecord, VariantSpec};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

/// A previous run, enough to rebuild its report.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRun {
    pub id: i64,
    pub suite: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub baseline: String,
    pub backend: String,
    pub config_fingerprint: String,
    pub variants: Vec<String>,
    pub templates: Vec<String>,
    pub records: Vec<RunRecord>,
    pub missing: Vec<MissingPair>,
    pub notes: Vec<String>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open results db {}", path.display()))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory results db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("results db mutex poisoned"))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        self.conn()?.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    pub fn create_run(
        &self,
        cfg: &BenchConfig,
        baseline: &str,
        backend: &str,
        fingerprint: &str,
    ) -> anyhow::Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs(suite, started_at, status, baseline, backend, config_fingerprint, config_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                cfg.suite,
                chrono::Utc::now().to_rfc3339(),
                "running",
                baseline,
                backend,
                fingerprint,
                serde_json::to_string(cfg)?
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Registration order of variants and templates, so reports can be
    /// rebuilt in the same order later.
    pub fn record_layout(
        &self,
        run_id: i64,
        variants: &[VariantSpec],
        templates: &[String],
    ) -> anyhow::Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (i, v) in variants.iter().enumerate() {
            tx.execute(
                "INSERT INTO run_variants(run_id, position, variant_id, strategy) VALUES (?1, ?2, ?3, ?4)",
                params![run_id, i as i64, v.id, v.strategy.trim().to_ascii_lowercase()],
            )?;
        }
        for (i, t) in templates.iter().enumerate() {
            tx.execute(
                "INSERT INTO run_templates(run_id, position, template_id) VALUES (?1, ?2, ?3)",
                params![run_id, i as i64, t],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Stores every record and missing pair of `outcome`, and the harness's
    /// own start and finish times, in one transaction.
    pub fn save_outcome(&self, run_id: i64, outcome: &HarnessOutcome) -> anyhow::Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE runs SET started_at=?1, finished_at=?2 WHERE id=?3",
            params![
                outcome.started_at.to_rfc3339(),
                outcome.finished_at.to_rfc3339(),
                run_id
            ],
        )?;
        for r in &outcome.records {
            insert_record(&tx, run_id, r)?;
        }
        for m in &outcome.missing {
            insert_missing(&tx, run_id, m)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Sets the final status. `finished_at` keeps the harness's time when
    /// `save_outcome` already stored one.
    pub fn finalize_run(&self, run_id: i64, status: &str, notes: &[String]) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET status=?1, finished_at=COALESCE(finished_at, ?2), notes_json=?3 WHERE id=?4",
            params![
                status,
                chrono::Utc::now().to_rfc3339(),
                serde_json::to_string(notes)?,
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn latest_run_id(&self, suite: Option<&str>) -> anyhow::Result<Option<i64>> {
        let conn = self.conn()?;
        let id = match suite {
            Some(s) => conn
                .query_row(
                    "SELECT id FROM runs WHERE suite = ?1 ORDER BY id DESC LIMIT 1",
                    params![s],
                    |row| row.get(0),
                )
                .optional()?,
            None => conn
                .query_row("SELECT id FROM runs ORDER BY id DESC LIMIT 1", [], |row| {
                    row.get(0)
                })
                .optional()?,
        };
        Ok(id)
    }

    pub fn load_run(&self, run_id: i64) -> anyhow::Result<StoredRun> {
        let conn = self.conn()?;
        let (suite, started_at, finished_at, status, baseline, backend, config_fingerprint, notes_json) = conn
            .query_row(
                "SELECT suite, started_at, finished_at, status, baseline, backend, config_fingerprint, notes_json
                 FROM runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?
            .with_context(|| format!("run #{} not found", run_id))?;

        let variants = ids(
            &conn,
            "SELECT variant_id FROM run_variants WHERE run_id = ?1 ORDER BY position",
            run_id,
        )?;
        let templates = ids(
            &conn,
            "SELECT template_id FROM run_templates WHERE run_id = ?1 ORDER BY position",
            run_id,
        )?;

        let mut stmt = conn.prepare(
            "SELECT variant_id, template_id, duration_secs, cpu_cost, io_cost, total_cost, row_count, attempts, plan_json
             FROM records WHERE run_id = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![run_id], |row| {
                let cpu: Option<f64> = row.get(3)?;
                let io: Option<f64> = row.get(4)?;
                let total: Option<f64> = row.get(5)?;
                let plan: Option<String> = row.get(8)?;
                Ok(RunRecord {
                    variant_id: row.get(0)?,
                    template_id: row.get(1)?,
                    duration_secs: row.get(2)?,
                    cost: match (cpu, io, total) {
                        (Some(cpu_cost), Some(io_cost), Some(total_cost)) => Some(CostBreakdown {
                            cpu_cost,
                            io_cost,
                            total_cost,
                        }),
                        _ => None,
                    },
                    rows: row.get::<_, i64>(6)?.max(0) as u64,
                    attempts: row.get::<_, i64>(7)?.max(0) as u32,
                    plan: plan
                        .and_then(|p| serde_json::from_str(&p).ok())
                        .unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT variant_id, template_id, stage, reason FROM missing WHERE run_id = ?1 ORDER BY id",
        )?;
        let missing = stmt
            .query_map(params![run_id], |row| {
                Ok(MissingPair {
                    variant_id: row.get(0)?,
                    template_id: row.get(1)?,
                    stage: MissingStage::parse(&row.get::<_, String>(2)?),
                    reason: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoredRun {
            id: run_id,
            suite,
            started_at,
            finished_at,
            status,
            baseline,
            backend,
            config_fingerprint,
            variants,
            templates,
            records,
            missing,
            notes: notes_json
                .and_then(|n| serde_json::from_str(&n).ok())
                .unwrap_or_default(),
        })
    }
}

fn ids(conn: &Connection, sql: &str, run_id: i64) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let out = stmt
        .query_map(params![run_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(out)
}

fn insert_record(conn: &Connection, run_id: i64, r: &RunRecord) -> anyhow::Result<()> {
    let plan = if r.plan.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&r.plan)?)
    };
    conn.execute(
        "INSERT INTO records(run_id, variant_id, template_id, duration_secs, cpu_cost, io_cost, total_cost, row_count, attempts, plan_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            run_id,
            r.variant_id,
            r.template_id,
            r.duration_secs,
            r.cost.map(|c| c.cpu_cost),
            r.cost.map(|c| c.io_cost),
            r.cost.map(|c| c.total_cost),
            r.rows as i64,
            r.attempts as i64,
            plan
        ],
    )?;
    Ok(())
}

fn insert_missing(conn: &Connection, run_id: i64, m: &MissingPair) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO missing(run_id, variant_id, template_id, stage, reason) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![run_id, m.variant_id, m.template_id, m.stage.as_str(), m.reason],
    )?;
    Ok(())
}
