use crate::catalog::{QueryCatalog, QueryTemplate};
use crate::db::{Database, DbError, ExecutionHandle, QueryOutput};
use crate::errors::ExecutionError;
use crate::model::{MissingPair, MissingStage, RunRecord, Settings, Variant};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};
use tokio::time::{sleep_until, timeout, Duration, Instant};

/// How long a cancelled execution gets to wind down before it is abandoned.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// 1 = strictly sequential. Higher values run that many variants at once.
    pub parallel: usize,
    pub retries: u32,
    pub retry_delay: Duration,
    pub query_timeout: Option<Duration>,
    pub explain: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            parallel: 1,
            retries: 2,
            retry_delay: Duration::from_millis(250),
            query_timeout: None,
            explain: false,
        }
    }
}

impl RunPolicy {
    pub fn from_settings(s: &Settings) -> Self {
        let d = Self::default();
        Self {
            parallel: s.parallel.unwrap_or(d.parallel).max(1),
            retries: s.retries.unwrap_or(d.retries),
            retry_delay: s
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(d.retry_delay),
            query_timeout: s
                .query_timeout_seconds
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            explain: s.explain.unwrap_or(d.explain),
        }
    }
}

/// Per-variant exclusive claims: at most one query runs against a variant.
#[derive(Clone, Default)]
struct VariantClaims {
    locks: Arc<std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl VariantClaims {
    async fn claim(&self, variant_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(variant_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Everything one catalog pass produced. Records and missing pairs are sorted
/// by (template declaration order, variant registration order).
#[derive(Debug, Default)]
pub struct RunOutput {
    pub records: Vec<RunRecord>,
    pub missing: Vec<MissingPair>,
    pub warnings: Vec<String>,
}

enum Outcome {
    Done(RunRecord),
    Failed(ExecutionError),
    OutOfBudget(String),
}

enum AttemptError {
    Db(DbError),
    Budget,
}

#[derive(Default)]
struct VariantRun {
    records: Vec<(usize, RunRecord)>,
    missing: Vec<(usize, MissingPair)>,
    warnings: Vec<String>,
}

#[derive(Clone)]
pub struct Runner {
    db: Arc<dyn Database>,
    pub policy: RunPolicy,
    claims: VariantClaims,
    next_handle: Arc<AtomicU64>,
}

impl Runner {
    pub fn new(db: Arc<dyn Database>, policy: RunPolicy) -> Self {
        Self {
            db,
            policy,
            claims: VariantClaims::default(),
            next_handle: Arc::new(AtomicU64::new(1)),
        }
    }

    fn handle(&self) -> ExecutionHandle {
        ExecutionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Execute one template against one variant, with retries.
    pub async fn run(
        &self,
        variant: &Variant,
        template: &QueryTemplate,
    ) -> Result<RunRecord, ExecutionError> {
        match self.run_bounded(variant, template, None).await {
            Outcome::Done(r) => Ok(r),
            Outcome::Failed(e) => Err(e),
            Outcome::OutOfBudget(reason) => Err(ExecutionError {
                variant: variant.id.clone(),
                template: template.id.clone(),
                attempts: 0,
                reason,
            }),
        }
    }

    async fn run_bounded(
        &self,
        variant: &Variant,
        template: &QueryTemplate,
        deadline: Option<Instant>,
    ) -> Outcome {
        let _claim = self.claims.claim(&variant.id).await;
        let sql = template.realize(&variant.physical);
        let mut attempts = 0u32;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Outcome::OutOfBudget(if attempts == 0 {
                    "run budget exhausted before start".into()
                } else {
                    format!("run budget exhausted after {attempts} attempt(s)")
                });
            }
            attempts += 1;
            let handle = self.handle();

            let started = std::time::Instant::now();
            let result = self.execute_once(handle, &sql, deadline).await;
            let wall = started.elapsed();

            let err = match result {
                Ok(out) => {
                    let elapsed = out.elapsed.unwrap_or(wall);
                    let record = self
                        .record(variant, template, handle, &sql, out, elapsed, attempts)
                        .await;
                    return Outcome::Done(record);
                }
                Err(e) => {
                    // A cancelled query may still have finished and left telemetry.
                    let _ = self.db.cost_breakdown(handle).await;
                    e
                }
            };
            let err = match err {
                AttemptError::Budget => {
                    tracing::warn!(
                        event = "layoutbench.run.budget_cancel",
                        variant = %variant.id,
                        template = %template.id,
                        handle = %handle,
                        "run budget expired mid-query"
                    );
                    return Outcome::OutOfBudget("cancelled: run budget expired".into());
                }
                AttemptError::Db(e) => e,
            };

            let retry = err.is_transient() && attempts <= self.policy.retries;
            tracing::warn!(
                event = "layoutbench.run.attempt_failed",
                variant = %variant.id,
                template = %template.id,
                attempt = attempts,
                error = %err,
                retry,
                "query attempt failed"
            );
            if !retry {
                return Outcome::Failed(ExecutionError {
                    variant: variant.id.clone(),
                    template: template.id.clone(),
                    attempts,
                    reason: err.to_string(),
                });
            }
            let wake = Instant::now() + self.policy.retry_delay;
            if let Some(d) = deadline.filter(|d| *d < wake) {
                sleep_until(d).await;
                return Outcome::OutOfBudget(format!(
                    "run budget exhausted after {attempts} attempt(s)"
                ));
            }
            sleep_until(wake).await;
        }
    }

    /// One timed call. The future is kept alive past a timeout so the backend
    /// can be told to cancel the handle it is still running.
    async fn execute_once(
        &self,
        handle: ExecutionHandle,
        sql: &str,
        deadline: Option<Instant>,
    ) -> Result<QueryOutput, AttemptError> {
        let query_deadline = self.policy.query_timeout.map(|d| Instant::now() + d);
        let stop_at = match (query_deadline, deadline) {
            (Some(q), Some(b)) => Some(q.min(b)),
            (q, b) => q.or(b),
        };

        let exec = self.db.execute(handle, sql);
        tokio::pin!(exec);

        let Some(stop_at) = stop_at else {
            return exec.await.map_err(AttemptError::Db);
        };

        tokio::select! {
            r = &mut exec => r.map_err(AttemptError::Db),
            _ = sleep_until(stop_at) => {
                let cancelled = self.db.cancel(handle);
                if cancelled {
                    let _ = timeout(CANCEL_GRACE, &mut exec).await;
                }
                tracing::debug!(event = "layoutbench.run.cancel", handle = %handle, cancelled);
                if deadline.is_some_and(|d| d <= stop_at) {
                    Err(AttemptError::Budget)
                } else {
                    let limit = self.policy.query_timeout.unwrap_or_default();
                    Err(AttemptError::Db(DbError::Timeout(format!(
                        "query exceeded {}s",
                        limit.as_secs_f64()
                    ))))
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        variant: &Variant,
        template: &QueryTemplate,
        handle: ExecutionHandle,
        sql: &str,
        out: QueryOutput,
        elapsed: std::time::Duration,
        attempts: u32,
    ) -> RunRecord {
        // Telemetry is fetched after the clock stopped.
        let cost = self.db.cost_breakdown(handle).await;
        let plan = if self.policy.explain {
            self.db.explain(sql).await.unwrap_or_else(|e| {
                tracing::debug!(event = "layoutbench.run.explain_failed", error = %e);
                Vec::new()
            })
        } else {
            Vec::new()
        };

        tracing::info!(
            event = "layoutbench.run.record",
            variant = %variant.id,
            template = %template.id,
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            rows = out.rows,
            attempts,
            total_cost = cost.map(|c| c.total_cost),
            "query finished"
        );

        RunRecord {
            variant_id: variant.id.clone(),
            template_id: template.id.clone(),
            duration_secs: elapsed.as_secs_f64(),
            cost,
            rows: out.rows,
            attempts,
            plan,
        }
    }

    async fn run_variant(
        &self,
        variant: &Variant,
        catalog: &QueryCatalog,
        deadline: Option<Instant>,
    ) -> VariantRun {
        let mut out = VariantRun::default();
        for (pos, template) in catalog.all().iter().enumerate() {
            let missing = |stage, reason: String| MissingPair {
                variant_id: variant.id.clone(),
                template_id: template.id.clone(),
                stage,
                reason,
            };
            match self.run_bounded(variant, template, deadline).await {
                Outcome::Done(record) => {
                    if let Some(max) = template.max_rows {
                        if record.rows > max {
                            out.warnings.push(format!(
                                "{}/{}: returned {} rows, expected at most {}",
                                variant.id, template.id, record.rows, max
                            ));
                        }
                    }
                    out.records.push((pos, record));
                }
                Outcome::Failed(e) => {
                    tracing::error!(
                        event = "layoutbench.run.failed",
                        variant = %variant.id,
                        template = %template.id,
                        attempts = e.attempts,
                        error = %e.reason,
                        "giving up on query"
                    );
                    out.missing
                        .push((pos, missing(MissingStage::Execution, e.to_string())));
                }
                Outcome::OutOfBudget(reason) => {
                    out.missing.push((pos, missing(MissingStage::Budget, reason)));
                }
            }
        }
        out
    }

    /// Runs the whole catalog against every variant. Variants are scheduled
    /// through a semaphore of `policy.parallel` permits; each variant walks the
    /// catalog in declaration order.
    pub async fn run_catalog(
        &self,
        variants: &[Variant],
        catalog: Arc<QueryCatalog>,
        deadline: Option<Instant>,
    ) -> anyhow::Result<RunOutput> {
        let sem = Arc::new(Semaphore::new(self.policy.parallel.max(1)));
        let mut handles = Vec::with_capacity(variants.len());

        for variant in variants {
            let permit = sem.clone().acquire_owned().await?;
            let this = self.clone();
            let v = variant.clone();
            let catalog = catalog.clone();
            let h = tokio::spawn(async move {
                let _permit = permit;
                this.run_variant(&v, &catalog, deadline).await
            });
            handles.push((variant.id.clone(), h));
        }

        let mut records = Vec::new();
        let mut missing = Vec::new();
        let mut warnings = Vec::new();
        for (vpos, (variant_id, h)) in handles.into_iter().enumerate() {
            match h.await {
                Ok(run) => {
                    records.extend(run.records.into_iter().map(|(t, r)| ((t, vpos), r)));
                    missing.extend(run.missing.into_iter().map(|(t, m)| ((t, vpos), m)));
                    warnings.extend(run.warnings);
                }
                Err(e) => {
                    for (t, template) in catalog.all().iter().enumerate() {
                        missing.push((
                            (t, vpos),
                            MissingPair {
                                variant_id: variant_id.clone(),
                                template_id: template.id.clone(),
                                stage: MissingStage::Execution,
                                reason: format!("join error: {}", e),
                            },
                        ));
                    }
                }
            }
        }

        records.sort_by_key(|(k, _)| *k);
        missing.sort_by_key(|(k, _)| *k);
        Ok(RunOutput {
            records: records.into_iter().map(|(_, r)| r).collect(),
            missing: missing.into_iter().map(|(_, m)| m).collect(),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults_are_sequential() {
        let p = RunPolicy::from_settings(&Settings::default());
        assert_eq!(p.parallel, 1);
        assert_eq!(p.retries, 2);
        assert!(p.query_timeout.is_none());
    }

    #[test]
    fn test_policy_zero_query_timeout_disables_it() {
        let s = Settings {
            query_timeout_seconds: Some(0),
            parallel: Some(0),
            ..Default::default()
        };
        let p = RunPolicy::from_settings(&s);
        assert!(p.query_timeout.is_none());
        assert_eq!(p.parallel, 1);
    }
}
