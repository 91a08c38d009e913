//! Scripted in-process [`Database`] used to drive the harness in tests.
//!
//! Tables are metadata only (columns plus a row count). Failures, latency,
//! cost and row counts are scripted per SQL substring ("needle").

use super::{Database, DbError, ExecutionHandle, QueryOutput};
use crate::dataset::Cell;
use crate::model::{ColumnInfo, CostBreakdown, Strategy};
use crate::naming::PhysicalName;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct State {
    tables: HashMap<String, (Vec<ColumnInfo>, u64)>,
    execute_failures: Vec<(String, VecDeque<DbError>)>,
    materialize_failures: HashMap<String, DbError>,
    latency: Vec<(String, Duration)>,
    timings: Vec<(String, Duration)>,
    costs: Vec<(String, CostBreakdown)>,
    rows: Vec<(String, u64)>,
    calls: Vec<String>,
    active: HashMap<String, usize>,
    max_active: HashMap<String, usize>,
    running: HashMap<ExecutionHandle, Arc<Notify>>,
    telemetry: HashMap<ExecutionHandle, CostBreakdown>,
    cancelled: Vec<ExecutionHandle>,
}

#[derive(Default)]
pub struct FakeDatabase {
    state: Mutex<State>,
}

fn scripted<T: Clone>(entries: &[(String, T)], sql: &str) -> Option<T> {
    entries
        .iter()
        .find(|(needle, _)| sql.contains(needle.as_str()))
        .map(|(_, v)| v.clone())
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    pub fn table(mut self, name: &str, columns: Vec<ColumnInfo>, rows: u64) -> Self {
        self.state_mut()
            .tables
            .insert(name.to_string(), (columns, rows));
        self
    }

    /// Executions whose SQL contains `needle` fail with `errors`, in order,
    /// then succeed.
    pub fn fail_execute(mut self, needle: &str, errors: Vec<DbError>) -> Self {
        self.state_mut()
            .execute_failures
            .push((needle.to_string(), errors.into()));
        self
    }

    pub fn fail_materialize(mut self, target: &str, err: DbError) -> Self {
        self.state_mut()
            .materialize_failures
            .insert(target.to_string(), err);
        self
    }

    pub fn latency(mut self, needle: &str, d: Duration) -> Self {
        self.state_mut().latency.push((needle.to_string(), d));
        self
    }

    /// Executions matching `needle` report `d` as their own execution time.
    pub fn timed(mut self, needle: &str, d: Duration) -> Self {
        self.state_mut().timings.push((needle.to_string(), d));
        self
    }

    /// Cost telemetry is recorded when an execution starts, whether or not
    /// it completes.
    pub fn cost(mut self, needle: &str, cost: CostBreakdown) -> Self {
        self.state_mut().costs.push((needle.to_string(), cost));
        self
    }

    pub fn rows(mut self, needle: &str, n: u64) -> Self {
        self.state_mut().rows.push((needle.to_string(), n));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn executions(&self, needle: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with("execute ") && c.contains(needle))
            .count()
    }

    /// Highest number of concurrent executions seen against `target`.
    pub fn max_overlap(&self, target: &str) -> usize {
        self.state().max_active.get(target).copied().unwrap_or(0)
    }

    pub fn cancelled(&self) -> Vec<ExecutionHandle> {
        self.state().cancelled.clone()
    }

    /// Telemetry entries nobody has collected yet.
    pub fn pending_telemetry(&self) -> usize {
        self.state().telemetry.len()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state().tables.contains_key(name)
    }

    fn log(&self, call: String) {
        self.state().calls.push(call);
    }

    fn target_of(&self, sql: &str) -> Option<String> {
        self.state()
            .tables
            .keys()
            .filter(|t| sql.contains(&format!("\"{t}\"")))
            .max_by_key(|t| t.len())
            .cloned()
    }
}

struct Active<'a> {
    db: &'a FakeDatabase,
    target: Option<String>,
    handle: ExecutionHandle,
}

impl<'a> Active<'a> {
    fn enter(db: &'a FakeDatabase, target: Option<String>, handle: ExecutionHandle) -> (Self, Arc<Notify>) {
        let notify = Arc::new(Notify::new());
        {
            let mut st = db.state();
            if let Some(t) = &target {
                let n = st.active.entry(t.clone()).or_insert(0);
                *n += 1;
                let now = *n;
                let max = st.max_active.entry(t.clone()).or_insert(0);
                *max = (*max).max(now);
            }
            st.running.insert(handle, notify.clone());
        }
        (Self { db, target, handle }, notify)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        let mut st = self.db.state();
        if let Some(t) = &self.target {
            if let Some(n) = st.active.get_mut(t) {
                *n = n.saturating_sub(1);
            }
        }
        st.running.remove(&self.handle);
    }
}

#[async_trait]
impl Database for FakeDatabase {
    fn backend_name(&self) -> &'static str {
        "fake"
    }

    async fn columns(&self, table: &PhysicalName) -> Result<Vec<ColumnInfo>, DbError> {
        self.log(format!("columns {table}"));
        Ok(self
            .state()
            .tables
            .get(table.as_str())
            .map(|(c, _)| c.clone())
            .unwrap_or_default())
    }

    async fn row_count(&self, table: &PhysicalName) -> Result<u64, DbError> {
        self.log(format!("row_count {table}"));
        self.state()
            .tables
            .get(table.as_str())
            .map(|(_, n)| *n)
            .ok_or_else(|| DbError::Query(format!("no such table: {table}")))
    }

    async fn create_table(
        &self,
        table: &PhysicalName,
        columns: &[ColumnInfo],
    ) -> Result<(), DbError> {
        self.log(format!("create_table {table}"));
        self.state()
            .tables
            .insert(table.as_str().to_string(), (columns.to_vec(), 0));
        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &PhysicalName,
        _columns: &[ColumnInfo],
        rows: Vec<Vec<Cell>>,
    ) -> Result<(), DbError> {
        self.log(format!("insert_rows {table}"));
        let mut st = self.state();
        let entry = st
            .tables
            .get_mut(table.as_str())
            .ok_or_else(|| DbError::Query(format!("no such table: {table}")))?;
        entry.1 += rows.len() as u64;
        Ok(())
    }

    async fn materialize(
        &self,
        source: &PhysicalName,
        target: &PhysicalName,
        strategy: &Strategy,
    ) -> Result<(), DbError> {
        self.log(format!("materialize {target}"));
        let mut st = self.state();
        st.tables.remove(target.as_str());
        if let Some(err) = st.materialize_failures.get(target.as_str()) {
            return Err(err.clone());
        }
        let (columns, rows) = st
            .tables
            .get(source.as_str())
            .cloned()
            .ok_or_else(|| DbError::Query(format!("no such table: {source}")))?;
        if let Strategy::Clustered { keys } = strategy {
            if let Some(k) = keys.iter().find(|k| !columns.iter().any(|c| &c.name == *k)) {
                return Err(DbError::Query(format!("unknown key column '{k}'")));
            }
        }
        st.tables
            .insert(target.as_str().to_string(), (columns, rows));
        Ok(())
    }

    async fn drop_variant(&self, target: &PhysicalName) -> Result<(), DbError> {
        self.log(format!("drop_variant {target}"));
        self.state().tables.remove(target.as_str());
        Ok(())
    }

    async fn execute(&self, handle: ExecutionHandle, sql: &str) -> Result<QueryOutput, DbError> {
        self.log(format!("execute {sql}"));
        let target = self.target_of(sql);
        let (latency, failure, rows, timing) = {
            let mut st = self.state();
            let failure = st
                .execute_failures
                .iter_mut()
                .find(|(needle, _)| sql.contains(needle.as_str()))
                .and_then(|(_, q)| q.pop_front());
            let rows = scripted(&st.rows, sql).or_else(|| {
                target
                    .as_ref()
                    .and_then(|t| st.tables.get(t))
                    .map(|(_, n)| *n)
            });
            if let Some(c) = scripted(&st.costs, sql) {
                st.telemetry.insert(handle, c);
            }
            (
                scripted(&st.latency, sql),
                failure,
                rows.unwrap_or(0),
                scripted(&st.timings, sql),
            )
        };

        let (_active, notify) = Active::enter(self, target, handle);
        if let Some(d) = latency {
            tokio::select! {
                _ = tokio::time::sleep(d) => {}
                _ = notify.notified() => return Err(DbError::Cancelled),
            }
        } else {
            tokio::task::yield_now().await;
        }

        if let Some(err) = failure {
            return Err(err);
        }
        Ok(QueryOutput {
            rows,
            elapsed: timing,
        })
    }

    async fn cost_breakdown(&self, handle: ExecutionHandle) -> Option<CostBreakdown> {
        self.state().telemetry.remove(&handle)
    }

    async fn explain(&self, sql: &str) -> Result<Vec<String>, DbError> {
        self.log(format!("explain {sql}"));
        Ok(vec![format!("SCAN {}", self.target_of(sql).unwrap_or_default())])
    }

    fn cancel(&self, handle: ExecutionHandle) -> bool {
        let mut st = self.state();
        match st.running.get(&handle).cloned() {
            Some(n) => {
                n.notify_one();
                st.cancelled.push(handle);
                true
            }
            None => false,
        }
    }
}
