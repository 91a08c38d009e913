//! SQLite collaborator (via rusqlite).
//!
//! heap: rowid table, no declared order. clustered: `WITHOUT ROWID` table whose
//! primary key is the declared key. columnstore: one narrow table per column
//! keyed by source rowid, reassembled by a view named after the variant.
//!
//! Cost telemetry is read from statement counters once the last row has been
//! stepped: cpu = VM steps, io = full-scan steps plus sorts, in thousands.

use super::{Database, DbError, ExecutionHandle, QueryOutput};
use crate::dataset::Cell;
use crate::model::{ColumnInfo, CostBreakdown, Strategy};
use crate::naming::{quote_ident, PhysicalName};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, InterruptHandle, StatementStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const COST_UNIT: f64 = 1000.0;
const PART_KEY: &str = "_lb_rid";

struct Slot {
    conn: Mutex<Connection>,
    interrupt: InterruptHandle,
}

/// Where an execution is: waiting for a connection, running on slot `n`, or
/// cancelled before it got one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Queued,
    Running(usize),
    Abandoned,
}

struct Inner {
    slots: Vec<Slot>,
    in_flight: Mutex<HashMap<ExecutionHandle, Job>>,
    telemetry: Mutex<HashMap<ExecutionHandle, CostBreakdown>>,
}

#[derive(Clone)]
pub struct SqliteDatabase {
    inner: Arc<Inner>,
}

impl SqliteDatabase {
    /// Opens `pool_size` connections to `path`. An in-memory database is
    /// private to its connection, so it always gets exactly one.
    pub fn open(path: &str, pool_size: usize) -> Result<Self, DbError> {
        let memory = path == ":memory:";
        let size = if memory { 1 } else { pool_size.max(1) };
        if memory && pool_size > 1 {
            tracing::warn!(
                event = "layoutbench.sqlite.memory_pool",
                requested = pool_size,
                "in-memory database uses a single connection; parallel queries will serialize"
            );
        }

        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = if memory {
                Connection::open_in_memory()
            } else {
                Connection::open(path)
            }
            .map_err(classify)?;
            conn.busy_timeout(BUSY_TIMEOUT).map_err(classify)?;
            if !memory {
                let _mode: String = conn
                    .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                    .map_err(classify)?;
            }
            let interrupt = conn.get_interrupt_handle();
            slots.push(Slot {
                conn: Mutex::new(conn),
                interrupt,
            });
        }

        Ok(Self {
            inner: Arc::new(Inner {
                slots,
                in_flight: Mutex::new(HashMap::new()),
                telemetry: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn memory() -> Result<Self, DbError> {
        Self::open(":memory:", 1)
    }

    pub fn pool_size(&self) -> usize {
        self.inner.slots.len()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, DbError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| DbError::Connection(format!("blocking task failed: {e}")))?
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, DbError> {
    m.lock()
        .map_err(|_| DbError::Connection("connection mutex poisoned".into()))
}

impl Inner {
    fn primary(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        lock(&self.slots[0].conn)
    }

    /// First idle connection, else wait on the one `hint` maps to.
    fn claim(&self, hint: u64) -> Result<(usize, MutexGuard<'_, Connection>), DbError> {
        for (i, slot) in self.slots.iter().enumerate() {
            match slot.conn.try_lock() {
                Ok(guard) => return Ok((i, guard)),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => {
                    return Err(DbError::Connection("connection mutex poisoned".into()))
                }
            }
        }
        let i = (hint % self.slots.len() as u64) as usize;
        Ok((i, lock(&self.slots[i].conn)?))
    }

    /// Timing starts once a connection is held, so waiting on a busy pool is
    /// never counted as query time. A job cancelled while queued never runs.
    fn execute(&self, handle: ExecutionHandle, sql: &str) -> Result<QueryOutput, DbError> {
        let (idx, conn) = self.claim(handle.0)?;
        {
            let mut jobs = lock(&self.in_flight)?;
            if jobs.get(&handle) == Some(&Job::Abandoned) {
                jobs.remove(&handle);
                return Err(DbError::Cancelled);
            }
            jobs.insert(handle, Job::Running(idx));
        }
        let started = Instant::now();
        let result = run_counted(&conn, sql);
        let elapsed = started.elapsed();
        lock(&self.in_flight)?.remove(&handle);
        drop(conn);

        let (rows, cost) = result?;
        lock(&self.telemetry)?.insert(handle, cost);
        Ok(QueryOutput {
            rows,
            elapsed: Some(elapsed),
        })
    }
}

fn run_counted(conn: &Connection, sql: &str) -> Result<(u64, CostBreakdown), DbError> {
    let mut stmt = conn.prepare(sql).map_err(classify)?;
    let mut n = 0u64;
    {
        let mut rows = stmt.query([]).map_err(classify)?;
        while rows.next().map_err(classify)?.is_some() {
            n += 1;
        }
    }
    let vm_steps = stmt.get_status(StatementStatus::VmStep) as f64;
    let scan_steps = stmt.get_status(StatementStatus::FullscanStep) as f64
        + stmt.get_status(StatementStatus::Sort) as f64;
    Ok((
        n,
        CostBreakdown::new(vm_steps / COST_UNIT, scan_steps / COST_UNIT),
    ))
}

fn classify(err: rusqlite::Error) -> DbError {
    if let rusqlite::Error::SqliteFailure(e, _) = &err {
        match e.code {
            ErrorCode::OperationInterrupted => return DbError::Cancelled,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return DbError::Timeout(err.to_string())
            }
            ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::NotADatabase => {
                return DbError::Connection(err.to_string())
            }
            _ => {}
        }
    }
    DbError::Query(err.to_string())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, DbError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))
        .map_err(classify)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })
        .map_err(classify)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(classify)
}

fn column_defs(columns: &[ColumnInfo]) -> Vec<String> {
    columns
        .iter()
        .map(|c| {
            if c.decl_type.is_empty() {
                quote_ident(&c.name)
            } else {
                format!("{} {}", quote_ident(&c.name), c.decl_type)
            }
        })
        .collect()
}

fn column_list(columns: &[ColumnInfo]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn part_name(target: &str, idx: usize) -> String {
    format!("{target}__c{idx}")
}

/// Drops `target` and any column partitions belonging to it.
fn drop_objects(conn: &Connection, target: &str) -> Result<usize, DbError> {
    let pattern = format!("{}\\_\\_c%", escape_like(target));
    let mut stmt = conn
        .prepare(
            "SELECT type, name FROM sqlite_master
             WHERE (name = ?1 OR name LIKE ?2 ESCAPE '\\') AND type IN ('table', 'view')
             ORDER BY CASE type WHEN 'view' THEN 0 ELSE 1 END, name",
        )
        .map_err(classify)?;
    let objects = stmt
        .query_map(params![target, pattern], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(classify)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(classify)?;

    for (kind, name) in &objects {
        let sql = if kind == "view" {
            format!("DROP VIEW IF EXISTS {}", quote_ident(name))
        } else {
            format!("DROP TABLE IF EXISTS {}", quote_ident(name))
        };
        conn.execute_batch(&sql).map_err(classify)?;
    }
    Ok(objects.len())
}

fn materialize_into(
    conn: &Connection,
    source: &str,
    target: &str,
    strategy: &Strategy,
) -> Result<(), DbError> {
    let columns = table_columns(conn, source)?;
    if columns.is_empty() {
        return Err(DbError::Query(format!("no such table: {source}")));
    }
    let cols = column_list(&columns);
    let defs = column_defs(&columns);
    let src = quote_ident(source);
    let tgt = quote_ident(target);

    match strategy {
        Strategy::Heap => {
            conn.execute_batch(&format!(
                "CREATE TABLE {tgt} ({});
                 INSERT INTO {tgt} ({cols}) SELECT {cols} FROM {src};",
                defs.join(", ")
            ))
            .map_err(classify)?;
        }
        Strategy::Clustered { keys } => {
            if let Some(k) = keys
                .iter()
                .find(|k| !columns.iter().any(|c| c.name.eq_ignore_ascii_case(k)))
            {
                return Err(DbError::Query(format!("unknown key column '{k}'")));
            }
            let key_list = keys
                .iter()
                .map(|k| quote_ident(k))
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute_batch(&format!(
                "CREATE TABLE {tgt} ({}, PRIMARY KEY ({key_list})) WITHOUT ROWID;
                 INSERT INTO {tgt} ({cols}) SELECT {cols} FROM {src} ORDER BY {key_list};",
                defs.join(", ")
            ))
            .map_err(classify)?;
        }
        Strategy::Columnstore => {
            let mut select = Vec::with_capacity(columns.len());
            let mut from = String::new();
            for (i, c) in columns.iter().enumerate() {
                let part = quote_ident(&part_name(target, i));
                let col = quote_ident(&c.name);
                conn.execute_batch(&format!(
                    "CREATE TABLE {part} ({PART_KEY} INTEGER PRIMARY KEY, {});
                     INSERT INTO {part} ({PART_KEY}, {col}) SELECT rowid, {col} FROM {src};",
                    defs[i]
                ))
                .map_err(classify)?;

                select.push(format!("p{i}.{col} AS {col}"));
                if i == 0 {
                    from.push_str(&format!("{part} AS p0"));
                } else {
                    from.push_str(&format!(
                        " JOIN {part} AS p{i} ON p{i}.{PART_KEY} = p0.{PART_KEY}"
                    ));
                }
            }
            conn.execute_batch(&format!(
                "CREATE VIEW {tgt} AS SELECT {} FROM {from}",
                select.join(", ")
            ))
            .map_err(classify)?;
        }
        Strategy::Custom { statements } => {
            for stmt in statements.iter().filter(|s| !s.trim().is_empty()) {
                let sql = stmt.replace("{table}", &tgt).replace("{source}", &src);
                conn.execute_batch(&sql).map_err(classify)?;
            }
        }
    }
    Ok(())
}

fn cell_value(cell: &Cell) -> Value {
    match cell {
        Cell::Int(v) => Value::Integer(*v),
        Cell::Real(v) => Value::Real(*v),
        Cell::Text(v) => Value::Text(v.clone()),
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn columns(&self, table: &PhysicalName) -> Result<Vec<ColumnInfo>, DbError> {
        let table = table.as_str().to_string();
        self.blocking(move |inner| table_columns(&*inner.primary()?, &table))
            .await
    }

    async fn row_count(&self, table: &PhysicalName) -> Result<u64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.quoted());
        self.blocking(move |inner| {
            let n: i64 = inner
                .primary()?
                .query_row(&sql, [], |row| row.get(0))
                .map_err(classify)?;
            Ok(n.max(0) as u64)
        })
        .await
    }

    async fn create_table(
        &self,
        table: &PhysicalName,
        columns: &[ColumnInfo],
    ) -> Result<(), DbError> {
        let sql = format!(
            "DROP TABLE IF EXISTS {t}; CREATE TABLE {t} ({});",
            column_defs(columns).join(", "),
            t = table.quoted()
        );
        self.blocking(move |inner| inner.primary()?.execute_batch(&sql).map_err(classify))
            .await
    }

    async fn insert_rows(
        &self,
        table: &PhysicalName,
        columns: &[ColumnInfo],
        rows: Vec<Vec<Cell>>,
    ) -> Result<(), DbError> {
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            table.quoted(),
            column_list(columns)
        );
        self.blocking(move |inner| {
            let conn = inner.primary()?;
            let tx = conn.unchecked_transaction().map_err(classify)?;
            {
                let mut stmt = tx.prepare_cached(&sql).map_err(classify)?;
                for row in &rows {
                    stmt.execute(params_from_iter(row.iter().map(cell_value)))
                        .map_err(classify)?;
                }
            }
            tx.commit().map_err(classify)
        })
        .await
    }

    async fn materialize(
        &self,
        source: &PhysicalName,
        target: &PhysicalName,
        strategy: &Strategy,
    ) -> Result<(), DbError> {
        let source = source.as_str().to_string();
        let target = target.as_str().to_string();
        let strategy = strategy.clone();
        self.blocking(move |inner| {
            let conn = inner.primary()?;
            let tx = conn.unchecked_transaction().map_err(classify)?;
            drop_objects(&tx, &target)?;
            materialize_into(&tx, &source, &target, &strategy)?;
            tx.commit().map_err(classify)
        })
        .await
    }

    async fn drop_variant(&self, target: &PhysicalName) -> Result<(), DbError> {
        let target = target.as_str().to_string();
        self.blocking(move |inner| {
            let conn = inner.primary()?;
            let tx = conn.unchecked_transaction().map_err(classify)?;
            drop_objects(&tx, &target)?;
            tx.commit().map_err(classify)
        })
        .await
    }

    async fn execute(&self, handle: ExecutionHandle, sql: &str) -> Result<QueryOutput, DbError> {
        lock(&self.inner.in_flight)?.insert(handle, Job::Queued);
        let sql = sql.to_string();
        let result = self.blocking(move |inner| inner.execute(handle, &sql)).await;
        if result.is_err() {
            if let Ok(mut jobs) = lock(&self.inner.in_flight) {
                jobs.remove(&handle);
            }
        }
        result
    }

    async fn cost_breakdown(&self, handle: ExecutionHandle) -> Option<CostBreakdown> {
        lock(&self.inner.telemetry).ok()?.remove(&handle)
    }

    async fn explain(&self, sql: &str) -> Result<Vec<String>, DbError> {
        let sql = format!("EXPLAIN QUERY PLAN {sql}");
        self.blocking(move |inner| {
            let (_, conn) = inner.claim(0)?;
            let mut stmt = conn.prepare(&sql).map_err(classify)?;
            let lines = stmt
                .query_map([], |row| row.get::<_, String>(3))
                .map_err(classify)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(classify)?;
            Ok(lines)
        })
        .await
    }

    fn cancel(&self, handle: ExecutionHandle) -> bool {
        let Ok(mut jobs) = lock(&self.inner.in_flight) else {
            return false;
        };
        match jobs.get(&handle).copied() {
            Some(Job::Running(i)) => {
                self.inner.slots[i].interrupt.interrupt();
                true
            }
            Some(Job::Queued) => {
                jobs.insert(handle, Job::Abandoned);
                true
            }
            Some(Job::Abandoned) | None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{sales_columns, SalesGenerator};

    async fn seeded(rows: u64) -> (SqliteDatabase, PhysicalName) {
        let db = SqliteDatabase::memory().unwrap();
        let source = PhysicalName::parse("sales").unwrap();
        let cols = sales_columns();
        db.create_table(&source, &cols).await.unwrap();
        let mut g = SalesGenerator::new(11, rows);
        db.insert_rows(&source, &cols, g.next_batch(rows as usize))
            .await
            .unwrap();
        (db, source)
    }

    fn names(cols: &[ColumnInfo]) -> Vec<String> {
        cols.iter().map(|c| c.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_each_strategy_exposes_source_columns() {
        let (db, source) = seeded(300).await;
        let expected = names(&db.columns(&source).await.unwrap());

        for (id, strategy) in [
            ("heap", Strategy::Heap),
            (
                "clustered",
                Strategy::Clustered {
                    keys: vec!["sale_id".into()],
                },
            ),
            ("columnstore", Strategy::Columnstore),
        ] {
            let target = PhysicalName::for_variant(id).unwrap();
            db.materialize(&source, &target, &strategy).await.unwrap();
            assert_eq!(names(&db.columns(&target).await.unwrap()), expected, "{id}");
            assert_eq!(db.row_count(&target).await.unwrap(), 300, "{id}");
        }
    }

    #[tokio::test]
    async fn test_duplicate_clustered_key_leaves_nothing_behind() {
        let (db, source) = seeded(500).await;
        let target = PhysicalName::for_variant("by_customer").unwrap();
        let err = db
            .materialize(
                &source,
                &target,
                &Strategy::Clustered {
                    keys: vec!["customer_id".into()],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Query(ref m) if m.contains("UNIQUE")), "{err:?}");
        assert!(db.columns(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_reports_rows_and_cost() {
        let (db, source) = seeded(200).await;
        let target = PhysicalName::for_variant("heap").unwrap();
        db.materialize(&source, &target, &Strategy::Heap).await.unwrap();

        let handle = ExecutionHandle(1);
        let out = db
            .execute(handle, &format!("SELECT * FROM {}", target.quoted()))
            .await
            .unwrap();
        assert_eq!(out.rows, 200);

        let cost = db.cost_breakdown(handle).await.expect("sqlite reports counters");
        assert!(cost.cpu_cost > 0.0);
        assert!(cost.io_cost > 0.0);
        assert!(db.cost_breakdown(handle).await.is_none(), "telemetry is taken once");
    }

    #[tokio::test]
    async fn test_drop_variant_removes_column_partitions() {
        let (db, source) = seeded(50).await;
        let target = PhysicalName::for_variant("cs").unwrap();
        db.materialize(&source, &target, &Strategy::Columnstore)
            .await
            .unwrap();
        db.drop_variant(&target).await.unwrap();

        let left: i64 = db
            .inner
            .primary()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE 'lb_cs%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(left, 0);
    }

    /// Holds connection slot 0 on a plain thread until `release` fires.
    fn hold_slot(db: &SqliteDatabase) -> (std::thread::JoinHandle<()>, std::sync::mpsc::Sender<()>) {
        let inner = db.inner.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let holder = std::thread::spawn(move || {
            let _guard = inner.slots[0].conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        locked_rx.recv().unwrap();
        (holder, release_tx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_elapsed_excludes_wait_for_connection() {
        let (db, source) = seeded(20).await;
        let (holder, release) = hold_slot(&db);
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            let _ = release.send(());
        });

        let started = Instant::now();
        let out = db
            .execute(ExecutionHandle(3), &format!("SELECT * FROM {}", source.quoted()))
            .await
            .unwrap();
        let wall = started.elapsed();
        releaser.join().unwrap();
        holder.join().unwrap();

        assert_eq!(out.rows, 20);
        assert!(wall >= Duration::from_millis(250), "{wall:?}");
        assert!(out.elapsed.unwrap() < Duration::from_millis(200), "{:?}", out.elapsed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_while_queued_never_runs() {
        let (db, source) = seeded(20).await;
        let (holder, release) = hold_slot(&db);

        let handle = ExecutionHandle(4);
        let task = {
            let db = db.clone();
            let sql = format!("SELECT * FROM {}", source.quoted());
            tokio::spawn(async move { db.execute(handle, &sql).await })
        };
        while lock(&db.inner.in_flight).unwrap().get(&handle).is_none() {
            tokio::task::yield_now().await;
        }
        assert!(db.cancel(handle));
        let _ = release.send(());
        holder.join().unwrap();

        assert_eq!(task.await.unwrap(), Err(DbError::Cancelled));
        assert!(db.cost_breakdown(handle).await.is_none());
        assert!(lock(&db.inner.in_flight).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_syntax_error_is_not_transient() {
        let db = SqliteDatabase::memory().unwrap();
        let err = db.execute(ExecutionHandle(9), "SELEC 1").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_explain_returns_plan_lines() {
        let (db, source) = seeded(20).await;
        let plan = db
            .explain(&format!("SELECT * FROM {} WHERE sale_id = 3", source.quoted()))
            .await
            .unwrap();
        assert!(!plan.is_empty());
        assert!(plan.iter().any(|l| l.contains("sales")));
    }
}
