//! The database under test, seen only through [`Database`].

use crate::dataset::Cell;
use crate::model::{ColumnInfo, CostBreakdown, Strategy};
use crate::naming::PhysicalName;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub mod fake;
pub mod sqlite;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DbError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("cancelled")]
    Cancelled,
    #[error("query failed: {0}")]
    Query(String),
}

impl DbError {
    /// Worth another attempt: the query itself was not at fault.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Timeout(_) | DbError::Connection(_))
    }
}

/// Identifies one in-flight execution for telemetry lookup and cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionHandle(pub u64);

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOutput {
    pub rows: u64,
    /// Time spent executing, measured by the backend once it had a
    /// connection. `None` leaves timing to the caller's clock.
    pub elapsed: Option<Duration>,
}

#[async_trait]
pub trait Database: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Column set of a table or view; empty when it does not exist.
    async fn columns(&self, table: &PhysicalName) -> Result<Vec<ColumnInfo>, DbError>;

    async fn row_count(&self, table: &PhysicalName) -> Result<u64, DbError>;

    /// (Re)create `table` with `columns`, dropping any previous copy.
    async fn create_table(
        &self,
        table: &PhysicalName,
        columns: &[ColumnInfo],
    ) -> Result<(), DbError>;

    async fn insert_rows(
        &self,
        table: &PhysicalName,
        columns: &[ColumnInfo],
        rows: Vec<Vec<Cell>>,
    ) -> Result<(), DbError>;

    /// Copy `source` into `target` organized per `strategy`. Atomic: on error
    /// no object named `target` is left behind.
    async fn materialize(
        &self,
        source: &PhysicalName,
        target: &PhysicalName,
        strategy: &Strategy,
    ) -> Result<(), DbError>;

    async fn drop_variant(&self, target: &PhysicalName) -> Result<(), DbError>;

    /// Run `sql` to completion, returning the number of rows produced.
    async fn execute(&self, handle: ExecutionHandle, sql: &str) -> Result<QueryOutput, DbError>;

    /// Engine cost for a finished execution, if the backend reports one.
    async fn cost_breakdown(&self, _handle: ExecutionHandle) -> Option<CostBreakdown> {
        None
    }

    async fn explain(&self, _sql: &str) -> Result<Vec<String>, DbError> {
        Ok(Vec::new())
    }

    /// Ask the backend to abort `handle`. Returns false if unsupported or idle.
    fn cancel(&self, _handle: ExecutionHandle) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DbError::Timeout("x".into()).is_transient());
        assert!(DbError::Connection("x".into()).is_transient());
        assert!(!DbError::Query("syntax".into()).is_transient());
        assert!(!DbError::Cancelled.is_transient());
    }
}
