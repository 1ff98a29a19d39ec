//! Execution interfaces shared by both backends
//!
//! Storage operations are written once against [`Executor`] and accept either
//! an autocommit [`Connection`] or an explicit [`Transaction`].

use async_trait::async_trait;

use super::context::QueryContext;
use super::dialect::Dialect;
use super::postgres::{PgConn, PgTx};
use super::sqlite::{SqliteConn, SqliteTx};
use super::value::{SqlRow, SqlValue};
use crate::error::StorageError;

/// Runs dialect-bound SQL with positional arguments.
#[async_trait]
pub trait Executor: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run a statement, returning the number of affected rows.
    async fn execute(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<u64, StorageError>;

    async fn fetch_all(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError>;

    async fn fetch_optional(
        &self,
        ctx: &QueryContext,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Option<SqlRow>, StorageError> {
        Ok(self.fetch_all(ctx, sql, args).await?.into_iter().next())
    }
}

/// Autocommit connection handle. Cheap to clone.
#[derive(Clone)]
pub enum Connection {
    Sqlite(SqliteConn),
    Postgres(PgConn),
}

#[async_trait]
impl Executor for Connection {
    fn dialect(&self) -> Dialect {
        match self {
            Connection::Sqlite(_) => Dialect::Sqlite,
            Connection::Postgres(_) => Dialect::Postgres,
        }
    }

    async fn execute(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<u64, StorageError> {
        match self {
            Connection::Sqlite(conn) => conn.execute(ctx, sql, args).await,
            Connection::Postgres(conn) => conn.execute(ctx, sql, args).await,
        }
    }

    async fn fetch_all(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
        match self {
            Connection::Sqlite(conn) => conn.fetch_all(ctx, sql, args).await,
            Connection::Postgres(conn) => conn.fetch_all(ctx, sql, args).await,
        }
    }
}

/// Explicit transaction. Rolled back if dropped before [`Transaction::commit`].
pub enum Transaction {
    Sqlite(SqliteTx),
    Postgres(PgTx),
}

impl Transaction {
    pub async fn commit(self, ctx: &QueryContext) -> Result<(), StorageError> {
        match self {
            Transaction::Sqlite(tx) => tx.commit(ctx).await,
            Transaction::Postgres(tx) => tx.commit(ctx).await,
        }
        .map_err(|e| e.during("commit"))
    }

    pub async fn rollback(self, ctx: &QueryContext) -> Result<(), StorageError> {
        match self {
            Transaction::Sqlite(tx) => tx.rollback(ctx).await,
            Transaction::Postgres(tx) => tx.rollback(ctx).await,
        }
        .map_err(|e| e.during("rollback"))
    }
}

#[async_trait]
impl Executor for Transaction {
    fn dialect(&self) -> Dialect {
        match self {
            Transaction::Sqlite(_) => Dialect::Sqlite,
            Transaction::Postgres(_) => Dialect::Postgres,
        }
    }

    async fn execute(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<u64, StorageError> {
        match self {
            Transaction::Sqlite(tx) => tx.execute(ctx, sql, args).await,
            Transaction::Postgres(tx) => tx.execute(ctx, sql, args).await,
        }
    }

    async fn fetch_all(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
        match self {
            Transaction::Sqlite(tx) => tx.fetch_all(ctx, sql, args).await,
            Transaction::Postgres(tx) => tx.fetch_all(ctx, sql, args).await,
        }
    }
}
