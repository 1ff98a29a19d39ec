//! PostgreSQL backend on the sqlx pool
//!
//! Cancellation drops the in-flight query future; sqlx then discards the
//! connection's pending response before reusing it.

use std::sync::Arc;

use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::context::QueryContext;
use super::value::{SqlRow, SqlValue};
use crate::error::StorageError;

pub async fn open_pool(url: &str, max_connections: u32) -> Result<PgPool, StorageError> {
    info!("Connecting to PostgreSQL (max_connections={})", max_connections);

    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(url)
        .await
        .map_err(|e| StorageError::Connection(format!("Failed to connect to PostgreSQL: {}", e)))
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

fn bind_args<'q>(sql: &'q str, args: &'q [SqlValue]) -> Query<'q, Postgres, PgArguments> {
    args.iter().fold(sqlx::query(sql), |query, arg| match arg {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Integer(v) => query.bind(*v),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Blob(v) => query.bind(v.as_slice()),
    })
}

fn convert_row(row: &PgRow, columns: &Arc<[String]>) -> Result<SqlRow, StorageError> {
    let mut values = Vec::with_capacity(columns.len());

    for (i, column) in row.columns().iter().enumerate() {
        if row.try_get_raw(i).map_err(db_err)?.is_null() {
            values.push(SqlValue::Null);
            continue;
        }

        let value = match column.type_info().name() {
            "BOOL" => SqlValue::Bool(row.try_get(i).map_err(db_err)?),
            "INT2" => SqlValue::Integer(row.try_get::<i16, _>(i).map_err(db_err)?.into()),
            "INT4" => SqlValue::Integer(row.try_get::<i32, _>(i).map_err(db_err)?.into()),
            "INT8" => SqlValue::Integer(row.try_get(i).map_err(db_err)?),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => SqlValue::Text(row.try_get(i).map_err(db_err)?),
            "BYTEA" => SqlValue::Blob(row.try_get(i).map_err(db_err)?),
            other => {
                return Err(StorageError::Database(format!(
                    "Unsupported PostgreSQL type {} in column {}",
                    other,
                    column.name()
                )))
            }
        };
        values.push(value);
    }

    Ok(SqlRow::new(columns.clone(), values))
}

fn convert_rows(rows: Vec<PgRow>) -> Result<Vec<SqlRow>, StorageError> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns: Arc<[String]> = first.columns().iter().map(|c| c.name().to_string()).collect();
    rows.iter().map(|row| convert_row(row, &columns)).collect()
}

/// Autocommit access through the pool.
#[derive(Clone)]
pub struct PgConn {
    pool: PgPool,
}

impl PgConn {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn execute(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<u64, StorageError> {
        debug!(sql, args = args.len(), "postgres execute");
        ctx.run(async {
            bind_args(sql, args)
                .execute(&self.pool)
                .await
                .map(|done| done.rows_affected())
                .map_err(db_err)
        })
        .await
    }

    pub async fn fetch_all(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
        debug!(sql, args = args.len(), "postgres query");
        ctx.run(async {
            let rows = bind_args(sql, args).fetch_all(&self.pool).await.map_err(db_err)?;
            convert_rows(rows)
        })
        .await
    }
}

/// An open transaction. sqlx rolls it back when dropped uncommitted.
pub struct PgTx {
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

impl PgTx {
    pub async fn begin(ctx: &QueryContext, pool: &PgPool) -> Result<Self, StorageError> {
        let tx = ctx.run(async { pool.begin().await.map_err(db_err) }).await?;
        debug!("postgres transaction started");
        Ok(Self {
            tx: Mutex::new(Some(tx)),
        })
    }

    pub async fn execute(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<u64, StorageError> {
        debug!(sql, args = args.len(), "postgres tx execute");
        ctx.run(async {
            let mut guard = self.tx.lock().await;
            let tx = guard.as_mut().ok_or(StorageError::Internal("Transaction already finished".into()))?;
            bind_args(sql, args)
                .execute(&mut **tx)
                .await
                .map(|done| done.rows_affected())
                .map_err(db_err)
        })
        .await
    }

    pub async fn fetch_all(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
        debug!(sql, args = args.len(), "postgres tx query");
        ctx.run(async {
            let mut guard = self.tx.lock().await;
            let tx = guard.as_mut().ok_or(StorageError::Internal("Transaction already finished".into()))?;
            let rows = bind_args(sql, args).fetch_all(&mut **tx).await.map_err(db_err)?;
            convert_rows(rows)
        })
        .await
    }

    pub async fn commit(mut self, ctx: &QueryContext) -> Result<(), StorageError> {
        let tx = self
            .tx
            .get_mut()
            .take()
            .ok_or(StorageError::Internal("Transaction already finished".into()))?;
        ctx.run(async { tx.commit().await.map_err(db_err) }).await
    }

    pub async fn rollback(mut self, ctx: &QueryContext) -> Result<(), StorageError> {
        let tx = self
            .tx
            .get_mut()
            .take()
            .ok_or(StorageError::Internal("Transaction already finished".into()))?;
        ctx.run(async { tx.rollback().await.map_err(db_err) }).await
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        if self.tx.get_mut().is_some() {
            warn!("PostgreSQL transaction dropped without commit, rolling back");
        }
    }
}
