//! SQLite backend: r2d2-pooled rusqlite connections
//!
//! rusqlite is synchronous, so every statement runs on the blocking pool.
//! Cancellation calls the connection's interrupt handle, which makes the
//! running statement fail with `SQLITE_INTERRUPT` and frees the connection.
//! Statements queued behind it on a shared transaction are skipped instead.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, InterruptHandle, ToSql};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::context::QueryContext;
use super::value::{SqlRow, SqlValue};
use crate::error::StorageError;

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledSqlite = r2d2::PooledConnection<SqliteConnectionManager>;

// ============================================================================
// Connection manager
// ============================================================================

/// Opens file-backed connections with WAL and foreign keys enabled.
#[derive(Debug, Clone)]
pub struct SqliteConnectionManager {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteConnectionManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl r2d2::ManageConnection for SqliteConnectionManager {
    type Connection = rusqlite::Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let conn = rusqlite::Connection::open(&self.path)?;
        // Cascading deletes depend on foreign_keys, which is per connection
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute_batch("SELECT 1")
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        // A connection handed back mid-transaction must not be reused
        !conn.is_autocommit()
    }
}

/// Build the connection pool for the database file at `path`.
pub fn open_pool(path: &Path, max_connections: u32) -> Result<SqlitePool, StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    info!("Opening SQLite database at {:?}", path);

    r2d2::Pool::builder()
        .max_size(max_connections.max(1))
        .build(SqliteConnectionManager::new(path))
        .map_err(|e| StorageError::Connection(format!("Failed to create SQLite pool: {}", e)))
}

// ============================================================================
// Statement execution
// ============================================================================

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v.as_slice())),
        })
    }
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

fn execute_on(conn: &rusqlite::Connection, sql: &str, args: &[SqlValue]) -> Result<u64, StorageError> {
    let affected = conn.execute(sql, params_from_iter(args.iter())).map_err(db_err)?;
    Ok(affected as u64)
}

fn query_on(conn: &rusqlite::Connection, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let columns: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query(params_from_iter(args.iter())).map_err(db_err)?;
    let mut out = Vec::new();

    while let Some(row) = rows.next().map_err(db_err)? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value = match row.get_ref(i).map_err(db_err)? {
                ValueRef::Null => SqlValue::Null,
                ValueRef::Integer(v) => SqlValue::Integer(v),
                ValueRef::Text(bytes) => SqlValue::Text(
                    std::str::from_utf8(bytes)
                        .map_err(|e| StorageError::Database(format!("Invalid UTF-8 in column {}: {}", columns[i], e)))?
                        .to_string(),
                ),
                ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
                ValueRef::Real(v) => {
                    return Err(StorageError::Database(format!(
                        "Unexpected REAL value {} in column {}",
                        v, columns[i]
                    )))
                }
            };
            values.push(value);
        }
        out.push(SqlRow::new(columns.clone(), values));
    }

    Ok(out)
}

/// Check a connection out of the pool without blocking the runtime.
///
/// The wait is bounded by the context deadline as well as the pool's own
/// connection timeout, and a cancelled context stops waiting at once.
async fn checkout(ctx: &QueryContext, pool: &SqlitePool) -> Result<PooledSqlite, StorageError> {
    ctx.check()?;

    let pool_timeout = pool.connection_timeout();
    let wait = match ctx.deadline() {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(pool_timeout),
        None => pool_timeout,
    };
    let pool = pool.clone();
    let task = tokio::task::spawn_blocking(move || pool.get_timeout(wait));

    tokio::select! {
        biased;
        checked_out = task => match checked_out.map_err(|e| StorageError::Internal(format!("Pool checkout task failed: {}", e)))? {
            Ok(conn) => Ok(conn),
            Err(_) if wait < pool_timeout => Err(StorageError::DeadlineExceeded),
            Err(e) => {
                ctx.check()?;
                Err(StorageError::Connection(format!("Failed to get SQLite connection: {}", e)))
            }
        },
        err = ctx.done() => {
            debug!("Gave up waiting for a SQLite connection: {}", err);
            Err(err)
        }
    }
}

/// Where a statement is relative to the connection it was queued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Running,
    Finished,
    Abandoned,
}

fn joined<T>(result: Result<Result<T, StorageError>, JoinError>) -> Result<T, StorageError> {
    result.map_err(|e| StorageError::Internal(format!("Blocking task failed: {}", e)))?
}

fn lock_phase(phase: &Mutex<Phase>) -> MutexGuard<'_, Phase> {
    phase.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `f` against `conn` on the blocking pool.
///
/// When the context finishes first, a statement still waiting for the
/// connection is skipped and a running one is interrupted. The interrupt is
/// issued under the phase lock, so it can only land on this statement.
/// A statement that completed anyway reports its own result.
async fn run_blocking<T, F>(
    ctx: &QueryContext,
    conn: Arc<Mutex<PooledSqlite>>,
    interrupt: Arc<InterruptHandle>,
    f: F,
) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> Result<T, StorageError> + Send + 'static,
{
    ctx.check()?;

    let phase = Arc::new(Mutex::new(Phase::Queued));
    let task_phase = phase.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        let guard = conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        {
            let mut phase = lock_phase(&task_phase);
            if *phase == Phase::Abandoned {
                return Err(StorageError::Cancelled);
            }
            *phase = Phase::Running;
        }
        let result = f(&guard);
        *lock_phase(&task_phase) = Phase::Finished;
        result
    });

    tokio::select! {
        biased;
        result = &mut task => joined(result),
        err = ctx.done() => {
            let seen = {
                let mut current = lock_phase(&phase);
                let seen = *current;
                match seen {
                    Phase::Queued => *current = Phase::Abandoned,
                    Phase::Running => interrupt.interrupt(),
                    Phase::Finished | Phase::Abandoned => {}
                }
                seen
            };

            match seen {
                Phase::Queued | Phase::Abandoned => {
                    debug!("Skipped queued SQLite statement: {}", err);
                    Err(err)
                }
                Phase::Running => match joined(task.await) {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        debug!("Interrupted SQLite statement ({}): {}", e, err);
                        Err(err)
                    }
                },
                Phase::Finished => joined(task.await),
            }
        }
    }
}

/// A pooled connection bundled with its interrupt handle.
struct Checkout {
    conn: Arc<Mutex<PooledSqlite>>,
    interrupt: Arc<InterruptHandle>,
}

impl Checkout {
    fn new(conn: PooledSqlite) -> Self {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        }
    }

    async fn execute(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<u64, StorageError> {
        let (sql, args) = (sql.to_string(), args.to_vec());
        run_blocking(ctx, self.conn.clone(), self.interrupt.clone(), move |conn| {
            execute_on(conn, &sql, &args)
        })
        .await
    }

    async fn fetch_all(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
        let (sql, args) = (sql.to_string(), args.to_vec());
        run_blocking(ctx, self.conn.clone(), self.interrupt.clone(), move |conn| {
            query_on(conn, &sql, &args)
        })
        .await
    }

    async fn batch(&self, ctx: &QueryContext, sql: &'static str) -> Result<(), StorageError> {
        run_blocking(ctx, self.conn.clone(), self.interrupt.clone(), move |conn| {
            conn.execute_batch(sql).map_err(db_err)
        })
        .await
    }
}

// ============================================================================
// Autocommit connection
// ============================================================================

/// Autocommit access: every statement checks out its own pooled connection.
#[derive(Clone)]
pub struct SqliteConn {
    pool: SqlitePool,
}

impl SqliteConn {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn execute(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<u64, StorageError> {
        ctx.check()?;
        debug!(sql, args = args.len(), "sqlite execute");
        Checkout::new(checkout(ctx, &self.pool).await?).execute(ctx, sql, args).await
    }

    pub async fn fetch_all(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
        ctx.check()?;
        debug!(sql, args = args.len(), "sqlite query");
        Checkout::new(checkout(ctx, &self.pool).await?).fetch_all(ctx, sql, args).await
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// A connection pinned for the life of a `BEGIN IMMEDIATE` transaction.
///
/// Dropped without commit, it rolls back. If the connection is still busy
/// with an interrupted statement the rollback is skipped and the pool
/// discards the connection instead (see `has_broken`).
pub struct SqliteTx {
    inner: Checkout,
    finished: bool,
}

impl SqliteTx {
    pub async fn begin(ctx: &QueryContext, pool: &SqlitePool) -> Result<Self, StorageError> {
        let inner = Checkout::new(checkout(ctx, pool).await?);
        inner.batch(ctx, "BEGIN IMMEDIATE").await?;
        debug!("sqlite transaction started");
        Ok(Self { inner, finished: false })
    }

    pub async fn execute(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<u64, StorageError> {
        debug!(sql, args = args.len(), "sqlite tx execute");
        self.inner.execute(ctx, sql, args).await
    }

    pub async fn fetch_all(&self, ctx: &QueryContext, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
        debug!(sql, args = args.len(), "sqlite tx query");
        self.inner.fetch_all(ctx, sql, args).await
    }

    pub async fn commit(mut self, ctx: &QueryContext) -> Result<(), StorageError> {
        self.inner.batch(ctx, "COMMIT").await?;
        self.finished = true;
        Ok(())
    }

    pub async fn rollback(mut self, ctx: &QueryContext) -> Result<(), StorageError> {
        self.finished = true;
        self.inner.batch(ctx, "ROLLBACK").await
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("SQLite transaction dropped without commit, rolling back");
        if let Ok(conn) = self.inner.conn.try_lock() {
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!("Rollback on drop failed: {}", e);
                }
            }
        }
    }
}
