//! Relational store for marketplace chain state
//!
//! The same schema and statements run on SQLite and PostgreSQL.
//!
//! ## Architecture
//!
//! - [`Warehouse`] owns the pool and the one-shot schema setup
//! - [`SqlStorage`] holds the rendered statements and implements every
//!   operation against any [`Executor`]
//! - [`Connection`] (autocommit) and [`Transaction`] are the two executors
//!
//! ## Tables
//!
//! - `Orders`, `Deals` - chain entities plus `Benchmark0..N` columns
//! - `DealConditions`, `DealChangeRequests`, `DealPayments` - deal history,
//!   deleted with the deal
//! - `Profiles`, `Validators`, `Certificates`, `Workers`, `Blacklists`
//! - `StaleIDs`, `Misc` - watcher bookkeeping

pub mod codec;
pub mod context;
pub mod dialect;
pub mod executor;
pub mod matching;
pub mod postgres;
pub mod query;
pub mod requests;
pub mod schema;
pub mod sqlite;
pub mod storage;
pub mod value;

use std::path::Path;
use std::sync::Arc;

use sqlx::postgres::PgPool;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::StorageError;

pub use context::QueryContext;
pub use dialect::Dialect;
pub use executor::{Connection, Executor, Transaction};
pub use requests::*;
pub use schema::{Table, TablesInfo};
pub use storage::{ProfileStat, ProfileUpdate, SqlStorage};

use postgres::{PgConn, PgTx};
use sqlite::{SqliteConn, SqlitePool, SqliteTx};

enum Pool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

/// Pooled database handle. Share it behind an `Arc`; every method takes
/// `&self`.
pub struct Warehouse {
    config: Config,
    pool: Pool,
    storage: OnceCell<Arc<SqlStorage>>,
}

impl Warehouse {
    /// Open the pool described by `config`. The schema is not touched until
    /// [`Warehouse::setup`].
    pub async fn open(config: Config) -> Result<Self, StorageError> {
        config.validate()?;

        let pool = match config.backend {
            Dialect::Sqlite => Pool::Sqlite(sqlite::open_pool(Path::new(&config.endpoint), config.max_connections)?),
            Dialect::Postgres => Pool::Postgres(postgres::open_pool(&config.endpoint, config.max_connections).await?),
        };

        info!(
            backend = %config.backend,
            num_benchmarks = config.num_benchmarks,
            "Warehouse opened"
        );

        Ok(Self {
            config,
            pool,
            storage: OnceCell::new(),
        })
    }

    /// Create tables and indices, once per process. Later calls return the
    /// storage built by the first successful one.
    pub async fn setup(&self, ctx: &QueryContext) -> Result<Arc<SqlStorage>, StorageError> {
        let storage = self
            .storage
            .get_or_try_init(|| async {
                let storage = SqlStorage::new(self.config.backend, self.config.num_benchmarks)?;
                let conn = self.conn();
                storage.setup_tables(&conn, ctx).await?;
                storage.create_indices(&conn, ctx).await?;
                Ok::<_, StorageError>(Arc::new(storage))
            })
            .await
            .map_err(|e| match e {
                e @ (StorageError::Setup(_)
                | StorageError::Cancelled
                | StorageError::DeadlineExceeded
                | StorageError::Config(_)) => e,
                other => StorageError::Setup(other.to_string()),
            })?;
        Ok(Arc::clone(storage))
    }

    /// Storage built by [`Warehouse::setup`].
    pub fn storage(&self) -> Result<Arc<SqlStorage>, StorageError> {
        self.storage.get().cloned().ok_or(StorageError::NotInitialized)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.config.backend
    }

    /// Autocommit executor.
    pub fn conn(&self) -> Connection {
        match &self.pool {
            Pool::Sqlite(pool) => Connection::Sqlite(SqliteConn::new(pool.clone())),
            Pool::Postgres(pool) => Connection::Postgres(PgConn::new(pool.clone())),
        }
    }

    /// Start a transaction. It rolls back unless committed.
    pub async fn begin(&self, ctx: &QueryContext) -> Result<Transaction, StorageError> {
        let tx = match &self.pool {
            Pool::Sqlite(pool) => Transaction::Sqlite(SqliteTx::begin(ctx, pool).await?),
            Pool::Postgres(pool) => Transaction::Postgres(PgTx::begin(ctx, pool).await?),
        };
        Ok(tx)
    }

    /// A fresh context carrying the configured query timeout.
    pub fn context(&self) -> QueryContext {
        self.context_with(CancellationToken::new())
    }

    /// Like [`Warehouse::context`], cancelled together with `cancel`.
    pub fn context_with(&self, cancel: CancellationToken) -> QueryContext {
        let ctx = QueryContext::with_token(cancel);
        match self.config.query_timeout() {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    /// Close the pool. Pending checkouts fail afterwards.
    pub async fn close(&self) {
        if let Pool::Postgres(pool) = &self.pool {
            pool.close().await;
        }
        info!("Warehouse closed");
    }
}
