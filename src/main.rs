//! Market Warehouse
//!
//! Opens the store, creates the schema and reports where the chain watcher
//! will resume.
//!
//! ## Usage
//!
//! ```bash
//! # SQLite in the default data directory
//! market-warehouse
//!
//! # Custom config file
//! market-warehouse --config /path/to/config.toml
//!
//! # PostgreSQL with 16 benchmarks, starting from block 4200000
//! market-warehouse --backend postgres --endpoint postgres://localhost/dwh \
//!     --num-benchmarks 16 --start-block 4200000
//! ```

use anyhow::Context;
use clap::Parser;
use market_warehouse::db::Dialect;
use market_warehouse::{Config, Warehouse};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "market-warehouse")]
#[command(about = "Relational index of compute-marketplace chain state")]
struct Args {
    /// Path to config file (defaults to config.toml in the data directory)
    #[arg(short, long, env = "MARKET_WAREHOUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Database backend (sqlite or postgres)
    #[arg(long, env = "MARKET_WAREHOUSE_BACKEND")]
    backend: Option<Dialect>,

    /// SQLite file path or PostgreSQL URL
    #[arg(long, env = "MARKET_WAREHOUSE_ENDPOINT")]
    endpoint: Option<String>,

    /// Benchmark columns on orders and deals
    #[arg(long, env = "MARKET_WAREHOUSE_NUM_BENCHMARKS")]
    num_benchmarks: Option<usize>,

    /// Pool size
    #[arg(long)]
    max_connections: Option<u32>,

    /// Per-call deadline in seconds
    #[arg(long)]
    query_timeout_secs: Option<u64>,

    /// Block to record as last known when the database has none
    #[arg(long, default_value_t = 0)]
    start_block: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("market_warehouse=info".parse()?))
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = if args.config.is_some() || config_path.exists() {
        Config::load(&config_path).with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };

    // CLI overrides
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(n) = args.num_benchmarks {
        config.num_benchmarks = n;
    }
    if let Some(n) = args.max_connections {
        config.max_connections = n;
    }
    if let Some(secs) = args.query_timeout_secs {
        config.query_timeout_secs = secs;
    }

    info!(
        backend = %config.backend,
        endpoint = %config.endpoint,
        num_benchmarks = config.num_benchmarks,
        "Starting market-warehouse"
    );

    let warehouse = Warehouse::open(config).await.context("opening database")?;

    // Handle shutdown signal
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("Interrupted, cancelling pending queries");
        on_signal.cancel();
    });

    let ctx = warehouse.context_with(shutdown);
    let storage = warehouse.setup(&ctx).await.context("schema setup")?;

    let conn = warehouse.conn();
    let block = match storage.get_last_known_block(&conn, &ctx).await {
        Ok(block) => block,
        Err(e) if e.is_not_found() => {
            storage.insert_last_known_block(&conn, &ctx, args.start_block).await?;
            info!(block = args.start_block, "Seeded last known block");
            args.start_block
        }
        Err(e) => return Err(e.into()),
    };

    info!(block, "Warehouse ready");
    warehouse.close().await;
    Ok(())
}
