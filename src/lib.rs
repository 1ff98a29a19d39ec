//! Market Warehouse - relational index of compute-marketplace chain state
//!
//! Mirrors orders, deals, deal history, profiles, validators, certificates,
//! workers and blacklists into SQLite or PostgreSQL and answers filterable,
//! paginated queries over them, including counterparty matching.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/market-warehouse/
//! ├── warehouse.db           # SQLite database (default backend)
//! └── config.toml            # Configuration
//! ```
//!
//! ## Encoding
//!
//! - Amounts (`U256`) are stored as 80-character zero-padded decimal text so
//!   that string order is numeric order
//! - Ids are plain decimal text, addresses checksummed hex
//! - Timestamps are Unix seconds

pub mod config;
pub mod db;
pub mod error;
pub mod numeric;
pub mod types;

pub use config::Config;
pub use db::{Connection, Executor, QueryContext, SqlStorage, Transaction, Warehouse};
pub use error::StorageError;
pub use types::*;
