//! Configuration for market-warehouse

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::dialect::Dialect;
use crate::db::schema::MAX_BENCHMARKS;
use crate::error::StorageError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("market-warehouse")
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Database backend
    #[serde(default = "default_backend")]
    pub backend: Dialect,

    /// SQLite file path or PostgreSQL URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Number of benchmark columns on Orders and Deals. Fixed for the life
    /// of a database.
    #[serde(default = "default_num_benchmarks")]
    pub num_benchmarks: usize,

    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Per-call deadline in seconds (0 = none)
    #[serde(default)]
    pub query_timeout_secs: u64,
}

fn default_backend() -> Dialect {
    Dialect::Sqlite
}

fn default_endpoint() -> String {
    default_storage_dir().join("warehouse.db").display().to_string()
}

fn default_num_benchmarks() -> usize {
    12
}

fn default_max_connections() -> u32 {
    8
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: default_endpoint(),
            num_benchmarks: default_num_benchmarks(),
            max_connections: default_max_connections(),
            query_timeout_secs: 0,
        }
    }
}

impl Config {
    /// Config for a SQLite database file
    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        Self {
            backend: Dialect::Sqlite,
            endpoint: path.as_ref().display().to_string(),
            ..Default::default()
        }
    }

    /// Config for a PostgreSQL URL
    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            backend: Dialect::Postgres,
            endpoint: url.into(),
            ..Default::default()
        }
    }

    pub fn with_benchmarks(mut self, num_benchmarks: usize) -> Self {
        self.num_benchmarks = num_benchmarks;
        self
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| StorageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let content = toml::to_string_pretty(self).map_err(|e| StorageError::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.num_benchmarks > MAX_BENCHMARKS {
            return Err(StorageError::Config(format!(
                "num_benchmarks {} exceeds the maximum of {}",
                self.num_benchmarks, MAX_BENCHMARKS
            )));
        }
        if self.endpoint.is_empty() {
            return Err(StorageError::Config("endpoint must not be empty".into()));
        }
        if self.max_connections == 0 {
            return Err(StorageError::Config("max_connections must be at least 1".into()));
        }
        if self.backend == Dialect::Postgres
            && !(self.endpoint.starts_with("postgres://") || self.endpoint.starts_with("postgresql://"))
        {
            return Err(StorageError::Config(format!(
                "postgres endpoint must be a postgres:// URL, got {}",
                self.endpoint
            )));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        match self.query_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Get config file path
    pub fn config_path() -> PathBuf {
        default_storage_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend, Dialect::Sqlite);
        assert_eq!(config.num_benchmarks, 12);
        assert!(config.query_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = toml::from_str("backend = \"postgres\"\nendpoint = \"postgres://localhost/dwh\"").unwrap();
        assert_eq!(config.backend, Dialect::Postgres);
        assert_eq!(config.num_benchmarks, 12);
        assert_eq!(config.max_connections, 8);
    }

    #[test]
    fn test_validate_rejects_too_many_benchmarks() {
        let config = Config::default().with_benchmarks(MAX_BENCHMARKS + 1);
        assert!(matches!(config.validate(), Err(StorageError::Config(_))));
        assert!(Config::default().with_benchmarks(MAX_BENCHMARKS).validate().is_ok());
    }

    #[test]
    fn test_validate_postgres_endpoint() {
        let config = Config::postgres("/tmp/not-a-url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::sqlite(dir.path().join("w.db")).with_benchmarks(3);
        config.query_timeout_secs = 5;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.query_timeout(), Some(Duration::from_secs(5)));
    }
}
