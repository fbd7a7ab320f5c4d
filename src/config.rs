//! # Tessella Configuration
//!
//! YAML-based configuration for the core. No hardcoded fallbacks for the
//! database URL: processes must either load a config file or construct the
//! config explicitly. Environment overrides follow the `TESSELLA_ENV`
//! convention (development, test, production).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tessella_core::config::CoreConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::load_from_file("config/tessella.yaml")?;
//! let pool_size = config.database.pool_size;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Number of pooled database connections used when a config does not say
/// otherwise. Cluster worker processes override this with 1 to keep the
/// number of simultaneous connections to the backing store low.
pub const DEFAULT_POOL_SIZE: u32 = 5;

/// Top-level configuration for a Tessella process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// URL of the master database server.
    pub url: String,
    /// Size of the per-process connection pool. Must be at least 1.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Workflow filesystem settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Root directory under which per-experiment workflow data is stored.
    /// When absent, the workflow root is resolved per experiment from the
    /// experiment reference row.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

impl CoreConfig {
    /// Load and validate configuration from a YAML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: CoreConfig = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the environment name for this process.
    pub fn environment() -> String {
        std::env::var("TESSELLA_ENV")
            .or_else(|_| std::env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    /// Validate invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(Error::Configuration(
                "database.url must not be empty".to_string(),
            ));
        }
        if self.database.pool_size < 1 {
            return Err(Error::Configuration(
                "database.pool_size must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Settings for a cluster worker process: a single pooled connection.
    pub fn for_cluster_worker(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessella.yaml");
        std::fs::write(
            &path,
            "database:\n  url: postgresql://tessella@localhost/tessella\n  pool_size: 2\n",
        )
        .unwrap();
        let config = CoreConfig::load_from_file(&path).unwrap();
        assert_eq!(config.database.pool_size, 2);
        assert!(config.workflow.root.is_none());
    }

    #[test]
    fn test_pool_size_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessella.yaml");
        std::fs::write(&path, "database:\n  url: postgresql://localhost/tessella\n").unwrap();
        let config = CoreConfig::load_from_file(&path).unwrap();
        assert_eq!(config.database.pool_size, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let config = CoreConfig {
            database: DatabaseConfig {
                url: "postgresql://localhost/tessella".to_string(),
                pool_size: 0,
            },
            workflow: WorkflowConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cluster_worker_uses_single_connection() {
        let db = DatabaseConfig::for_cluster_worker("postgresql://localhost/tessella");
        assert_eq!(db.pool_size, 1);
    }
}
