//! # Database Engine Registry
//!
//! Explicit, constructed registry of connection pools for one process. The
//! registry owns the configured pool size and a cache of lazily-connected
//! pools keyed by server, covering the master server and any worker servers
//! reached for shard-targeted writes.
//!
//! Pools are created lazily so that constructing the registry never touches
//! the network; cluster jobs that end up doing filesystem-only work never
//! open a database connection.

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Registry of database pools for the current process.
///
/// Cheap to clone; clones share the same pool cache.
#[derive(Clone)]
pub struct DatabaseEngines {
    inner: Arc<Registry>,
}

struct Registry {
    master_url: String,
    pool_size: u32,
    pools: Mutex<HashMap<String, PgPool>>,
}

impl DatabaseEngines {
    /// Build the registry for a process from its database configuration.
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        if config.pool_size < 1 {
            return Err(Error::Configuration(
                "Pool size must be a positive integer.".to_string(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Registry {
                master_url: config.url.clone(),
                pool_size: config.pool_size,
                pools: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn master_url(&self) -> &str {
        &self.inner.master_url
    }

    pub fn pool_size(&self) -> u32 {
        self.inner.pool_size
    }

    /// Total connection cap for one pool.
    ///
    /// Cluster worker processes run with a pool size of 1 to keep the
    /// number of simultaneous connections low, but still need one extra
    /// slot so a session and a raw connection can coexist briefly. Larger
    /// pools get twice the pool size as overflow.
    fn max_connections(&self) -> u32 {
        if self.inner.pool_size == 1 {
            2
        } else {
            self.inner.pool_size * 3
        }
    }

    /// Pool for the master database server.
    pub fn master_pool(&self) -> Result<PgPool> {
        self.pool_for(&self.inner.master_url)
    }

    /// Pool for a worker server, addressed by host and port. Credentials
    /// and database name are inherited from the master URL.
    pub fn worker_pool(&self, host: &str, port: u16) -> Result<PgPool> {
        let key = format!("{host}:{port}");
        if let Some(pool) = self.inner.pools.lock().get(&key) {
            return Ok(pool.clone());
        }
        let options = PgConnectOptions::from_str(&self.inner.master_url)
            .map_err(Error::Database)?
            .host(host)
            .port(port);
        Ok(self.insert_pool(key, options))
    }

    fn pool_for(&self, url: &str) -> Result<PgPool> {
        if let Some(pool) = self.inner.pools.lock().get(url) {
            return Ok(pool.clone());
        }
        let options = PgConnectOptions::from_str(url).map_err(Error::Database)?;
        Ok(self.insert_pool(url.to_string(), options))
    }

    fn insert_pool(&self, key: String, options: PgConnectOptions) -> PgPool {
        let mut pools = self.inner.pools.lock();
        // Double-checked under the lock so concurrent first calls share one
        // pool instead of racing two into existence.
        if let Some(pool) = pools.get(&key) {
            return pool.clone();
        }
        debug!(
            server = %key,
            pool_size = self.inner.pool_size,
            max_connections = self.max_connections(),
            "create database pool"
        );
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections())
            .connect_lazy_with(options);
        pools.insert(key, pool.clone());
        pool
    }

    #[cfg(test)]
    fn cached_pool_count(&self) -> usize {
        self.inner.pools.lock().len()
    }
}
