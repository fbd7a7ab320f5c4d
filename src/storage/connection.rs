//! # Raw Connection Manager
//!
//! Autocommit, non-transactional database access. Raw connections are
//! required for DDL, shard partition mutation, and shard-targeted bulk
//! writes to distributed tables: an ordinary transactional write to a
//! distributed table cannot target a single shard deterministically.
//!
//! A connection object belongs to exactly one logical worker at a time and
//! must never be interleaved with an open transactional session on the same
//! unit of work.

use crate::error::{Error, Result};
use crate::models::ExperimentRecord;
use crate::storage::engine::DatabaseEngines;
use crate::storage::schema::{ensure_experiment_schema, experiment_schema_name};
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, Postgres, Row};
use std::collections::HashMap;
use tracing::debug;

/// Raw connection to the master server, bound to the global schema.
pub struct MainConnection {
    conn: PoolConnection<Postgres>,
}

impl MainConnection {
    pub async fn connect(engines: &DatabaseEngines) -> Result<Self> {
        let conn = engines.master_pool()?.acquire().await?;
        Ok(Self { conn })
    }

    pub fn executor(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

/// Raw connection to the master server, bound to one experiment's schema.
///
/// Ensures the experiment schema exists on entry, then pins the search path
/// to it. Shard selection is cached per connection and model, so repeated
/// writes from the same worker stay on one shard.
pub struct ExperimentConnection {
    conn: PoolConnection<Postgres>,
    experiment_id: i64,
    schema: String,
    shard_cache: HashMap<&'static str, i64>,
}

impl ExperimentConnection {
    pub async fn connect(engines: &DatabaseEngines, experiment_id: i64) -> Result<Self> {
        let mut conn = engines.master_pool()?.acquire().await?;
        let schema = ensure_experiment_schema(&mut conn, experiment_id).await?;
        set_search_path(&mut conn, &schema).await?;
        set_commutative_modifications(&mut conn).await?;
        Ok(Self {
            conn,
            experiment_id,
            schema,
            shard_cache: HashMap::new(),
        })
    }

    pub fn experiment_id(&self) -> i64 {
        self.experiment_id
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn executor(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Select one shard of `M`'s table at random and pin this connection to
    /// it. Subsequent calls return the cached shard.
    pub async fn shard_id<M: ExperimentRecord>(&mut self) -> Result<i64> {
        require_distributed::<M>()?;
        if let Some(&shard_id) = self.shard_cache.get(M::TABLE) {
            return Ok(shard_id);
        }
        let shard_id: i64 = sqlx::query(
            "SELECT shardid FROM pg_dist_shard
             WHERE logicalrelid = $1::regclass
             ORDER BY random() LIMIT 1",
        )
        .bind(format!("{}.{}", self.schema, M::TABLE))
        .fetch_one(&mut *self.conn)
        .await?
        .get("shardid");
        debug!(table = M::TABLE, shard_id, "pinned writer to shard");
        self.shard_cache.insert(M::TABLE, shard_id);
        Ok(shard_id)
    }

    /// Next value of the table-wide ID sequence of `M`.
    pub async fn unique_id<M: ExperimentRecord>(&mut self) -> Result<i64> {
        let sequence = format!("{}.{}_id_seq", self.schema, M::TABLE);
        next_sequence_value(&mut self.conn, &sequence).await
    }

    /// Next value of the shard-scoped ID sequence of `M`. Values drawn here
    /// fall inside the shard's key range, which is what lets many
    /// concurrent writers insert in parallel without colliding.
    pub async fn shard_specific_unique_id<M: ExperimentRecord>(
        &mut self,
        shard_id: i64,
    ) -> Result<i64> {
        require_distributed::<M>()?;
        let sequence = format!("{}.{}_id_seq_{shard_id}", self.schema, M::TABLE);
        next_sequence_value(&mut self.conn, &sequence).await
    }
}

/// Raw connection to one worker server, for targeting the shards physically
/// placed there. The worker is chosen at random for load balancing.
pub struct ExperimentWorkerConnection {
    engines: DatabaseEngines,
    conn: PoolConnection<Postgres>,
    experiment_id: i64,
    schema: String,
    host: String,
    port: u16,
    shard_cache: HashMap<&'static str, i64>,
}

impl ExperimentWorkerConnection {
    pub async fn connect(engines: &DatabaseEngines, experiment_id: i64) -> Result<Self> {
        let (host, port) = {
            let mut main = MainConnection::connect(engines).await?;
            let row = sqlx::query(
                "SELECT nodename, nodeport FROM pg_dist_shard_placement
                 ORDER BY random() LIMIT 1",
            )
            .fetch_one(main.executor())
            .await?;
            (row.get::<String, _>("nodename"), row.get::<i32, _>("nodeport") as u16)
        };
        debug!(host = %host, port, "connect to worker server");
        let mut conn = engines.worker_pool(&host, port)?.acquire().await?;
        let schema = experiment_schema_name(experiment_id);
        set_search_path(&mut conn, &schema).await?;
        set_commutative_modifications(&mut conn).await?;
        Ok(Self {
            engines: engines.clone(),
            conn,
            experiment_id,
            schema,
            host,
            port,
            shard_cache: HashMap::new(),
        })
    }

    pub fn experiment_id(&self) -> i64 {
        self.experiment_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn executor(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Select one shard of `M`'s table among those placed on this worker
    /// server, and pin the connection to it.
    pub async fn shard_id<M: ExperimentRecord>(&mut self) -> Result<i64> {
        require_distributed::<M>()?;
        if let Some(&shard_id) = self.shard_cache.get(M::TABLE) {
            return Ok(shard_id);
        }
        // Shard metadata lives in the master catalogs.
        let mut main = MainConnection::connect(&self.engines).await?;
        let shard_id: i64 = sqlx::query(
            "SELECT s.shardid FROM pg_dist_shard AS s
             JOIN pg_dist_shard_placement AS p ON s.shardid = p.shardid
             WHERE s.logicalrelid = $1::regclass
             AND p.nodename = $2
             AND p.nodeport = $3
             ORDER BY random() LIMIT 1",
        )
        .bind(format!("{}.{}", self.schema, M::TABLE))
        .bind(&self.host)
        .bind(self.port as i32)
        .fetch_one(main.executor())
        .await?
        .get("shardid");
        debug!(table = M::TABLE, shard_id, host = %self.host, "pinned writer to local shard");
        self.shard_cache.insert(M::TABLE, shard_id);
        Ok(shard_id)
    }

    /// Next value of the shard-scoped ID sequence of `M`. Sequences live on
    /// the master server.
    pub async fn shard_specific_unique_id<M: ExperimentRecord>(
        &mut self,
        shard_id: i64,
    ) -> Result<i64> {
        require_distributed::<M>()?;
        let mut main = MainConnection::connect(&self.engines).await?;
        let sequence = format!("{}.{}_id_seq_{shard_id}", self.schema, M::TABLE);
        next_sequence_value(main.executor(), &sequence).await
    }
}

fn require_distributed<M: ExperimentRecord>() -> Result<()> {
    if !M::IS_DISTRIBUTED {
        return Err(Error::InvalidArgument(format!(
            "table {} is not distributed; shard selection is not possible",
            M::TABLE
        )));
    }
    Ok(())
}

async fn next_sequence_value(conn: &mut PgConnection, sequence: &str) -> Result<i64> {
    let value: i64 = sqlx::query_scalar("SELECT nextval($1::text::regclass)")
        .bind(sequence)
        .fetch_one(conn)
        .await?;
    Ok(value)
}

async fn set_search_path(conn: &mut PgConnection, schema: &str) -> Result<()> {
    debug!(schema, "set search path");
    sqlx::query(&format!("SET search_path TO public, {schema}"))
        .execute(conn)
        .await?;
    Ok(())
}

/// Bulk modifications from parallel workers are commutative: row order does
/// not matter, so the coordinator does not need to serialize them.
async fn set_commutative_modifications(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("SET citus.shard_replication_factor = 1")
        .execute(&mut *conn)
        .await?;
    sqlx::query("SET citus.all_modifications_commutative TO on")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, Mapobject};

    #[test]
    fn test_shard_selection_requires_a_distributed_table() {
        assert!(require_distributed::<Channel>().is_err());
        assert!(require_distributed::<Mapobject>().is_ok());
    }
}
