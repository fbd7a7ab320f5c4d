//! # Shard Partition Manager
//!
//! Experiment-scoped distributed tables start out hash-partitioned. To let
//! many cluster worker processes bulk-insert in parallel without
//! coordination, each table is converted to range partitioning on schema
//! creation: the positive signed 64-bit key space is split into one
//! contiguous range per physical shard, and each shard gets an ID sequence
//! bounded to exactly its range. A writer pinned to one shard can then draw
//! ids lock-free without ever colliding with writers on other shards.
//!
//! Runs exactly once per experiment schema, guarded by the schema-creation
//! check in the session manager.

use crate::error::{Error, Result};
use crate::storage::schema::DISTRIBUTED_TABLES;
use sqlx::{PgConnection, Row};
use tracing::{debug, info};

/// Upper end of the positive signed 64-bit key space.
pub const KEY_SPACE_MAX: i64 = i64::MAX;

/// An assigned shard range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRange {
    pub min_value: i64,
    pub max_value: i64,
}

/// Partition `[1, KEY_SPACE_MAX]` into `shard_count` contiguous,
/// non-overlapping ranges in ascending order.
///
/// Integer division leaves a remainder of less than `shard_count` keys; the
/// last shard's range absorbs it so the union always covers the full key
/// space.
pub fn shard_ranges(shard_count: usize) -> Result<Vec<ShardRange>> {
    if shard_count == 0 {
        return Err(Error::InvalidArgument(
            "cannot partition the key space across zero shards".to_string(),
        ));
    }
    let count = shard_count as i64;
    let width = KEY_SPACE_MAX / count;
    let mut ranges = Vec::with_capacity(shard_count);
    for i in 0..count {
        let min_value = i * width + 1;
        let max_value = if i == count - 1 {
            KEY_SPACE_MAX
        } else {
            (i + 1) * width
        };
        ranges.push(ShardRange { min_value, max_value });
    }
    Ok(ranges)
}

/// Convert every distributed table of `schema` from hash to range
/// partitioning and assign per-shard key ranges and ID sequences.
///
/// Requires a raw autocommit connection; the partition catalog updates and
/// the sequence DDL cannot run inside a transaction that also carries
/// ordinary writes.
pub async fn customize_distributed_tables(conn: &mut PgConnection, schema: &str) -> Result<()> {
    info!(schema, "customize distributed tables for range partitioning");
    for table in DISTRIBUTED_TABLES {
        let qualified = format!("{schema}.{table}");
        sqlx::query("UPDATE pg_dist_partition SET partmethod = 'r' WHERE logicalrelid = $1::regclass")
            .bind(&qualified)
            .execute(&mut *conn)
            .await?;

        let shard_ids: Vec<i64> = sqlx::query(
            "SELECT shardid FROM pg_dist_shard WHERE logicalrelid = $1::regclass ORDER BY shardid",
        )
        .bind(&qualified)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|row| row.get::<i64, _>("shardid"))
        .collect();

        if shard_ids.is_empty() {
            return Err(Error::Integrity(format!(
                "distributed table {qualified} has no shards"
            )));
        }
        let ranges = shard_ranges(shard_ids.len())?;

        for (shard_id, range) in shard_ids.iter().zip(&ranges) {
            debug!(
                table = %qualified,
                shard_id,
                min = range.min_value,
                max = range.max_value,
                "assign shard range"
            );
            // The shard bound columns of the partition catalog are text.
            sqlx::query(
                "UPDATE pg_dist_shard SET shardminvalue = $1
                 WHERE logicalrelid = $2::regclass AND shardid = $3",
            )
            .bind(range.min_value.to_string())
            .bind(&qualified)
            .bind(shard_id)
            .execute(&mut *conn)
            .await?;
            sqlx::query(
                "UPDATE pg_dist_shard SET shardmaxvalue = $1
                 WHERE logicalrelid = $2::regclass AND shardid = $3",
            )
            .bind(range.max_value.to_string())
            .bind(&qualified)
            .bind(shard_id)
            .execute(&mut *conn)
            .await?;
            sqlx::query(&format!(
                "CREATE SEQUENCE {schema}.{table}_id_seq_{shard_id} \
                 MINVALUE {} MAXVALUE {}",
                range.min_value, range.max_value
            ))
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}
