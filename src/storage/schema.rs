//! # Schema Management
//!
//! Two tenancy tiers: the global ("main") schema holding tenancy-root
//! tables, and one private schema per experiment holding a copy of every
//! experiment-scoped table. Experiment schemas are created lazily on first
//! access and dropped only through the dedicated schema-drop path.
//!
//! All DDL here runs on raw autocommit connections; Postgres executes
//! schema statements outside the transactional session machinery.

use crate::error::Result;
use sqlx::PgConnection;
use tracing::{debug, info};

/// Distributed experiment tables, converted from hash to range partitioning
/// on schema creation so that individual shards can be targeted for
/// parallel bulk ingestion.
pub const DISTRIBUTED_TABLES: [&str; 4] = [
    "mapobjects",
    "mapobject_segmentations",
    "feature_values",
    "label_values",
];

/// Name of the schema owned by one experiment.
pub fn experiment_schema_name(experiment_id: i64) -> String {
    format!("experiment_{experiment_id}")
}

/// Check whether a schema exists.
pub async fn schema_exists(conn: &mut PgConnection, schema: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM pg_namespace WHERE nspname = $1)",
    )
    .bind(schema)
    .fetch_one(conn)
    .await?;
    Ok(exists)
}

/// Outcome of a schema-scoped create attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaCreation {
    /// This caller created the schema and must populate it.
    Created,
    /// Another caller created it first; the schema is already being
    /// populated elsewhere.
    AlreadyExists,
}

/// Create a schema, reporting who won when concurrent first-time callers
/// race. The create is schema-scoped; no global lock is taken.
pub async fn create_schema(conn: &mut PgConnection, schema: &str) -> Result<SchemaCreation> {
    debug!(schema, "create schema");
    match sqlx::query(&format!("CREATE SCHEMA {schema}")).execute(conn).await {
        Ok(_) => Ok(SchemaCreation::Created),
        // 42P06: duplicate_schema. A concurrent caller created it between
        // our existence check and now.
        Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("42P06") => {
            debug!(schema, "schema created concurrently");
            Ok(SchemaCreation::AlreadyExists)
        }
        Err(e) => Err(e.into()),
    }
}

/// Drop an experiment schema and everything in it. Used only by the
/// dedicated tenancy-root delete path.
pub async fn drop_schema(conn: &mut PgConnection, schema: &str) -> Result<()> {
    info!(schema, "drop schema");
    sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
        .execute(conn)
        .await?;
    Ok(())
}

/// Create the tables of the global schema. Idempotent; runs at process
/// bootstrap.
pub async fn create_main_tables(conn: &mut PgConnection) -> Result<()> {
    debug!("create main schema tables");
    let statements = [
        "CREATE TABLE IF NOT EXISTS experiment_refs (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            location TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT now()
        )",
        "CREATE TABLE IF NOT EXISTS submissions (
            id BIGSERIAL PRIMARY KEY,
            experiment_id BIGINT NOT NULL REFERENCES experiment_refs(id),
            program TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT now()
        )",
    ];
    for statement in statements {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Create every experiment-scoped table inside `schema`, including the
/// distributed tables and their table-wide ID sequences.
///
/// Distribution starts out hash-based; the shard partition manager converts
/// the distributed tables to range partitioning immediately afterwards
/// (see [`crate::storage::shards`]).
pub async fn create_experiment_tables(conn: &mut PgConnection, schema: &str) -> Result<()> {
    info!(schema, "create experiment tables");
    let statements = [
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.channels (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TIMESTAMP NOT NULL DEFAULT now()
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.plates (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                location TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT now()
            )"
        ),
        // Distributed tables draw their ids from explicit sequences; the
        // distribution column must be BIGINT for range partitioning.
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.mapobjects (
                id BIGINT NOT NULL,
                object_type TEXT NOT NULL,
                PRIMARY KEY (id)
            )"
        ),
        format!("CREATE SEQUENCE IF NOT EXISTS {schema}.mapobjects_id_seq"),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.mapobject_segmentations (
                id BIGINT NOT NULL,
                mapobject_id BIGINT NOT NULL,
                geometry TEXT NOT NULL,
                tpoint INTEGER NOT NULL DEFAULT 0,
                zplane INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (id)
            )"
        ),
        format!("CREATE SEQUENCE IF NOT EXISTS {schema}.mapobject_segmentations_id_seq"),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.feature_values (
                id BIGINT NOT NULL,
                mapobject_id BIGINT NOT NULL,
                values JSONB NOT NULL,
                tpoint INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (id)
            )"
        ),
        format!("CREATE SEQUENCE IF NOT EXISTS {schema}.feature_values_id_seq"),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.label_values (
                id BIGINT NOT NULL,
                mapobject_id BIGINT NOT NULL,
                values JSONB NOT NULL,
                tpoint INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (id)
            )"
        ),
        format!("CREATE SEQUENCE IF NOT EXISTS {schema}.label_values_id_seq"),
    ];
    for statement in &statements {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    for table in DISTRIBUTED_TABLES {
        sqlx::query("SELECT create_distributed_table($1, 'id', 'hash')")
            .bind(format!("{schema}.{table}"))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Make sure the schema of `experiment_id` exists and is fully populated,
/// returning its name.
///
/// Safe under concurrent first-time callers: the existence check plus the
/// schema-scoped create decide one winner, and only the winner creates the
/// tables and customizes the shard ranges. Losers return immediately and
/// rely on the winner; no global lock is involved. Table creation always
/// completes before shard customization, which completes before any
/// distributed-table write can be routed.
pub async fn ensure_experiment_schema(
    conn: &mut PgConnection,
    experiment_id: i64,
) -> Result<String> {
    let schema = experiment_schema_name(experiment_id);
    if schema_exists(conn, &schema).await? {
        return Ok(schema);
    }
    match create_schema(conn, &schema).await? {
        SchemaCreation::Created => {
            create_experiment_tables(conn, &schema).await?;
            crate::storage::shards::customize_distributed_tables(conn, &schema).await?;
        }
        SchemaCreation::AlreadyExists => {}
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_name_is_deterministic() {
        assert_eq!(experiment_schema_name(7), "experiment_7");
        assert_eq!(experiment_schema_name(1203), "experiment_1203");
    }

    #[test]
    fn test_distributed_set_is_fixed() {
        assert_eq!(DISTRIBUTED_TABLES.len(), 4);
        assert!(DISTRIBUTED_TABLES.contains(&"feature_values"));
    }
}
