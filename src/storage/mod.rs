//! # Storage Subsystem
//!
//! Multi-tenant, horizontally sharded storage access: an explicit engine
//! registry, transactional sessions per tenancy tier, raw autocommit
//! connections for DDL and shard-targeted writes, and the shard partition
//! manager that converts distributed tables to range partitioning.

pub mod connection;
pub mod engine;
pub mod schema;
pub mod session;
pub mod shards;

pub use connection::{ExperimentConnection, ExperimentWorkerConnection, MainConnection};
pub use engine::DatabaseEngines;
pub use schema::{ensure_experiment_schema, experiment_schema_name, DISTRIBUTED_TABLES};
pub use session::{
    delete_location, drop_experiment, initialize_main_schema, ExperimentSession, Fetched,
    MainSession,
};
pub use shards::{customize_distributed_tables, shard_ranges, ShardRange, KEY_SPACE_MAX};
