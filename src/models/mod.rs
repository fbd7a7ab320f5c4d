//! # Entity Model Layer
//!
//! Plain sqlx-backed records in two tenancy tiers. Main-schema records hold
//! the tenancy roots (experiment references and their submissions);
//! experiment-schema records live in the per-experiment schema that the
//! session manager creates lazily. Distributed records additionally carry
//! a shard-routed insert path through raw connections.
//!
//! Table names are unqualified; sessions and connections set the search
//! path for the tenant they are bound to.

use async_trait::async_trait;
use sqlx::PgConnection;

pub mod channel;
pub mod experiment_ref;
pub mod objects;
pub mod plate;
pub mod submission;

pub use channel::Channel;
pub use experiment_ref::ExperimentRef;
pub use objects::{FeatureValue, LabelValue, Mapobject, MapobjectSegmentation};
pub use plate::Plate;
pub use submission::Submission;

/// A database-backed record type.
pub trait Record {
    /// Unqualified table name.
    const TABLE: &'static str;
}

/// Records of the global schema.
pub trait MainRecord: Record {}

/// Records of a per-experiment schema.
pub trait ExperimentRecord: Record {
    /// Whether the table is distributed across shards. Distributed tables
    /// take bulk writes through raw connections only.
    const IS_DISTRIBUTED: bool = false;
}

/// Records whose rows own a location on the filesystem. Deleting rows must
/// also reclaim those locations (see the session manager's two-phase
/// delete).
pub trait FileSystemRecord: Record {
    /// Tenancy roots own a whole schema; their generic delete is forbidden.
    const OWNS_SCHEMA: bool = false;
}

/// Records with a uniqueness key supporting idempotent insertion under
/// concurrent writers.
#[async_trait]
pub trait UniqueRecord: Record + Sized + Send + Unpin {
    /// The attributes that identify one row.
    type Key: Send + Sync + std::fmt::Debug;

    /// Look up the unique row matching `key`.
    async fn find(conn: &mut PgConnection, key: &Self::Key) -> sqlx::Result<Option<Self>>;

    /// Insert the row identified by `key`. Fails with a uniqueness
    /// violation when a concurrent writer won the race.
    async fn insert(conn: &mut PgConnection, key: &Self::Key) -> sqlx::Result<Self>;
}
