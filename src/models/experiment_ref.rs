//! # Experiment Reference Model
//!
//! The tenancy root. Each row owns a dedicated `experiment_{id}` schema and
//! the workflow directory tree on disk, so deleting one is only possible
//! through the dedicated schema-drop path of the session manager.

use crate::models::{FileSystemRecord, MainRecord, Record};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use std::path::{Path, PathBuf};

/// Reference to one experiment. Maps to the `experiment_refs` table in the
/// global schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExperimentRef {
    pub id: i64,
    pub name: String,
    /// Absolute path of the experiment's workflow directory.
    pub location: String,
    pub created_at: NaiveDateTime,
}

impl Record for ExperimentRef {
    const TABLE: &'static str = "experiment_refs";
}

impl MainRecord for ExperimentRef {}

impl FileSystemRecord for ExperimentRef {
    const OWNS_SCHEMA: bool = true;
}

impl ExperimentRef {
    pub async fn create(
        conn: &mut PgConnection,
        name: &str,
        location: &Path,
    ) -> sqlx::Result<Self> {
        sqlx::query_as(
            "INSERT INTO experiment_refs (name, location) VALUES ($1, $2)
             RETURNING id, name, location, created_at",
        )
        .bind(name)
        .bind(location.to_string_lossy().as_ref())
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT id, name, location, created_at FROM experiment_refs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    pub async fn find_by_name(conn: &mut PgConnection, name: &str) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT id, name, location, created_at FROM experiment_refs WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(conn)
        .await
    }

    /// Root directory for this experiment's workflow data.
    pub fn workflow_root(&self) -> PathBuf {
        PathBuf::from(&self.location)
    }
}
