//! Plates are the filesystem-backed containers of acquired images within
//! one experiment. Each row owns a directory below the experiment's
//! workflow root; deleting plate rows goes through the session manager's
//! two-phase delete so the directories are reclaimed as well.

use crate::models::{ExperimentRecord, FileSystemRecord, Record};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use std::path::Path;

/// Maps to the `plates` table in the experiment schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Plate {
    pub id: i64,
    pub name: String,
    /// Absolute path of the plate's directory on disk.
    pub location: String,
    pub created_at: NaiveDateTime,
}

impl Record for Plate {
    const TABLE: &'static str = "plates";
}

impl ExperimentRecord for Plate {}

impl FileSystemRecord for Plate {}

impl Plate {
    pub async fn create(
        conn: &mut PgConnection,
        name: &str,
        location: &Path,
    ) -> sqlx::Result<Self> {
        sqlx::query_as(
            "INSERT INTO plates (name, location) VALUES ($1, $2)
             RETURNING id, name, location, created_at",
        )
        .bind(name)
        .bind(location.to_string_lossy().as_ref())
        .fetch_one(conn)
        .await
    }

    pub async fn find_all(conn: &mut PgConnection) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT id, name, location, created_at FROM plates ORDER BY name")
            .fetch_all(conn)
            .await
    }
}
