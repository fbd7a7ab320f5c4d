//! Channels name the imaging wavelengths of an experiment. Many parallel
//! jobs discover the same channel names while processing metadata, which
//! makes this the canonical target of the session manager's idempotent
//! `get_or_create`.

use crate::models::{ExperimentRecord, Record, UniqueRecord};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};

/// Maps to the `channels` table in the experiment schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub created_at: NaiveDateTime,
}

impl Record for Channel {
    const TABLE: &'static str = "channels";
}

impl ExperimentRecord for Channel {}

#[async_trait]
impl UniqueRecord for Channel {
    type Key = String;

    async fn find(conn: &mut PgConnection, name: &Self::Key) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT id, name, created_at FROM channels WHERE name = $1")
            .bind(name)
            .fetch_optional(conn)
            .await
    }

    async fn insert(conn: &mut PgConnection, name: &Self::Key) -> sqlx::Result<Self> {
        sqlx::query_as(
            "INSERT INTO channels (name) VALUES ($1) RETURNING id, name, created_at",
        )
        .bind(name)
        .fetch_one(conn)
        .await
    }
}

impl Channel {
    pub async fn find_all(conn: &mut PgConnection) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT id, name, created_at FROM channels ORDER BY name")
            .fetch_all(conn)
            .await
    }
}
