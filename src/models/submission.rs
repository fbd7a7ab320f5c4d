//! Submissions record one request to execute a program (a workflow step or
//! a whole pipeline) for an experiment. Jobs carry their submission id so
//! that log files and batches can be traced back to what requested them.

use crate::models::{MainRecord, Record};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};

/// Maps to the `submissions` table in the global schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Submission {
    pub id: i64,
    pub experiment_id: i64,
    pub program: String,
    pub created_at: NaiveDateTime,
}

impl Record for Submission {
    const TABLE: &'static str = "submissions";
}

impl MainRecord for Submission {}

impl Submission {
    pub async fn create(
        conn: &mut PgConnection,
        experiment_id: i64,
        program: &str,
    ) -> sqlx::Result<Self> {
        sqlx::query_as(
            "INSERT INTO submissions (experiment_id, program) VALUES ($1, $2)
             RETURNING id, experiment_id, program, created_at",
        )
        .bind(experiment_id)
        .bind(program)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT id, experiment_id, program, created_at FROM submissions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    /// All submissions of one experiment, newest first.
    pub async fn find_by_experiment(
        conn: &mut PgConnection,
        experiment_id: i64,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            "SELECT id, experiment_id, program, created_at FROM submissions
             WHERE experiment_id = $1 ORDER BY created_at DESC",
        )
        .bind(experiment_id)
        .fetch_all(conn)
        .await
    }
}
