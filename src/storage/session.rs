//! # Storage Session Manager
//!
//! Scoped, transactional access to the relational store in two tenancy
//! tiers: [`MainSession`] for the global schema and [`ExperimentSession`]
//! for one experiment's private schema.
//!
//! ## Lifecycle
//!
//! A session wraps one pooled connection inside a transaction. Committing
//! consumes the session; dropping it without committing rolls the
//! transaction back. Either way the connection returns to its pool, on
//! every exit path.
//!
//! ## First access to an experiment
//!
//! `ExperimentSession::begin` bootstraps the experiment schema when it does
//! not exist yet: schema creation, table creation, then shard-range
//! customization, in that order, idempotent under concurrent first-time
//! callers (see [`crate::storage::schema::ensure_experiment_schema`]).
//!
//! Sessions are not thread-safe; each logical worker owns its session
//! exclusively.

use crate::error::{Error, Result};
use crate::models::{ExperimentRecord, FileSystemRecord, MainRecord, UniqueRecord};
use crate::storage::connection::MainConnection;
use crate::storage::engine::DatabaseEngines;
use crate::storage::schema::{
    create_main_tables, drop_schema, ensure_experiment_schema, experiment_schema_name,
};
use sqlx::{Acquire, PgConnection, Postgres, Transaction};
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of an idempotent lookup-or-insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<M> {
    /// The row already existed (possibly inserted by a concurrent writer
    /// that won the race).
    Found(M),
    /// This caller inserted the row.
    Created(M),
}

impl<M> Fetched<M> {
    pub fn into_inner(self) -> M {
        match self {
            Fetched::Found(row) | Fetched::Created(row) => row,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Fetched::Created(_))
    }
}

/// Transactional session bound to the global schema.
pub struct MainSession {
    tx: Transaction<'static, Postgres>,
}

impl MainSession {
    pub async fn begin(engines: &DatabaseEngines) -> Result<Self> {
        let tx = engines.master_pool()?.begin().await?;
        Ok(Self { tx })
    }

    pub fn executor(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Commit all work of this session.
    pub async fn commit(self) -> Result<()> {
        debug!("commit main session");
        self.tx.commit().await?;
        Ok(())
    }

    /// Look up a unique row, inserting it when absent. See
    /// [`get_or_create_in`] for the race behavior.
    pub async fn get_or_create<M: UniqueRecord + MainRecord>(
        &mut self,
        key: &M::Key,
    ) -> Result<Fetched<M>> {
        get_or_create_in(&mut self.tx, key).await
    }

    /// Delete all rows of a filesystem-backed main-schema model together
    /// with their on-disk locations. Consumes the session; see
    /// [`delete_rows_then_locations`].
    pub async fn delete_all_with_locations<M: FileSystemRecord + MainRecord>(
        self,
    ) -> Result<u64> {
        delete_rows_then_locations::<M>(self.tx).await
    }
}

/// Transactional session bound to one experiment's schema.
pub struct ExperimentSession {
    tx: Transaction<'static, Postgres>,
    experiment_id: i64,
    schema: String,
}

impl ExperimentSession {
    pub async fn begin(engines: &DatabaseEngines, experiment_id: i64) -> Result<Self> {
        debug!(experiment_id, "begin experiment session");
        let pool = engines.master_pool()?;
        // Schema bootstrap needs autocommit DDL, so it runs on a plain
        // pooled connection before the transaction opens.
        let schema = {
            let mut conn = pool.acquire().await?;
            ensure_experiment_schema(&mut conn, experiment_id).await?
        };
        let mut tx = pool.begin().await?;
        // Scoped to this transaction; the pooled connection comes back
        // clean for its next user.
        sqlx::query(&format!("SET LOCAL search_path TO public, {schema}"))
            .execute(&mut *tx)
            .await?;
        Ok(Self {
            tx,
            experiment_id,
            schema,
        })
    }

    pub fn experiment_id(&self) -> i64 {
        self.experiment_id
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn executor(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Commit all work of this session.
    pub async fn commit(self) -> Result<()> {
        debug!(experiment_id = self.experiment_id, "commit experiment session");
        self.tx.commit().await?;
        Ok(())
    }

    /// Look up a unique row, inserting it when absent. See
    /// [`get_or_create_in`] for the race behavior.
    pub async fn get_or_create<M: UniqueRecord + ExperimentRecord>(
        &mut self,
        key: &M::Key,
    ) -> Result<Fetched<M>> {
        get_or_create_in(&mut self.tx, key).await
    }

    /// Delete all rows of a filesystem-backed experiment model together
    /// with their on-disk locations. Consumes the session; see
    /// [`delete_rows_then_locations`].
    pub async fn delete_all_with_locations<M: FileSystemRecord + ExperimentRecord>(
        self,
    ) -> Result<u64> {
        delete_rows_then_locations::<M>(self.tx).await
    }
}

/// Idempotent lookup-or-insert against a uniqueness constraint.
///
/// Concurrent writers inserting the same key are expected to collide here
/// and nowhere else. The loser's insert fails on the constraint, is rolled
/// back to a savepoint, and resolved by exactly one re-read. A failing
/// re-read means something other than the race went wrong and escalates as
/// an integrity error; there is no unbounded retry.
async fn get_or_create_in<M: UniqueRecord>(
    tx: &mut Transaction<'static, Postgres>,
    key: &M::Key,
) -> Result<Fetched<M>> {
    if let Some(found) = M::find(&mut *tx, key).await? {
        debug!(table = M::TABLE, key = ?key, "found existing row");
        return Ok(Fetched::Found(found));
    }
    let mut savepoint = tx.begin().await?;
    match M::insert(&mut *savepoint, key).await {
        Ok(created) => {
            savepoint.commit().await?;
            debug!(table = M::TABLE, key = ?key, "created new row");
            Ok(Fetched::Created(created))
        }
        Err(err) if is_unique_violation(&err) => {
            savepoint.rollback().await?;
            warn!(
                table = M::TABLE,
                key = ?key,
                "lost insert race, re-reading"
            );
            match M::find(&mut *tx, key).await? {
                Some(found) => Ok(Fetched::Found(found)),
                None => Err(Error::Integrity(format!(
                    "row in {} vanished after a uniqueness conflict on {key:?}",
                    M::TABLE
                ))),
            }
        }
        Err(err) => Err(err.into()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Two-phase delete of a filesystem-backed model: collect the locations of
/// the affected rows inside the transaction, commit the row delete, then
/// remove the locations from disk. A failed delete leaves every location
/// intact; locations are never touched before the commit succeeds.
async fn delete_rows_then_locations<M: FileSystemRecord>(
    mut tx: Transaction<'static, Postgres>,
) -> Result<u64> {
    ensure_generic_delete_allowed::<M>()?;
    let locations: Vec<String> =
        sqlx::query_scalar(&format!("SELECT location FROM {}", M::TABLE))
            .fetch_all(&mut *tx)
            .await?;
    let deleted = sqlx::query(&format!("DELETE FROM {}", M::TABLE))
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    info!(table = M::TABLE, rows = deleted, "deleted rows, reclaiming locations");
    for location in &locations {
        delete_location(Path::new(location));
    }
    Ok(deleted)
}

/// Tenancy roots own a schema; their rows must go through
/// [`drop_experiment`] so the schema is dropped exactly once.
fn ensure_generic_delete_allowed<M: FileSystemRecord>() -> Result<()> {
    if M::OWNS_SCHEMA {
        return Err(Error::RequiresSchemaDrop(M::TABLE));
    }
    Ok(())
}

/// Remove a file or directory tree from disk. Missing paths are fine; a
/// re-run after a crash between commit and cleanup must not fail.
pub fn delete_location(path: &Path) {
    if !path.exists() {
        return;
    }
    debug!(path = %path.display(), "remove location");
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(err) = result {
        warn!(path = %path.display(), error = %err, "could not remove location");
    }
}

/// Create the global-schema tables. Runs at process bootstrap, before any
/// session is opened.
pub async fn initialize_main_schema(engines: &DatabaseEngines) -> Result<()> {
    let mut conn = MainConnection::connect(engines).await?;
    create_main_tables(conn.executor()).await
}

/// Delete an experiment through the dedicated tenancy-root path: the
/// reference row and its submissions go first, then the experiment schema
/// is dropped (cascade) exactly once, then the workflow directory is
/// reclaimed.
pub async fn drop_experiment(engines: &DatabaseEngines, experiment_id: i64) -> Result<()> {
    info!(experiment_id, "drop experiment");
    let mut session = MainSession::begin(engines).await?;
    let reference =
        crate::models::ExperimentRef::find_by_id(session.executor(), experiment_id)
            .await?
            .ok_or_else(|| {
                Error::InvalidArgument(format!("no experiment with id {experiment_id}"))
            })?;
    sqlx::query("DELETE FROM submissions WHERE experiment_id = $1")
        .bind(experiment_id)
        .execute(session.executor())
        .await?;
    sqlx::query("DELETE FROM experiment_refs WHERE id = $1")
        .bind(experiment_id)
        .execute(session.executor())
        .await?;
    session.commit().await?;

    let mut conn = MainConnection::connect(engines).await?;
    drop_schema(conn.executor(), &experiment_schema_name(experiment_id)).await?;
    delete_location(Path::new(&reference.location));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetched_unwraps_both_arms() {
        assert_eq!(Fetched::Found(3).into_inner(), 3);
        assert_eq!(Fetched::Created(4).into_inner(), 4);
        assert!(Fetched::Created(()).was_created());
        assert!(!Fetched::Found(()).was_created());
    }

    #[test]
    fn test_tenancy_root_delete_is_forbidden() {
        let err = ensure_generic_delete_allowed::<crate::models::ExperimentRef>().unwrap_err();
        assert!(matches!(err, Error::RequiresSchemaDrop("experiment_refs")));
        assert!(ensure_generic_delete_allowed::<crate::models::Plate>().is_ok());
    }

    #[test]
    fn test_delete_location_tolerates_missing_paths() {
        delete_location(Path::new("/nonexistent/tessella/location"));
    }

    #[test]
    fn test_delete_location_removes_files_and_trees() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plate.json");
        std::fs::write(&file, "{}").unwrap();
        delete_location(&file);
        assert!(!file.exists());

        let tree = dir.path().join("plate_01");
        std::fs::create_dir_all(tree.join("acquisitions")).unwrap();
        delete_location(&tree);
        assert!(!tree.exists());
    }
}
