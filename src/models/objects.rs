//! # Distributed Object Models
//!
//! The segmentation and measurement tables hold the bulk of an
//! experiment's derived data: millions of rows produced in parallel by
//! cluster jobs. They are range-sharded, and every insert goes through a
//! raw connection that pins the writer to one shard and draws ids from that
//! shard's bounded sequence. Transactional sessions never write these
//! tables.

use crate::error::Result;
use crate::models::{ExperimentRecord, Record};
use crate::storage::connection::ExperimentConnection;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A segmented object (a cell, a nucleus) identified within an experiment.
/// Maps to the distributed `mapobjects` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Mapobject {
    pub id: i64,
    pub object_type: String,
}

impl Record for Mapobject {
    const TABLE: &'static str = "mapobjects";
}

impl ExperimentRecord for Mapobject {
    const IS_DISTRIBUTED: bool = true;
}

impl Mapobject {
    /// Insert one object on the shard this connection is pinned to and
    /// return its id.
    pub async fn add(conn: &mut ExperimentConnection, object_type: &str) -> Result<i64> {
        let shard_id = conn.shard_id::<Self>().await?;
        let id = conn.shard_specific_unique_id::<Self>(shard_id).await?;
        sqlx::query("INSERT INTO mapobjects (id, object_type) VALUES ($1, $2)")
            .bind(id)
            .bind(object_type)
            .execute(conn.executor())
            .await?;
        Ok(id)
    }
}

/// Geometric outline of one object at one time point and plane. Maps to the
/// distributed `mapobject_segmentations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MapobjectSegmentation {
    pub id: i64,
    pub mapobject_id: i64,
    /// Well-known-text encoding of the outline polygon.
    pub geometry: String,
    pub tpoint: i32,
    pub zplane: i32,
}

impl Record for MapobjectSegmentation {
    const TABLE: &'static str = "mapobject_segmentations";
}

impl ExperimentRecord for MapobjectSegmentation {
    const IS_DISTRIBUTED: bool = true;
}

impl MapobjectSegmentation {
    pub async fn add(
        conn: &mut ExperimentConnection,
        mapobject_id: i64,
        geometry: &str,
        tpoint: i32,
        zplane: i32,
    ) -> Result<i64> {
        let shard_id = conn.shard_id::<Self>().await?;
        let id = conn.shard_specific_unique_id::<Self>(shard_id).await?;
        sqlx::query(
            "INSERT INTO mapobject_segmentations (id, mapobject_id, geometry, tpoint, zplane)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(mapobject_id)
        .bind(geometry)
        .bind(tpoint)
        .bind(zplane)
        .execute(conn.executor())
        .await?;
        Ok(id)
    }
}

/// Measured feature values of one object. Maps to the distributed
/// `feature_values` table; the measurement vector is stored as JSONB keyed
/// by feature name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FeatureValue {
    pub id: i64,
    pub mapobject_id: i64,
    pub values: serde_json::Value,
    pub tpoint: i32,
}

impl Record for FeatureValue {
    const TABLE: &'static str = "feature_values";
}

impl ExperimentRecord for FeatureValue {
    const IS_DISTRIBUTED: bool = true;
}

impl FeatureValue {
    pub async fn add(
        conn: &mut ExperimentConnection,
        mapobject_id: i64,
        values: serde_json::Value,
        tpoint: i32,
    ) -> Result<i64> {
        let shard_id = conn.shard_id::<Self>().await?;
        let id = conn.shard_specific_unique_id::<Self>(shard_id).await?;
        sqlx::query(
            "INSERT INTO feature_values (id, mapobject_id, values, tpoint)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(mapobject_id)
        .bind(values)
        .bind(tpoint)
        .execute(conn.executor())
        .await?;
        Ok(id)
    }
}

/// Tool-assigned label values of one object (classification results and
/// similar derived annotations). Maps to the distributed `label_values`
/// table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LabelValue {
    pub id: i64,
    pub mapobject_id: i64,
    pub values: serde_json::Value,
    pub tpoint: i32,
}

impl Record for LabelValue {
    const TABLE: &'static str = "label_values";
}

impl ExperimentRecord for LabelValue {
    const IS_DISTRIBUTED: bool = true;
}

impl LabelValue {
    pub async fn add(
        conn: &mut ExperimentConnection,
        mapobject_id: i64,
        values: serde_json::Value,
        tpoint: i32,
    ) -> Result<i64> {
        let shard_id = conn.shard_id::<Self>().await?;
        let id = conn.shard_specific_unique_id::<Self>(shard_id).await?;
        sqlx::query(
            "INSERT INTO label_values (id, mapobject_id, values, tpoint)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(mapobject_id)
        .bind(values)
        .bind(tpoint)
        .execute(conn.executor())
        .await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distributed_tables_match_the_schema_set() {
        let tables = [
            Mapobject::TABLE,
            MapobjectSegmentation::TABLE,
            FeatureValue::TABLE,
            LabelValue::TABLE,
        ];
        for table in tables {
            assert!(crate::storage::schema::DISTRIBUTED_TABLES.contains(&table));
        }
        assert!(Mapobject::IS_DISTRIBUTED);
        assert!(!crate::models::Channel::IS_DISTRIBUTED);
    }
}
