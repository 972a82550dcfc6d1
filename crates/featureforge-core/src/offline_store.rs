//! Offline store contract
//!
//! Offline stores are the batch/warehouse side of the platform. They hold
//! the raw resource tables, compute transformations, snapshot feature values
//! into materializations, and join features with labels into training sets.
//!
//! ```text
//!  primary tables ──transformation──► transformation tables
//!        │
//!        ▼
//!  resource tables (feature / label)
//!        │                    │
//!        ▼                    ▼
//!  materializations      training sets
//!  (copied to online)    (point-in-time joins)
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    Error, GenericRecord, MaterializationID, Provider, ResourceID, ResourceRecord, ResourceSchema,
    Result, TableSchema, TrainingSetDef, TrainingSetRow, TransformationConfig,
};

/// Forward-only sequence of materialized feature records
pub type FeatureIterator = Box<dyn Iterator<Item = Result<ResourceRecord>> + Send>;

/// Forward-only sequence of primary/transformation table rows
pub type GenericTableIterator = Box<dyn Iterator<Item = Result<GenericRecord>> + Send>;

/// Lazy, forward-only, non-restartable sequence of training rows
pub type TrainingSetIterator = Box<dyn Iterator<Item = Result<TrainingSetRow>> + Send>;

/// Physical table backing a feature or label resource
#[async_trait]
pub trait OfflineTable: Send + Sync {
    fn id(&self) -> &ResourceID;

    /// Appends one record; the record's entity must be non-empty
    async fn write(&self, record: ResourceRecord) -> Result<()>;
}

/// Table of raw rows (registered sources and transformation outputs)
#[async_trait]
pub trait PrimaryTable: Send + Sync {
    /// Backend table name, as referenced by transformation queries
    fn name(&self) -> &str;

    async fn write(&self, record: GenericRecord) -> Result<()>;

    async fn num_rows(&self) -> Result<i64>;

    /// Iterates over at most `n` rows
    async fn iterate_segment(&self, n: i64) -> Result<GenericTableIterator>;
}

/// Queryable snapshot of a feature's latest value per entity
#[async_trait]
pub trait Materialization: Send + Sync {
    fn id(&self) -> &MaterializationID;

    async fn num_rows(&self) -> Result<i64>;

    /// Records in `[begin, end)`, ordered by entity
    async fn iterate_segment(&self, begin: i64, end: i64) -> Result<FeatureIterator>;
}

/// Operations every batch/warehouse backend implements
///
/// ## Semantics
///
/// - `create_*` fails with `AlreadyExists` when the target exists; `get_*`
///   fails with `NotFound` when it doesn't.
/// - `update_materialization` rebuilds the snapshot without disturbing
///   handles to the previous one and may be re-run safely.
/// - Transformations are the most backend-specific operation; every failure
///   (bad query, missing source mapping, permissions) is returned.
#[async_trait]
pub trait OfflineStore: Provider {
    async fn create_resource_table(
        &self,
        id: &ResourceID,
        schema: &TableSchema,
    ) -> Result<Arc<dyn OfflineTable>>;

    async fn get_resource_table(&self, id: &ResourceID) -> Result<Arc<dyn OfflineTable>>;

    async fn create_primary_table(
        &self,
        id: &ResourceID,
        schema: &TableSchema,
    ) -> Result<Arc<dyn PrimaryTable>>;

    async fn get_primary_table(&self, id: &ResourceID) -> Result<Arc<dyn PrimaryTable>>;

    /// Exposes an existing external table as a feature or label without copying it
    async fn register_resource_from_source_table(
        &self,
        id: &ResourceID,
        schema: &ResourceSchema,
    ) -> Result<Arc<dyn OfflineTable>>;

    /// Exposes an existing external table as a primary source without copying it
    async fn register_primary_from_source_table(
        &self,
        id: &ResourceID,
        source_table: &str,
    ) -> Result<Arc<dyn PrimaryTable>>;

    async fn create_transformation(&self, config: &TransformationConfig) -> Result<()>;

    async fn update_transformation(&self, config: &TransformationConfig) -> Result<()>;

    async fn get_transformation_table(&self, id: &ResourceID) -> Result<Arc<dyn PrimaryTable>>;

    async fn create_materialization(&self, id: &ResourceID) -> Result<Arc<dyn Materialization>>;

    async fn update_materialization(&self, id: &ResourceID) -> Result<Arc<dyn Materialization>>;

    async fn get_materialization(&self, id: &MaterializationID)
        -> Result<Arc<dyn Materialization>>;

    async fn delete_materialization(&self, id: &MaterializationID) -> Result<()>;

    async fn create_training_set(&self, def: &TrainingSetDef) -> Result<()>;

    async fn update_training_set(&self, def: &TrainingSetDef) -> Result<()>;

    async fn get_training_set(&self, id: &ResourceID) -> Result<TrainingSetIterator>;
}

/// Checks the layout of a feature/label table schema
///
/// Resource tables always hold an `entity` string column and a `value`
/// column; `ts` is optional.
pub fn check_resource_schema(schema: &TableSchema) -> Result<()> {
    if schema.column_index("entity").is_none() {
        return Err(Error::invalid_input("resource table schema needs an 'entity' column"));
    }
    if schema.column_index("value").is_none() {
        return Err(Error::invalid_input("resource table schema needs a 'value' column"));
    }
    Ok(())
}

/// Substitutes each source-mapping template in a transformation query
///
/// `quote` renders a source table name for the target backend. Any `{{`
/// left after substitution means a source was never mapped.
pub fn render_transformation_query(
    config: &TransformationConfig,
    quote: impl Fn(&str) -> String,
) -> Result<String> {
    let mut query = config.query.clone();
    for mapping in &config.source_mapping {
        if mapping.template.is_empty() {
            return Err(Error::invalid_input("source mapping with an empty template"));
        }
        query = query.replace(&mapping.template, &quote(&mapping.source));
    }
    if let Some(start) = query.find("{{") {
        let end = query[start..]
            .find("}}")
            .map(|offset| start + offset + 2)
            .unwrap_or(query.len());
        return Err(Error::invalid_input(format!(
            "transformation {} references unmapped source {}",
            config.target_table_id,
            &query[start..end]
        )));
    }
    Ok(query)
}
