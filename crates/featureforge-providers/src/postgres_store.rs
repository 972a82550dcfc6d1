//! PostgreSQL offline store
//!
//! Every resource lives in its own table in the connection's current schema:
//!
//! ```text
//! featureforge_feature__{name}__{variant}        entity TEXT, value JSONB, ts TIMESTAMPTZ
//! featureforge_label__{name}__{variant}          entity TEXT, value JSONB, ts TIMESTAMPTZ
//! featureforge_primary__{name}__{variant}        typed columns from the TableSchema
//! featureforge_transformation__{name}__{variant} CREATE TABLE .. AS <query>
//! featureforge_mat_{build uuid}                  latest row per entity, one per build
//! featureforge_training_set__{name}__{variant}   feature_0 .. feature_N, label
//! featureforge_materializations                  materialization id → build tables
//! ```
//!
//! Sources registered from existing tables become views, so nothing is copied.
//! Transformation and training-set updates drop and rebuild their table inside
//! one transaction; readers keep seeing the previous table until the commit.
//!
//! Materialization builds never overwrite each other. An update writes a new
//! build table and records it in the catalog, so handles to the previous
//! build keep reading the rows they started with. Superseded builds are
//! dropped with the materialization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool};
use featureforge_core::{
    check_resource_schema, render_transformation_query, ConfigCodec, Error, FeatureIterator,
    FeatureValue, GenericRecord, GenericTableIterator, Materialization, MaterializationID,
    OfflineResourceType, OfflineStore, OfflineTable, PrimaryTable, Provider, ProviderInfo,
    ProviderType, ResourceID, ResourceRecord, ResourceSchema, Result, SerializedConfig,
    TableSchema, TrainingSetDef, TrainingSetIterator, TrainingSetRow, TransformationConfig,
    TransformationType, ValueType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::NoTls;
use uuid::Uuid;

/// PostgreSQL offline store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// PostgreSQL connection string
    pub connection_string: String,
    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    10
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            connection_string: "postgresql://localhost/featureforge".to_string(),
            pool_size: default_pool_size(),
        }
    }
}

impl ConfigCodec for PostgresConfig {
    const KIND: &'static str = "postgres";
}

impl PostgresConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Parses the connection URL into a pool configuration
    fn pool_config(&self) -> Result<Config> {
        let url = url::Url::parse(&self.connection_string)
            .map_err(|e| Error::InvalidInput(format!("Invalid connection string: {}", e)))?;

        let mut pg_config = Config::new();
        pg_config.host = url.host_str().map(|s| s.to_string());
        pg_config.port = url.port();
        pg_config.user = if url.username().is_empty() {
            None
        } else {
            Some(url.username().to_string())
        };
        pg_config.password = url.password().map(|s| s.to_string());
        pg_config.dbname = url
            .path()
            .strip_prefix('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Ok(pg_config)
    }
}

/// Decodes the config and builds the connection pool
pub async fn postgres_offline_factory(config: SerializedConfig) -> Result<Arc<dyn Provider>> {
    let pg_config = PostgresConfig::from_serialized(&config)?;
    let store = PostgresOfflineStore::new(pg_config, config)?;
    Ok(Arc::new(store))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_name(id: &ResourceID) -> String {
    format!("featureforge_{}__{}__{}", id.resource_type, id.name, id.variant)
}

const MATERIALIZATION_CATALOG: &str = "featureforge_materializations";

/// Table holding one materialization build
fn materialization_build_table(build: Uuid) -> String {
    format!("featureforge_mat_{}", build.simple())
}

fn materialization_catalog_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (seq BIGSERIAL PRIMARY KEY, id TEXT NOT NULL, table_name TEXT NOT NULL)",
        quote_ident(MATERIALIZATION_CATALOG)
    )
}

/// Latest build table of one materialization
fn current_build_sql() -> String {
    format!(
        "SELECT table_name FROM {} WHERE id = $1 ORDER BY seq DESC LIMIT 1",
        quote_ident(MATERIALIZATION_CATALOG)
    )
}

fn column_type(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::Int => "BIGINT",
        ValueType::Float => "DOUBLE PRECISION",
        ValueType::String => "TEXT",
        ValueType::Bool => "BOOLEAN",
        ValueType::Timestamp => "TIMESTAMPTZ",
        ValueType::FloatVector => "DOUBLE PRECISION[]",
    }
}

fn create_resource_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE {} (entity TEXT NOT NULL, value JSONB, ts TIMESTAMPTZ NOT NULL DEFAULT to_timestamp(0))",
        quote_ident(table)
    )
}

fn create_primary_table_sql(table: &str, schema: &TableSchema) -> String {
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), column_type(c.value_type)))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(table), columns.join(", "))
}

fn resource_view_sql(view: &str, schema: &ResourceSchema) -> String {
    let ts = if schema.ts.is_empty() {
        "to_timestamp(0)".to_string()
    } else {
        format!("{}::timestamptz", quote_ident(&schema.ts))
    };
    format!(
        "CREATE VIEW {} AS SELECT {}::text AS entity, to_jsonb({}) AS value, {} AS ts FROM {}",
        quote_ident(view),
        quote_ident(&schema.entity),
        quote_ident(&schema.value),
        ts,
        quote_ident(&schema.source_table)
    )
}

fn materialization_sql(table: &str, source: &str) -> String {
    format!(
        "CREATE TABLE {} AS SELECT DISTINCT ON (entity) entity, value, ts FROM {} ORDER BY entity, ts DESC",
        quote_ident(table),
        quote_ident(source)
    )
}

/// Point-in-time join of every feature onto the label rows
fn training_set_sql(table: &str, def: &TrainingSetDef) -> String {
    let mut columns = Vec::with_capacity(def.features.len() + 1);
    let mut joins = Vec::with_capacity(def.features.len());
    for (i, feature) in def.features.iter().enumerate() {
        columns.push(format!("f{i}.value AS feature_{i}"));
        joins.push(format!(
            "LEFT JOIN LATERAL (SELECT value FROM {} WHERE entity = l.entity AND ts <= l.ts ORDER BY ts DESC LIMIT 1) AS f{i} ON TRUE",
            quote_ident(&table_name(feature))
        ));
    }
    columns.push("l.value AS label".to_string());
    format!(
        "CREATE TABLE {} AS SELECT {} FROM {} AS l {}",
        quote_ident(table),
        columns.join(", "),
        quote_ident(&table_name(&def.label)),
        joins.join(" ")
    )
}

/// Maps duplicate/undefined table states onto the store's error kinds
fn map_pg_error(e: tokio_postgres::Error, context: &str, kind: &'static str, id: &str) -> Error {
    match e.code() {
        Some(code) if *code == SqlState::DUPLICATE_TABLE => Error::already_exists(kind, id),
        Some(code) if *code == SqlState::UNDEFINED_TABLE => Error::not_found(kind, id),
        _ => Error::StorageError(anyhow::anyhow!("{}: {}", context, e)),
    }
}

fn pool_error(e: deadpool_postgres::PoolError) -> Error {
    Error::StorageError(anyhow::anyhow!("Pool get error: {}", e))
}

/// Decodes a `value` column
///
/// Resource tables hold the tagged form. Views over registered source tables
/// and SQL-built columns hold bare JSON, which is inferred.
fn json_to_value(value: Option<serde_json::Value>) -> Result<FeatureValue> {
    match value {
        None => Ok(FeatureValue::Null),
        Some(json) if is_tagged(&json) => serde_json::from_value(json)
            .map_err(|e| Error::deserialization("postgres value", e)),
        Some(json) => Ok(FeatureValue::from_plain_json(json)),
    }
}

fn is_tagged(json: &serde_json::Value) -> bool {
    json.as_object().is_some_and(|object| {
        object.get("type").is_some_and(serde_json::Value::is_string)
            && object.keys().all(|key| key == "type" || key == "value")
    })
}

fn value_to_json(value: &FeatureValue) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

pub struct PostgresOfflineStore {
    info: ProviderInfo,
    pool: Pool,
}

impl PostgresOfflineStore {
    pub fn new(config: PostgresConfig, serialized: SerializedConfig) -> Result<Self> {
        let pool = config
            .pool_config()?
            .builder(NoTls)
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Pool builder error: {}", e)))?
            .max_size(config.pool_size)
            .build()
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Pool creation error: {}", e)))?;

        tracing::info!(pool_size = config.pool_size, "Created PostgreSQL offline store");
        Ok(Self {
            info: ProviderInfo::new(ProviderType::PostgresOffline, serialized),
            pool,
        })
    }

    /// `Some("BASE TABLE")`, `Some("VIEW")`, or `None` when absent
    async fn table_type(&self, table: &str) -> Result<Option<String>> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        let row = conn
            .query_opt(
                "SELECT table_type::text FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1",
                &[&table],
            )
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Catalog query error: {}", e)))?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn require_table(&self, table: &str, kind: &'static str, id: &str) -> Result<()> {
        match self.table_type(table).await? {
            Some(_) => Ok(()),
            None => Err(Error::not_found(kind, id)),
        }
    }

    async fn execute(&self, sql: &str, kind: &'static str, id: &str) -> Result<()> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        conn.batch_execute(sql)
            .await
            .map_err(|e| map_pg_error(e, "Statement error", kind, id))
    }

    /// Drops `table` and runs `create_sql` in one transaction
    async fn replace_table(&self, table: &str, create_sql: &str, kind: &'static str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Begin transaction error: {}", e)))?;
        tx.batch_execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
            .await
            .map_err(|e| map_pg_error(e, "Drop table error", kind, table))?;
        tx.batch_execute(create_sql)
            .await
            .map_err(|e| map_pg_error(e, "Create table error", kind, table))?;
        tx.commit()
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Commit error: {}", e)))?;
        Ok(())
    }

    fn primary_handle(&self, name: String) -> Arc<dyn PrimaryTable> {
        Arc::new(PostgresPrimaryTable {
            name,
            pool: self.pool.clone(),
        })
    }

    fn materialization_handle(&self, id: MaterializationID, table: String) -> Arc<dyn Materialization> {
        Arc::new(PostgresMaterialization {
            id,
            table,
            pool: self.pool.clone(),
        })
    }

    async fn ensure_materialization_catalog(&self) -> Result<()> {
        self.execute(
            &materialization_catalog_sql(),
            "materialization catalog",
            MATERIALIZATION_CATALOG,
        )
        .await
    }

    /// Builds a new snapshot of `id` and makes it the current build
    ///
    /// With `must_be_new`, fails with `AlreadyExists` when any build exists.
    async fn build_materialization(
        &self,
        id: &ResourceID,
        must_be_new: bool,
    ) -> Result<Arc<dyn Materialization>> {
        id.check_type(&[OfflineResourceType::Feature])?;
        let source = table_name(id);
        self.require_table(&source, "resource table", &id.to_string())
            .await?;
        self.ensure_materialization_catalog().await?;

        let mat_id = MaterializationID::for_resource(id);
        let table = materialization_build_table(Uuid::new_v4());
        let catalog = quote_ident(MATERIALIZATION_CATALOG);

        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Begin transaction error: {}", e)))?;
        tx.execute("SELECT pg_advisory_xact_lock(hashtext($1))", &[&mat_id.0])
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Materialization lock error: {}", e)))?;
        if must_be_new {
            let existing = tx
                .query_opt(&current_build_sql(), &[&mat_id.0])
                .await
                .map_err(|e| map_pg_error(e, "Catalog query error", "materialization", &mat_id.0))?;
            if existing.is_some() {
                return Err(Error::already_exists("materialization", &mat_id));
            }
        }
        tx.batch_execute(&materialization_sql(&table, &source))
            .await
            .map_err(|e| map_pg_error(e, "Create table error", "materialization", &mat_id.0))?;
        tx.execute(
            &format!("INSERT INTO {catalog} (id, table_name) VALUES ($1, $2)"),
            &[&mat_id.0, &table],
        )
        .await
        .map_err(|e| map_pg_error(e, "Catalog insert error", "materialization", &mat_id.0))?;
        tx.commit()
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Commit error: {}", e)))?;

        tracing::info!(materialization = %mat_id, table = %table, "Built materialization");
        Ok(self.materialization_handle(mat_id, table))
    }

    fn check_transformation(&self, config: &TransformationConfig) -> Result<String> {
        if config.transformation_type != TransformationType::SQL {
            return Err(Error::unsupported(format!(
                "postgres offline store only runs SQL transformations, got {:?} for {}",
                config.transformation_type, config.target_table_id
            )));
        }
        config
            .target_table_id
            .check_type(&[OfflineResourceType::Transformation])?;
        render_transformation_query(config, quote_ident)
    }

    async fn check_training_set(&self, def: &TrainingSetDef) -> Result<String> {
        def.check()?;
        for id in std::iter::once(&def.label).chain(def.features.iter()) {
            self.require_table(&table_name(id), "resource table", &id.to_string())
                .await?;
        }
        Ok(table_name(&def.id))
    }
}

impl Provider for PostgresOfflineStore {
    fn provider_type(&self) -> &ProviderType {
        &self.info.provider_type
    }

    fn config(&self) -> &SerializedConfig {
        &self.info.config
    }

    fn as_offline_store(self: Arc<Self>) -> Result<Arc<dyn OfflineStore>> {
        Ok(self)
    }
}

#[async_trait]
impl OfflineStore for PostgresOfflineStore {
    async fn create_resource_table(
        &self,
        id: &ResourceID,
        schema: &TableSchema,
    ) -> Result<Arc<dyn OfflineTable>> {
        id.check_type(&[OfflineResourceType::Feature, OfflineResourceType::Label])?;
        check_resource_schema(schema)?;

        let table = table_name(id);
        self.execute(&create_resource_table_sql(&table), "resource table", &id.to_string())
            .await?;
        tracing::debug!(resource = %id, table = %table, "Created resource table");
        Ok(Arc::new(PostgresOfflineTable {
            id: id.clone(),
            table,
            read_only: false,
            pool: self.pool.clone(),
        }))
    }

    async fn get_resource_table(&self, id: &ResourceID) -> Result<Arc<dyn OfflineTable>> {
        let table = table_name(id);
        let table_type = self
            .table_type(&table)
            .await?
            .ok_or_else(|| Error::not_found("resource table", id))?;
        Ok(Arc::new(PostgresOfflineTable {
            id: id.clone(),
            table,
            read_only: table_type == "VIEW",
            pool: self.pool.clone(),
        }))
    }

    async fn create_primary_table(
        &self,
        id: &ResourceID,
        schema: &TableSchema,
    ) -> Result<Arc<dyn PrimaryTable>> {
        id.check_type(&[OfflineResourceType::Primary])?;
        if schema.columns.is_empty() {
            return Err(Error::invalid_input(format!("primary table {} has no columns", id)));
        }

        let table = table_name(id);
        self.execute(
            &create_primary_table_sql(&table, schema),
            "primary table",
            &id.to_string(),
        )
        .await?;
        Ok(self.primary_handle(table))
    }

    async fn get_primary_table(&self, id: &ResourceID) -> Result<Arc<dyn PrimaryTable>> {
        let table = table_name(id);
        self.require_table(&table, "primary table", &id.to_string())
            .await?;
        Ok(self.primary_handle(table))
    }

    async fn register_resource_from_source_table(
        &self,
        id: &ResourceID,
        schema: &ResourceSchema,
    ) -> Result<Arc<dyn OfflineTable>> {
        id.check_type(&[OfflineResourceType::Feature, OfflineResourceType::Label])?;
        self.require_table(&schema.source_table, "source table", &schema.source_table)
            .await?;

        let view = table_name(id);
        self.execute(&resource_view_sql(&view, schema), "resource table", &id.to_string())
            .await?;
        tracing::info!(resource = %id, source = %schema.source_table, "Registered resource from source table");
        Ok(Arc::new(PostgresOfflineTable {
            id: id.clone(),
            table: view,
            read_only: true,
            pool: self.pool.clone(),
        }))
    }

    async fn register_primary_from_source_table(
        &self,
        id: &ResourceID,
        source_table: &str,
    ) -> Result<Arc<dyn PrimaryTable>> {
        id.check_type(&[OfflineResourceType::Primary])?;
        self.require_table(source_table, "source table", source_table)
            .await?;

        let view = table_name(id);
        let sql = format!(
            "CREATE VIEW {} AS SELECT * FROM {}",
            quote_ident(&view),
            quote_ident(source_table)
        );
        self.execute(&sql, "primary table", &id.to_string()).await?;
        tracing::info!(resource = %id, source = %source_table, "Registered primary from source table");
        Ok(self.primary_handle(view))
    }

    async fn create_transformation(&self, config: &TransformationConfig) -> Result<()> {
        let query = self.check_transformation(config)?;
        let table = table_name(&config.target_table_id);
        let sql = format!("CREATE TABLE {} AS {}", quote_ident(&table), query);
        self.execute(&sql, "transformation table", &config.target_table_id.to_string())
            .await?;
        tracing::info!(target = %config.target_table_id, "Created transformation");
        Ok(())
    }

    async fn update_transformation(&self, config: &TransformationConfig) -> Result<()> {
        let query = self.check_transformation(config)?;
        let table = table_name(&config.target_table_id);
        let sql = format!("CREATE TABLE {} AS {}", quote_ident(&table), query);
        self.replace_table(&table, &sql, "transformation table").await?;
        tracing::info!(target = %config.target_table_id, "Updated transformation");
        Ok(())
    }

    async fn get_transformation_table(&self, id: &ResourceID) -> Result<Arc<dyn PrimaryTable>> {
        id.check_type(&[OfflineResourceType::Transformation])?;
        let table = table_name(id);
        self.require_table(&table, "transformation table", &id.to_string())
            .await?;
        Ok(self.primary_handle(table))
    }

    async fn create_materialization(&self, id: &ResourceID) -> Result<Arc<dyn Materialization>> {
        self.build_materialization(id, true).await
    }

    async fn update_materialization(&self, id: &ResourceID) -> Result<Arc<dyn Materialization>> {
        self.build_materialization(id, false).await
    }

    async fn get_materialization(
        &self,
        id: &MaterializationID,
    ) -> Result<Arc<dyn Materialization>> {
        self.ensure_materialization_catalog().await?;
        let conn = self.pool.get().await.map_err(pool_error)?;
        let row = conn
            .query_opt(&current_build_sql(), &[&id.0])
            .await
            .map_err(|e| map_pg_error(e, "Catalog query error", "materialization", &id.0))?
            .ok_or_else(|| Error::not_found("materialization", id))?;
        Ok(self.materialization_handle(id.clone(), row.get(0)))
    }

    async fn delete_materialization(&self, id: &MaterializationID) -> Result<()> {
        self.ensure_materialization_catalog().await?;
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Begin transaction error: {}", e)))?;
        tx.execute("SELECT pg_advisory_xact_lock(hashtext($1))", &[&id.0])
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Materialization lock error: {}", e)))?;
        let builds = tx
            .query(
                &format!(
                    "DELETE FROM {} WHERE id = $1 RETURNING table_name",
                    quote_ident(MATERIALIZATION_CATALOG)
                ),
                &[&id.0],
            )
            .await
            .map_err(|e| map_pg_error(e, "Catalog delete error", "materialization", &id.0))?;
        if builds.is_empty() {
            return Err(Error::not_found("materialization", id));
        }
        for build in &builds {
            let table: String = build.get(0);
            tx.batch_execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table)))
                .await
                .map_err(|e| map_pg_error(e, "Drop table error", "materialization", &id.0))?;
        }
        tx.commit()
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Commit error: {}", e)))?;

        tracing::info!(materialization = %id, builds = builds.len(), "Deleted materialization");
        Ok(())
    }

    async fn create_training_set(&self, def: &TrainingSetDef) -> Result<()> {
        let table = self.check_training_set(def).await?;
        self.execute(&training_set_sql(&table, def), "training set", &def.id.to_string())
            .await?;
        tracing::info!(training_set = %def.id, features = def.features.len(), "Created training set");
        Ok(())
    }

    async fn update_training_set(&self, def: &TrainingSetDef) -> Result<()> {
        let table = self.check_training_set(def).await?;
        self.replace_table(&table, &training_set_sql(&table, def), "training set")
            .await?;
        tracing::info!(training_set = %def.id, features = def.features.len(), "Updated training set");
        Ok(())
    }

    async fn get_training_set(&self, id: &ResourceID) -> Result<TrainingSetIterator> {
        id.check_type(&[OfflineResourceType::TrainingSet])?;
        let table = table_name(id);
        let conn = self.pool.get().await.map_err(pool_error)?;
        let rows = conn
            .query(&format!("SELECT * FROM {}", quote_ident(&table)), &[])
            .await
            .map_err(|e| map_pg_error(e, "Training set query error", "training set", &id.to_string()))?;

        Ok(Box::new(rows.into_iter().map(|row| -> Result<TrainingSetRow> {
            let label_idx = row.len().saturating_sub(1);
            let features = (0..label_idx)
                .map(|i| {
                    row.try_get::<_, Option<serde_json::Value>>(i)
                        .map_err(|e| Error::storage("Training set decode error", e))
                        .and_then(json_to_value)
                })
                .collect::<Result<Vec<_>>>()?;
            let label = row
                .try_get::<_, Option<serde_json::Value>>(label_idx)
                .map_err(|e| Error::storage("Training set decode error", e))
                .and_then(json_to_value)?;
            Ok(TrainingSetRow { features, label })
        })))
    }
}

/// Feature/label table, or a view over a registered source
pub struct PostgresOfflineTable {
    id: ResourceID,
    table: String,
    read_only: bool,
    pool: Pool,
}

#[async_trait]
impl OfflineTable for PostgresOfflineTable {
    fn id(&self) -> &ResourceID {
        &self.id
    }

    async fn write(&self, record: ResourceRecord) -> Result<()> {
        if self.read_only {
            return Err(Error::unsupported(format!(
                "{} is registered from a source table and is read-only",
                self.id
            )));
        }
        record.check()?;

        let conn = self.pool.get().await.map_err(pool_error)?;
        let value = value_to_json(&record.value)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (entity, value, ts) VALUES ($1, $2, $3)",
                quote_ident(&self.table)
            ),
            &[&record.entity, &value, &record.ts],
        )
        .await
        .map_err(|e| map_pg_error(e, "Insert error", "resource table", &self.id.to_string()))?;
        Ok(())
    }
}

pub struct PostgresPrimaryTable {
    name: String,
    pool: Pool,
}

impl PostgresPrimaryTable {
    async fn column_names(&self, conn: &deadpool_postgres::Client) -> Result<Vec<String>> {
        let statement = conn
            .prepare(&format!("SELECT * FROM {} LIMIT 0", quote_ident(&self.name)))
            .await
            .map_err(|e| map_pg_error(e, "Prepare error", "primary table", &self.name))?;
        Ok(statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect())
    }
}

#[async_trait]
impl PrimaryTable for PostgresPrimaryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: GenericRecord) -> Result<()> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        let columns = self.column_names(&conn).await?;
        if columns.len() != record.len() {
            return Err(Error::invalid_input(format!(
                "row has {} values but table {} has {} columns",
                record.len(),
                self.name,
                columns.len()
            )));
        }

        let mut object = serde_json::Map::with_capacity(columns.len());
        for (column, value) in columns.into_iter().zip(record.iter()) {
            object.insert(column, value.to_plain_json());
        }
        let table = quote_ident(&self.name);
        conn.execute(
            &format!("INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, $1)"),
            &[&serde_json::Value::Object(object)],
        )
        .await
        .map_err(|e| map_pg_error(e, "Insert error", "primary table", &self.name))?;
        Ok(())
    }

    async fn num_rows(&self) -> Result<i64> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        let row = conn
            .query_one(&format!("SELECT COUNT(*) FROM {}", quote_ident(&self.name)), &[])
            .await
            .map_err(|e| map_pg_error(e, "Count error", "primary table", &self.name))?;
        Ok(row.get(0))
    }

    async fn iterate_segment(&self, n: i64) -> Result<GenericTableIterator> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        let columns = self.column_names(&conn).await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT to_jsonb(sub) FROM (SELECT * FROM {} LIMIT $1) AS sub",
                    quote_ident(&self.name)
                ),
                &[&n.max(0)],
            )
            .await
            .map_err(|e| map_pg_error(e, "Segment query error", "primary table", &self.name))?;

        Ok(Box::new(rows.into_iter().map(move |row| -> Result<GenericRecord> {
            let object: serde_json::Value = row
                .try_get(0)
                .map_err(|e| Error::storage("Row decode error", e))?;
            columns
                .iter()
                .map(|column| {
                    Ok(object
                        .get(column)
                        .cloned()
                        .map_or(FeatureValue::Null, FeatureValue::from_plain_json))
                })
                .collect()
        })))
    }
}

pub struct PostgresMaterialization {
    id: MaterializationID,
    table: String,
    pool: Pool,
}

#[async_trait]
impl Materialization for PostgresMaterialization {
    fn id(&self) -> &MaterializationID {
        &self.id
    }

    async fn num_rows(&self) -> Result<i64> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        let row = conn
            .query_one(&format!("SELECT COUNT(*) FROM {}", quote_ident(&self.table)), &[])
            .await
            .map_err(|e| map_pg_error(e, "Count error", "materialization", &self.id.0))?;
        Ok(row.get(0))
    }

    async fn iterate_segment(&self, begin: i64, end: i64) -> Result<FeatureIterator> {
        if begin < 0 || end < begin {
            return Err(Error::invalid_input(format!(
                "invalid segment [{}, {}) of {}",
                begin, end, self.id
            )));
        }
        let conn = self.pool.get().await.map_err(pool_error)?;
        let rows = conn
            .query(
                &format!(
                    "SELECT entity, value, ts FROM {} ORDER BY entity OFFSET $1 LIMIT $2",
                    quote_ident(&self.table)
                ),
                &[&begin, &(end - begin)],
            )
            .await
            .map_err(|e| map_pg_error(e, "Segment query error", "materialization", &self.id.0))?;

        Ok(Box::new(rows.into_iter().map(|row| -> Result<ResourceRecord> {
            let entity: String = row
                .try_get(0)
                .map_err(|e| Error::storage("Row decode error", e))?;
            let value = json_to_value(
                row.try_get(1)
                    .map_err(|e| Error::storage("Row decode error", e))?,
            )?;
            let ts: DateTime<Utc> = row
                .try_get(2)
                .map_err(|e| Error::storage("Row decode error", e))?;
            Ok(ResourceRecord { entity, value, ts })
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featureforge_core::TableColumn;

    fn feature(name: &str) -> ResourceID {
        ResourceID::new(name, "v1", OfflineResourceType::Feature)
    }

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();
        assert_eq!(config.pool_size, 10);
        let config = PostgresConfig::from_serialized(&SerializedConfig::from(
            r#"{"connection_string":"postgresql://u@db/ff"}"#,
        ))
        .unwrap();
        assert_eq!(config.pool_size, 10);
    }

    #[test]
    fn test_pool_config_from_url() {
        let config = PostgresConfig::new("postgresql://admin:pw@db.internal:5433/features")
            .pool_config()
            .unwrap();
        assert_eq!(config.host.as_deref(), Some("db.internal"));
        assert_eq!(config.port, Some(5433));
        assert_eq!(config.user.as_deref(), Some("admin"));
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.dbname.as_deref(), Some("features"));

        assert!(PostgresConfig::new("not a url").pool_config().is_err());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_table_names() {
        assert_eq!(table_name(&feature("clicks")), "featureforge_feature__clicks__v1");
    }

    #[test]
    fn test_each_materialization_build_gets_its_own_table() {
        let first = materialization_build_table(Uuid::new_v4());
        let second = materialization_build_table(Uuid::new_v4());
        assert_ne!(first, second);
        assert!(first.starts_with("featureforge_mat_"));
        // fits Postgres' 63-byte identifier limit
        assert!(first.len() <= 63);
    }

    #[test]
    fn test_materialization_catalog_sql() {
        assert!(materialization_catalog_sql()
            .starts_with("CREATE TABLE IF NOT EXISTS \"featureforge_materializations\""));
        assert_eq!(
            current_build_sql(),
            "SELECT table_name FROM \"featureforge_materializations\" WHERE id = $1 ORDER BY seq DESC LIMIT 1"
        );
    }

    #[test]
    fn test_primary_table_sql() {
        let schema = TableSchema::new(vec![
            TableColumn::new("user_id", ValueType::String),
            TableColumn::new("amount", ValueType::Float),
            TableColumn::new("embedding", ValueType::FloatVector),
        ]);
        assert_eq!(
            create_primary_table_sql("t", &schema),
            "CREATE TABLE \"t\" (\"user_id\" TEXT, \"amount\" DOUBLE PRECISION, \"embedding\" DOUBLE PRECISION[])"
        );
    }

    #[test]
    fn test_resource_view_defaults_timestamp() {
        let schema = ResourceSchema {
            entity: "user_id".to_string(),
            value: "amount".to_string(),
            ts: String::new(),
            source_table: "transactions".to_string(),
        };
        let sql = resource_view_sql("v", &schema);
        assert!(sql.contains("to_timestamp(0) AS ts"));
        assert!(sql.ends_with("FROM \"transactions\""));
    }

    #[test]
    fn test_training_set_sql_joins_each_feature() {
        let def = TrainingSetDef {
            id: ResourceID::new("fraud", "v1", OfflineResourceType::TrainingSet),
            label: ResourceID::new("is_fraud", "v1", OfflineResourceType::Label),
            features: vec![feature("amount"), feature("clicks")],
        };
        let sql = training_set_sql("ts", &def);
        assert!(sql.contains("f0.value AS feature_0, f1.value AS feature_1, l.value AS label"));
        assert!(sql.contains("FROM \"featureforge_label__is_fraud__v1\" AS l"));
        assert_eq!(sql.matches("LEFT JOIN LATERAL").count(), 2);
        assert!(sql.contains("ts <= l.ts ORDER BY ts DESC LIMIT 1"));
    }

    #[test]
    fn test_json_to_value() {
        assert_eq!(json_to_value(None).unwrap(), FeatureValue::Null);
        assert_eq!(
            json_to_value(Some(serde_json::json!(3))).unwrap(),
            FeatureValue::Int(3)
        );
        assert_eq!(
            json_to_value(Some(serde_json::json!({"tier": "gold"}))).unwrap(),
            FeatureValue::Json(serde_json::json!({"tier": "gold"}))
        );
        assert!(json_to_value(Some(serde_json::json!({"type": "Nope", "value": 1}))).is_err());
    }

    #[test]
    fn test_stored_values_keep_their_variant() {
        for value in [
            FeatureValue::Json(serde_json::json!(5)),
            FeatureValue::ArrayFloat(vec![]),
            FeatureValue::ArrayString(vec![]),
            FeatureValue::Float(1.0),
            FeatureValue::Null,
        ] {
            let stored = value_to_json(&value).unwrap();
            assert_eq!(json_to_value(Some(stored)).unwrap(), value);
        }
    }
}
