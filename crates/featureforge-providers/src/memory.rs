//! In-memory offline store
//!
//! Keeps every table in process memory. It implements the full offline
//! contract except transformations, which need a query engine. Useful for
//! local development and as the reference semantics for SQL backends.
//!
//! Snapshots (materializations, training sets) are immutable `Arc`s; an
//! update swaps the map entry so handles to the previous snapshot stay valid.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use featureforge_core::{
    check_resource_schema, Error, FeatureIterator, FeatureValue, GenericRecord,
    GenericTableIterator, Materialization, MaterializationID, OfflineResourceType, OfflineStore,
    OfflineTable, PrimaryTable, Provider, ProviderInfo, ProviderType, ResourceID, ResourceRecord,
    ResourceSchema, Result, SerializedConfig, TableSchema, TrainingSetDef, TrainingSetIterator,
    TrainingSetRow, TransformationConfig,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Builds a [`MemoryOfflineStore`]; the configuration is kept but not read
pub async fn memory_offline_factory(config: SerializedConfig) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(MemoryOfflineStore::new(config)))
}

fn read_lock<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| Error::internal("memory store lock poisoned"))
}

fn write_lock<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| Error::internal("memory store lock poisoned"))
}

fn table_name(id: &ResourceID) -> String {
    format!("memory_{}__{}__{}", id.resource_type, id.name, id.variant)
}

/// Feature/label table owning its records
pub struct MemoryOfflineTable {
    id: ResourceID,
    records: RwLock<Vec<ResourceRecord>>,
}

#[async_trait]
impl OfflineTable for MemoryOfflineTable {
    fn id(&self) -> &ResourceID {
        &self.id
    }

    async fn write(&self, record: ResourceRecord) -> Result<()> {
        record.check()?;
        write_lock(&self.records)?.push(record);
        Ok(())
    }
}

/// Feature/label view over a primary table's columns
struct SourceResourceTable {
    id: ResourceID,
    schema: ResourceSchema,
    source: Arc<MemoryPrimaryTable>,
}

impl SourceResourceTable {
    fn records(&self) -> Result<Vec<ResourceRecord>> {
        let columns = &self.source.schema;
        let column = |name: &str| {
            columns.column_index(name).ok_or_else(|| {
                Error::invalid_input(format!(
                    "column '{}' not found in source table {}",
                    name, self.source.name
                ))
            })
        };
        let entity_idx = column(&self.schema.entity)?;
        let value_idx = column(&self.schema.value)?;
        let ts_idx = if self.schema.ts.is_empty() {
            None
        } else {
            Some(column(&self.schema.ts)?)
        };

        let rows = read_lock(&self.source.rows)?;
        rows.iter()
            .map(|row| {
                let entity = match row.get(entity_idx) {
                    Some(FeatureValue::String(s)) => s.clone(),
                    Some(FeatureValue::Int(i)) => i.to_string(),
                    other => {
                        return Err(Error::invalid_input(format!(
                            "entity column must hold strings or ints, got {:?}",
                            other
                        )))
                    }
                };
                let value = row.get(value_idx).cloned().unwrap_or_default();
                let ts = match ts_idx {
                    Some(idx) => parse_timestamp(row.get(idx).unwrap_or(&FeatureValue::Null))?,
                    None => DateTime::<Utc>::default(),
                };
                Ok(ResourceRecord { entity, value, ts })
            })
            .collect()
    }
}

#[async_trait]
impl OfflineTable for SourceResourceTable {
    fn id(&self) -> &ResourceID {
        &self.id
    }

    async fn write(&self, _record: ResourceRecord) -> Result<()> {
        Err(Error::unsupported(format!(
            "{} is registered from source table {} and is read-only",
            self.id, self.schema.source_table
        )))
    }
}

/// Timestamps in source rows are RFC 3339 strings or Unix seconds
fn parse_timestamp(value: &FeatureValue) -> Result<DateTime<Utc>> {
    match value {
        FeatureValue::Null => Ok(DateTime::<Utc>::default()),
        FeatureValue::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| Error::invalid_input(format!("invalid timestamp '{}': {}", s, e))),
        FeatureValue::Int(secs) => Utc
            .timestamp_opt(*secs, 0)
            .single()
            .ok_or_else(|| Error::invalid_input(format!("timestamp {} out of range", secs))),
        other => Err(Error::invalid_input(format!(
            "unsupported timestamp value {:?}",
            other
        ))),
    }
}

#[derive(Clone)]
enum ResourceTable {
    Owned(Arc<MemoryOfflineTable>),
    Source(Arc<SourceResourceTable>),
}

impl ResourceTable {
    fn records(&self) -> Result<Vec<ResourceRecord>> {
        match self {
            Self::Owned(table) => Ok(read_lock(&table.records)?.clone()),
            Self::Source(table) => table.records(),
        }
    }

    fn handle(&self) -> Arc<dyn OfflineTable> {
        match self {
            Self::Owned(table) => table.clone(),
            Self::Source(table) => table.clone(),
        }
    }
}

/// Primary table held as rows of generic values
pub struct MemoryPrimaryTable {
    name: String,
    schema: TableSchema,
    rows: RwLock<Vec<GenericRecord>>,
}

#[async_trait]
impl PrimaryTable for MemoryPrimaryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: GenericRecord) -> Result<()> {
        if record.len() != self.schema.columns.len() {
            return Err(Error::invalid_input(format!(
                "row has {} values but table {} has {} columns",
                record.len(),
                self.name,
                self.schema.columns.len()
            )));
        }
        write_lock(&self.rows)?.push(record);
        Ok(())
    }

    async fn num_rows(&self) -> Result<i64> {
        Ok(read_lock(&self.rows)?.len() as i64)
    }

    async fn iterate_segment(&self, n: i64) -> Result<GenericTableIterator> {
        let limit = usize::try_from(n.max(0)).unwrap_or(usize::MAX);
        let rows: Vec<GenericRecord> = read_lock(&self.rows)?.iter().take(limit).cloned().collect();
        Ok(Box::new(rows.into_iter().map(Ok::<_, Error>)))
    }
}

/// Immutable snapshot of the latest record per entity
pub struct MemoryMaterialization {
    id: MaterializationID,
    rows: Arc<Vec<ResourceRecord>>,
}

#[async_trait]
impl Materialization for MemoryMaterialization {
    fn id(&self) -> &MaterializationID {
        &self.id
    }

    async fn num_rows(&self) -> Result<i64> {
        Ok(self.rows.len() as i64)
    }

    async fn iterate_segment(&self, begin: i64, end: i64) -> Result<FeatureIterator> {
        if begin < 0 || end < begin {
            return Err(Error::invalid_input(format!(
                "invalid segment [{}, {}) of {}",
                begin, end, self.id
            )));
        }
        let len = self.rows.len();
        let begin = (begin as usize).min(len);
        let end = (end as usize).min(len);
        let rows = self.rows.clone();
        Ok(Box::new(
            (begin..end).map(move |i| Ok::<_, Error>(rows[i].clone())),
        ))
    }
}

/// Keeps the record with the greatest timestamp per entity, sorted by entity
fn latest_per_entity(records: Vec<ResourceRecord>) -> Vec<ResourceRecord> {
    let mut latest: BTreeMap<String, ResourceRecord> = BTreeMap::new();
    for record in records {
        match latest.get(&record.entity) {
            Some(existing) if existing.ts > record.ts => {}
            _ => {
                latest.insert(record.entity.clone(), record);
            }
        }
    }
    latest.into_values().collect()
}

/// Point-in-time join: one row per label record
///
/// Each feature value is the latest record for the label's entity with
/// `ts <= label.ts`, or null when there is none.
fn join_training_set(
    labels: Vec<ResourceRecord>,
    features: Vec<Vec<ResourceRecord>>,
) -> Vec<TrainingSetRow> {
    let indexed: Vec<HashMap<String, Vec<ResourceRecord>>> = features
        .into_iter()
        .map(|records| {
            let mut by_entity: HashMap<String, Vec<ResourceRecord>> = HashMap::new();
            for record in records {
                by_entity.entry(record.entity.clone()).or_default().push(record);
            }
            for records in by_entity.values_mut() {
                records.sort_by_key(|r| r.ts);
            }
            by_entity
        })
        .collect();

    labels
        .into_iter()
        .map(|label| {
            let features = indexed
                .iter()
                .map(|by_entity| {
                    by_entity
                        .get(&label.entity)
                        .and_then(|records| records.iter().rev().find(|r| r.ts <= label.ts))
                        .map(|r| r.value.clone())
                        .unwrap_or(FeatureValue::Null)
                })
                .collect();
            TrainingSetRow {
                features,
                label: label.value,
            }
        })
        .collect()
}

#[derive(Default)]
struct MemoryState {
    resource_tables: HashMap<ResourceID, ResourceTable>,
    primary_tables: HashMap<ResourceID, Arc<MemoryPrimaryTable>>,
    materializations: HashMap<MaterializationID, Arc<MemoryMaterialization>>,
    training_sets: HashMap<ResourceID, Arc<Vec<TrainingSetRow>>>,
}

impl MemoryState {
    fn resource_table(&self, id: &ResourceID) -> Result<&ResourceTable> {
        self.resource_tables
            .get(id)
            .ok_or_else(|| Error::not_found("resource table", id))
    }

    fn primary_by_name(&self, name: &str) -> Result<Arc<MemoryPrimaryTable>> {
        self.primary_tables
            .values()
            .find(|table| table.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found("source table", name))
    }
}

/// Offline store keeping all data in process memory
pub struct MemoryOfflineStore {
    info: ProviderInfo,
    state: RwLock<MemoryState>,
}

impl MemoryOfflineStore {
    pub fn new(config: SerializedConfig) -> Self {
        Self {
            info: ProviderInfo::new(ProviderType::MemoryOffline, config),
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn build_materialization(&self, id: &ResourceID) -> Result<Arc<MemoryMaterialization>> {
        id.check_type(&[OfflineResourceType::Feature])?;
        let records = read_lock(&self.state)?.resource_table(id)?.records()?;
        let rows = latest_per_entity(records);
        debug!(resource = %id, rows = rows.len(), "Built memory materialization");
        Ok(Arc::new(MemoryMaterialization {
            id: MaterializationID::for_resource(id),
            rows: Arc::new(rows),
        }))
    }

    fn build_training_set(&self, def: &TrainingSetDef) -> Result<Arc<Vec<TrainingSetRow>>> {
        def.check()?;
        let state = read_lock(&self.state)?;
        let labels = state.resource_table(&def.label)?.records()?;
        let features = def
            .features
            .iter()
            .map(|id| state.resource_table(id)?.records())
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(join_training_set(labels, features)))
    }
}

impl Provider for MemoryOfflineStore {
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
impl OfflineStore for MemoryOfflineStore {
    async fn create_resource_table(
        &self,
        id: &ResourceID,
        schema: &TableSchema,
    ) -> Result<Arc<dyn OfflineTable>> {
        id.check_type(&[OfflineResourceType::Feature, OfflineResourceType::Label])?;
        check_resource_schema(schema)?;

        let mut state = write_lock(&self.state)?;
        if state.resource_tables.contains_key(id) {
            return Err(Error::already_exists("resource table", id));
        }
        let table = Arc::new(MemoryOfflineTable {
            id: id.clone(),
            records: RwLock::new(Vec::new()),
        });
        state
            .resource_tables
            .insert(id.clone(), ResourceTable::Owned(table.clone()));
        Ok(table)
    }

    async fn get_resource_table(&self, id: &ResourceID) -> Result<Arc<dyn OfflineTable>> {
        Ok(read_lock(&self.state)?.resource_table(id)?.handle())
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

        let mut state = write_lock(&self.state)?;
        if state.primary_tables.contains_key(id) {
            return Err(Error::already_exists("primary table", id));
        }
        let table = Arc::new(MemoryPrimaryTable {
            name: table_name(id),
            schema: schema.clone(),
            rows: RwLock::new(Vec::new()),
        });
        state.primary_tables.insert(id.clone(), table.clone());
        Ok(table)
    }

    async fn get_primary_table(&self, id: &ResourceID) -> Result<Arc<dyn PrimaryTable>> {
        let state = read_lock(&self.state)?;
        let table = state
            .primary_tables
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("primary table", id))?;
        Ok(table)
    }

    async fn register_resource_from_source_table(
        &self,
        id: &ResourceID,
        schema: &ResourceSchema,
    ) -> Result<Arc<dyn OfflineTable>> {
        id.check_type(&[OfflineResourceType::Feature, OfflineResourceType::Label])?;

        let mut state = write_lock(&self.state)?;
        if state.resource_tables.contains_key(id) {
            return Err(Error::already_exists("resource table", id));
        }
        let source = state.primary_by_name(&schema.source_table)?;
        for column in [&schema.entity, &schema.value]
            .into_iter()
            .chain((!schema.ts.is_empty()).then_some(&schema.ts))
        {
            if source.schema.column_index(column).is_none() {
                return Err(Error::invalid_input(format!(
                    "column '{}' not found in source table {}",
                    column, schema.source_table
                )));
            }
        }
        let table = Arc::new(SourceResourceTable {
            id: id.clone(),
            schema: schema.clone(),
            source,
        });
        state
            .resource_tables
            .insert(id.clone(), ResourceTable::Source(table.clone()));
        Ok(table)
    }

    async fn register_primary_from_source_table(
        &self,
        id: &ResourceID,
        source_table: &str,
    ) -> Result<Arc<dyn PrimaryTable>> {
        id.check_type(&[OfflineResourceType::Primary])?;

        let mut state = write_lock(&self.state)?;
        if state.primary_tables.contains_key(id) {
            return Err(Error::already_exists("primary table", id));
        }
        let source = state.primary_by_name(source_table)?;
        state.primary_tables.insert(id.clone(), source.clone());
        Ok(source)
    }

    async fn create_transformation(&self, config: &TransformationConfig) -> Result<()> {
        Err(Error::unsupported(format!(
            "memory offline store cannot run transformation {}",
            config.target_table_id
        )))
    }

    async fn update_transformation(&self, config: &TransformationConfig) -> Result<()> {
        Err(Error::unsupported(format!(
            "memory offline store cannot run transformation {}",
            config.target_table_id
        )))
    }

    async fn get_transformation_table(&self, id: &ResourceID) -> Result<Arc<dyn PrimaryTable>> {
        Err(Error::not_found("transformation table", id))
    }

    async fn create_materialization(&self, id: &ResourceID) -> Result<Arc<dyn Materialization>> {
        let mat_id = MaterializationID::for_resource(id);
        if read_lock(&self.state)?.materializations.contains_key(&mat_id) {
            return Err(Error::already_exists("materialization", &mat_id));
        }
        let materialization = self.build_materialization(id)?;

        let mut state = write_lock(&self.state)?;
        if state.materializations.contains_key(&mat_id) {
            return Err(Error::already_exists("materialization", &mat_id));
        }
        state
            .materializations
            .insert(mat_id, materialization.clone());
        Ok(materialization)
    }

    async fn update_materialization(&self, id: &ResourceID) -> Result<Arc<dyn Materialization>> {
        let materialization = self.build_materialization(id)?;
        write_lock(&self.state)?
            .materializations
            .insert(materialization.id.clone(), materialization.clone());
        Ok(materialization)
    }

    async fn get_materialization(
        &self,
        id: &MaterializationID,
    ) -> Result<Arc<dyn Materialization>> {
        let materialization = read_lock(&self.state)?
            .materializations
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("materialization", id))?;
        Ok(materialization)
    }

    async fn delete_materialization(&self, id: &MaterializationID) -> Result<()> {
        write_lock(&self.state)?
            .materializations
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("materialization", id))
    }

    async fn create_training_set(&self, def: &TrainingSetDef) -> Result<()> {
        if read_lock(&self.state)?.training_sets.contains_key(&def.id) {
            return Err(Error::already_exists("training set", &def.id));
        }
        let rows = self.build_training_set(def)?;

        let mut state = write_lock(&self.state)?;
        if state.training_sets.contains_key(&def.id) {
            return Err(Error::already_exists("training set", &def.id));
        }
        state.training_sets.insert(def.id.clone(), rows);
        Ok(())
    }

    async fn update_training_set(&self, def: &TrainingSetDef) -> Result<()> {
        let rows = self.build_training_set(def)?;
        write_lock(&self.state)?
            .training_sets
            .insert(def.id.clone(), rows);
        Ok(())
    }

    async fn get_training_set(&self, id: &ResourceID) -> Result<TrainingSetIterator> {
        let rows = read_lock(&self.state)?
            .training_sets
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("training set", id))?;
        Ok(Box::new(
            (0..rows.len()).map(move |i| Ok::<_, Error>(rows[i].clone())),
        ))
    }
}
