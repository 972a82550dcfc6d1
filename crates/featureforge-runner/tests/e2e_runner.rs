//! E2E tests for the runner registry and job runners
//!
//! Transformation dispatch runs against a mock offline store; the data jobs
//! (materialize, copy, training set, register source) run against the
//! in-process memory and local stores.

use async_trait::async_trait;
use featureforge_core::{
    ConfigCodec, EmbeddingStore, Error, FeatureValue, GenericRecord, Materialization,
    MaterializationID, OfflineResourceType, OfflineStore, OfflineTable, OnlineStore,
    PrimaryTable, Provider, ProviderInfo, ProviderRegistry, ProviderType, ResourceID,
    ResourceRecord, ResourceSchema, Result, SerializedConfig, TableColumn, TableSchema,
    TrainingSetDef, TrainingSetIterator, TransformationConfig, ValueType,
};
use featureforge_providers::{register_builtin_providers, LocalOnlineStore, MemoryOfflineStore};
use featureforge_runner::{
    create_transformation_factory, CopyToOnlineConfig, CreateTrainingSetConfig,
    CreateTransformationConfig, JobKind, JobStatus, MaterializeConfig, RegisterSourceConfig,
    RunnerRegistry,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MOCK_OFFLINE: &str = "MOCK_OFFLINE";

#[derive(Default)]
struct Calls {
    builds: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

/// Offline store whose transformations succeed or fail on demand
struct MockOfflineStore {
    info: ProviderInfo,
    fail: bool,
    calls: Arc<Calls>,
}

impl Provider for MockOfflineStore {
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

fn mock_unsupported<T>() -> Result<T> {
    Err(Error::unsupported("mock offline store"))
}

#[async_trait]
impl OfflineStore for MockOfflineStore {
    async fn create_resource_table(
        &self,
        _id: &ResourceID,
        _schema: &TableSchema,
    ) -> Result<Arc<dyn OfflineTable>> {
        mock_unsupported()
    }

    async fn get_resource_table(&self, _id: &ResourceID) -> Result<Arc<dyn OfflineTable>> {
        mock_unsupported()
    }

    async fn create_primary_table(
        &self,
        _id: &ResourceID,
        _schema: &TableSchema,
    ) -> Result<Arc<dyn PrimaryTable>> {
        mock_unsupported()
    }

    async fn get_primary_table(&self, _id: &ResourceID) -> Result<Arc<dyn PrimaryTable>> {
        mock_unsupported()
    }

    async fn register_resource_from_source_table(
        &self,
        _id: &ResourceID,
        _schema: &ResourceSchema,
    ) -> Result<Arc<dyn OfflineTable>> {
        mock_unsupported()
    }

    async fn register_primary_from_source_table(
        &self,
        _id: &ResourceID,
        _source_table: &str,
    ) -> Result<Arc<dyn PrimaryTable>> {
        mock_unsupported()
    }

    async fn create_transformation(&self, _config: &TransformationConfig) -> Result<()> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::internal("could not create training set"));
        }
        Ok(())
    }

    async fn update_transformation(&self, _config: &TransformationConfig) -> Result<()> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::internal("could not update transformation"));
        }
        Ok(())
    }

    async fn get_transformation_table(&self, _id: &ResourceID) -> Result<Arc<dyn PrimaryTable>> {
        mock_unsupported()
    }

    async fn create_materialization(&self, _id: &ResourceID) -> Result<Arc<dyn Materialization>> {
        mock_unsupported()
    }

    async fn update_materialization(&self, _id: &ResourceID) -> Result<Arc<dyn Materialization>> {
        mock_unsupported()
    }

    async fn get_materialization(
        &self,
        _id: &MaterializationID,
    ) -> Result<Arc<dyn Materialization>> {
        mock_unsupported()
    }

    async fn delete_materialization(&self, _id: &MaterializationID) -> Result<()> {
        mock_unsupported()
    }

    async fn create_training_set(&self, _def: &TrainingSetDef) -> Result<()> {
        mock_unsupported()
    }

    async fn update_training_set(&self, _def: &TrainingSetDef) -> Result<()> {
        mock_unsupported()
    }

    async fn get_training_set(&self, _id: &ResourceID) -> Result<TrainingSetIterator> {
        mock_unsupported()
    }
}

/// Registries with the built-in providers plus a mock offline provider
fn mock_registries(fail: bool) -> (RunnerRegistry, Arc<Calls>) {
    let providers = Arc::new(ProviderRegistry::new());
    register_builtin_providers(&providers).unwrap();

    let calls = Arc::new(Calls::default());
    let factory_calls = calls.clone();
    providers
        .register_factory(
            ProviderType::from(MOCK_OFFLINE),
            move |config: SerializedConfig| {
                let calls = factory_calls.clone();
                async move {
                    calls.builds.fetch_add(1, Ordering::SeqCst);
                    let store = MockOfflineStore {
                        info: ProviderInfo::new(ProviderType::from(MOCK_OFFLINE), config),
                        fail,
                        calls,
                    };
                    Ok::<Arc<dyn Provider>, Error>(Arc::new(store))
                }
            },
        )
        .unwrap();

    (RunnerRegistry::with_defaults(providers).unwrap(), calls)
}

fn transformation_job(offline_type: &str, is_update: bool) -> SerializedConfig {
    CreateTransformationConfig {
        offline_type: ProviderType::from(offline_type),
        offline_config: SerializedConfig::empty(),
        transformation_config: TransformationConfig::default(),
        is_update,
    }
    .to_serialized()
    .unwrap()
}

#[tokio::test]
async fn test_create_transformation_succeeds() {
    let (runners, calls) = mock_registries(false);
    let runner = runners
        .create(&JobKind::CreateTransformation, transformation_job(MOCK_OFFLINE, false))
        .await
        .unwrap();

    let watcher = runner.run().unwrap();
    watcher.wait().await.unwrap();
    assert_eq!(watcher.status(), JobStatus::Succeeded);
    assert_eq!(calls.creates.load(Ordering::SeqCst), 1);
    assert_eq!(calls.updates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_create_transformation_failure_reaches_watcher() {
    let (runners, calls) = mock_registries(true);
    let runner = runners
        .create(&JobKind::CreateTransformation, transformation_job(MOCK_OFFLINE, false))
        .await
        .unwrap();

    let watcher = runner.run().unwrap();
    let first = watcher.wait().await.unwrap_err();
    let second = watcher.wait().await.unwrap_err();
    assert!(first.to_string().contains("could not create training set"));
    assert_eq!(first.to_string(), second.to_string());
    assert!(matches!(watcher.status(), JobStatus::Failed(_)));
    assert_eq!(calls.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_update_flag_runs_update_once() {
    let (runners, calls) = mock_registries(false);
    let runner = runners
        .create(&JobKind::CreateTransformation, transformation_job(MOCK_OFFLINE, true))
        .await
        .unwrap();

    runner.run().unwrap().wait().await.unwrap();
    assert_eq!(calls.creates.load(Ordering::SeqCst), 0);
    assert_eq!(calls.updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_payload_fails_at_create() {
    let (runners, calls) = mock_registries(false);

    for payload in [SerializedConfig::empty(), SerializedConfig::from("{\"offline_type\":")] {
        let err = runners
            .create(&JobKind::CreateTransformation, payload)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Deserialization { kind: "create transformation", .. }
        ));
    }
    assert_eq!(calls.builds.load(Ordering::SeqCst), 0);
    assert_eq!(calls.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_offline_type_fails_at_create() {
    let (runners, calls) = mock_registries(false);
    let err = runners
        .create(
            &JobKind::CreateTransformation,
            transformation_job("Invalid_Offline_type", false),
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::UnknownProviderType(name) if name == "Invalid_Offline_type"));
    assert_eq!(calls.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_online_provider_lacks_offline_capability() {
    let (runners, _calls) = mock_registries(false);
    let err = runners
        .create(
            &JobKind::CreateTransformation,
            transformation_job("LOCAL_ONLINE", false),
        )
        .await
        .err()
        .unwrap();
    match err {
        Error::UnsupportedCapability {
            provider_type,
            concrete,
            ..
        } => {
            assert_eq!(provider_type, ProviderType::LocalOnline);
            assert!(concrete.contains("LocalOnlineStore"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_custom_job_kind_binding() {
    let (runners, calls) = mock_registries(false);
    let kind = JobKind::from("TEST_CREATE_TRANSFORMATION");
    runners
        .register_factory(kind.clone(), create_transformation_factory)
        .unwrap();
    assert!(runners
        .register_factory(kind.clone(), create_transformation_factory)
        .is_err());

    let runner = runners
        .create(&kind, transformation_job(MOCK_OFFLINE, false))
        .await
        .unwrap();
    runner.run().unwrap().wait().await.unwrap();
    assert_eq!(calls.creates.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wait_blocking_outside_runtime() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (runners, _calls) = mock_registries(false);
    let watcher = runtime
        .block_on(async {
            runners
                .create(&JobKind::CreateTransformation, transformation_job(MOCK_OFFLINE, false))
                .await?
                .run()
        })
        .unwrap();
    watcher.wait_blocking().unwrap();
    watcher.wait_blocking().unwrap();
}

const SHARED_OFFLINE: &str = "SHARED_MEMORY_OFFLINE";
const SHARED_ONLINE: &str = "SHARED_LOCAL_ONLINE";

/// Registries whose offline/online keys resolve to one shared store each
fn shared_registries() -> (RunnerRegistry, Arc<MemoryOfflineStore>, Arc<LocalOnlineStore>) {
    let providers = Arc::new(ProviderRegistry::new());
    let offline = Arc::new(MemoryOfflineStore::new(SerializedConfig::empty()));
    let online = Arc::new(LocalOnlineStore::new(SerializedConfig::empty()));

    let shared = offline.clone();
    providers
        .register_factory(
            ProviderType::from(SHARED_OFFLINE),
            move |_config: SerializedConfig| {
                let store = shared.clone();
                async move { Ok::<Arc<dyn Provider>, Error>(store) }
            },
        )
        .unwrap();
    let shared = online.clone();
    providers
        .register_factory(
            ProviderType::from(SHARED_ONLINE),
            move |_config: SerializedConfig| {
                let store = shared.clone();
                async move { Ok::<Arc<dyn Provider>, Error>(store) }
            },
        )
        .unwrap();

    (RunnerRegistry::with_defaults(providers).unwrap(), offline, online)
}

fn feature_schema(value_type: ValueType) -> TableSchema {
    TableSchema::new(vec![
        TableColumn::new("entity", ValueType::String),
        TableColumn::new("value", value_type),
        TableColumn::new("ts", ValueType::Timestamp),
    ])
}

fn materialize_job(resource_id: &ResourceID, is_update: bool, chunk_size: i64) -> SerializedConfig {
    MaterializeConfig {
        offline_type: ProviderType::from(SHARED_OFFLINE),
        offline_config: SerializedConfig::empty(),
        online_type: ProviderType::from(SHARED_ONLINE),
        online_config: SerializedConfig::empty(),
        resource_id: resource_id.clone(),
        value_type: ValueType::Int,
        is_update,
        chunk_size,
    }
    .to_serialized()
    .unwrap()
}

#[tokio::test]
async fn test_materialize_copies_every_chunk() {
    let (runners, offline, online) = shared_registries();
    let id = ResourceID::new("purchases", "v1", OfflineResourceType::Feature);
    let table = offline
        .create_resource_table(&id, &feature_schema(ValueType::Int))
        .await
        .unwrap();
    for (i, entity) in ["u1", "u2", "u3", "u4", "u5"].iter().enumerate() {
        table
            .write(ResourceRecord::new(*entity, i as i64))
            .await
            .unwrap();
    }

    let runner = runners
        .create(&JobKind::Materialize, materialize_job(&id, false, 2))
        .await
        .unwrap();
    runner.run().unwrap().wait().await.unwrap();

    let online_table = online.get_table("purchases", "v1").await.unwrap();
    assert_eq!(online_table.get("u1").await.unwrap(), FeatureValue::Int(0));
    assert_eq!(online_table.get("u5").await.unwrap(), FeatureValue::Int(4));

    table.write(ResourceRecord::new("u5", 40i64)).await.unwrap();
    table.write(ResourceRecord::new("u6", 50i64)).await.unwrap();
    let runner = runners
        .create(&JobKind::Materialize, materialize_job(&id, true, 2))
        .await
        .unwrap();
    runner.run().unwrap().wait().await.unwrap();

    assert_eq!(online_table.get("u5").await.unwrap(), FeatureValue::Int(40));
    assert_eq!(online_table.get("u6").await.unwrap(), FeatureValue::Int(50));
}

#[tokio::test]
async fn test_materialize_with_largest_chunk_size() {
    let (runners, offline, online) = shared_registries();
    let id = ResourceID::new("visits", "v1", OfflineResourceType::Feature);
    let table = offline
        .create_resource_table(&id, &feature_schema(ValueType::Int))
        .await
        .unwrap();
    table.write(ResourceRecord::new("a", 1i64)).await.unwrap();
    table.write(ResourceRecord::new("b", 2i64)).await.unwrap();

    let runner = runners
        .create(&JobKind::Materialize, materialize_job(&id, false, i64::MAX))
        .await
        .unwrap();
    runner.run().unwrap().wait().await.unwrap();

    let online_table = online.get_table("visits", "v1").await.unwrap();
    assert_eq!(online_table.get("a").await.unwrap(), FeatureValue::Int(1));
    assert_eq!(online_table.get("b").await.unwrap(), FeatureValue::Int(2));
}

#[derive(Default)]
struct VectorIndex {
    vectors: std::sync::Mutex<std::collections::HashMap<String, Vec<f32>>>,
}

#[async_trait]
impl EmbeddingStore for VectorIndex {
    fn dims(&self) -> usize {
        2
    }

    async fn set(&self, key: &str, vector: Vec<f32>) -> Result<()> {
        self.vectors.lock().unwrap().insert(key.to_string(), vector);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<f32>> {
        self.vectors
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found("embedding", key))
    }
}

#[tokio::test]
async fn test_materialize_vector_feature_into_embedding_store() {
    let (runners, offline, _online) = shared_registries();
    let index = Arc::new(VectorIndex::default());
    let vectors = Arc::new(
        LocalOnlineStore::new(SerializedConfig::empty()).with_embeddings(index.clone()),
    );
    runners
        .providers()
        .register_factory(
            ProviderType::from("VECTOR_ONLINE"),
            move |_config: SerializedConfig| {
                let store = vectors.clone();
                async move { Ok::<Arc<dyn Provider>, Error>(store) }
            },
        )
        .unwrap();

    let id = ResourceID::new("doc_embedding", "v1", OfflineResourceType::Feature);
    let table = offline
        .create_resource_table(&id, &feature_schema(ValueType::FloatVector))
        .await
        .unwrap();
    table
        .write(ResourceRecord::new("d1", vec![0.5f64, 1.0]))
        .await
        .unwrap();
    table
        .write(ResourceRecord::new("d2", vec![2.0f64, 4.0]))
        .await
        .unwrap();

    let job = MaterializeConfig {
        offline_type: ProviderType::from(SHARED_OFFLINE),
        offline_config: SerializedConfig::empty(),
        online_type: ProviderType::from("VECTOR_ONLINE"),
        online_config: SerializedConfig::empty(),
        resource_id: id.clone(),
        value_type: ValueType::FloatVector,
        is_update: false,
        chunk_size: 1,
    }
    .to_serialized()
    .unwrap();
    let runner = runners.create(&JobKind::Materialize, job).await.unwrap();
    runner.run().unwrap().wait().await.unwrap();

    assert_eq!(index.get("d1").await.unwrap(), vec![0.5f32, 1.0]);
    assert_eq!(index.get("d2").await.unwrap(), vec![2.0f32, 4.0]);
}

#[tokio::test]
async fn test_materialize_missing_resource_fails_in_watcher() {
    let (runners, _offline, online) = shared_registries();
    let id = ResourceID::new("missing", "v1", OfflineResourceType::Feature);
    let runner = runners
        .create(&JobKind::Materialize, materialize_job(&id, false, 16))
        .await
        .unwrap();

    let err = runner.run().unwrap().wait().await.unwrap_err();
    assert!(matches!(err, Error::JobFailed { .. }));
    assert!(online.get_table("missing", "v1").await.err().unwrap().is_not_found());
}

#[tokio::test]
async fn test_materialize_rejects_bad_config_at_create() {
    let (runners, _offline, _online) = shared_registries();
    let feature = ResourceID::new("f", "v1", OfflineResourceType::Feature);
    let err = runners
        .create(&JobKind::Materialize, materialize_job(&feature, false, 0))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidInput(_)));

    let label = ResourceID::new("l", "v1", OfflineResourceType::Label);
    let err = runners
        .create(&JobKind::Materialize, materialize_job(&label, false, 8))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_copy_chunk_past_end_is_noop() {
    let (runners, offline, online) = shared_registries();
    let id = ResourceID::new("tiny", "v1", OfflineResourceType::Feature);
    let table = offline
        .create_resource_table(&id, &feature_schema(ValueType::Int))
        .await
        .unwrap();
    table.write(ResourceRecord::new("only", 1i64)).await.unwrap();
    let mat = offline.create_materialization(&id).await.unwrap();
    let online_table = online.create_table("tiny", "v1", ValueType::Int).await.unwrap();

    let copy_job = |chunk_idx| {
        CopyToOnlineConfig {
            offline_type: ProviderType::from(SHARED_OFFLINE),
            offline_config: SerializedConfig::empty(),
            online_type: ProviderType::from(SHARED_ONLINE),
            online_config: SerializedConfig::empty(),
            materialization_id: mat.id().clone(),
            resource_id: id.clone(),
            chunk_size: 10,
            chunk_idx,
        }
        .to_serialized()
        .unwrap()
    };

    let past_end = runners
        .create(&JobKind::CopyToOnline, copy_job(3))
        .await
        .unwrap();
    past_end.run().unwrap().wait().await.unwrap();
    assert!(online_table.get("only").await.unwrap_err().is_not_found());

    let first = runners
        .create(&JobKind::CopyToOnline, copy_job(0))
        .await
        .unwrap();
    first.run().unwrap().wait().await.unwrap();
    assert_eq!(online_table.get("only").await.unwrap(), FeatureValue::Int(1));

    assert!(runners
        .create(&JobKind::CopyToOnline, copy_job(-1))
        .await
        .is_err());
}

#[tokio::test]
async fn test_training_set_runner() {
    let (runners, offline, _online) = shared_registries();
    let label = ResourceID::new("churned", "v1", OfflineResourceType::Label);
    let feature = ResourceID::new("logins", "v1", OfflineResourceType::Feature);
    offline
        .create_resource_table(&label, &feature_schema(ValueType::Bool))
        .await
        .unwrap()
        .write(ResourceRecord::new("u1", true))
        .await
        .unwrap();
    offline
        .create_resource_table(&feature, &feature_schema(ValueType::Int))
        .await
        .unwrap()
        .write(ResourceRecord::new("u1", 3i64))
        .await
        .unwrap();

    let def = TrainingSetDef {
        id: ResourceID::new("churn_ts", "v1", OfflineResourceType::TrainingSet),
        label,
        features: vec![feature],
    };
    let job = |is_update| {
        CreateTrainingSetConfig {
            offline_type: ProviderType::from(SHARED_OFFLINE),
            offline_config: SerializedConfig::empty(),
            def: def.clone(),
            is_update,
        }
        .to_serialized()
        .unwrap()
    };

    let runner = runners.create(&JobKind::CreateTrainingSet, job(false)).await.unwrap();
    runner.run().unwrap().wait().await.unwrap();
    let rows: Vec<_> = offline
        .get_training_set(&def.id)
        .await
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].features, vec![FeatureValue::Int(3)]);

    let again = runners.create(&JobKind::CreateTrainingSet, job(false)).await.unwrap();
    assert!(again.run().unwrap().wait().await.is_err());

    let update = runners.create(&JobKind::CreateTrainingSet, job(true)).await.unwrap();
    update.run().unwrap().wait().await.unwrap();
}

#[tokio::test]
async fn test_register_source_runner() {
    let (runners, offline, _online) = shared_registries();
    let events = ResourceID::new("events", "v1", OfflineResourceType::Primary);
    let source = offline
        .create_primary_table(
            &events,
            &TableSchema::new(vec![TableColumn::new("user_id", ValueType::String)]),
        )
        .await
        .unwrap();
    let row: GenericRecord = vec!["u1".into()];
    source.write(row).await.unwrap();

    let alias = ResourceID::new("events_alias", "v1", OfflineResourceType::Primary);
    let job = RegisterSourceConfig {
        offline_type: ProviderType::from(SHARED_OFFLINE),
        offline_config: SerializedConfig::empty(),
        resource_id: alias.clone(),
        source_table: source.name().to_string(),
    };
    let runner = runners
        .create(&JobKind::RegisterSource, job.to_serialized().unwrap())
        .await
        .unwrap();
    runner.run().unwrap().wait().await.unwrap();

    let registered = offline.get_primary_table(&alias).await.unwrap();
    assert_eq!(registered.name(), source.name());
    assert_eq!(registered.num_rows().await.unwrap(), 1);

    let not_primary = RegisterSourceConfig {
        resource_id: ResourceID::new("events_feature", "v1", OfflineResourceType::Feature),
        ..job
    };
    assert!(runners
        .create(&JobKind::RegisterSource, not_primary.to_serialized().unwrap())
        .await
        .is_err());
}
