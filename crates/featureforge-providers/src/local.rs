//! Process-local online store
//!
//! Tables are plain hash maps behind a lock. Values never leave the process,
//! which makes this store the default for single-node development and tests.
//!
//! A store given an [`EmbeddingStore`] through [`LocalOnlineStore::with_embeddings`]
//! serves `FloatVector` tables from it as [`EmbeddingTable`]s.

use async_trait::async_trait;
use featureforge_core::{
    online_table_key, EmbeddingStore, Error, FeatureValue, OnlineStore, OnlineStoreTable, Provider,
    ProviderInfo, ProviderType, Result, SerializedConfig, ValueType,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::EmbeddingTable;

/// Builds a [`LocalOnlineStore`]; the configuration is kept but not read
pub async fn local_online_factory(config: SerializedConfig) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(LocalOnlineStore::new(config)))
}

/// One feature variant's entity → value map
pub struct LocalOnlineTable {
    value_type: ValueType,
    values: RwLock<HashMap<String, FeatureValue>>,
}

impl LocalOnlineTable {
    fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

#[async_trait]
impl OnlineStoreTable for LocalOnlineTable {
    async fn set(&self, entity: &str, value: FeatureValue) -> Result<()> {
        self.values
            .write()
            .map_err(|_| Error::internal("local table lock poisoned"))?
            .insert(entity.to_string(), value);
        Ok(())
    }

    async fn get(&self, entity: &str) -> Result<FeatureValue> {
        self.values
            .read()
            .map_err(|_| Error::internal("local table lock poisoned"))?
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::not_found("entity", entity))
    }

    async fn set_batch(&self, records: Vec<(String, FeatureValue)>) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| Error::internal("local table lock poisoned"))?;
        values.extend(records);
        Ok(())
    }
}

/// Online store keeping every table in process memory
pub struct LocalOnlineStore {
    info: ProviderInfo,
    tables: RwLock<HashMap<String, Arc<dyn OnlineStoreTable>>>,
    embeddings: Option<Arc<dyn EmbeddingStore>>,
}

impl LocalOnlineStore {
    pub fn new(config: SerializedConfig) -> Self {
        Self {
            info: ProviderInfo::new(ProviderType::LocalOnline, config),
            tables: RwLock::new(HashMap::new()),
            embeddings: None,
        }
    }

    /// Serves `FloatVector` tables from `embeddings` (builder pattern)
    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingStore>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    fn new_table(&self, value_type: ValueType) -> Arc<dyn OnlineStoreTable> {
        match (value_type, &self.embeddings) {
            (ValueType::FloatVector, Some(embeddings)) => {
                Arc::new(EmbeddingTable::new(embeddings.clone()))
            }
            _ => Arc::new(LocalOnlineTable::new(value_type)),
        }
    }
}

impl Provider for LocalOnlineStore {
    fn provider_type(&self) -> &ProviderType {
        &self.info.provider_type
    }

    fn config(&self) -> &SerializedConfig {
        &self.info.config
    }

    fn as_online_store(self: Arc<Self>) -> Result<Arc<dyn OnlineStore>> {
        Ok(self)
    }
}

#[async_trait]
impl OnlineStore for LocalOnlineStore {
    async fn create_table(
        &self,
        feature: &str,
        variant: &str,
        value_type: ValueType,
    ) -> Result<Arc<dyn OnlineStoreTable>> {
        let key = online_table_key("", feature, variant);
        let mut tables = self
            .tables
            .write()
            .map_err(|_| Error::internal("local store lock poisoned"))?;
        if tables.contains_key(&key) {
            return Err(Error::already_exists("online table", key));
        }
        let table = self.new_table(value_type);
        tables.insert(key.clone(), table.clone());
        debug!(table = %key, ?value_type, "Created local online table");
        Ok(table)
    }

    async fn get_table(&self, feature: &str, variant: &str) -> Result<Arc<dyn OnlineStoreTable>> {
        let key = online_table_key("", feature, variant);
        let table = self
            .tables
            .read()
            .map_err(|_| Error::internal("local store lock poisoned"))?
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found("online table", key))?;
        Ok(table)
    }

    async fn delete_table(&self, feature: &str, variant: &str) -> Result<()> {
        let key = online_table_key("", feature, variant);
        self.tables
            .write()
            .map_err(|_| Error::internal("local store lock poisoned"))?
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("online table", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_table_lifecycle() {
        let store = LocalOnlineStore::new(SerializedConfig::empty());
        let table = store.create_table("balance", "v1", ValueType::Float).await.unwrap();
        table.set("user_1", FeatureValue::Float(12.5)).await.unwrap();

        let same = store.get_table("balance", "v1").await.unwrap();
        assert_eq!(same.get("user_1").await.unwrap(), FeatureValue::Float(12.5));
        assert!(same.get("user_2").await.unwrap_err().is_not_found());

        assert!(store
            .create_table("balance", "v1", ValueType::Float)
            .await
            .err()
            .unwrap()
            .is_already_exists());

        store.delete_table("balance", "v1").await.unwrap();
        assert!(store.get_table("balance", "v1").await.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn test_set_batch_overwrites() {
        let table = LocalOnlineTable::new(ValueType::Int);
        table.set("a", FeatureValue::Int(1)).await.unwrap();
        table
            .set_batch(vec![
                ("a".to_string(), FeatureValue::Int(2)),
                ("b".to_string(), FeatureValue::Int(3)),
            ])
            .await
            .unwrap();
        assert_eq!(table.get("a").await.unwrap(), FeatureValue::Int(2));
        assert_eq!(table.get("b").await.unwrap(), FeatureValue::Int(3));
        assert_eq!(table.value_type(), ValueType::Int);
    }

    #[derive(Default)]
    struct VectorIndex {
        vectors: RwLock<HashMap<String, Vec<f32>>>,
    }

    #[async_trait]
    impl EmbeddingStore for VectorIndex {
        fn dims(&self) -> usize {
            2
        }

        async fn set(&self, key: &str, vector: Vec<f32>) -> Result<()> {
            self.vectors.write().unwrap().insert(key.to_string(), vector);
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Vec<f32>> {
            self.vectors
                .read()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| Error::not_found("embedding", key))
        }
    }

    #[tokio::test]
    async fn test_vector_tables_use_embedding_store() {
        let index = Arc::new(VectorIndex::default());
        let store = LocalOnlineStore::new(SerializedConfig::empty()).with_embeddings(index.clone());

        let vectors = store
            .create_table("doc", "v1", ValueType::FloatVector)
            .await
            .unwrap();
        vectors
            .set("d1", FeatureValue::ArrayFloat(vec![0.5, 1.0]))
            .await
            .unwrap();
        assert_eq!(index.get("d1").await.unwrap(), vec![0.5f32, 1.0]);
        assert!(vectors
            .set("d2", FeatureValue::ArrayFloat(vec![1.0]))
            .await
            .is_err());

        let same = store.get_table("doc", "v1").await.unwrap();
        assert_eq!(
            same.get("d1").await.unwrap(),
            FeatureValue::ArrayFloat(vec![0.5, 1.0])
        );

        let scalars = store.create_table("views", "v1", ValueType::Int).await.unwrap();
        scalars.set("d1", FeatureValue::Int(3)).await.unwrap();
        assert_eq!(index.vectors.read().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_vector_tables_without_embedding_store_stay_local() {
        let store = LocalOnlineStore::new(SerializedConfig::empty());
        let table = store
            .create_table("doc", "v1", ValueType::FloatVector)
            .await
            .unwrap();
        table
            .set("d1", FeatureValue::ArrayFloat(vec![0.5, 1.0, 2.0]))
            .await
            .unwrap();
        assert_eq!(
            table.get("d1").await.unwrap(),
            FeatureValue::ArrayFloat(vec![0.5, 1.0, 2.0])
        );
    }
}
