//! Online table backed by the embedding storage engine
//!
//! Vector-valued features are served from the embedding engine rather than a
//! key-value store. [`EmbeddingTable`] exposes an [`EmbeddingStore`] through
//! the regular [`OnlineStoreTable`] contract so materialization copies need no
//! special casing. [`LocalOnlineStore`](crate::LocalOnlineStore) hands these
//! out for `FloatVector` tables once it is given an embedding store.

use async_trait::async_trait;
use featureforge_core::{EmbeddingStore, Error, FeatureValue, OnlineStoreTable, Result};
use std::sync::Arc;

pub struct EmbeddingTable {
    store: Arc<dyn EmbeddingStore>,
}

impl EmbeddingTable {
    pub fn new(store: Arc<dyn EmbeddingStore>) -> Self {
        Self { store }
    }

    fn to_vector(&self, entity: &str, value: FeatureValue) -> Result<Vec<f32>> {
        let vector: Vec<f32> = match value {
            FeatureValue::ArrayFloat(values) => values.into_iter().map(|v| v as f32).collect(),
            FeatureValue::ArrayInt(values) => values.into_iter().map(|v| v as f32).collect(),
            other => {
                return Err(Error::invalid_input(format!(
                    "embedding for '{}' must be a float array, got {:?}",
                    entity, other
                )))
            }
        };
        if vector.len() != self.store.dims() {
            return Err(Error::invalid_input(format!(
                "embedding for '{}' has {} dimensions, expected {}",
                entity,
                vector.len(),
                self.store.dims()
            )));
        }
        Ok(vector)
    }
}

#[async_trait]
impl OnlineStoreTable for EmbeddingTable {
    async fn set(&self, entity: &str, value: FeatureValue) -> Result<()> {
        let vector = self.to_vector(entity, value)?;
        self.store.set(entity, vector).await
    }

    async fn get(&self, entity: &str) -> Result<FeatureValue> {
        let vector = self.store.get(entity).await?;
        Ok(FeatureValue::ArrayFloat(
            vector.into_iter().map(f64::from).collect(),
        ))
    }
}
