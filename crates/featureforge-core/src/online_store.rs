//! Online store contract for low-latency feature serving
//!
//! Materializations are copied from the offline store into online tables,
//! one table per feature variant, keyed by entity:
//!
//! ```text
//! ┌─────────────────────┐   materialize   ┌────────────────────┐
//! │  Offline Store      │ ──────────────► │   Online Store     │
//! │  - resource tables  │                 │  - latest values   │
//! │  - materializations │                 │  - entity → value  │
//! └─────────────────────┘                 └────────────────────┘
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::{FeatureValue, Provider, Result, ValueType};

/// Entity → value table for one feature variant
#[async_trait]
pub trait OnlineStoreTable: Send + Sync {
    /// Upserts the value for `entity`
    async fn set(&self, entity: &str, value: FeatureValue) -> Result<()>;

    /// Returns the value for `entity`, `NotFound` if it was never set
    async fn get(&self, entity: &str) -> Result<FeatureValue>;

    /// Upserts many values; backends override this to batch round-trips
    async fn set_batch(&self, records: Vec<(String, FeatureValue)>) -> Result<()> {
        for (entity, value) in records {
            self.set(&entity, value).await?;
        }
        Ok(())
    }
}

/// Operations every low-latency backend implements
#[async_trait]
pub trait OnlineStore: Provider {
    /// Fails with `AlreadyExists` if the table exists
    async fn create_table(
        &self,
        feature: &str,
        variant: &str,
        value_type: ValueType,
    ) -> Result<Arc<dyn OnlineStoreTable>>;

    /// Fails with `NotFound` if the table doesn't exist
    async fn get_table(&self, feature: &str, variant: &str) -> Result<Arc<dyn OnlineStoreTable>>;

    async fn delete_table(&self, feature: &str, variant: &str) -> Result<()>;
}

/// Key under which a feature variant's table is stored
///
/// Format: `{prefix}{feature}__{variant}`
pub fn online_table_key(prefix: &str, feature: &str, variant: &str) -> String {
    format!("{prefix}{feature}__{variant}")
}
