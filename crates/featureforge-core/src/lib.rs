//! # FeatureForge Core Library
//!
//! Shared contracts of the FeatureForge orchestration core. Storage backends
//! of every kind (key-value caches, SQL warehouses, columnar stores) are
//! handled uniformly as providers that can act as an online store, an
//! offline store, or both.
//!
//! ## Key Components
//!
//! - **ProviderRegistry**: binds a [`ProviderType`] to a factory turning a
//!   [`SerializedConfig`] into a live [`Provider`]
//! - **OfflineStore / OnlineStore**: the operations every backend of each
//!   kind implements
//! - **ConfigCodec**: encode/decode pair for typed configuration values
//! - **Errors**: one strongly-typed error enum for the whole core
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use featureforge_core::{ProviderRegistry, ProviderType, SerializedConfig};
//!
//! async fn offline(registry: &ProviderRegistry, config: SerializedConfig) -> Result<()> {
//!     let provider = registry.get(&ProviderType::PostgresOffline, config).await?;
//!     let store = provider.as_offline_store()?;
//!     store.create_transformation(&transformation).await?;
//!     Ok(())
//! }
//! ```

pub use collaborators::{EmbeddingStore, MetadataResolver};
pub use config::{ConfigCodec, SerializedConfig};
pub use error::{Error, Result};
pub use offline_store::{
    check_resource_schema, render_transformation_query, FeatureIterator, GenericTableIterator,
    Materialization, OfflineStore, OfflineTable, PrimaryTable, TrainingSetIterator,
};
pub use online_store::{online_table_key, OnlineStore, OnlineStoreTable};
pub use provider::{
    Capability, Provider, ProviderFactory, ProviderInfo, ProviderRegistry, ProviderType,
};
pub use types::{
    FeatureValue, GenericRecord, MaterializationID, NameVariant, OfflineResourceType,
    ResourceID, ResourceRecord, ResourceSchema, SourceMapping, TableColumn, TableSchema,
    TrainingSetDef, TrainingSetRow, TransformationConfig, TransformationType, ValueType,
};

mod collaborators;
mod config;
mod error;
mod offline_store;
mod online_store;
mod provider;
mod types;

// Prelude module - commonly used imports
pub mod prelude {
    pub use crate::config::{ConfigCodec, SerializedConfig};
    pub use crate::error::{Error, Result};
    pub use crate::offline_store::OfflineStore;
    pub use crate::online_store::OnlineStore;
    pub use crate::provider::{Provider, ProviderRegistry, ProviderType};
    pub use crate::types::{FeatureValue, ResourceID, ResourceRecord};
}
