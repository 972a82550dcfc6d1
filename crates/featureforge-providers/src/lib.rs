//! FeatureForge built-in providers
//!
//! Concrete backends for the storage contracts in `featureforge-core`:
//!
//! | Provider type      | Store                  | Cargo feature |
//! |--------------------|------------------------|---------------|
//! | `MEMORY_OFFLINE`   | [`MemoryOfflineStore`] | always        |
//! | `LOCAL_ONLINE`     | [`LocalOnlineStore`]   | always        |
//! | `REDIS_ONLINE`     | `RedisOnlineStore`     | `redis`       |
//! | `POSTGRES_OFFLINE` | `PostgresOfflineStore` | `postgres`    |
//!
//! The remaining provider types (Cassandra, DynamoDB, Snowflake, Redshift)
//! are reserved for driver crates that bind themselves through
//! [`ProviderRegistry::register_factory`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use featureforge_core::{ProviderRegistry, ProviderType, SerializedConfig};
//! use featureforge_providers::register_builtin_providers;
//!
//! let registry = ProviderRegistry::new();
//! register_builtin_providers(&registry)?;
//!
//! let provider = registry.get(&ProviderType::LocalOnline, SerializedConfig::empty()).await?;
//! let online = provider.as_online_store()?;
//! ```

use featureforge_core::{ProviderRegistry, ProviderType, Result};

pub mod embedding;
pub mod local;
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres_store;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use embedding::EmbeddingTable;
pub use local::{local_online_factory, LocalOnlineStore, LocalOnlineTable};
pub use memory::{memory_offline_factory, MemoryOfflineStore};

#[cfg(feature = "postgres")]
pub use postgres_store::{postgres_offline_factory, PostgresConfig, PostgresOfflineStore};

#[cfg(feature = "redis")]
pub use redis_store::{redis_online_factory, RedisConfig, RedisOnlineStore};

/// Binds every provider compiled into this crate
///
/// # Errors
///
/// - `DuplicateRegistration` if any of the types is already bound
pub fn register_builtin_providers(registry: &ProviderRegistry) -> Result<()> {
    registry.register_factory(ProviderType::LocalOnline, local_online_factory)?;
    registry.register_factory(ProviderType::MemoryOffline, memory_offline_factory)?;

    #[cfg(feature = "redis")]
    registry.register_factory(ProviderType::RedisOnline, redis_online_factory)?;

    #[cfg(feature = "postgres")]
    registry.register_factory(ProviderType::PostgresOffline, postgres_offline_factory)?;

    Ok(())
}
