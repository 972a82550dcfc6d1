//! Providers and the provider registry
//!
//! A [`Provider`] is a live handle to a connected storage backend. Whether it
//! can serve as an online store, an offline store, or both is discovered
//! through [`Provider::as_online_store`] and [`Provider::as_offline_store`],
//! which return an explicit capability error instead of a half-usable value.
//!
//! Providers are built by factories bound in a [`ProviderRegistry`]:
//!
//! ```text
//!  (ProviderType, SerializedConfig) ──► ProviderRegistry::get ──► factory ──► Arc<dyn Provider>
//! ```
//!
//! The registry is populated once during startup. Lookups afterwards only
//! take the read lock, so any number of callers can build providers
//! concurrently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::{Error, OfflineStore, OnlineStore, Result, SerializedConfig};

/// Backend identifier used as the provider registry key
///
/// The named variants are the backends the platform knows about. `Other`
/// lets out-of-tree drivers and tests bind additional keys. Types compare and
/// hash by their wire name, so `Other("LOCAL_ONLINE")` is `LocalOnline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderType {
    LocalOnline,
    RedisOnline,
    CassandraOnline,
    DynamoDBOnline,
    MemoryOffline,
    PostgresOffline,
    SnowflakeOffline,
    RedshiftOffline,
    Other(String),
}

impl ProviderType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::LocalOnline => "LOCAL_ONLINE",
            Self::RedisOnline => "REDIS_ONLINE",
            Self::CassandraOnline => "CASSANDRA_ONLINE",
            Self::DynamoDBOnline => "DYNAMODB_ONLINE",
            Self::MemoryOffline => "MEMORY_OFFLINE",
            Self::PostgresOffline => "POSTGRES_OFFLINE",
            Self::SnowflakeOffline => "SNOWFLAKE_OFFLINE",
            Self::RedshiftOffline => "REDSHIFT_OFFLINE",
            Self::Other(name) => name,
        }
    }
}

impl PartialEq for ProviderType {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ProviderType {}

impl Hash for ProviderType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl From<&str> for ProviderType {
    fn from(name: &str) -> Self {
        match name {
            "LOCAL_ONLINE" => Self::LocalOnline,
            "REDIS_ONLINE" => Self::RedisOnline,
            "CASSANDRA_ONLINE" => Self::CassandraOnline,
            "DYNAMODB_ONLINE" => Self::DynamoDBOnline,
            "MEMORY_OFFLINE" => Self::MemoryOffline,
            "POSTGRES_OFFLINE" => Self::PostgresOffline,
            "SNOWFLAKE_OFFLINE" => Self::SnowflakeOffline,
            "REDSHIFT_OFFLINE" => Self::RedshiftOffline,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ProviderType {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<ProviderType> for String {
    fn from(provider_type: ProviderType) -> Self {
        provider_type.as_str().to_string()
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store role a provider may be able to fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    OnlineStore,
    OfflineStore,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnlineStore => f.write_str("OnlineStore"),
            Self::OfflineStore => f.write_str("OfflineStore"),
        }
    }
}

/// A connected storage backend
///
/// Implementations override the `as_*_store` conversions for the roles they
/// support; the defaults fail with [`Error::UnsupportedCapability`] carrying
/// the concrete type name.
pub trait Provider: Send + Sync {
    /// The registry key this provider was built under
    fn provider_type(&self) -> &ProviderType;

    /// The exact configuration this provider was built from
    fn config(&self) -> &SerializedConfig;

    fn as_online_store(self: Arc<Self>) -> Result<Arc<dyn OnlineStore>> {
        Err(Error::UnsupportedCapability {
            provider_type: self.provider_type().clone(),
            capability: Capability::OnlineStore,
            concrete: std::any::type_name::<Self>(),
        })
    }

    fn as_offline_store(self: Arc<Self>) -> Result<Arc<dyn OfflineStore>> {
        Err(Error::UnsupportedCapability {
            provider_type: self.provider_type().clone(),
            capability: Capability::OfflineStore,
            concrete: std::any::type_name::<Self>(),
        })
    }
}

/// Type and configuration every provider carries
///
/// Concrete providers embed this and delegate `provider_type`/`config` to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub provider_type: ProviderType,
    pub config: SerializedConfig,
}

impl ProviderInfo {
    pub fn new(provider_type: ProviderType, config: SerializedConfig) -> Self {
        Self {
            provider_type,
            config,
        }
    }
}

/// Builds a provider from its serialized configuration
///
/// Factories own no state and may run concurrently. Any async function or
/// closure `Fn(SerializedConfig) -> impl Future<Output = Result<Arc<dyn Provider>>>`
/// is a factory.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn create(&self, config: SerializedConfig) -> Result<Arc<dyn Provider>>;
}

#[async_trait]
impl<F, Fut> ProviderFactory for F
where
    F: Fn(SerializedConfig) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Arc<dyn Provider>>> + Send + 'static,
{
    async fn create(&self, config: SerializedConfig) -> Result<Arc<dyn Provider>> {
        (self)(config).await
    }
}

/// Mapping from provider type to factory
///
/// ## Lifecycle
///
/// 1. Create one registry per process and register every backend during startup.
/// 2. Share it (usually behind an `Arc`) with everything that builds providers.
/// 3. Tests that need isolation call [`ProviderRegistry::reset`] or build a
///    fresh registry; nothing is cleared implicitly.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: RwLock<HashMap<ProviderType, Arc<dyn ProviderFactory>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `factory` to `provider_type`
    ///
    /// # Errors
    ///
    /// - `DuplicateRegistration` if the type is already bound. The existing
    ///   binding stays active.
    pub fn register_factory<F>(&self, provider_type: ProviderType, factory: F) -> Result<()>
    where
        F: ProviderFactory + 'static,
    {
        let mut factories = self
            .factories
            .write()
            .map_err(|_| Error::internal("provider registry lock poisoned"))?;

        match factories.entry(provider_type) {
            Entry::Occupied(entry) => Err(Error::DuplicateRegistration {
                registry: "provider",
                key: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                info!(provider_type = %entry.key(), "Registered provider factory");
                entry.insert(Arc::new(factory));
                Ok(())
            }
        }
    }

    /// Builds a provider of the given type
    ///
    /// The factory's result is returned as is, including its deserialization
    /// or connection errors.
    ///
    /// # Errors
    ///
    /// - `UnknownProviderType` if nothing is bound to `provider_type`
    pub async fn get(
        &self,
        provider_type: &ProviderType,
        config: SerializedConfig,
    ) -> Result<Arc<dyn Provider>> {
        let factory = {
            let factories = self
                .factories
                .read()
                .map_err(|_| Error::internal("provider registry lock poisoned"))?;
            factories
                .get(provider_type)
                .cloned()
                .ok_or_else(|| Error::UnknownProviderType(provider_type.to_string()))?
        };

        debug!(provider_type = %provider_type, config_bytes = config.as_bytes().len(), "Building provider");
        factory.create(config).await
    }

    pub fn is_registered(&self, provider_type: &ProviderType) -> Result<bool> {
        let factories = self
            .factories
            .read()
            .map_err(|_| Error::internal("provider registry lock poisoned"))?;
        Ok(factories.contains_key(provider_type))
    }

    /// Registered types, sorted by name
    pub fn registered_types(&self) -> Result<Vec<ProviderType>> {
        let factories = self
            .factories
            .read()
            .map_err(|_| Error::internal("provider registry lock poisoned"))?;
        let mut types: Vec<ProviderType> = factories.keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(types)
    }

    /// Removes every binding
    ///
    /// Intended for test isolation only.
    pub fn reset(&self) -> Result<()> {
        let mut factories = self
            .factories
            .write()
            .map_err(|_| Error::internal("provider registry lock poisoned"))?;
        factories.clear();
        debug!("Provider registry reset");
        Ok(())
    }
}
