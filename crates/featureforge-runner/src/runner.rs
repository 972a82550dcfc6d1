//! Runners and the runner registry
//!
//! The runner registry sits one layer above the provider registry:
//!
//! ```text
//!  (JobKind, SerializedConfig)
//!        │ RunnerRegistry::create
//!        ▼
//!  factory: decode config ─► ProviderRegistry::get ─► as_*_store ─► Runner
//!        │ Runner::run
//!        ▼
//!  JobWatcher (Running ─► Succeeded | Failed)
//! ```
//!
//! Factories do all validation up front. A runner only exists once its
//! configuration decoded and its stores resolved, so execution errors are
//! the only ones left for the watcher to report.

use async_trait::async_trait;
use featureforge_core::{
    Error, OfflineStore, OnlineStore, ProviderRegistry, ProviderType, Result, SerializedConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::JobWatcher;

/// Job kind used as the runner registry key
///
/// Kinds compare and hash by their wire name, so `Other("MATERIALIZE")` and
/// `Materialize` are the same key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobKind {
    CreateTransformation,
    CreateTrainingSet,
    Materialize,
    CopyToOnline,
    RegisterSource,
    Other(String),
}

impl JobKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateTransformation => "CREATE_TRANSFORMATION",
            Self::CreateTrainingSet => "CREATE_TRAINING_SET",
            Self::Materialize => "MATERIALIZE",
            Self::CopyToOnline => "COPY_TO_ONLINE",
            Self::RegisterSource => "REGISTER_SOURCE",
            Self::Other(name) => name,
        }
    }
}

impl PartialEq for JobKind {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for JobKind {}

impl Hash for JobKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl From<&str> for JobKind {
    fn from(name: &str) -> Self {
        match name {
            "CREATE_TRANSFORMATION" => Self::CreateTransformation,
            "CREATE_TRAINING_SET" => Self::CreateTrainingSet,
            "MATERIALIZE" => Self::Materialize,
            "COPY_TO_ONLINE" => Self::CopyToOnline,
            "REGISTER_SOURCE" => Self::RegisterSource,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for JobKind {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<JobKind> for String {
    fn from(kind: JobKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work bound to its stores and job configuration
///
/// `run` consumes the runner, so a job body executes at most once.
pub trait Runner: Send {
    /// Starts the job body and returns immediately
    ///
    /// Only pre-flight problems (no Tokio runtime) are returned here;
    /// everything else is reported through the watcher.
    fn run(self: Box<Self>) -> Result<JobWatcher>;
}

/// Builds a runner from its serialized job configuration
///
/// Any async function or closure
/// `Fn(Arc<ProviderRegistry>, SerializedConfig) -> impl Future<Output = Result<Box<dyn Runner>>>`
/// is a factory.
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    async fn create(
        &self,
        providers: Arc<ProviderRegistry>,
        config: SerializedConfig,
    ) -> Result<Box<dyn Runner>>;
}

#[async_trait]
impl<F, Fut> RunnerFactory for F
where
    F: Fn(Arc<ProviderRegistry>, SerializedConfig) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Box<dyn Runner>>> + Send + 'static,
{
    async fn create(
        &self,
        providers: Arc<ProviderRegistry>,
        config: SerializedConfig,
    ) -> Result<Box<dyn Runner>> {
        (self)(providers, config).await
    }
}

/// Mapping from job kind to runner factory
///
/// Holds the provider registry every factory resolves stores through.
pub struct RunnerRegistry {
    providers: Arc<ProviderRegistry>,
    factories: RwLock<HashMap<JobKind, Arc<dyn RunnerFactory>>>,
}

impl RunnerRegistry {
    /// An empty registry
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            providers,
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with every built-in job kind bound
    pub fn with_defaults(providers: Arc<ProviderRegistry>) -> Result<Self> {
        let registry = Self::new(providers);
        registry.register_defaults()?;
        Ok(registry)
    }

    /// Binds the built-in job kinds
    pub fn register_defaults(&self) -> Result<()> {
        self.register_factory(
            JobKind::CreateTransformation,
            crate::create_transformation_factory,
        )?;
        self.register_factory(JobKind::CreateTrainingSet, crate::create_training_set_factory)?;
        self.register_factory(JobKind::Materialize, crate::materialize_factory)?;
        self.register_factory(JobKind::CopyToOnline, crate::copy_to_online_factory)?;
        self.register_factory(JobKind::RegisterSource, crate::register_source_factory)?;
        Ok(())
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Binds `factory` to `kind`
    ///
    /// # Errors
    ///
    /// - `DuplicateRegistration` if the kind is already bound. The existing
    ///   binding stays active.
    pub fn register_factory<F>(&self, kind: JobKind, factory: F) -> Result<()>
    where
        F: RunnerFactory + 'static,
    {
        let mut factories = self
            .factories
            .write()
            .map_err(|_| Error::internal("runner registry lock poisoned"))?;

        match factories.entry(kind) {
            Entry::Occupied(entry) => Err(Error::DuplicateRegistration {
                registry: "runner",
                key: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                info!(job_kind = %entry.key(), "Registered runner factory");
                entry.insert(Arc::new(factory));
                Ok(())
            }
        }
    }

    /// Builds a runner for `kind`
    ///
    /// # Errors
    ///
    /// - `UnknownJobKind` if nothing is bound to `kind`
    /// - whatever the factory returns: deserialization, unknown provider
    ///   type or capability errors. No runner is built in that case.
    pub async fn create(&self, kind: &JobKind, config: SerializedConfig) -> Result<Box<dyn Runner>> {
        let factory = {
            let factories = self
                .factories
                .read()
                .map_err(|_| Error::internal("runner registry lock poisoned"))?;
            factories
                .get(kind)
                .cloned()
                .ok_or_else(|| Error::UnknownJobKind(kind.to_string()))?
        };

        debug!(job_kind = %kind, config_bytes = config.as_bytes().len(), "Creating runner");
        factory.create(self.providers.clone(), config).await
    }

    pub fn is_registered(&self, kind: &JobKind) -> Result<bool> {
        let factories = self
            .factories
            .read()
            .map_err(|_| Error::internal("runner registry lock poisoned"))?;
        Ok(factories.contains_key(kind))
    }

    /// Registered kinds, sorted by name
    pub fn registered_kinds(&self) -> Result<Vec<JobKind>> {
        let factories = self
            .factories
            .read()
            .map_err(|_| Error::internal("runner registry lock poisoned"))?;
        let mut kinds: Vec<JobKind> = factories.keys().cloned().collect();
        kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(kinds)
    }

    /// Removes every binding; the provider registry is left alone
    ///
    /// Intended for test isolation only.
    pub fn reset(&self) -> Result<()> {
        let mut factories = self
            .factories
            .write()
            .map_err(|_| Error::internal("runner registry lock poisoned"))?;
        factories.clear();
        debug!("Runner registry reset");
        Ok(())
    }
}

/// Resolves a provider and narrows it to an offline store
pub(crate) async fn offline_store(
    providers: &ProviderRegistry,
    provider_type: &ProviderType,
    config: SerializedConfig,
) -> Result<Arc<dyn OfflineStore>> {
    providers
        .get(provider_type, config)
        .await?
        .as_offline_store()
}

/// Resolves a provider and narrows it to an online store
pub(crate) async fn online_store(
    providers: &ProviderRegistry,
    provider_type: &ProviderType,
    config: SerializedConfig,
) -> Result<Arc<dyn OnlineStore>> {
    providers
        .get(provider_type, config)
        .await?
        .as_online_store()
}
