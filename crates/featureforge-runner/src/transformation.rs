//! CREATE_TRANSFORMATION runner
//!
//! The runner expects `source_mapping` to name backend tables already.
//! [`resolve_source_mappings`] is the caller-side step that produces those
//! mappings: whoever submits the job resolves `{{ name.variant }}` references
//! through the metadata catalog before serializing the config. Workers never
//! talk to the catalog.

use featureforge_core::{
    ConfigCodec, Error, MetadataResolver, NameVariant, OfflineResourceType, OfflineStore,
    ProviderRegistry, ProviderType, Result, SerializedConfig, SourceMapping, TransformationConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::runner::offline_store;
use crate::{JobKind, JobWatcher, Runner};

/// Job configuration for CREATE_TRANSFORMATION
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransformationConfig {
    pub offline_type: ProviderType,
    pub offline_config: SerializedConfig,
    pub transformation_config: TransformationConfig,
    #[serde(default)]
    pub is_update: bool,
}

impl ConfigCodec for CreateTransformationConfig {
    const KIND: &'static str = "create transformation";
}

/// Runs one transformation against a resolved offline store
pub struct CreateTransformationRunner {
    store: Arc<dyn OfflineStore>,
    config: TransformationConfig,
    is_update: bool,
}

impl CreateTransformationRunner {
    pub fn new(store: Arc<dyn OfflineStore>, config: TransformationConfig, is_update: bool) -> Self {
        Self {
            store,
            config,
            is_update,
        }
    }
}

impl Runner for CreateTransformationRunner {
    fn run(self: Box<Self>) -> Result<JobWatcher> {
        let Self {
            store,
            config,
            is_update,
        } = *self;

        JobWatcher::spawn(JobKind::CreateTransformation.to_string(), async move {
            let target = config.target_table_id.clone();
            if is_update {
                store.update_transformation(&config).await?;
            } else {
                store.create_transformation(&config).await?;
            }
            info!(target = %target, is_update, "Transformation complete");
            Ok(())
        })
    }
}

/// Decodes a [`CreateTransformationConfig`] and binds its offline store
pub async fn create_transformation_factory(
    providers: Arc<ProviderRegistry>,
    config: SerializedConfig,
) -> Result<Box<dyn Runner>> {
    let job = CreateTransformationConfig::from_serialized(&config)?;
    let store = offline_store(&providers, &job.offline_type, job.offline_config).await?;
    debug!(
        offline_type = %job.offline_type,
        target = %job.transformation_config.target_table_id,
        "Built transformation runner"
    );
    Ok(Box::new(CreateTransformationRunner::new(
        store,
        job.transformation_config,
        job.is_update,
    )))
}

/// A `{{ name.variant }}` placeholder and the source it refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReference {
    pub template: String,
    pub source: NameVariant,
}

/// Resolves each placeholder to the backend table that holds its source
///
/// Sources resolving to anything but a primary or transformation table are
/// rejected with `InvalidInput`. Lookups fail with `NotFound` when the store
/// has no table for the resolved id.
pub async fn resolve_source_mappings(
    resolver: &dyn MetadataResolver,
    store: &dyn OfflineStore,
    sources: &[SourceReference],
) -> Result<Vec<SourceMapping>> {
    let mut mappings = Vec::with_capacity(sources.len());
    for reference in sources {
        let id = resolver.resolve_source(&reference.source).await?;
        let table = match id.resource_type {
            OfflineResourceType::Primary => store.get_primary_table(&id).await?,
            OfflineResourceType::Transformation => store.get_transformation_table(&id).await?,
            other => {
                return Err(Error::invalid_input(format!(
                    "source {}.{} resolved to a {} resource",
                    reference.source.name, reference.source.variant, other
                )))
            }
        };
        mappings.push(SourceMapping {
            template: reference.template.clone(),
            source: table.name().to_string(),
        });
    }
    Ok(mappings)
}
