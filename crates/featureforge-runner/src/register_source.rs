//! REGISTER_SOURCE runner
//!
//! Attaches an existing backend table to a primary resource id. No data is
//! copied.

use featureforge_core::{
    ConfigCodec, Error, OfflineResourceType, OfflineStore, ProviderRegistry, ProviderType, ResourceID,
    Result, SerializedConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::runner::offline_store;
use crate::{JobKind, JobWatcher, Runner};

/// Job configuration for REGISTER_SOURCE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterSourceConfig {
    pub offline_type: ProviderType,
    pub offline_config: SerializedConfig,
    pub resource_id: ResourceID,
    pub source_table: String,
}

impl ConfigCodec for RegisterSourceConfig {
    const KIND: &'static str = "register source";
}

pub struct RegisterSourceRunner {
    store: Arc<dyn OfflineStore>,
    resource_id: ResourceID,
    source_table: String,
}

impl Runner for RegisterSourceRunner {
    fn run(self: Box<Self>) -> Result<JobWatcher> {
        let Self {
            store,
            resource_id,
            source_table,
        } = *self;

        JobWatcher::spawn(JobKind::RegisterSource.to_string(), async move {
            store
                .register_primary_from_source_table(&resource_id, &source_table)
                .await?;
            info!(resource = %resource_id, source_table = %source_table, "Registered source table");
            Ok(())
        })
    }
}

/// Rejects non-primary ids and empty table names before resolving the store
pub async fn register_source_factory(
    providers: Arc<ProviderRegistry>,
    config: SerializedConfig,
) -> Result<Box<dyn Runner>> {
    let job = RegisterSourceConfig::from_serialized(&config)?;
    job.resource_id.check_type(&[OfflineResourceType::Primary])?;
    if job.source_table.is_empty() {
        return Err(Error::invalid_input(format!(
            "no source table given for {}",
            job.resource_id
        )));
    }

    let store = offline_store(&providers, &job.offline_type, job.offline_config).await?;
    Ok(Box::new(RegisterSourceRunner {
        store,
        resource_id: job.resource_id,
        source_table: job.source_table,
    }))
}
