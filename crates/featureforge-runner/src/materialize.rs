//! MATERIALIZE runner
//!
//! ```text
//! create/update materialization ─► ensure online table ─► N × COPY_TO_ONLINE ─► wait all
//! ```
//!
//! Chunks run concurrently and all read the snapshot this job built, even if
//! another job replaces the materialization meanwhile. The job fails if any
//! chunk fails; chunks that already succeeded are not rolled back.

use featureforge_core::{
    ConfigCodec, Error, OfflineResourceType, OfflineStore, OnlineStore, ProviderRegistry,
    ProviderType, ResourceID, Result, SerializedConfig, ValueType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::copy::{ChunkSpec, CopyToOnlineRunner};
use crate::runner::{offline_store, online_store};
use crate::{JobKind, JobWatcher, Runner};

/// Job configuration for MATERIALIZE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializeConfig {
    pub offline_type: ProviderType,
    pub offline_config: SerializedConfig,
    pub online_type: ProviderType,
    pub online_config: SerializedConfig,
    pub resource_id: ResourceID,
    pub value_type: ValueType,
    #[serde(default)]
    pub is_update: bool,
    /// Rows copied per COPY_TO_ONLINE chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
}

fn default_chunk_size() -> i64 {
    1024
}

impl ConfigCodec for MaterializeConfig {
    const KIND: &'static str = "materialize";
}

pub struct MaterializeRunner {
    offline: Arc<dyn OfflineStore>,
    online: Arc<dyn OnlineStore>,
    resource_id: ResourceID,
    value_type: ValueType,
    is_update: bool,
    chunk_size: i64,
}

impl MaterializeRunner {
    async fn materialize(self) -> Result<()> {
        let materialization = if self.is_update {
            self.offline.update_materialization(&self.resource_id).await?
        } else {
            self.offline.create_materialization(&self.resource_id).await?
        };
        self.ensure_online_table().await?;

        let num_rows = materialization.num_rows().await?;
        let chunks = ChunkSpec::count(num_rows, self.chunk_size);
        info!(
            resource = %self.resource_id,
            materialization = %materialization.id(),
            num_rows,
            chunks,
            "Materialization ready, copying to online store"
        );

        let mut watchers = Vec::with_capacity(usize::try_from(chunks).unwrap_or(0));
        for idx in 0..chunks {
            let runner = CopyToOnlineRunner::for_materialization(
                materialization.clone(),
                self.online.clone(),
                self.resource_id.clone(),
                ChunkSpec {
                    size: self.chunk_size,
                    idx,
                },
            );
            watchers.push(Box::new(runner).run()?);
        }

        let mut failures = Vec::new();
        for watcher in &watchers {
            if let Err(e) = watcher.wait().await {
                warn!(job = watcher.job(), error = %e, "Copy chunk failed");
                failures.push(e.to_string());
            }
        }
        if !failures.is_empty() {
            return Err(Error::JobFailed {
                job: JobKind::CopyToOnline.to_string(),
                message: format!(
                    "{} of {} chunks failed: {}",
                    failures.len(),
                    watchers.len(),
                    failures.join("; ")
                ),
            });
        }
        Ok(())
    }

    /// Reuses the table on update when it exists; creates it otherwise
    async fn ensure_online_table(&self) -> Result<()> {
        let (feature, variant) = (&self.resource_id.name, &self.resource_id.variant);
        if self.is_update {
            match self.online.get_table(feature, variant).await {
                Ok(_) => {
                    debug!(resource = %self.resource_id, "Reusing online table");
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        self.online
            .create_table(feature, variant, self.value_type)
            .await?;
        Ok(())
    }
}

impl Runner for MaterializeRunner {
    fn run(self: Box<Self>) -> Result<JobWatcher> {
        let runner = *self;
        JobWatcher::spawn(JobKind::Materialize.to_string(), runner.materialize())
    }
}

pub async fn materialize_factory(
    providers: Arc<ProviderRegistry>,
    config: SerializedConfig,
) -> Result<Box<dyn Runner>> {
    let job = MaterializeConfig::from_serialized(&config)?;
    job.resource_id.check_type(&[OfflineResourceType::Feature])?;
    if job.chunk_size <= 0 {
        return Err(Error::invalid_input(format!(
            "chunk size must be positive, got {}",
            job.chunk_size
        )));
    }

    let offline = offline_store(&providers, &job.offline_type, job.offline_config).await?;
    let online = online_store(&providers, &job.online_type, job.online_config).await?;
    Ok(Box::new(MaterializeRunner {
        offline,
        online,
        resource_id: job.resource_id,
        value_type: job.value_type,
        is_update: job.is_update,
        chunk_size: job.chunk_size,
    }))
}
