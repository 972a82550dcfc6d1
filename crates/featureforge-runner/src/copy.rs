//! COPY_TO_ONLINE runner
//!
//! Copies one chunk of a materialization into an online table. The chunk
//! covers rows `[chunk_idx * chunk_size, min(num_rows, (chunk_idx + 1) * chunk_size))`;
//! a chunk that starts past the last row copies nothing and succeeds.
//!
//! A chunk launched by MATERIALIZE reads the snapshot handle that job built.
//! A standalone COPY_TO_ONLINE job resolves its snapshot by id when it runs.

use featureforge_core::{
    ConfigCodec, Error, Materialization, MaterializationID, OfflineStore, OnlineStore,
    ProviderRegistry, ProviderType, ResourceID, Result, SerializedConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::runner::{offline_store, online_store};
use crate::{JobKind, JobWatcher, Runner};

/// Job configuration for COPY_TO_ONLINE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyToOnlineConfig {
    pub offline_type: ProviderType,
    pub offline_config: SerializedConfig,
    pub online_type: ProviderType,
    pub online_config: SerializedConfig,
    pub materialization_id: MaterializationID,
    pub resource_id: ResourceID,
    pub chunk_size: i64,
    pub chunk_idx: i64,
}

impl ConfigCodec for CopyToOnlineConfig {
    const KIND: &'static str = "copy to online";
}

/// Row range of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub size: i64,
    pub idx: i64,
}

impl ChunkSpec {
    /// Number of chunks of `size` rows needed to cover `num_rows`
    pub fn count(num_rows: i64, size: i64) -> i64 {
        if num_rows <= 0 || size <= 0 {
            return 0;
        }
        num_rows / size + i64::from(num_rows % size != 0)
    }

    /// `[begin, end)` of this chunk clamped to `num_rows`, or `None` past the end
    pub fn range(&self, num_rows: i64) -> Option<(i64, i64)> {
        let begin = self.idx.saturating_mul(self.size);
        if begin >= num_rows {
            return None;
        }
        Some((begin, begin.saturating_add(self.size).min(num_rows)))
    }

    fn check(&self) -> Result<()> {
        if self.size <= 0 {
            return Err(Error::invalid_input(format!(
                "chunk size must be positive, got {}",
                self.size
            )));
        }
        if self.idx < 0 {
            return Err(Error::invalid_input(format!(
                "chunk index must not be negative, got {}",
                self.idx
            )));
        }
        Ok(())
    }
}

/// Materialization a chunk copies from
enum Snapshot {
    Lookup {
        offline: Arc<dyn OfflineStore>,
        id: MaterializationID,
    },
    Handle(Arc<dyn Materialization>),
}

impl Snapshot {
    fn id(&self) -> &MaterializationID {
        match self {
            Self::Lookup { id, .. } => id,
            Self::Handle(materialization) => materialization.id(),
        }
    }

    async fn resolve(&self) -> Result<Arc<dyn Materialization>> {
        match self {
            Self::Lookup { offline, id } => offline.get_materialization(id).await,
            Self::Handle(materialization) => Ok(materialization.clone()),
        }
    }
}

pub struct CopyToOnlineRunner {
    snapshot: Snapshot,
    online: Arc<dyn OnlineStore>,
    resource_id: ResourceID,
    chunk: ChunkSpec,
}

impl CopyToOnlineRunner {
    pub(crate) fn new(
        offline: Arc<dyn OfflineStore>,
        online: Arc<dyn OnlineStore>,
        materialization_id: MaterializationID,
        resource_id: ResourceID,
        chunk: ChunkSpec,
    ) -> Self {
        Self {
            snapshot: Snapshot::Lookup {
                offline,
                id: materialization_id,
            },
            online,
            resource_id,
            chunk,
        }
    }

    /// A chunk over a materialization handle the caller already holds
    pub(crate) fn for_materialization(
        materialization: Arc<dyn Materialization>,
        online: Arc<dyn OnlineStore>,
        resource_id: ResourceID,
        chunk: ChunkSpec,
    ) -> Self {
        Self {
            snapshot: Snapshot::Handle(materialization),
            online,
            resource_id,
            chunk,
        }
    }

    async fn copy(self) -> Result<()> {
        let materialization = self.snapshot.resolve().await?;
        let table = self
            .online
            .get_table(&self.resource_id.name, &self.resource_id.variant)
            .await?;

        let num_rows = materialization.num_rows().await?;
        let Some((begin, end)) = self.chunk.range(num_rows) else {
            debug!(
                materialization = %self.snapshot.id(),
                chunk = self.chunk.idx,
                num_rows,
                "Chunk past end of materialization"
            );
            return Ok(());
        };

        let records = materialization
            .iterate_segment(begin, end)
            .await?
            .map(|record| record.map(|r| (r.entity, r.value)))
            .collect::<Result<Vec<_>>>()?;
        let copied = records.len();
        table.set_batch(records).await?;

        info!(
            materialization = %self.snapshot.id(),
            chunk = self.chunk.idx,
            begin,
            end,
            copied,
            "Copied chunk to online store"
        );
        Ok(())
    }
}

impl Runner for CopyToOnlineRunner {
    fn run(self: Box<Self>) -> Result<JobWatcher> {
        let runner = *self;
        let job = format!("{}[{}]", JobKind::CopyToOnline, runner.chunk.idx);
        JobWatcher::spawn(job, runner.copy())
    }
}

pub async fn copy_to_online_factory(
    providers: Arc<ProviderRegistry>,
    config: SerializedConfig,
) -> Result<Box<dyn Runner>> {
    let job = CopyToOnlineConfig::from_serialized(&config)?;
    let chunk = ChunkSpec {
        size: job.chunk_size,
        idx: job.chunk_idx,
    };
    chunk.check()?;

    let offline = offline_store(&providers, &job.offline_type, job.offline_config).await?;
    let online = online_store(&providers, &job.online_type, job.online_config).await?;
    Ok(Box::new(CopyToOnlineRunner::new(
        offline,
        online,
        job.materialization_id,
        job.resource_id,
        chunk,
    )))
}
