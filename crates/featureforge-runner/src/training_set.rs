//! CREATE_TRAINING_SET runner

use featureforge_core::{
    ConfigCodec, OfflineStore, ProviderRegistry, ProviderType, Result, SerializedConfig,
    TrainingSetDef,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::runner::offline_store;
use crate::{JobKind, JobWatcher, Runner};

/// Job configuration for CREATE_TRAINING_SET
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTrainingSetConfig {
    pub offline_type: ProviderType,
    pub offline_config: SerializedConfig,
    pub def: TrainingSetDef,
    #[serde(default)]
    pub is_update: bool,
}

impl ConfigCodec for CreateTrainingSetConfig {
    const KIND: &'static str = "create training set";
}

pub struct CreateTrainingSetRunner {
    store: Arc<dyn OfflineStore>,
    def: TrainingSetDef,
    is_update: bool,
}

impl CreateTrainingSetRunner {
    pub fn new(store: Arc<dyn OfflineStore>, def: TrainingSetDef, is_update: bool) -> Self {
        Self {
            store,
            def,
            is_update,
        }
    }
}

impl Runner for CreateTrainingSetRunner {
    fn run(self: Box<Self>) -> Result<JobWatcher> {
        let Self {
            store,
            def,
            is_update,
        } = *self;

        JobWatcher::spawn(JobKind::CreateTrainingSet.to_string(), async move {
            if is_update {
                store.update_training_set(&def).await?;
            } else {
                store.create_training_set(&def).await?;
            }
            info!(
                training_set = %def.id,
                features = def.features.len(),
                is_update,
                "Training set complete"
            );
            Ok(())
        })
    }
}

pub async fn create_training_set_factory(
    providers: Arc<ProviderRegistry>,
    config: SerializedConfig,
) -> Result<Box<dyn Runner>> {
    let job = CreateTrainingSetConfig::from_serialized(&config)?;
    let store = offline_store(&providers, &job.offline_type, job.offline_config).await?;
    Ok(Box::new(CreateTrainingSetRunner::new(store, job.def, job.is_update)))
}
