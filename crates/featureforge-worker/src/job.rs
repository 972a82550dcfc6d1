//! Loading and running the worker's one job

use anyhow::Context;
use featureforge_core::{ProviderRegistry, SerializedConfig};
use featureforge_runner::{JobKind, RunnerRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Instrument};

/// Where the serialized job configuration comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    Inline(String),
    File(PathBuf),
}

impl JobPayload {
    /// Picks the payload source; exactly one must be given
    pub fn from_args(inline: Option<String>, file: Option<PathBuf>) -> anyhow::Result<Self> {
        match (inline, file) {
            (Some(text), None) => Ok(Self::Inline(text)),
            (None, Some(path)) => Ok(Self::File(path)),
            (Some(_), Some(_)) => {
                anyhow::bail!("--job-config and --job-config-file are mutually exclusive")
            }
            (None, None) => anyhow::bail!("one of --job-config or --job-config-file is required"),
        }
    }

    pub fn read(&self) -> anyhow::Result<SerializedConfig> {
        match self {
            Self::Inline(text) => Ok(SerializedConfig::from(text.as_str())),
            Self::File(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("reading job config {}", path.display()))?;
                Ok(SerializedConfig::from(bytes))
            }
        }
    }
}

/// Registries with every built-in provider and job kind bound
pub fn registries() -> anyhow::Result<RunnerRegistry> {
    let providers = Arc::new(ProviderRegistry::new());
    featureforge_providers::register_builtin_providers(&providers)?;
    Ok(RunnerRegistry::with_defaults(providers)?)
}

/// Builds the runner, starts it and waits for the job to settle
pub async fn run(
    runners: &RunnerRegistry,
    kind: &JobKind,
    config: SerializedConfig,
) -> anyhow::Result<()> {
    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("job", %run_id, kind = %kind);

    async {
        let runner = runners
            .create(kind, config)
            .await
            .with_context(|| format!("creating {} runner", kind))?;
        let watcher = runner.run()?;
        info!("Job running");
        watcher.wait().await?;
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}
