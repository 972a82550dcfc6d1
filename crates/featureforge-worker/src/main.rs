//! # FeatureForge Worker
//!
//! Runs exactly one job and exits. The scheduler launches one worker per job
//! and reads the exit status: `0` when the job succeeded, non-zero otherwise.
//!
//! ## Startup Flow
//!
//! 1. Parse command-line arguments
//! 2. Load settings and initialize tracing
//! 3. Bind the built-in providers and job kinds
//! 4. Build the runner, run it, wait for the watcher
//!
//! ## Usage
//!
//! ```bash
//! featureforge-worker --job-kind MATERIALIZE --job-config-file job.json
//!
//! # Scheduler-style, through the environment
//! FEATUREFORGE_JOB_KIND=COPY_TO_ONLINE FEATUREFORGE_JOB_CONFIG='{...}' featureforge-worker
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod job;

use crate::config::{LogFormat, LogSettings};
use crate::job::JobPayload;
use featureforge_runner::JobKind;

#[derive(Parser)]
#[command(name = "featureforge-worker")]
#[command(about = "Run one FeatureForge job to completion", long_about = None)]
struct Args {
    /// Settings file path
    #[arg(short, long, default_value = "featureforge.yaml")]
    config: PathBuf,

    /// Job kind, e.g. CREATE_TRANSFORMATION or MATERIALIZE
    #[arg(long, env = "FEATUREFORGE_JOB_KIND")]
    job_kind: String,

    /// Serialized job configuration (JSON)
    #[arg(long, env = "FEATUREFORGE_JOB_CONFIG")]
    job_config: Option<String>,

    /// File holding the serialized job configuration
    #[arg(long)]
    job_config_file: Option<PathBuf>,
}

fn init_tracing(log: &LogSettings) {
    // RUST_LOG wins over the settings file
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match log.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (settings, found) = config::load(&args.config)?;
    init_tracing(&settings.log);
    if found {
        info!("Loaded settings from {}", args.config.display());
    } else {
        warn!(
            "Settings file '{}' not found, using defaults",
            args.config.display()
        );
    }

    let kind = JobKind::from(args.job_kind);
    let payload = JobPayload::from_args(args.job_config, args.job_config_file)?.read()?;
    let runners = job::registries()?;

    match job::run(&runners, &kind, payload).await {
        Ok(()) => {
            info!(job_kind = %kind, "Job succeeded");
            Ok(())
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!(job_kind = %kind, error = %message, "Job failed");
            Err(e)
        }
    }
}
