//! FeatureForge job runners
//!
//! A job arrives as a `(JobKind, SerializedConfig)` pair. The
//! [`RunnerRegistry`] decodes it into a [`Runner`] bound to live stores;
//! running it yields a [`JobWatcher`] the caller waits on.
//!
//! | Job kind                | Runner                          |
//! |-------------------------|---------------------------------|
//! | `CREATE_TRANSFORMATION` | [`CreateTransformationRunner`]  |
//! | `CREATE_TRAINING_SET`   | [`CreateTrainingSetRunner`]     |
//! | `MATERIALIZE`           | [`MaterializeRunner`]           |
//! | `COPY_TO_ONLINE`        | [`CopyToOnlineRunner`]          |
//! | `REGISTER_SOURCE`       | [`RegisterSourceRunner`]        |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use featureforge_core::{ConfigCodec, ProviderRegistry};
//! use featureforge_runner::{JobKind, RunnerRegistry};
//! use std::sync::Arc;
//!
//! let providers = Arc::new(ProviderRegistry::new());
//! featureforge_providers::register_builtin_providers(&providers)?;
//! let runners = RunnerRegistry::with_defaults(providers)?;
//!
//! let runner = runners.create(&JobKind::Materialize, job.to_serialized()?).await?;
//! runner.run()?.wait().await?;
//! ```

pub mod copy;
pub mod materialize;
pub mod register_source;
pub mod runner;
pub mod training_set;
pub mod transformation;
pub mod watcher;

pub use copy::{copy_to_online_factory, ChunkSpec, CopyToOnlineConfig, CopyToOnlineRunner};
pub use materialize::{materialize_factory, MaterializeConfig, MaterializeRunner};
pub use register_source::{register_source_factory, RegisterSourceConfig, RegisterSourceRunner};
pub use runner::{JobKind, Runner, RunnerFactory, RunnerRegistry};
pub use training_set::{
    create_training_set_factory, CreateTrainingSetConfig, CreateTrainingSetRunner,
};
pub use transformation::{
    create_transformation_factory, resolve_source_mappings, CreateTransformationConfig,
    CreateTransformationRunner, SourceReference,
};
pub use watcher::{JobStatus, JobWatcher};
