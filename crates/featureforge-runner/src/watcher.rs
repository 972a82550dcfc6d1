//! Job watchers
//!
//! A [`JobWatcher`] is the caller's handle on a running job. The job body runs
//! on the Tokio runtime; its outcome is published once through a
//! `tokio::sync::watch` channel and read by any number of watcher clones.
//!
//! ```text
//!            spawn                  settle (once)
//! Runner::run ────► Running ──┬──► Succeeded
//!                             └──► Failed(message)
//! ```
//!
//! A body that returns an error or panics settles the watcher as failed.
//! Nothing ever moves a watcher out of a terminal state.

use featureforge_core::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{error, info};

/// Observable state of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Cheaply cloneable handle on one job's outcome
#[derive(Clone)]
pub struct JobWatcher {
    job: Arc<str>,
    status: watch::Receiver<JobStatus>,
}

impl JobWatcher {
    /// Runs `body` on the current Tokio runtime
    ///
    /// # Errors
    ///
    /// - `InternalError` when called outside a Tokio runtime; the body never runs
    pub fn spawn<F>(job: impl Into<String>, body: F) -> Result<Self>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let job: Arc<str> = Arc::from(job.into());
        let handle = Handle::try_current().map_err(|_| {
            Error::internal(format!("job '{}' must be started inside a Tokio runtime", job))
        })?;

        let (tx, rx) = watch::channel(JobStatus::Running);
        let name = job.clone();
        let body_handle = handle.spawn(body);
        handle.spawn(async move {
            info!(job = %name, "Job started");
            let status = match body_handle.await {
                Ok(Ok(())) => {
                    info!(job = %name, "Job succeeded");
                    JobStatus::Succeeded
                }
                Ok(Err(e)) => {
                    error!(job = %name, error = %e, "Job failed");
                    JobStatus::Failed(e.to_string())
                }
                Err(join_err) if join_err.is_panic() => {
                    error!(job = %name, "Job panicked");
                    JobStatus::Failed("job panicked".to_string())
                }
                Err(_) => {
                    error!(job = %name, "Job cancelled");
                    JobStatus::Failed("job cancelled".to_string())
                }
            };
            tx.send_replace(status);
        });

        Ok(Self { job, status: rx })
    }

    /// A watcher that is already settled with `result`
    pub fn completed(job: impl Into<String>, result: Result<()>) -> Self {
        let status = match result {
            Ok(()) => JobStatus::Succeeded,
            Err(e) => JobStatus::Failed(e.to_string()),
        };
        let (_tx, rx) = watch::channel(status);
        Self {
            job: Arc::from(job.into()),
            status: rx,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    /// Current state without waiting
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    /// Waits until the job settles
    ///
    /// Every call returns the same outcome. A failed job yields
    /// [`Error::JobFailed`] carrying the body's error message.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.status.clone();
        let status = match rx.wait_for(JobStatus::is_terminal).await {
            Ok(status) => status.clone(),
            // Sender dropped without settling: the runtime shut down under the job
            Err(_) => JobStatus::Failed("job cancelled".to_string()),
        };
        self.outcome(status)
    }

    /// Blocking form of [`JobWatcher::wait`] for threads outside the runtime
    pub fn wait_blocking(&self) -> Result<()> {
        futures::executor::block_on(self.wait())
    }

    fn outcome(&self, status: JobStatus) -> Result<()> {
        match status {
            JobStatus::Succeeded => Ok(()),
            JobStatus::Failed(message) => Err(Error::JobFailed {
                job: self.job.to_string(),
                message,
            }),
            JobStatus::Running => Err(Error::internal(format!(
                "job '{}' observed running after settling",
                self.job
            ))),
        }
    }
}

impl std::fmt::Debug for JobWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWatcher")
            .field("job", &self.job)
            .field("status", &self.status())
            .finish()
    }
}
