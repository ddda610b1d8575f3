//! Job handle for status queries.
//!
//! The [`JobHandle`] is returned when a job is submitted to the executor.
//! Callers that do not care about the outcome simply drop it; the job runs
//! to completion either way.

use super::job::{JobId, JobResult};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Handle to a submitted job.
///
/// Cloneable; all clones refer to the same job.
#[derive(Clone)]
pub struct JobHandle {
    job_id: JobId,
    status_rx: watch::Receiver<JobStatus>,
    /// Set by the executor when the job completes.
    result: Arc<Mutex<Option<JobResult>>>,
}

impl JobHandle {
    pub(crate) fn new(job_id: JobId, status_rx: watch::Receiver<JobStatus>) -> Self {
        Self {
            job_id,
            status_rx,
            result: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn result_holder(&self) -> Arc<Mutex<Option<JobResult>>> {
        Arc::clone(&self.result)
    }

    pub fn id(&self) -> &JobId {
        &self.job_id
    }

    /// Returns the most recent status without waiting.
    pub fn status(&self) -> JobStatus {
        *self.status_rx.borrow()
    }

    /// Waits for the job to reach a terminal state and returns its result.
    ///
    /// Only the first caller across clones receives the full result; later
    /// callers get an empty one.
    pub async fn wait(&mut self) -> JobResult {
        loop {
            if self.status().is_terminal() {
                break;
            }
            if self.status_rx.changed().await.is_err() {
                break;
            }
        }
        self.result
            .lock()
            .await
            .take()
            .unwrap_or_else(JobResult::new)
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("status", &self.status())
            .finish()
    }
}

/// Job execution status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobStatus {
    /// Submitted, not yet picked up by the executor.
    #[default]
    Pending,
    Running,
    Succeeded,
    /// A task failed; remaining stages were skipped.
    Failed,
    /// The executor shut down before the job finished.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}
