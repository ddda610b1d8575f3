//! Task execution context.

use super::job::JobId;
use tokio_util::sync::CancellationToken;

/// Execution context passed to a task run.
///
/// The cancellation token is shared by every task of the job; it fires when
/// a sibling task fails or the executor shuts down.
pub struct TaskContext {
    job_id: JobId,
    cancellation: CancellationToken,
    attempt: u32,
}

impl TaskContext {
    pub fn new(job_id: JobId, cancellation: CancellationToken) -> Self {
        Self::with_attempt(job_id, cancellation, 1)
    }

    pub(crate) fn with_attempt(job_id: JobId, cancellation: CancellationToken, attempt: u32) -> Self {
        Self {
            job_id,
            cancellation,
            attempt,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Run number of the task, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
