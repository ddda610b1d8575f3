//! Job submission interface.
//!
//! [`JobSubmitter`] is the cloneable front door of the executor. The
//! orchestrator and the background runner each hold one.

use super::handle::{JobHandle, JobStatus};
use super::job::{Job, JobId, JobResult};
use super::policy::Priority;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

/// Submits jobs to a running [`JobExecutor`](super::JobExecutor).
#[derive(Clone)]
pub struct JobSubmitter {
    pub(crate) sender: mpsc::Sender<SubmittedJob>,
}

impl JobSubmitter {
    pub(crate) fn new(sender: mpsc::Sender<SubmittedJob>) -> Self {
        Self { sender }
    }

    /// Submits a job. Returns `None` if the executor is gone or its
    /// submission channel is full.
    pub fn try_submit(&self, job: impl Job + 'static) -> Option<JobHandle> {
        self.try_submit_boxed(Box::new(job))
    }

    pub fn try_submit_boxed(&self, job: Box<dyn Job>) -> Option<JobHandle> {
        let job_id = job.id();
        let priority = job.priority();
        let name = job.name().to_string();

        let (status_tx, status_rx) = watch::channel(JobStatus::Pending);
        let handle = JobHandle::new(job_id.clone(), status_rx);
        let result_holder = handle.result_holder();

        let submitted = SubmittedJob {
            job,
            job_id,
            name,
            priority,
            status_tx,
            result_holder,
        };

        self.sender.try_send(submitted).ok()?;
        Some(handle)
    }

    /// Returns true once the executor has stopped receiving jobs.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for JobSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSubmitter")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// A job in transit from a submitter to the executor loop.
pub(crate) struct SubmittedJob {
    pub job: Box<dyn Job>,
    pub job_id: JobId,
    pub name: String,
    pub priority: Priority,
    pub status_tx: watch::Sender<JobStatus>,
    pub result_holder: Arc<Mutex<Option<JobResult>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::job::Stage;

    struct EmptyJob;

    impl Job for EmptyJob {
        fn id(&self) -> JobId {
            JobId::new("empty")
        }
        fn name(&self) -> &str {
            "Empty"
        }
        fn create_stages(&self) -> Vec<Stage> {
            vec![]
        }
    }

    #[tokio::test]
    async fn test_try_submit_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        let submitter = JobSubmitter::new(tx);
        drop(rx);

        assert!(submitter.is_closed());
        assert!(submitter.try_submit(EmptyJob).is_none());
    }

    #[tokio::test]
    async fn test_try_submit_carries_job_metadata() {
        let (tx, mut rx) = mpsc::channel(1);
        let submitter = JobSubmitter::new(tx);

        let handle = submitter.try_submit(EmptyJob).unwrap();
        assert_eq!(handle.status(), JobStatus::Pending);

        let submitted = rx.recv().await.unwrap();
        assert_eq!(submitted.job_id, JobId::new("empty"));
        assert_eq!(submitted.name, "Empty");
        assert_eq!(submitted.priority, Priority::USER);
    }
}
