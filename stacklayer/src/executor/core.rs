//! Job executor core - main struct and run loop.
//!
//! Handler methods live in separate modules:
//! - `dispatch`: moving queued tasks onto the runtime
//! - `lifecycle`: job start, task completion, retries and job completion

use super::active_job::{ActiveJob, TaskCompletion};
use super::config::ExecutorConfig;
use super::job::JobId;
use super::queue::{PriorityQueue, QueuedTask};
use super::resource_pool::ResourcePools;
use super::submitter::{JobSubmitter, SubmittedJob};
use super::telemetry::{NullTelemetrySink, TelemetrySink};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub(crate) const YIELD_EVERY_N_ITERATIONS: u64 = 50;

/// Runs submitted jobs.
///
/// The executor owns all job state and is driven by a single loop; tasks
/// run on spawned tokio tasks and report back over a channel. Tasks that
/// wait (countdowns, retry delays) sit on timers and re-enter through the
/// delayed channel, so no runtime thread is held while the backend
/// converges.
pub struct JobExecutor {
    pub(crate) resource_pools: Arc<ResourcePools>,
    pub(crate) task_queue: PriorityQueue,
    pub(crate) active_jobs: HashMap<JobId, ActiveJob>,
    pub(crate) job_receiver: mpsc::Receiver<SubmittedJob>,
    pub(crate) completion_tx: mpsc::UnboundedSender<TaskCompletion>,
    pub(crate) completion_rx: mpsc::UnboundedReceiver<TaskCompletion>,
    pub(crate) delayed_tx: mpsc::UnboundedSender<QueuedTask>,
    pub(crate) delayed_rx: mpsc::UnboundedReceiver<QueuedTask>,
    pub(crate) telemetry: Arc<dyn TelemetrySink>,
    pub(crate) config: ExecutorConfig,
    /// Tasks currently spawned.
    pub(crate) dispatched_count: usize,
    pub(crate) loop_count: u64,
}

impl JobExecutor {
    pub fn new(config: ExecutorConfig) -> (Self, JobSubmitter) {
        Self::with_telemetry(config, Arc::new(NullTelemetrySink))
    }

    pub fn with_telemetry(
        config: ExecutorConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> (Self, JobSubmitter) {
        let (job_tx, job_rx) = mpsc::channel(config.job_channel_capacity.max(1));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (delayed_tx, delayed_rx) = mpsc::unbounded_channel();

        let executor = Self {
            resource_pools: Arc::new(ResourcePools::new(config.resource_pools.clone())),
            task_queue: PriorityQueue::new(),
            active_jobs: HashMap::new(),
            job_receiver: job_rx,
            completion_tx,
            completion_rx,
            delayed_tx,
            delayed_rx,
            telemetry,
            config,
            dispatched_count: 0,
            loop_count: 0,
        };

        (executor, JobSubmitter::new(job_tx))
    }

    /// Runs until `shutdown` fires. Jobs still active at shutdown end as
    /// `Cancelled`.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            backend_permits = self.config.resource_pools.backend,
            repository_permits = self.config.resource_pools.repository,
            "Executor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.shutdown().await;
                    break;
                }

                Some(completion) = self.completion_rx.recv() => {
                    self.handle_task_completion(completion);
                }

                Some(delayed) = self.delayed_rx.recv() => {
                    self.handle_delayed_task(delayed);
                }

                Some(submitted) = self.job_receiver.recv() => {
                    self.handle_job_submission(submitted);
                }
            }

            self.dispatch_tasks();
            self.complete_finished_jobs().await;
            self.maybe_yield().await;
        }
    }

    async fn maybe_yield(&mut self) {
        self.loop_count += 1;
        if self.loop_count % YIELD_EVERY_N_ITERATIONS == 0 {
            tokio::task::yield_now().await;
        }
    }

    pub fn active_job_count(&self) -> usize {
        self.active_jobs.len()
    }
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("active_jobs", &self.active_jobs.len())
            .field("queued_tasks", &self.task_queue.len())
            .field("dispatched_count", &self.dispatched_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_executor_creation() {
        let (executor, submitter) = JobExecutor::new(ExecutorConfig::default());

        assert_eq!(executor.dispatched_count, 0);
        assert_eq!(executor.active_job_count(), 0);
        assert!(!submitter.is_closed());
    }

    #[tokio::test]
    async fn test_submitter_closes_when_executor_stops() {
        let (executor, submitter) = JobExecutor::new(ExecutorConfig::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        executor.run(shutdown).await;
        assert!(submitter.is_closed());
    }
}
