//! Task dispatching.
//!
//! Moves queued tasks onto the runtime, respecting resource pool limits and
//! the global concurrency cap.

use super::active_job::TaskCompletion;
use super::context::TaskContext;
use super::core::JobExecutor;
use super::queue::QueuedTask;
use super::resource_pool::ResourcePermit;
use super::task::TaskResult;
use super::telemetry::TelemetryEvent;
use std::time::Instant;
use tracing::debug;

impl JobExecutor {
    pub(crate) fn dispatch_tasks(&mut self) {
        while self.dispatched_count < self.config.max_concurrent_tasks {
            let Some((queued, permit)) = self.find_dispatchable_task() else {
                return;
            };
            self.spawn_task(queued, permit);
        }
    }

    /// Pops the highest-priority task whose pool has a free permit. Tasks
    /// skipped for lack of a permit go back in their original order.
    fn find_dispatchable_task(&mut self) -> Option<(QueuedTask, ResourcePermit)> {
        let mut skipped = Vec::new();
        let mut found = None;

        while let Some(queued) = self.task_queue.pop() {
            if let Some(permit) = self.resource_pools.try_acquire(queued.resource_type) {
                found = Some((queued, permit));
                break;
            }
            skipped.push(queued);
        }

        if let Some(first) = skipped.first() {
            self.telemetry.emit(TelemetryEvent::ResourcePoolExhausted {
                resource_type: first.resource_type,
                waiting_tasks: skipped.len(),
            });
        }
        for task in skipped {
            self.task_queue.restore(task);
        }

        found
    }

    fn spawn_task(&mut self, queued: QueuedTask, permit: ResourcePermit) {
        let Some(job) = self.active_jobs.get_mut(&queued.job_id) else {
            debug!(job_id = %queued.job_id, "Dropping task of unknown job");
            return;
        };
        job.queued_tasks = job.queued_tasks.saturating_sub(1);
        job.tasks_in_flight += 1;
        let cancellation = job.cancellation.clone();

        self.dispatched_count += 1;

        let job_id = queued.job_id;
        let branch = queued.branch;
        let attempt = queued.attempt;
        let task = queued.task;
        let task_name = task.name().to_string();

        self.telemetry.emit(TelemetryEvent::TaskStarted {
            job_id: job_id.clone(),
            task_name: task_name.clone(),
            resource_type: queued.resource_type,
            attempt,
        });

        let completion_tx = self.completion_tx.clone();

        tokio::spawn(async move {
            let start = Instant::now();
            let mut ctx = TaskContext::with_attempt(job_id.clone(), cancellation, attempt);

            let result = if ctx.is_cancelled() {
                TaskResult::Cancelled
            } else {
                task.execute(&mut ctx).await
            };

            drop(permit);

            let _ = completion_tx.send(TaskCompletion {
                job_id,
                branch,
                task,
                task_name,
                attempt,
                result,
                duration: start.elapsed(),
            });
        });
    }
}
