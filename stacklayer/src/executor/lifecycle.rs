//! Job and task lifecycle management.
//!
//! - Job submission and stage release
//! - Task completion, branch advancement and stage barriers
//! - Retries and countdowns through the delayed channel
//! - Fail-fast and job completion

use super::active_job::{ActiveJob, TaskCompletion};
use super::core::JobExecutor;
use super::handle::JobStatus;
use super::job::{JobId, JobResult};
use super::queue::QueuedTask;
use super::submitter::SubmittedJob;
use super::task::{Task, TaskError, TaskResult};
use super::telemetry::TelemetryEvent;
use std::time::Duration;
use tracing::{debug, info, warn};

impl JobExecutor {
    pub(crate) fn handle_job_submission(&mut self, submitted: SubmittedJob) {
        let job_id = submitted.job_id.clone();
        let name = submitted.name.clone();
        let priority = submitted.priority;

        if self.active_jobs.contains_key(&job_id) {
            warn!(job_id = %job_id, job_name = %name, "Rejecting job with duplicate id");
            let mut result = JobResult::new();
            result.failure = Some(TaskError::new(format!("job {} is already running", job_id)));
            if let Ok(mut holder) = submitted.result_holder.try_lock() {
                *holder = Some(result);
            }
            let _ = submitted.status_tx.send(JobStatus::Failed);
            return;
        }

        debug!(job_id = %job_id, job_name = %name, priority = %priority, "Job submitted");
        self.telemetry.emit(TelemetryEvent::JobSubmitted {
            job_id: job_id.clone(),
            name,
            priority,
        });

        let mut active = ActiveJob::new(submitted);
        let stages = active.job.create_stages();
        self.telemetry.emit(TelemetryEvent::JobStarted {
            job_id: job_id.clone(),
            stages: stages.len(),
        });
        active.load_stages(stages);
        active.update_status(JobStatus::Running);

        self.active_jobs.insert(job_id.clone(), active);
        self.start_next_stage(&job_id);
    }

    /// Releases the first task of every branch of the job's next stage.
    fn start_next_stage(&mut self, job_id: &JobId) {
        let Some(job) = self.active_jobs.get_mut(job_id) else {
            return;
        };
        let Some((stage, first_tasks)) = job.next_stage() else {
            return;
        };

        self.telemetry.emit(TelemetryEvent::StageStarted {
            job_id: job_id.clone(),
            stage,
            branches: first_tasks.len(),
        });

        for (branch, task) in first_tasks {
            let countdown = task.countdown();
            self.schedule_task(job_id, branch, task, 1, countdown);
        }
    }

    /// Queues a task now, or parks it on a timer when `delay` is non-zero.
    fn schedule_task(
        &mut self,
        job_id: &JobId,
        branch: usize,
        task: Box<dyn Task>,
        attempt: u32,
        delay: Duration,
    ) {
        let Some(job) = self.active_jobs.get_mut(job_id) else {
            return;
        };
        let queued = QueuedTask::new(job_id.clone(), branch, task, job.priority, attempt);

        if delay.is_zero() {
            let task_name = queued.task.name().to_string();
            job.queued_tasks += 1;
            self.task_queue.push(queued);
            self.telemetry.emit(TelemetryEvent::TaskEnqueued {
                job_id: job_id.clone(),
                task_name,
                priority: job.priority,
                queue_depth: self.task_queue.len(),
            });
            return;
        }

        job.delayed_tasks += 1;
        self.telemetry.emit(TelemetryEvent::TaskDelayed {
            job_id: job_id.clone(),
            task_name: queued.task.name().to_string(),
            countdown: delay,
        });

        let cancellation = job.cancellation.clone();
        let delayed_tx = self.delayed_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancellation.cancelled() => {}
            }
            let _ = delayed_tx.send(queued);
        });
    }

    pub(crate) fn handle_delayed_task(&mut self, queued: QueuedTask) {
        let Some(job) = self.active_jobs.get_mut(&queued.job_id) else {
            return;
        };
        job.delayed_tasks = job.delayed_tasks.saturating_sub(1);

        if job.is_failed() {
            job.cancelled_tasks.push(queued.task.name().to_string());
            return;
        }

        job.queued_tasks += 1;
        self.task_queue.push(queued);
    }

    pub(crate) fn handle_task_completion(&mut self, completion: TaskCompletion) {
        self.dispatched_count = self.dispatched_count.saturating_sub(1);

        self.log_task_result(&completion);
        self.telemetry.emit(TelemetryEvent::TaskCompleted {
            job_id: completion.job_id.clone(),
            task_name: completion.task_name.clone(),
            result: completion.result.kind(),
            duration: completion.duration,
        });

        let TaskCompletion {
            job_id,
            branch,
            task,
            task_name,
            attempt,
            result,
            ..
        } = completion;

        let Some(job) = self.active_jobs.get_mut(&job_id) else {
            return;
        };
        job.tasks_in_flight = job.tasks_in_flight.saturating_sub(1);

        match result {
            TaskResult::Success => {
                job.succeeded_tasks.push(task_name);
                if !job.is_failed() {
                    self.advance_branch(&job_id, branch);
                }
            }
            TaskResult::Retry(reason) => {
                if job.is_failed() {
                    job.cancelled_tasks.push(task_name);
                    return;
                }
                let policy = task.retry_policy();
                if policy.allows_retry(attempt) {
                    self.telemetry.emit(TelemetryEvent::TaskRetrying {
                        job_id: job_id.clone(),
                        task_name,
                        attempt: attempt + 1,
                        delay: policy.delay,
                        reason: reason.message,
                    });
                    self.schedule_task(&job_id, branch, task, attempt + 1, policy.delay);
                } else {
                    let error = TaskError::retries_exhausted(&task_name, policy.max_retries, &reason);
                    self.fail_job(&job_id, task_name, error);
                }
            }
            TaskResult::Failed(error) => {
                self.fail_job(&job_id, task_name, error);
            }
            TaskResult::Cancelled => {
                job.cancelled_tasks.push(task_name);
            }
        }
    }

    /// Starts the next task of `branch`, or the next stage once every branch
    /// of the current one is done.
    fn advance_branch(&mut self, job_id: &JobId, branch: usize) {
        let Some(job) = self.active_jobs.get_mut(job_id) else {
            return;
        };
        match job.next_in_branch(branch) {
            Some(task) => {
                let countdown = task.countdown();
                self.schedule_task(job_id, branch, task, 1, countdown);
            }
            None => {
                if job.stage_complete() {
                    self.start_next_stage(job_id);
                }
            }
        }
    }

    /// Fails the job: cancels its token and pulls its queued tasks. Tasks
    /// already running finish on their own.
    fn fail_job(&mut self, job_id: &JobId, task_name: String, error: TaskError) {
        let Some(job) = self.active_jobs.get_mut(job_id) else {
            return;
        };
        let first = !job.is_failed();
        job.record_failure(task_name, error);

        let drained = self.task_queue.drain_job(job_id);
        job.queued_tasks = job.queued_tasks.saturating_sub(drained.len());
        job.cancelled_tasks
            .extend(drained.iter().map(|q| q.task.name().to_string()));

        if first {
            debug!(
                job_id = %job_id,
                in_flight = job.tasks_in_flight,
                delayed = job.delayed_tasks,
                "Job failed, draining remaining tasks"
            );
        }
    }

    fn log_task_result(&self, completion: &TaskCompletion) {
        match &completion.result {
            TaskResult::Success => {
                debug!(
                    job_id = %completion.job_id,
                    task = %completion.task_name,
                    duration_ms = completion.duration.as_millis(),
                    "Task succeeded"
                );
            }
            TaskResult::Failed(e) => {
                warn!(
                    job_id = %completion.job_id,
                    task = %completion.task_name,
                    attempt = completion.attempt,
                    error = %e,
                    "Task failed"
                );
            }
            TaskResult::Retry(_) => {}
            TaskResult::Cancelled => {
                debug!(
                    job_id = %completion.job_id,
                    task = %completion.task_name,
                    "Task cancelled"
                );
            }
        }
    }

    pub(crate) async fn complete_finished_jobs(&mut self) {
        let finished: Vec<JobId> = self
            .active_jobs
            .iter()
            .filter(|(_, job)| !job.has_pending_work())
            .map(|(id, _)| id.clone())
            .collect();

        for job_id in finished {
            self.complete_job(&job_id).await;
        }
    }

    async fn complete_job(&mut self, job_id: &JobId) {
        let Some(mut job) = self.active_jobs.remove(job_id) else {
            return;
        };

        job.cancel_remaining();
        let result = job.build_result();
        let status = job.job.on_complete(&result);

        self.log_job_completion(job_id, &job, status, &result);
        self.telemetry.emit(TelemetryEvent::JobCompleted {
            job_id: job_id.clone(),
            status,
            duration: result.duration,
            tasks_succeeded: result.succeeded_tasks.len(),
            tasks_failed: result.failed_tasks.len(),
            tasks_cancelled: result.cancelled_tasks.len(),
        });

        *job.result_holder.lock().await = Some(result);
        job.update_status(status);
    }

    fn log_job_completion(&self, job_id: &JobId, job: &ActiveJob, status: JobStatus, result: &JobResult) {
        match result.failure_message() {
            None => debug!(
                job_id = %job_id,
                job_name = %job.job.name(),
                status = %status,
                tasks = result.succeeded_tasks.len(),
                duration_ms = result.duration.as_millis(),
                "Job completed"
            ),
            Some(message) => warn!(
                job_id = %job_id,
                job_name = %job.job.name(),
                status = %status,
                failed_tasks = ?result.failed_tasks,
                error = %message,
                "Job failed"
            ),
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        info!(active_jobs = self.active_jobs.len(), "Executor shutting down");

        let jobs: Vec<ActiveJob> = self.active_jobs.drain().map(|(_, job)| job).collect();
        for mut job in jobs {
            job.cancellation.cancel();
            job.cancel_remaining();
            let result = job.build_result();
            *job.result_holder.lock().await = Some(result);
            job.update_status(JobStatus::Cancelled);
        }
    }
}
