//! Active job state management.
//!
//! [`ActiveJob`] tracks one running job: the stages still to come, the
//! branches of the current stage, and how many of its tasks are queued,
//! parked on a timer, or running.

use super::handle::JobStatus;
use super::job::{Job, JobResult, Stage};
use super::policy::Priority;
use super::submitter::SubmittedJob;
use super::task::{Task, TaskError, TaskResult};
use super::job::JobId;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Remaining tasks of one branch of the current stage.
struct BranchState {
    remaining: VecDeque<Box<dyn Task>>,
    /// A task of this branch is queued, delayed or running.
    active: bool,
}

pub(crate) struct ActiveJob {
    pub job: Box<dyn Job>,
    pub priority: Priority,
    pub status_tx: watch::Sender<JobStatus>,
    pub status: JobStatus,
    pub started_at: Instant,
    /// Shared by every task of the job; fired on the first failure.
    pub cancellation: CancellationToken,
    pending_stages: VecDeque<Stage>,
    stages_started: usize,
    branches: Vec<BranchState>,
    pub tasks_in_flight: usize,
    pub queued_tasks: usize,
    pub delayed_tasks: usize,
    pub succeeded_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    pub cancelled_tasks: Vec<String>,
    failure: Option<TaskError>,
    pub result_holder: Arc<Mutex<Option<JobResult>>>,
}

impl ActiveJob {
    pub fn new(submitted: SubmittedJob) -> Self {
        Self {
            job: submitted.job,
            priority: submitted.priority,
            status_tx: submitted.status_tx,
            status: JobStatus::Pending,
            started_at: Instant::now(),
            cancellation: CancellationToken::new(),
            pending_stages: VecDeque::new(),
            stages_started: 0,
            branches: Vec::new(),
            tasks_in_flight: 0,
            queued_tasks: 0,
            delayed_tasks: 0,
            succeeded_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            cancelled_tasks: Vec::new(),
            failure: None,
            result_holder: submitted.result_holder,
        }
    }

    pub fn load_stages(&mut self, stages: Vec<Stage>) {
        self.pending_stages = stages.into_iter().filter(|s| !s.is_empty()).collect();
    }

    pub fn update_status(&mut self, status: JobStatus) {
        self.status = status;
        let _ = self.status_tx.send(status);
    }

    /// Releases the next stage. Returns its index and the first task of
    /// every branch, or `None` when no stage is left.
    pub fn next_stage(&mut self) -> Option<(usize, Vec<(usize, Box<dyn Task>)>)> {
        let stage = self.pending_stages.pop_front()?;
        let index = self.stages_started;
        self.stages_started += 1;

        self.branches = stage
            .into_branches()
            .into_iter()
            .map(|tasks| BranchState {
                remaining: tasks.into(),
                active: true,
            })
            .collect();

        let first = self
            .branches
            .iter_mut()
            .enumerate()
            .filter_map(|(i, b)| b.remaining.pop_front().map(|t| (i, t)))
            .collect();
        Some((index, first))
    }

    /// Takes the next task of `branch`, marking the branch finished when
    /// none is left.
    pub fn next_in_branch(&mut self, branch: usize) -> Option<Box<dyn Task>> {
        let state = self.branches.get_mut(branch)?;
        let next = state.remaining.pop_front();
        if next.is_none() {
            state.active = false;
        }
        next
    }

    /// True when every branch of the current stage has finished.
    pub fn stage_complete(&self) -> bool {
        self.branches.iter().all(|b| !b.active)
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Records a failed task. The first failure becomes the job's failure
    /// and cancels the remaining tasks.
    pub fn record_failure(&mut self, task_name: String, error: TaskError) {
        self.failed_tasks.push(task_name);
        if self.failure.is_none() {
            self.failure = Some(error);
            self.cancellation.cancel();
        }
    }

    pub fn has_pending_work(&self) -> bool {
        if self.tasks_in_flight > 0 || self.queued_tasks > 0 || self.delayed_tasks > 0 {
            return true;
        }
        !self.is_failed() && (!self.stage_complete() || !self.pending_stages.is_empty())
    }

    /// Moves the names of tasks that never ran into `cancelled_tasks`.
    pub fn cancel_remaining(&mut self) {
        for branch in self.branches.iter_mut() {
            branch.active = false;
            self.cancelled_tasks
                .extend(branch.remaining.drain(..).map(|t| t.name().to_string()));
        }
        for stage in self.pending_stages.drain(..) {
            for tasks in stage.into_branches() {
                self.cancelled_tasks
                    .extend(tasks.iter().map(|t| t.name().to_string()));
            }
        }
    }

    pub fn build_result(&self) -> JobResult {
        JobResult {
            succeeded_tasks: self.succeeded_tasks.clone(),
            failed_tasks: self.failed_tasks.clone(),
            cancelled_tasks: self.cancelled_tasks.clone(),
            failure: self.failure.clone(),
            duration: self.started_at.elapsed(),
        }
    }
}

/// Sent by a spawned task back to the executor loop.
pub(crate) struct TaskCompletion {
    pub job_id: JobId,
    pub branch: usize,
    /// Handed back so a retry can re-queue the same task.
    pub task: Box<dyn Task>,
    pub task_name: String,
    pub attempt: u32,
    pub result: TaskResult,
    pub duration: Duration,
}
