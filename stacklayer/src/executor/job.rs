//! Job trait and related types.
//!
//! A job is a named workflow made of stages. Each stage holds one or more
//! branches; a branch is a sequence of tasks run one after another. All
//! branches of a stage run in parallel, and the next stage starts only when
//! every branch of the current one has finished.
//!
//! ```text
//! stage 0:  [transition]
//! stage 1:  [create vol-a -> poll vol-a]  [create vol-b -> poll vol-b]
//! stage 2:  [create instance -> poll instance]
//! ```
//!
//! The first failing task fails the job: siblings are cancelled, remaining
//! stages never run, and [`Job::on_complete`] sees the failure.

use super::handle::JobStatus;
use super::policy::Priority;
use super::task::{Task, TaskError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Global counter for generating unique job IDs.
static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a job.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a unique auto-generated job ID of the form `job-{counter}`.
    pub fn auto() -> Self {
        let counter = JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("job-{}", counter))
    }

    /// Creates a unique ID that starts with `prefix`.
    pub fn with_prefix(prefix: &str) -> Self {
        let counter = JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{}", prefix, counter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A barrier-separated group of parallel task sequences.
#[derive(Default)]
pub struct Stage {
    branches: Vec<Vec<Box<dyn Task>>>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stage with one branch of one task.
    pub fn single(task: Box<dyn Task>) -> Self {
        Self::sequence(vec![task])
    }

    /// A stage with one branch running `tasks` in order.
    pub fn sequence(tasks: Vec<Box<dyn Task>>) -> Self {
        let mut stage = Self::new();
        stage.push_branch(tasks);
        stage
    }

    /// A stage running each branch in parallel.
    pub fn parallel(branches: Vec<Vec<Box<dyn Task>>>) -> Self {
        let mut stage = Self::new();
        for branch in branches {
            stage.push_branch(branch);
        }
        stage
    }

    /// Adds a branch. Empty branches are ignored.
    pub fn push_branch(&mut self, tasks: Vec<Box<dyn Task>>) {
        if !tasks.is_empty() {
            self.branches.push(tasks);
        }
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn task_count(&self) -> usize {
        self.branches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub(crate) fn into_branches(self) -> Vec<Vec<Box<dyn Task>>> {
        self.branches
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<Vec<&str>> = self
            .branches
            .iter()
            .map(|b| b.iter().map(|t| t.name()).collect())
            .collect();
        f.debug_struct("Stage").field("branches", &names).finish()
    }
}

/// A workflow submitted to the executor.
pub trait Job: Send + Sync + 'static {
    fn id(&self) -> JobId;

    fn name(&self) -> &str;

    fn priority(&self) -> Priority {
        Priority::USER
    }

    /// Builds the stages to run. Called once when the job starts.
    fn create_stages(&self) -> Vec<Stage>;

    /// Called once after the last task finished, before the job's handle
    /// observes the final status. The returned status replaces the status
    /// computed from the task outcomes.
    fn on_complete(&self, result: &JobResult) -> JobStatus {
        if result.failure.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        }
    }
}

/// Outcome of a finished job.
#[derive(Clone, Debug, Default)]
pub struct JobResult {
    pub succeeded_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    pub cancelled_tasks: Vec<String>,
    /// First failure that stopped the job.
    pub failure: Option<TaskError>,
    pub duration: Duration,
}

impl JobResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_tasks(&self) -> usize {
        self.succeeded_tasks.len() + self.failed_tasks.len() + self.cancelled_tasks.len()
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.failed_tasks.is_empty()
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.failure.as_ref().map(|e| e.message.as_str())
    }
}
