//! Task trait and results.
//!
//! A task is one step of a job: a backend call, a state transition, or one
//! poll of the backend. Tasks never block waiting for the backend; a task
//! that needs to wait returns [`TaskResult::Retry`] and the executor
//! re-queues it after its [`RetryPolicy`] delay.

use super::context::TaskContext;
use super::policy::RetryPolicy;
use super::resource_pool::ResourceType;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// A unit of work executed by the job executor.
pub trait Task: Send + Sync {
    /// Short name used in logs and job results.
    fn name(&self) -> &str;

    /// Resource pool the task draws a permit from.
    fn resource_type(&self) -> ResourceType {
        ResourceType::Repository
    }

    /// Delay between the task becoming ready and its first run.
    fn countdown(&self) -> Duration {
        Duration::ZERO
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut TaskContext,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>>;
}

/// Outcome of one task run.
#[derive(Debug)]
pub enum TaskResult {
    Success,
    /// Terminal failure; the job fails.
    Failed(TaskError),
    /// Not done yet; run again after the retry delay.
    Retry(TaskError),
    Cancelled,
}

impl TaskResult {
    pub fn kind(&self) -> TaskResultKind {
        match self {
            Self::Success => TaskResultKind::Success,
            Self::Failed(_) => TaskResultKind::Failed,
            Self::Retry(_) => TaskResultKind::Retry,
            Self::Cancelled => TaskResultKind::Cancelled,
        }
    }
}

/// Result discriminant without payload, for telemetry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskResultKind {
    Success,
    Failed,
    Retry,
    Cancelled,
}

/// Category of a task failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskErrorKind {
    /// A backend call raised.
    Backend,
    /// A poll observed the backend's error runtime state.
    RuntimeStateErred,
    /// The retry budget ran out.
    RetriesExhausted,
    /// Reading or writing the repository failed.
    Repository,
    Cancelled,
}

/// A task failure or retry reason.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    pub kind: Option<TaskErrorKind>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: TaskErrorKind) -> Self {
        Self {
            message: message.into(),
            kind: Some(kind),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::with_kind(message, TaskErrorKind::Backend)
    }

    pub fn repository(message: impl Into<String>) -> Self {
        Self::with_kind(message, TaskErrorKind::Repository)
    }

    pub fn runtime_state_erred(message: impl Into<String>) -> Self {
        Self::with_kind(message, TaskErrorKind::RuntimeStateErred)
    }

    /// Builds the failure for a task that asked for a retry once too often.
    pub fn retries_exhausted(task: &str, max_retries: u32, last: &TaskError) -> Self {
        Self::with_kind(
            format!(
                "{} did not complete after {} retries: {}",
                task, max_retries, last.message
            ),
            TaskErrorKind::RetriesExhausted,
        )
    }

    pub fn is(&self, kind: TaskErrorKind) -> bool {
        self.kind == Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_kind() {
        assert_eq!(TaskResult::Success.kind(), TaskResultKind::Success);
        assert_eq!(
            TaskResult::Retry(TaskError::new("pending")).kind(),
            TaskResultKind::Retry
        );
    }

    #[test]
    fn test_retries_exhausted_message() {
        let last = TaskError::new("runtime state is creating");
        let err = TaskError::retries_exhausted("PollRuntimeState", 300, &last);

        assert!(err.is(TaskErrorKind::RetriesExhausted));
        assert_eq!(
            err.to_string(),
            "PollRuntimeState did not complete after 300 retries: runtime state is creating"
        );
    }
}
