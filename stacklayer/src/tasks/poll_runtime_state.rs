//! Runtime-state poller.
//!
//! Each run pulls the runtime state from the backend into the repository
//! and compares it with the declared labels:
//!
//! ```text
//! pending ──(label == success)──► Success
//!    │
//!    ├──(label == erred)──► Failed(RuntimeStateErred)
//!    │
//!    └──(anything else)──► Retry, re-queued after the poll delay
//! ```
//!
//! Running out of retries fails the chain with `RetriesExhausted`; the
//! executor enforces the bound.

use super::{repository_failure, SharedEnv};
use crate::backend::{apply_record, BackendMethod, BackendReply, BackendRequest, SyncField};
use crate::executor::{ResourceType, RetryPolicy, Task, TaskContext, TaskError, TaskResult};
use crate::model::ResourceId;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, trace};

pub struct PollRuntimeStateTask {
    env: SharedEnv,
    name: String,
    resource: ResourceId,
    pull: BackendMethod,
    success: String,
    erred: String,
    countdown: Duration,
}

impl PollRuntimeStateTask {
    pub fn new(
        env: SharedEnv,
        name: String,
        resource: ResourceId,
        pull: BackendMethod,
        success: String,
        erred: String,
        countdown: Duration,
    ) -> Self {
        Self {
            env,
            name,
            resource,
            pull,
            success,
            erred,
            countdown,
        }
    }

    async fn poll(&self) -> TaskResult {
        let resource = match self.env.repository.get(self.resource) {
            Ok(resource) => resource,
            Err(e) => return TaskResult::Failed(repository_failure(e)),
        };

        let reply = match self
            .env
            .backend
            .invoke(BackendRequest::new(self.pull, resource))
            .await
        {
            Ok(reply) => reply,
            Err(e) => return TaskResult::Failed(TaskError::backend(e.to_string())),
        };
        let BackendReply::Record(record) = reply else {
            return TaskResult::Failed(TaskError::backend(format!(
                "{} returned no runtime state",
                self.pull
            )));
        };

        let updated = self.env.repository.modify(self.resource, &mut |r| {
            apply_record(r, &record, &[SyncField::RuntimeState])?;
            Ok(())
        });
        let resource = match updated {
            Ok(resource) => resource,
            Err(e) => return TaskResult::Failed(repository_failure(e)),
        };

        let state = resource.runtime_state.as_str();
        if state == self.success {
            debug!(resource_id = %self.resource, runtime_state = state, "Runtime state reached");
            TaskResult::Success
        } else if state == self.erred {
            TaskResult::Failed(TaskError::runtime_state_erred(format!(
                "{} {} (id: {}) runtime state became erred: {}",
                resource.kind(),
                resource.name,
                resource.id(),
                state
            )))
        } else {
            trace!(
                resource_id = %self.resource,
                runtime_state = state,
                expected = %self.success,
                "Runtime state pending"
            );
            TaskResult::Retry(TaskError::new(format!(
                "runtime state of {} is {:?}, waiting for {}",
                resource, state, self.success
            )))
        }
    }
}

impl Task for PollRuntimeStateTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::Backend
    }

    fn countdown(&self) -> Duration {
        self.countdown
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.env.poll.runtime()
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut TaskContext,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return TaskResult::Cancelled;
            }
            self.poll().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::runtime;
    use crate::executor::TaskErrorKind;
    use crate::model::Transition;
    use crate::repository::ResourceRepository;
    use crate::tasks::testing::Fixture;
    use crate::tasks::TaskSpec;

    fn poll(id: ResourceId) -> TaskSpec {
        TaskSpec::poll(
            id,
            BackendMethod::PullVolumeRuntimeState,
            runtime::VOLUME_AVAILABLE,
            runtime::VOLUME_ERROR,
        )
    }

    async fn created_volume(fixture: &Fixture, name: &str) -> ResourceId {
        let volume = fixture.volume(name, 1024);
        fixture
            .run(TaskSpec::call(
                volume.id(),
                BackendMethod::CreateVolume,
                Some(Transition::BeginCreating),
            ))
            .await;
        volume.id()
    }

    #[tokio::test]
    async fn test_poll_succeeds_once_converged() {
        let fixture = Fixture::new();
        let id = created_volume(&fixture, "data").await;

        assert!(matches!(fixture.run(poll(id)).await, TaskResult::Success));
        assert_eq!(
            fixture.repository.get(id).unwrap().runtime_state,
            runtime::VOLUME_AVAILABLE
        );
    }

    #[tokio::test]
    async fn test_poll_retries_while_pending() {
        let fixture = Fixture::new();
        fixture.backend.stall("slow");
        let id = created_volume(&fixture, "slow").await;

        let TaskResult::Retry(reason) = fixture.run(poll(id)).await else {
            panic!("expected retry");
        };
        assert!(reason.message.contains("creating"));
    }

    #[tokio::test]
    async fn test_poll_fails_on_error_label() {
        let fixture = Fixture::new();
        fixture.backend.converge_to_error("broken");
        let id = created_volume(&fixture, "broken").await;

        let TaskResult::Failed(err) = fixture.run(poll(id)).await else {
            panic!("expected failure");
        };
        assert!(err.is(TaskErrorKind::RuntimeStateErred));
        assert!(err.message.contains("runtime state became erred: error"));
    }
}
