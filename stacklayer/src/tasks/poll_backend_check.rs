//! Backend existence check.
//!
//! Repeats a check method (`is_volume_deleted`, ...) until the backend
//! confirms it. Uses the shorter check budget.

use super::{repository_failure, SharedEnv};
use crate::backend::{BackendMethod, BackendReply, BackendRequest};
use crate::executor::{ResourceType, RetryPolicy, Task, TaskContext, TaskError, TaskResult};
use crate::model::ResourceId;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub struct PollBackendCheckTask {
    env: SharedEnv,
    name: String,
    resource: ResourceId,
    check: BackendMethod,
    countdown: Duration,
}

impl PollBackendCheckTask {
    pub fn new(
        env: SharedEnv,
        name: String,
        resource: ResourceId,
        check: BackendMethod,
        countdown: Duration,
    ) -> Self {
        Self {
            env,
            name,
            resource,
            check,
            countdown,
        }
    }

    async fn run(&self) -> TaskResult {
        let resource = match self.env.repository.get(self.resource) {
            Ok(resource) => resource,
            Err(e) => return TaskResult::Failed(repository_failure(e)),
        };

        match self
            .env
            .backend
            .invoke(BackendRequest::new(self.check, resource))
            .await
        {
            Ok(BackendReply::Gone(true)) => TaskResult::Success,
            Ok(BackendReply::Gone(false)) => TaskResult::Retry(TaskError::new(format!(
                "{} is not confirmed yet",
                self.check
            ))),
            Ok(other) => TaskResult::Failed(TaskError::backend(format!(
                "{} returned an unexpected reply: {:?}",
                self.check, other
            ))),
            Err(e) => TaskResult::Failed(TaskError::backend(e.to_string())),
        }
    }
}

impl Task for PollBackendCheckTask {
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
        self.env.poll.check()
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut TaskContext,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return TaskResult::Cancelled;
            }
            self.run().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Transition;
    use crate::tasks::testing::Fixture;
    use crate::tasks::TaskSpec;

    #[tokio::test]
    async fn test_check_retries_until_gone() {
        let fixture = Fixture::new();
        let volume = fixture.volume("data", 1);
        fixture
            .run(TaskSpec::call(
                volume.id(),
                BackendMethod::CreateVolume,
                Some(Transition::BeginCreating),
            ))
            .await;
        fixture
            .run(TaskSpec::call(volume.id(), BackendMethod::DeleteVolume, None))
            .await;

        let check = TaskSpec::check(volume.id(), BackendMethod::IsVolumeDeleted);
        assert!(matches!(fixture.run(check).await, TaskResult::Success));
    }

    #[tokio::test]
    async fn test_check_pending_when_stalled() {
        let fixture = Fixture::new();
        fixture.backend.stall("stuck");
        let volume = fixture.volume("stuck", 1);
        fixture
            .run(TaskSpec::call(
                volume.id(),
                BackendMethod::CreateVolume,
                Some(Transition::BeginCreating),
            ))
            .await;

        let spec = TaskSpec::check(volume.id(), BackendMethod::IsVolumeDeleted);
        assert_eq!(spec.clone().into_task(&fixture.env).retry_policy().max_retries, 60);
        assert!(matches!(fixture.run(spec).await, TaskResult::Retry(_)));
    }
}
