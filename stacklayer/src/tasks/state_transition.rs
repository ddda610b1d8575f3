//! State transition task.
//!
//! [`StateTransitionTask`] moves a resource along one lifecycle transition
//! without contacting the backend. An illegal transition fails the chain.

use super::throttle::check_capacity;
use super::{repository_failure, SharedEnv};
use crate::executor::{RetryPolicy, Task, TaskContext, TaskResult};
use crate::model::{ResourceId, Transition};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

pub struct StateTransitionTask {
    env: SharedEnv,
    name: String,
    resource: ResourceId,
    transition: Transition,
    countdown: Duration,
    throttled: bool,
}

impl StateTransitionTask {
    pub fn new(
        env: SharedEnv,
        name: String,
        resource: ResourceId,
        transition: Transition,
        countdown: Duration,
    ) -> Self {
        Self {
            env,
            name,
            resource,
            transition,
            countdown,
            throttled: false,
        }
    }

    /// Waits for a free provisioning slot before transitioning.
    pub fn throttled(mut self) -> Self {
        self.throttled = true;
        self
    }

    fn apply(&self) -> TaskResult {
        let _gate = self.throttled.then(|| self.env.throttle_gate());

        if self.throttled {
            let resource = match self.env.repository.get(self.resource) {
                Ok(resource) => resource,
                Err(e) => return TaskResult::Failed(repository_failure(e)),
            };
            if let Some(reason) = check_capacity(&self.env, &resource) {
                return TaskResult::Retry(reason);
            }
        }

        match self.env.transition(self.resource, self.transition) {
            Ok(resource) => {
                debug!(
                    resource_id = %self.resource,
                    transition = %self.transition,
                    state = %resource.state(),
                    "State transition applied"
                );
                TaskResult::Success
            }
            Err(e) => TaskResult::Failed(repository_failure(e)),
        }
    }
}

impl Task for StateTransitionTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn countdown(&self) -> Duration {
        self.countdown
    }

    fn retry_policy(&self) -> RetryPolicy {
        if self.throttled {
            self.env.poll.throttle()
        } else {
            RetryPolicy::none()
        }
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut TaskContext,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return TaskResult::Cancelled;
            }
            self.apply()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ResourceEventKind;
    use crate::executor::TaskErrorKind;
    use crate::model::{ResourceKind, ResourceState};
    use crate::repository::ResourceRepository;
    use crate::tasks::testing::Fixture;
    use crate::tasks::{ProvisionLimits, TaskSpec};

    #[tokio::test]
    async fn test_transition_applied_and_emitted() {
        let fixture = Fixture::new();
        let volume = fixture.volume("data", 1);

        let result = fixture
            .run(TaskSpec::transition(volume.id(), Transition::BeginCreating))
            .await;

        assert!(matches!(result, TaskResult::Success));
        assert_eq!(
            fixture.repository.get(volume.id()).unwrap().state(),
            ResourceState::Creating
        );
        assert_eq!(
            fixture.events.events_for(volume.id()),
            vec![ResourceEventKind::StateChanged {
                from: ResourceState::CreationScheduled,
                to: ResourceState::Creating,
            }]
        );
    }

    #[tokio::test]
    async fn test_illegal_transition_fails() {
        let fixture = Fixture::new();
        let volume = fixture.volume("data", 1);

        let result = fixture
            .run(TaskSpec::transition(volume.id(), Transition::BeginDeleting))
            .await;

        let TaskResult::Failed(err) = result else {
            panic!("expected failure, got {:?}", result);
        };
        assert!(err.is(TaskErrorKind::Repository));
        assert!(err.message.contains("begin_deleting"));
    }

    #[tokio::test]
    async fn test_throttled_transition_waits_for_slot() {
        let fixture = Fixture::with_limits(
            ProvisionLimits::unlimited().with_limit(ResourceKind::Volume, 1),
        );
        let busy = fixture.volume("busy", 1);
        let waiting = fixture.volume("waiting", 1);
        fixture
            .repository
            .transition(busy.id(), Transition::BeginCreating)
            .unwrap();

        let spec = TaskSpec::throttled_transition(waiting.id(), Transition::BeginCreating);
        assert!(matches!(fixture.run(spec.clone()).await, TaskResult::Retry(_)));
        assert_eq!(
            fixture.repository.get(waiting.id()).unwrap().state(),
            ResourceState::CreationScheduled
        );

        fixture
            .repository
            .transition(busy.id(), Transition::SetOk)
            .unwrap();
        assert!(matches!(fixture.run(spec).await, TaskResult::Success));
    }
}
