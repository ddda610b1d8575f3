//! Provisioning tasks.
//!
//! Chains are built eagerly as lists of [`TaskSpec`] descriptors (resource,
//! operation, countdown). When a chain job starts, each descriptor becomes an
//! executor [`Task`] bound to the shared [`TaskEnv`]:
//!
//! - [`StateTransitionTask`] - moves the lifecycle state, no backend call
//! - [`BackendMethodTask`] - invokes one named backend method
//! - [`PollRuntimeStateTask`] - pulls runtime state until success or error
//! - [`PollBackendCheckTask`] - repeats an existence check until it holds
//! - [`DeletionTask`] - removes the row once the backend confirmed removal
//!
//! # Resource Types
//!
//! Tasks that talk to the backend draw from `ResourceType::Backend`; pure
//! repository work uses `ResourceType::Repository`.

mod backend_method;
mod deletion;
mod poll_backend_check;
mod poll_runtime_state;
mod state_transition;
mod throttle;

pub use backend_method::BackendMethodTask;
pub use deletion::DeletionTask;
pub use poll_backend_check::PollBackendCheckTask;
pub use poll_runtime_state::PollRuntimeStateTask;
pub use state_transition::StateTransitionTask;
pub use throttle::ProvisionLimits;

use crate::backend::{BackendMethod, CloudBackend};
use crate::events::{EventSink, ResourceEvent};
use crate::executor::{RetryPolicy, Task, TaskError};
use crate::model::{NewResource, Resource, ResourceId, Transition};
use crate::repository::{RepositoryError, ResourceRepository};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default number of runtime-state polls before a chain gives up.
pub const DEFAULT_POLL_MAX_RETRIES: u32 = 300;

pub const DEFAULT_POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default number of existence checks after a backend delete.
pub const DEFAULT_CHECK_MAX_RETRIES: u32 = 60;

pub const DEFAULT_CHECK_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default wait between attempts of a throttled create.
pub const DEFAULT_THROTTLE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Retry budgets for the waiting tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub check_max_retries: u32,
    pub check_retry_delay: Duration,
    pub throttle_retry_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_POLL_MAX_RETRIES,
            retry_delay: DEFAULT_POLL_RETRY_DELAY,
            check_max_retries: DEFAULT_CHECK_MAX_RETRIES,
            check_retry_delay: DEFAULT_CHECK_RETRY_DELAY,
            throttle_retry_delay: DEFAULT_THROTTLE_RETRY_DELAY,
        }
    }
}

impl PollPolicy {
    /// Policy of runtime-state polls.
    pub fn runtime(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, self.retry_delay)
    }

    /// Policy of backend existence checks.
    pub fn check(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.check_max_retries, self.check_retry_delay)
    }

    /// Policy of throttled creates waiting for a free slot. Shares the poll
    /// budget; the delay is fixed.
    pub fn throttle(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, self.throttle_retry_delay)
    }
}

impl From<&crate::config::PollSettings> for PollPolicy {
    fn from(settings: &crate::config::PollSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_delay: Duration::from_secs(settings.retry_delay_secs),
            check_max_retries: settings.check_max_retries,
            check_retry_delay: Duration::from_secs(settings.check_retry_delay_secs),
            throttle_retry_delay: Duration::from_secs(settings.throttle_retry_delay_secs),
        }
    }
}

/// Collaborators shared by every task.
pub struct TaskEnv {
    pub repository: Arc<dyn ResourceRepository>,
    pub backend: Arc<dyn CloudBackend>,
    pub events: Arc<dyn EventSink>,
    pub limits: ProvisionLimits,
    pub poll: PollPolicy,
    throttle_gate: Mutex<()>,
}

pub type SharedEnv = Arc<TaskEnv>;

impl TaskEnv {
    pub fn new(
        repository: Arc<dyn ResourceRepository>,
        backend: Arc<dyn CloudBackend>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repository,
            backend,
            events,
            limits: ProvisionLimits::unlimited(),
            poll: PollPolicy::default(),
            throttle_gate: Mutex::new(()),
        }
    }

    pub fn with_limits(mut self, limits: ProvisionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Creates a row and emits the creation.
    pub fn insert(&self, new: NewResource) -> Result<Resource, RepositoryError> {
        let resource = self.repository.insert(new)?;
        self.events.emit(ResourceEvent::created(&resource));
        Ok(resource)
    }

    /// Applies a transition and emits the state change.
    pub fn transition(
        &self,
        id: ResourceId,
        transition: Transition,
    ) -> Result<Resource, RepositoryError> {
        let (previous, resource) = self.repository.transition(id, transition)?;
        self.events
            .emit(ResourceEvent::state_changed(&resource, previous));
        Ok(resource)
    }

    /// Errs a resource and emits the failure.
    pub fn set_erred(&self, id: ResourceId, message: &str) -> Result<Resource, RepositoryError> {
        let resource = self.repository.set_erred(id, message)?;
        self.events.emit(ResourceEvent::erred(&resource));
        Ok(resource)
    }

    /// Deletes a row and emits the deletion.
    pub fn delete(&self, id: ResourceId) -> Result<Resource, RepositoryError> {
        let resource = self.repository.delete(id)?;
        self.events.emit(ResourceEvent::deleted(&resource));
        Ok(resource)
    }

    /// Serializes throttle checks with the transition that follows them.
    pub(crate) fn throttle_gate(&self) -> MutexGuard<'_, ()> {
        self.throttle_gate.lock()
    }
}

impl std::fmt::Debug for TaskEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEnv")
            .field("backend", &self.backend.name())
            .field("limits", &self.limits)
            .field("poll", &self.poll)
            .finish()
    }
}

/// Parameters of a backend method step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodCall {
    pub method: BackendMethod,
    /// Transition applied before the call.
    pub transition: Option<Transition>,
    /// Waits for a free provisioning slot before the transition.
    pub throttled: bool,
    /// A failure is logged and the chain carries on.
    pub independent: bool,
    /// Runtime state recorded before the call.
    pub runtime_state: Option<String>,
    /// Runtime state recorded after a successful call.
    pub success_runtime_state: Option<String>,
    pub params: BTreeMap<String, String>,
    /// Resources loaded fresh and passed along with the call.
    pub related: Vec<ResourceId>,
}

impl MethodCall {
    pub fn new(method: BackendMethod) -> Self {
        Self {
            method,
            transition: None,
            throttled: false,
            independent: false,
            runtime_state: None,
            success_runtime_state: None,
            params: BTreeMap::new(),
            related: Vec::new(),
        }
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = Some(transition);
        self
    }

    pub fn throttled(mut self) -> Self {
        self.throttled = true;
        self
    }

    pub fn independent(mut self) -> Self {
        self.independent = true;
        self
    }

    pub fn with_runtime_state(mut self, runtime_state: impl Into<String>) -> Self {
        self.runtime_state = Some(runtime_state.into());
        self
    }

    pub fn with_success_runtime_state(mut self, runtime_state: impl Into<String>) -> Self {
        self.success_runtime_state = Some(runtime_state.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_related(mut self, related: impl IntoIterator<Item = ResourceId>) -> Self {
        self.related.extend(related);
        self
    }
}

/// What a chain step does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOp {
    Transition(Transition),
    /// A transition that first waits for a free provisioning slot.
    ThrottledTransition(Transition),
    Method(MethodCall),
    PollRuntimeState {
        pull: BackendMethod,
        success: String,
        erred: String,
    },
    PollBackendCheck {
        check: BackendMethod,
    },
    Delete,
}

/// One chain step, built before the chain is submitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskSpec {
    pub resource: ResourceId,
    pub op: TaskOp,
    pub countdown: Duration,
}

impl TaskSpec {
    pub fn new(resource: ResourceId, op: TaskOp) -> Self {
        Self {
            resource,
            op,
            countdown: Duration::ZERO,
        }
    }

    pub fn transition(resource: ResourceId, transition: Transition) -> Self {
        Self::new(resource, TaskOp::Transition(transition))
    }

    pub fn throttled_transition(resource: ResourceId, transition: Transition) -> Self {
        Self::new(resource, TaskOp::ThrottledTransition(transition))
    }

    pub fn method(resource: ResourceId, call: MethodCall) -> Self {
        Self::new(resource, TaskOp::Method(call))
    }

    /// Shorthand for a plain backend call with an optional transition.
    pub fn call(resource: ResourceId, method: BackendMethod, transition: Option<Transition>) -> Self {
        let mut call = MethodCall::new(method);
        call.transition = transition;
        Self::method(resource, call)
    }

    pub fn poll(resource: ResourceId, pull: BackendMethod, success: &str, erred: &str) -> Self {
        Self::new(
            resource,
            TaskOp::PollRuntimeState {
                pull,
                success: success.to_string(),
                erred: erred.to_string(),
            },
        )
    }

    pub fn check(resource: ResourceId, check: BackendMethod) -> Self {
        Self::new(resource, TaskOp::PollBackendCheck { check })
    }

    pub fn delete(resource: ResourceId) -> Self {
        Self::new(resource, TaskOp::Delete)
    }

    pub fn with_countdown(mut self, countdown: Duration) -> Self {
        self.countdown = countdown;
        self
    }

    /// Name shown in logs and job results, e.g. `create_volume(7)`.
    pub fn name(&self) -> String {
        let label = match &self.op {
            TaskOp::Transition(t) | TaskOp::ThrottledTransition(t) => t.as_str(),
            TaskOp::Method(call) => call.method.as_str(),
            TaskOp::PollRuntimeState { .. } => "poll_runtime_state",
            TaskOp::PollBackendCheck { check } => check.as_str(),
            TaskOp::Delete => "delete_row",
        };
        format!("{}({})", label, self.resource)
    }

    /// Binds the descriptor to the environment.
    pub fn into_task(self, env: &SharedEnv) -> Box<dyn Task> {
        let name = self.name();
        let env = Arc::clone(env);
        match self.op {
            TaskOp::Transition(transition) => Box::new(StateTransitionTask::new(
                env,
                name,
                self.resource,
                transition,
                self.countdown,
            )),
            TaskOp::ThrottledTransition(transition) => Box::new(
                StateTransitionTask::new(env, name, self.resource, transition, self.countdown)
                    .throttled(),
            ),
            TaskOp::Method(call) => Box::new(BackendMethodTask::new(
                env,
                name,
                self.resource,
                call,
                self.countdown,
            )),
            TaskOp::PollRuntimeState {
                pull,
                success,
                erred,
            } => Box::new(PollRuntimeStateTask::new(
                env,
                name,
                self.resource,
                pull,
                success,
                erred,
                self.countdown,
            )),
            TaskOp::PollBackendCheck { check } => Box::new(PollBackendCheckTask::new(
                env,
                name,
                self.resource,
                check,
                self.countdown,
            )),
            TaskOp::Delete => Box::new(DeletionTask::new(env, name, self.resource)),
        }
    }
}

/// Maps a repository failure onto a task failure.
pub(crate) fn repository_failure(err: RepositoryError) -> TaskError {
    TaskError::repository(err.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the task tests.

    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::events::RecordingEventSink;
    use crate::executor::{JobId, TaskContext, TaskResult};
    use crate::model::{NewResource, ResourceDetails, SettingsId, VolumeDetails};
    use crate::repository::InMemoryRepository;
    use tokio_util::sync::CancellationToken;

    pub struct Fixture {
        pub repository: Arc<InMemoryRepository>,
        pub backend: Arc<SimulatedBackend>,
        pub events: Arc<RecordingEventSink>,
        pub settings: SettingsId,
        pub env: SharedEnv,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::with_limits(ProvisionLimits::unlimited())
        }

        pub fn with_limits(limits: ProvisionLimits) -> Self {
            let repository = Arc::new(InMemoryRepository::new());
            let backend = Arc::new(SimulatedBackend::new().with_convergence_polls(1));
            let events = Arc::new(RecordingEventSink::new());
            let settings = repository.insert_settings("cloud").id;
            let env = Arc::new(
                TaskEnv::new(repository.clone(), backend.clone(), events.clone())
                    .with_limits(limits),
            );
            Self {
                repository,
                backend,
                events,
                settings,
                env,
            }
        }

        pub fn volume(&self, name: &str, size: u64) -> Resource {
            self.repository
                .insert(NewResource::new(
                    name,
                    self.settings,
                    ResourceDetails::Volume(VolumeDetails {
                        size,
                        ..Default::default()
                    }),
                ))
                .unwrap()
        }

        pub async fn run(&self, spec: TaskSpec) -> TaskResult {
            let task = spec.into_task(&self.env);
            let mut ctx = TaskContext::new(JobId::new("test"), CancellationToken::new());
            task.execute(&mut ctx).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_names() {
        let id = ResourceId(7);
        assert_eq!(
            TaskSpec::call(id, BackendMethod::CreateVolume, Some(Transition::BeginCreating)).name(),
            "create_volume(7)"
        );
        assert_eq!(TaskSpec::transition(id, Transition::SetOk).name(), "set_ok(7)");
        assert_eq!(TaskSpec::delete(id).name(), "delete_row(7)");
        assert_eq!(
            TaskSpec::check(id, BackendMethod::IsVolumeDeleted).name(),
            "is_volume_deleted(7)"
        );
    }

    #[test]
    fn test_poll_policy_defaults() {
        let policy = PollPolicy::default();
        assert_eq!(policy.runtime().max_retries, 300);
        assert_eq!(policy.runtime().delay, Duration::from_secs(5));
        assert_eq!(policy.check().max_retries, 60);
        assert_eq!(policy.throttle().delay, Duration::from_secs(5));
    }

    #[test]
    fn test_method_call_builder() {
        let call = MethodCall::new(BackendMethod::ExtendVolume)
            .with_transition(Transition::BeginUpdating)
            .with_param("new_size", 2048)
            .with_related([ResourceId(3)]);

        assert_eq!(call.params.get("new_size").map(String::as_str), Some("2048"));
        assert_eq!(call.related, vec![ResourceId(3)]);
        assert!(!call.throttled);
    }

    #[test]
    fn test_countdown_carried_to_task() {
        let fixture = testing::Fixture::new();
        let task = TaskSpec::poll(
            ResourceId(1),
            BackendMethod::PullVolumeRuntimeState,
            "available",
            "error",
        )
        .with_countdown(Duration::from_secs(30))
        .into_task(&fixture.env);

        assert_eq!(task.countdown(), Duration::from_secs(30));
        assert_eq!(task.retry_policy(), PollPolicy::default().runtime());
    }
}
