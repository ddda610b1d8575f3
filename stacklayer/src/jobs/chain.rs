//! Chain job.
//!
//! [`ChainJob`] runs one [`ChainSpec`] on the executor. The plan becomes
//! the job's stages; once the outcome is known, exactly one hook runs:
//!
//! ```text
//! stages ──all succeeded──► on_success
//!        └─first failure──► on_failure(message)
//! ```

use crate::chains::ChainSpec;
use crate::executor::{Job, JobId, JobResult, JobStatus, Priority, Stage};
use crate::model::DEFAULT_ERROR_MESSAGE;
use crate::tasks::SharedEnv;
use tracing::{info, warn};

pub struct ChainJob {
    id: JobId,
    spec: ChainSpec,
    env: SharedEnv,
    priority: Priority,
}

impl ChainJob {
    pub fn new(spec: ChainSpec, env: SharedEnv) -> Self {
        Self {
            id: JobId::with_prefix(&spec.name),
            spec,
            env,
            priority: Priority::USER,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn spec(&self) -> &ChainSpec {
        &self.spec
    }
}

impl Job for ChainJob {
    fn id(&self) -> JobId {
        self.id.clone()
    }

    fn name(&self) -> &str {
        &self.spec.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn create_stages(&self) -> Vec<Stage> {
        self.spec.plan.to_stages(&self.env)
    }

    fn on_complete(&self, result: &JobResult) -> JobStatus {
        if result.is_success() {
            info!(
                job_id = %self.id,
                resource_id = %self.spec.resource,
                tasks = result.succeeded_tasks.len(),
                duration_ms = result.duration.as_millis() as u64,
                "Chain succeeded"
            );
            self.spec.on_success.run(&self.env, None);
            return JobStatus::Succeeded;
        }

        let message = result.failure_message().unwrap_or(DEFAULT_ERROR_MESSAGE);
        warn!(
            job_id = %self.id,
            resource_id = %self.spec.resource,
            failed = ?result.failed_tasks,
            error = %message,
            "Chain failed"
        );
        self.spec.on_failure.run(&self.env, Some(message));
        JobStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{ChainPlan, Family};
    use crate::executor::TaskError;
    use crate::jobs::Hook;
    use crate::model::{ResourceState, Transition};
    use crate::repository::ResourceRepository;
    use crate::tasks::testing::Fixture;
    use crate::tasks::TaskSpec;

    fn job(fixture: &Fixture) -> (ChainJob, crate::model::ResourceId) {
        let volume = fixture.volume("data", 1);
        fixture
            .repository
            .transition(volume.id(), Transition::BeginCreating)
            .unwrap();
        let spec = ChainSpec::new(
            &volume,
            "create",
            Family::Create,
            ChainPlan::new().then(TaskSpec::transition(volume.id(), Transition::SetOk)),
        );
        (ChainJob::new(spec, fixture.env.clone()), volume.id())
    }

    #[test]
    fn test_job_identity_and_stages() {
        let fixture = Fixture::new();
        let (job, id) = job(&fixture);
        assert!(job.id().as_str().starts_with(&format!("volume-create-{}", id)));
        assert_eq!(job.create_stages().len(), 1);
        assert_eq!(job.priority(), Priority::USER);
        assert_eq!(
            job.with_priority(Priority::BACKGROUND).priority(),
            Priority::BACKGROUND
        );
    }

    #[test]
    fn test_failure_runs_failure_hook_with_message() {
        let fixture = Fixture::new();
        let (job, id) = job(&fixture);
        let result = JobResult {
            failed_tasks: vec![format!("create_volume({})", id)],
            failure: Some(TaskError::backend("quota exceeded at provider")),
            ..Default::default()
        };

        assert_eq!(job.on_complete(&result), JobStatus::Failed);
        let volume = fixture.repository.get(id).unwrap();
        assert_eq!(volume.state(), ResourceState::Erred);
        assert_eq!(volume.error_message, "quota exceeded at provider");
        assert_eq!(job.spec().on_failure, Hook::SetErred(id));
    }

    #[test]
    fn test_success_runs_success_hook() {
        let fixture = Fixture::new();
        let (job, id) = job(&fixture);
        assert_eq!(job.on_complete(&JobResult::new()), JobStatus::Succeeded);
        assert_eq!(fixture.repository.get(id).unwrap().state(), ResourceState::Ok);
    }
}
