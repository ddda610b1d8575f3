//! Resource provisioning orchestrator.
//!
//! The orchestrator turns one user-facing operation into a submitted chain
//! job. Everything that can be rejected is rejected synchronously, before
//! any task runs:
//!
//! ```text
//! execute(id, op)
//!   ├─ build chain (registry)         ── Unsupported / DependentResources
//!   ├─ validate state + pre-apply     ── IllegalTransition
//!   ├─ validate quota headroom        ── Quota
//!   ├─ apply schedule transitions, action text, detail changes
//!   │   (quota charged per write; any failure rolls back)  ── Quota
//!   └─ submit ChainJob                ── SchedulerUnavailable
//! ```
//!
//! The returned [`JobHandle`] can be dropped; the chain runs either way.
//!
//! # Example
//!
//! ```ignore
//! use stacklayer::orchestrator::{Operation, Orchestrator};
//!
//! let orchestrator = Orchestrator::new(env, submitter);
//! let mut handle = orchestrator.execute(volume_id, Operation::Extend { new_size: 20480 })?;
//! let result = handle.wait().await;
//! ```

mod error;
mod operation;
mod provision;

pub use error::OrchestratorError;
pub use operation::Operation;
pub use provision::{BackupRequest, InstanceRequest, Provisioned, TenantRequest};

use crate::chains::{build_chain, ChainContext, ChainSpec, ChainTimings};
use crate::executor::{JobHandle, JobSubmitter, Priority};
use crate::jobs::ChainJob;
use crate::model::{consumption, consumption_delta, Resource, ResourceId};
use crate::repository::ResourceRepository;
use crate::tasks::SharedEnv;
use tracing::{debug, info, warn};

/// Message recorded on a resource whose chain could not be queued.
const SCHEDULER_UNAVAILABLE_MESSAGE: &str = "Scheduler is not accepting new chains";

/// Entry point for lifecycle operations.
///
/// Cheap to share behind an `Arc`; holds the task environment, a submitter
/// for the executor and the chain countdowns.
pub struct Orchestrator {
    env: SharedEnv,
    submitter: JobSubmitter,
    timings: ChainTimings,
}

impl Orchestrator {
    /// Creates an orchestrator submitting to a running executor.
    ///
    /// # Arguments
    ///
    /// * `env` - Repository, backend and event sink shared with the tasks
    /// * `submitter` - Front door of the executor that runs the chains
    pub fn new(env: SharedEnv, submitter: JobSubmitter) -> Self {
        Self {
            env,
            submitter,
            timings: ChainTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: ChainTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn env(&self) -> &SharedEnv {
        &self.env
    }

    pub fn repository(&self) -> &dyn ResourceRepository {
        self.env.repository.as_ref()
    }

    pub fn timings(&self) -> ChainTimings {
        self.timings
    }

    /// Builds the chain for `operation` without validating or applying it.
    pub fn plan(&self, id: ResourceId, operation: &Operation) -> Result<ChainSpec, OrchestratorError> {
        let resource = self.repository().get(id)?;
        let ctx = ChainContext::new(self.repository(), self.timings);
        build_chain(&ctx, &resource, operation)
    }

    /// Runs `operation` on the resource at user priority.
    ///
    /// Returns once the chain is queued; rejection means nothing changed.
    pub fn execute(&self, id: ResourceId, operation: Operation) -> Result<JobHandle, OrchestratorError> {
        self.execute_with_priority(id, operation, Priority::USER)
    }

    pub fn execute_with_priority(
        &self,
        id: ResourceId,
        operation: Operation,
        priority: Priority,
    ) -> Result<JobHandle, OrchestratorError> {
        let spec = self.plan(id, &operation)?;
        self.launch(spec, operation.name(), priority)
    }

    /// Validates, applies and submits a built chain.
    pub(crate) fn launch(
        &self,
        spec: ChainSpec,
        operation: &'static str,
        priority: Priority,
    ) -> Result<JobHandle, OrchestratorError> {
        self.validate(&spec, operation)?;
        self.apply(&spec)?;

        let resource = spec.resource;
        let name = spec.name.clone();
        let tasks = spec.plan.task_count();
        let job = ChainJob::new(spec, self.env.clone()).with_priority(priority);

        match self.submitter.try_submit(job) {
            Some(handle) => {
                info!(
                    job_id = %handle.id(),
                    resource_id = %resource,
                    chain = %name,
                    tasks,
                    "Chain submitted"
                );
                Ok(handle)
            }
            None => {
                warn!(resource_id = %resource, chain = %name, "Executor rejected chain");
                if let Err(e) = self.env.set_erred(resource, SCHEDULER_UNAVAILABLE_MESSAGE) {
                    warn!(resource_id = %resource, error = %e, "Failed to err unscheduled resource");
                }
                Err(OrchestratorError::SchedulerUnavailable)
            }
        }
    }

    /// Checks states and quota headroom without writing anything.
    fn validate(&self, spec: &ChainSpec, operation: &'static str) -> Result<(), OrchestratorError> {
        let repository = self.repository();

        let resource = repository.get(spec.resource)?;
        if !spec.family.accepts(resource.state()) {
            return Err(OrchestratorError::IllegalTransition {
                resource: resource.id(),
                operation,
                state: resource.state(),
            });
        }

        for pre in &spec.pre_apply {
            let target = repository.get(pre.resource)?;
            if pre.transition.apply(target.state()).is_err() {
                return Err(OrchestratorError::IllegalTransition {
                    resource: target.id(),
                    operation,
                    state: target.state(),
                });
            }
        }

        for (id, change) in &spec.changes {
            let before = repository.get(*id)?;
            let mut after = before.clone();
            change.apply(&mut after);

            let deltas = consumption_delta(
                &consumption(&before.details),
                &consumption(&after.details),
            );
            for (name, delta) in deltas {
                let quota = repository.quota(before.settings(), name)?;
                if quota.would_exceed(delta) {
                    return Err(OrchestratorError::Quota {
                        name,
                        usage: quota.usage,
                        requested: delta.unsigned_abs(),
                        limit: quota.limit.unwrap_or(u64::MAX),
                    });
                }
            }
        }
        Ok(())
    }

    /// Applies schedule transitions, action text and detail changes.
    ///
    /// Each detail change is checked against quota and charged in the same
    /// write. A failed write restores every row touched before it.
    fn apply(&self, spec: &ChainSpec) -> Result<(), OrchestratorError> {
        let mut touched = Vec::new();
        let result = self.apply_all(spec, &mut touched);
        if let Err(e) = &result {
            warn!(
                resource_id = %spec.resource,
                chain = %spec.name,
                error = %e,
                "Apply failed, rolling back"
            );
            self.restore(touched);
        }
        result
    }

    fn apply_all(
        &self,
        spec: &ChainSpec,
        touched: &mut Vec<Resource>,
    ) -> Result<(), OrchestratorError> {
        let repository = self.repository();

        for pre in &spec.pre_apply {
            remember(repository, touched, pre.resource)?;
            self.env.transition(pre.resource, pre.transition)?;
            if let Some(action) = &pre.action {
                repository.modify(pre.resource, &mut |r| {
                    r.set_action(action.clone());
                    r.action_details = pre.action_details.clone();
                    Ok(())
                })?;
            }
            debug!(resource_id = %pre.resource, transition = %pre.transition.as_str(), "Pre-applied");
        }

        for (id, change) in &spec.changes {
            remember(repository, touched, *id)?;
            repository.modify_within_quota(*id, &mut |r| {
                change.apply(r);
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Puts rows back the way they were before `apply` started, newest
    /// first.
    fn restore(&self, touched: Vec<Resource>) {
        for original in touched.into_iter().rev() {
            let id = original.id();
            let result = self.repository().modify(id, &mut |r| {
                *r = original.clone();
                Ok(())
            });
            match result {
                Ok(r) => debug!(resource_id = %id, state = %r.state(), "Rolled back"),
                Err(e) => warn!(resource_id = %id, error = %e, "Failed to roll back"),
            }
        }
    }
}

/// Records the row before its first write.
fn remember(
    repository: &dyn ResourceRepository,
    touched: &mut Vec<Resource>,
    id: ResourceId,
) -> Result<(), OrchestratorError> {
    if !touched.iter().any(|r| r.id() == id) {
        touched.push(repository.get(id)?);
    }
    Ok(())
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("env", &self.env)
            .field("timings", &self.timings)
            .finish()
    }
}
