//! Backend method task.
//!
//! [`BackendMethodTask`] runs one named backend method on a resource:
//!
//! 1. wait for a provisioning slot (throttled creates only)
//! 2. apply the declared transition and pre-call runtime state
//! 3. load the resource and its related resources fresh
//! 4. invoke the backend
//! 5. copy the reply into the repository, then record the success runtime state
//!
//! A backend error errs the resource with the error text and fails the
//! chain, unless the call is independent, in which case it is only logged.

use super::throttle::check_capacity;
use super::{repository_failure, MethodCall, SharedEnv};
use crate::backend::{
    apply_record, BackendError, BackendMethod, BackendRecord, BackendReply, BackendRequest,
    SyncField,
};
use crate::events::ResourceEvent;
use crate::executor::{ResourceType, RetryPolicy, Task, TaskContext, TaskError, TaskResult};
use crate::model::{
    FloatingIpDetails, NewResource, Resource, ResourceDetails, ResourceId, ResourceKind,
    SecurityGroupDetails, Transition,
};
use crate::repository::{RepositoryError, ResourceFilter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct BackendMethodTask {
    env: SharedEnv,
    name: String,
    resource: ResourceId,
    call: MethodCall,
    countdown: Duration,
}

impl BackendMethodTask {
    pub fn new(
        env: SharedEnv,
        name: String,
        resource: ResourceId,
        call: MethodCall,
        countdown: Duration,
    ) -> Self {
        Self {
            env,
            name,
            resource,
            call,
            countdown,
        }
    }

    /// Throttle check, transition and pre-call runtime state.
    fn prepare(&self) -> Result<(), TaskResult> {
        if let Some(transition) = self.call.transition {
            let _gate = self.call.throttled.then(|| self.env.throttle_gate());
            if self.call.throttled {
                let resource = self
                    .env
                    .repository
                    .get(self.resource)
                    .map_err(|e| TaskResult::Failed(repository_failure(e)))?;
                if let Some(reason) = check_capacity(&self.env, &resource) {
                    return Err(TaskResult::Retry(reason));
                }
            }
            self.env
                .transition(self.resource, transition)
                .map_err(|e| TaskResult::Failed(repository_failure(e)))?;
        }

        if let Some(runtime_state) = &self.call.runtime_state {
            self.set_runtime_state(runtime_state)
                .map_err(|e| TaskResult::Failed(repository_failure(e)))?;
        }
        Ok(())
    }

    fn set_runtime_state(&self, runtime_state: &str) -> Result<(), RepositoryError> {
        self.env.repository.modify(self.resource, &mut |r| {
            r.runtime_state = runtime_state.to_string();
            Ok(())
        })?;
        Ok(())
    }

    /// Related resources that still exist.
    fn load_related(&self) -> Vec<Resource> {
        self.call
            .related
            .iter()
            .filter_map(|id| self.env.repository.get(*id).ok())
            .collect()
    }

    fn on_backend_error(&self, err: BackendError) -> TaskResult {
        let message = err.to_string();

        if self.call.independent {
            warn!(
                resource_id = %self.resource,
                method = %self.call.method,
                error = %message,
                "Independent backend call failed, continuing"
            );
            return TaskResult::Success;
        }

        if let Err(e) = self.env.set_erred(self.resource, &message) {
            warn!(resource_id = %self.resource, error = %e, "Failed to mark resource as erred");
        }
        TaskResult::Failed(TaskError::backend(message))
    }

    fn apply_reply(
        &self,
        reply: BackendReply,
        resource: &Resource,
        related: &[Resource],
    ) -> Result<(), RepositoryError> {
        use BackendMethod as M;

        match (self.call.method, reply) {
            (M::PullInstanceVolumes, BackendReply::Records(records)) => {
                self.sync_instance_volumes(resource, related, &records)
            }
            (M::PullFloatingIps, BackendReply::Records(records)) => {
                self.sync_instance_floating_ips(resource, related, &records)
            }
            (M::PullTenantSecurityGroups, BackendReply::Records(records)) => {
                self.sync_tenant_children(resource, ResourceKind::SecurityGroup, &records)
            }
            (M::PullTenantFloatingIps, BackendReply::Records(records)) => {
                self.sync_tenant_children(resource, ResourceKind::FloatingIp, &records)
            }
            (method, BackendReply::Record(record)) => {
                let fields: &[SyncField] = match method {
                    M::PullInstanceInternalIps => &[SyncField::InternalIps],
                    M::PullTenant | M::PullVolume | M::PullSnapshot | M::PullInstance => {
                        SyncField::allow_list(resource.kind())
                    }
                    _ => &SyncField::ALL,
                };
                self.apply_record(self.resource, &record, fields)
            }
            (M::AttachVolume, BackendReply::Ack) => self.link_attached_volume(related),
            (M::DetachVolume, BackendReply::Ack) => {
                self.env.repository.modify(self.resource, &mut |r| {
                    if let Some(volume) = r.as_volume_mut() {
                        volume.instance = None;
                        volume.device.clear();
                    }
                    Ok(())
                })?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply_record(
        &self,
        id: ResourceId,
        record: &BackendRecord,
        fields: &[SyncField],
    ) -> Result<(), RepositoryError> {
        let mut changed = false;
        let resource = self.env.repository.modify(id, &mut |r| {
            changed = apply_record(r, record, fields)?;
            Ok(())
        })?;
        if changed {
            self.env.events.emit(ResourceEvent::synced(&resource));
        }
        Ok(())
    }

    fn link_attached_volume(&self, related: &[Resource]) -> Result<(), RepositoryError> {
        let instance = related
            .iter()
            .find(|r| r.kind() == ResourceKind::Instance)
            .map(Resource::id);
        let device = self.call.params.get("device").cloned();

        self.env.repository.modify(self.resource, &mut |r| {
            if let Some(volume) = r.as_volume_mut() {
                volume.instance = instance;
                if let Some(device) = &device {
                    volume.device = device.clone();
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Syncs the instance's volumes from the backend view. Volumes the
    /// backend no longer has are deleted; volumes now attached elsewhere are
    /// unlinked.
    fn sync_instance_volumes(
        &self,
        instance: &Resource,
        volumes: &[Resource],
        records: &[BackendRecord],
    ) -> Result<(), RepositoryError> {
        for volume in volumes {
            let record = records
                .iter()
                .find(|r| volume.has_backend_id() && r.backend_id == volume.backend_id());

            let Some(record) = record else {
                info!(
                    resource_id = %volume.id(),
                    instance_id = %instance.id(),
                    "Volume no longer exists at backend, deleting"
                );
                self.env.delete(volume.id())?;
                continue;
            };

            self.apply_record(volume.id(), record, SyncField::allow_list(ResourceKind::Volume))?;
            if record.instance.as_deref() != Some(instance.backend_id()) {
                debug!(resource_id = %volume.id(), "Volume detached from instance");
                self.env.repository.modify(volume.id(), &mut |r| {
                    if let Some(v) = r.as_volume_mut() {
                        v.instance = None;
                    }
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    fn sync_instance_floating_ips(
        &self,
        instance: &Resource,
        floating_ips: &[Resource],
        records: &[BackendRecord],
    ) -> Result<(), RepositoryError> {
        for floating_ip in floating_ips {
            let Some(record) = records
                .iter()
                .find(|r| floating_ip.has_backend_id() && r.backend_id == floating_ip.backend_id())
            else {
                continue;
            };

            self.apply_record(
                floating_ip.id(),
                record,
                &[SyncField::RuntimeState, SyncField::Address],
            )?;
            if record.instance.as_deref() != Some(instance.backend_id()) {
                self.env.repository.modify(floating_ip.id(), &mut |r| {
                    if let Some(f) = r.as_floating_ip_mut() {
                        f.instance = None;
                    }
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    /// Syncs a tenant's security groups or floating IPs: known rows are
    /// refreshed, unknown backend objects are imported and stable rows the
    /// backend no longer lists are deleted.
    fn sync_tenant_children(
        &self,
        tenant: &Resource,
        kind: ResourceKind,
        records: &[BackendRecord],
    ) -> Result<(), RepositoryError> {
        let existing = self
            .env
            .repository
            .find(&ResourceFilter::kind(kind).in_settings(tenant.settings()));

        for record in records {
            match existing
                .iter()
                .find(|r| r.has_backend_id() && r.backend_id() == record.backend_id)
            {
                Some(row) => self.apply_record(row.id(), record, SyncField::allow_list(kind))?,
                None => self.import(tenant, kind, record),
            }
        }

        for row in existing.iter().filter(|r| {
            r.has_backend_id()
                && r.state().is_stable()
                && !records.iter().any(|rec| rec.backend_id == r.backend_id())
        }) {
            info!(resource_id = %row.id(), kind = %kind, "Removing row missing at backend");
            self.env.delete(row.id())?;
        }
        Ok(())
    }

    fn import(&self, tenant: &Resource, kind: ResourceKind, record: &BackendRecord) {
        let details = match kind {
            ResourceKind::SecurityGroup => ResourceDetails::SecurityGroup(SecurityGroupDetails {
                tenant: Some(tenant.id()),
                rules: Vec::new(),
            }),
            _ => ResourceDetails::FloatingIp(FloatingIpDetails {
                address: record.address.clone().unwrap_or_default(),
                instance: None,
                is_booked: false,
            }),
        };
        let name = record
            .name
            .clone()
            .unwrap_or_else(|| record.backend_id.clone());

        let inserted = self
            .env
            .repository
            .insert(NewResource::new(name, tenant.settings(), details))
            .and_then(|row| {
                self.env.repository.modify(row.id(), &mut |r| {
                    r.assign_backend_id(record.backend_id.clone())?;
                    r.transition(Transition::BeginCreating)?;
                    r.transition(Transition::SetOk)?;
                    apply_record(r, record, SyncField::allow_list(kind))?;
                    Ok(())
                })
            });

        match inserted {
            Ok(row) => {
                info!(resource_id = %row.id(), kind = %kind, backend_id = %record.backend_id, "Imported resource from backend");
                self.env.events.emit(ResourceEvent::created(&row));
            }
            Err(e) => warn!(
                kind = %kind,
                backend_id = %record.backend_id,
                error = %e,
                "Failed to import resource from backend"
            ),
        }
    }

    async fn run(&self) -> TaskResult {
        if let Err(result) = self.prepare() {
            return result;
        }

        let resource = match self.env.repository.get(self.resource) {
            Ok(resource) => resource,
            Err(e) => return TaskResult::Failed(repository_failure(e)),
        };
        let related = self.load_related();

        let request = BackendRequest::new(self.call.method, resource.clone())
            .with_related(related.clone())
            .with_params(self.call.params.clone());

        let reply = match self.env.backend.invoke(request).await {
            Ok(reply) => reply,
            Err(e) => return self.on_backend_error(e),
        };

        if let Err(e) = self.apply_reply(reply, &resource, &related) {
            return TaskResult::Failed(repository_failure(e));
        }

        if let Some(runtime_state) = &self.call.success_runtime_state {
            if let Err(e) = self.set_runtime_state(runtime_state) {
                return TaskResult::Failed(repository_failure(e));
            }
        }

        debug!(resource_id = %self.resource, method = %self.call.method, "Backend method completed");
        TaskResult::Success
    }
}

impl Task for BackendMethodTask {
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
        if self.call.throttled {
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
            self.run().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::runtime;
    use crate::events::ResourceEventKind;
    use crate::executor::TaskErrorKind;
    use crate::model::{InstanceDetails, ResourceState};
    use crate::repository::ResourceRepository;
    use crate::tasks::testing::Fixture;
    use crate::tasks::{ProvisionLimits, TaskSpec};

    fn create_volume(id: ResourceId) -> TaskSpec {
        TaskSpec::method(
            id,
            MethodCall::new(BackendMethod::CreateVolume)
                .with_transition(Transition::BeginCreating)
                .throttled(),
        )
    }

    #[tokio::test]
    async fn test_create_records_backend_id_and_runtime_state() {
        let fixture = Fixture::new();
        let volume = fixture.volume("data", 1024);

        let result = fixture.run(create_volume(volume.id())).await;

        assert!(matches!(result, TaskResult::Success));
        let stored = fixture.repository.get(volume.id()).unwrap();
        assert_eq!(stored.state(), ResourceState::Creating);
        assert!(stored.has_backend_id());
        assert_eq!(stored.runtime_state, runtime::VOLUME_CREATING);
    }

    #[tokio::test]
    async fn test_backend_error_errs_resource() {
        let fixture = Fixture::new();
        let volume = fixture.volume("data", 1024);
        fixture
            .backend
            .fail(BackendMethod::CreateVolume, "data", "No valid host was found");

        let result = fixture.run(create_volume(volume.id())).await;

        let TaskResult::Failed(err) = result else {
            panic!("expected failure, got {:?}", result);
        };
        assert!(err.is(TaskErrorKind::Backend));
        assert_eq!(err.message, "No valid host was found");

        let stored = fixture.repository.get(volume.id()).unwrap();
        assert_eq!(stored.state(), ResourceState::Erred);
        assert_eq!(stored.error_message, "No valid host was found");
        assert!(matches!(
            fixture.events.events_for(volume.id()).last(),
            Some(ResourceEventKind::Erred { .. })
        ));
    }

    #[tokio::test]
    async fn test_independent_failure_is_swallowed() {
        let fixture = Fixture::new();
        let volume = fixture.volume("data", 1024);
        fixture.backend.set_unavailable(true);

        let spec = TaskSpec::method(volume.id(), MethodCall::new(BackendMethod::PullVolume).independent());
        assert!(matches!(fixture.run(spec).await, TaskResult::Success));
        assert_eq!(
            fixture.repository.get(volume.id()).unwrap().state(),
            ResourceState::CreationScheduled
        );
    }

    #[tokio::test]
    async fn test_throttled_create_retries_without_calling_backend() {
        let fixture = Fixture::with_limits(ProvisionLimits::unlimited().with_default(1));
        let busy = fixture.volume("busy", 1);
        let waiting = fixture.volume("waiting", 1);
        fixture
            .repository
            .transition(busy.id(), Transition::BeginCreating)
            .unwrap();

        let result = fixture.run(create_volume(waiting.id())).await;

        assert!(matches!(result, TaskResult::Retry(_)));
        assert!(!fixture.backend.was_called(BackendMethod::CreateVolume, "waiting"));
        assert_eq!(
            create_volume(waiting.id())
                .into_task(&fixture.env)
                .retry_policy()
                .max_retries,
            300
        );
    }

    #[tokio::test]
    async fn test_runtime_state_before_and_after_call() {
        let fixture = Fixture::new();
        let tenant = fixture
            .repository
            .insert(NewResource::new(
                "tenant",
                fixture.settings,
                ResourceDetails::Tenant(Default::default()),
            ))
            .unwrap();
        fixture
            .run(TaskSpec::call(
                tenant.id(),
                BackendMethod::CreateTenant,
                Some(Transition::BeginCreating),
            ))
            .await;

        let spec = TaskSpec::method(
            tenant.id(),
            MethodCall::new(BackendMethod::PushTenantQuotas)
                .with_runtime_state("pushing")
                .with_success_runtime_state(runtime::TENANT_ONLINE),
        );
        assert!(matches!(fixture.run(spec).await, TaskResult::Success));
        assert_eq!(
            fixture.repository.get(tenant.id()).unwrap().runtime_state,
            runtime::TENANT_ONLINE
        );
    }

    #[tokio::test]
    async fn test_pull_instance_volumes_deletes_missing_volumes() {
        let fixture = Fixture::new();
        let instance = fixture
            .repository
            .insert(NewResource::new(
                "vm",
                fixture.settings,
                ResourceDetails::Instance(InstanceDetails::default()),
            ))
            .unwrap();
        let kept = fixture.volume("kept", 10);
        let gone = fixture.volume("gone", 20);
        for id in [kept.id(), gone.id()] {
            fixture.run(create_volume(id)).await;
            fixture
                .run(TaskSpec::poll(
                    id,
                    BackendMethod::PullVolumeRuntimeState,
                    runtime::VOLUME_AVAILABLE,
                    runtime::VOLUME_ERROR,
                ))
                .await;
            fixture
                .repository
                .modify(id, &mut |r| {
                    if let Some(v) = r.as_volume_mut() {
                        v.instance = Some(instance.id());
                    }
                    Ok(())
                })
                .unwrap();
        }
        let create = TaskSpec::method(
            instance.id(),
            MethodCall::new(BackendMethod::CreateInstance)
                .with_transition(Transition::BeginCreating)
                .with_related([kept.id(), gone.id()]),
        );
        assert!(matches!(fixture.run(create).await, TaskResult::Success));
        let gone_backend_id = fixture.repository.get(gone.id()).unwrap().backend_id().to_string();
        fixture.backend.remove(&gone_backend_id);

        let spec = TaskSpec::method(
            instance.id(),
            MethodCall::new(BackendMethod::PullInstanceVolumes).with_related([kept.id(), gone.id()]),
        );
        assert!(matches!(fixture.run(spec).await, TaskResult::Success));

        assert!(fixture.repository.get(gone.id()).is_err());
        let kept = fixture.repository.get(kept.id()).unwrap();
        assert_eq!(kept.as_volume().unwrap().instance, Some(instance.id()));
        assert_eq!(kept.runtime_state, runtime::VOLUME_IN_USE);
        assert_eq!(
            fixture
                .repository
                .quota(fixture.settings, crate::model::QuotaName::Storage)
                .unwrap()
                .usage,
            10
        );
    }

    #[tokio::test]
    async fn test_pull_tenant_security_groups_imports_unknown() {
        let fixture = Fixture::new();
        let tenant = fixture
            .repository
            .insert(NewResource::new(
                "tenant",
                fixture.settings,
                ResourceDetails::Tenant(Default::default()),
            ))
            .unwrap();
        fixture
            .run(TaskSpec::call(
                tenant.id(),
                BackendMethod::CreateTenant,
                Some(Transition::BeginCreating),
            ))
            .await;

        // A group created outside the orchestrator.
        let outside = fixture
            .repository
            .insert(NewResource::new(
                "web",
                fixture.settings,
                ResourceDetails::SecurityGroup(Default::default()),
            ))
            .unwrap();
        fixture
            .run(TaskSpec::call(outside.id(), BackendMethod::CreateSecurityGroup, None))
            .await;
        fixture.repository.delete(outside.id()).unwrap();

        let spec = TaskSpec::call(tenant.id(), BackendMethod::PullTenantSecurityGroups, None);
        assert!(matches!(fixture.run(spec).await, TaskResult::Success));

        let groups = fixture
            .repository
            .find(&ResourceFilter::kind(ResourceKind::SecurityGroup));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "web");
        assert_eq!(groups[0].state(), ResourceState::Ok);
        assert_eq!(groups[0].details.parent(), Some(tenant.id()));
    }
}
