//! Instance chains.
//!
//! Instance create is the composite chain:
//!
//! ```text
//! begin_creating(vm)                                   (throttled)
//! [create vol-a -> poll (30s) -> pull -> set_ok] | [create vol-b -> poll -> pull -> set_ok]
//! create_instance (10s) -> pull_volume * N
//! create_floating_ip * M -> push_instance_floating_ips -> poll fip (5s) -> poll fip ...
//! ```

use super::common::updating_call;
use super::timings::ChainTimings;
use super::{volume, ChainContext, ChainPlan, ChainSpec, DetailChange, Family};
use crate::backend::{runtime, BackendMethod};
use crate::jobs::Hook;
use crate::model::{Resource, ResourceId, ResourceKind, ResourceState, Transition};
use crate::orchestrator::{Operation, OrchestratorError};
use crate::repository::ResourceFilter;
use crate::tasks::{MethodCall, TaskSpec};

/// System volume first, then data volumes in creation order.
fn ordered_volumes(ctx: &ChainContext<'_>, instance: ResourceId) -> Vec<Resource> {
    let mut volumes = ctx.repository.volumes_of(instance);
    volumes.sort_by_key(|v| (!v.as_volume().is_some_and(|d| d.bootable), v.id()));
    volumes
}

fn poll_floating_ip(floating_ip: ResourceId) -> TaskSpec {
    TaskSpec::poll(
        floating_ip,
        BackendMethod::PullFloatingIpRuntimeState,
        runtime::FLOATING_IP_ACTIVE,
        runtime::FLOATING_IP_ERRED,
    )
}

fn poll_instance(instance: ResourceId, success: &str) -> TaskSpec {
    TaskSpec::poll(
        instance,
        BackendMethod::PullInstanceRuntimeState,
        success,
        runtime::INSTANCE_ERRED,
    )
}

/// Creates the floating IPs that lack a backend id, pushes all of them to
/// the instance and waits for each to become active.
fn floating_ip_steps(
    timings: &ChainTimings,
    instance: ResourceId,
    floating_ips: &[Resource],
) -> Vec<TaskSpec> {
    if floating_ips.is_empty() {
        return Vec::new();
    }
    let mut steps = Vec::new();
    for floating_ip in floating_ips.iter().filter(|f| !f.has_backend_id()) {
        steps.push(TaskSpec::call(
            floating_ip.id(),
            BackendMethod::CreateFloatingIp,
            Some(Transition::BeginCreating),
        ));
        steps.push(TaskSpec::transition(floating_ip.id(), Transition::SetOk));
    }
    steps.push(TaskSpec::method(
        instance,
        MethodCall::new(BackendMethod::PushInstanceFloatingIps)
            .with_related(floating_ips.iter().map(Resource::id)),
    ));
    for (index, floating_ip) in floating_ips.iter().enumerate() {
        steps.push(
            poll_floating_ip(floating_ip.id()).with_countdown(ChainTimings::first_only(
                timings.floating_ip_poll_countdown,
                index,
            )),
        );
    }
    steps
}

/// The create plan shared by plain create and backup restoration.
fn create_plan(
    ctx: &ChainContext<'_>,
    instance: &Resource,
    with_floating_ips: bool,
) -> Result<ChainPlan, OrchestratorError> {
    let id = instance.id();
    let volumes = ordered_volumes(ctx, id);
    if volumes.is_empty() {
        return Err(OrchestratorError::InvalidRequest(format!(
            "Instance {} has no volumes",
            id
        )));
    }

    let branches = volumes
        .iter()
        .filter(|v| v.state() == ResourceState::CreationScheduled)
        .enumerate()
        .map(|(index, v)| {
            let countdown = ChainTimings::first_only(ctx.timings.volume_poll_countdown, index);
            let mut branch = volume::create_steps(v, countdown);
            branch.push(TaskSpec::call(v.id(), BackendMethod::PullVolume, None));
            branch.push(TaskSpec::transition(v.id(), Transition::SetOk));
            branch
        })
        .collect();

    let mut create = MethodCall::new(BackendMethod::CreateInstance)
        .with_related(volumes.iter().map(Resource::id));
    if let Some(details) = instance.as_instance() {
        create = create.with_related(details.security_groups.iter().copied());
    }

    let mut plan = ChainPlan::new()
        .then(TaskSpec::throttled_transition(id, Transition::BeginCreating))
        .fan_out(branches)
        .then(TaskSpec::method(id, create).with_countdown(ctx.timings.instance_settle))
        .then_all(
            volumes
                .iter()
                .map(|v| TaskSpec::call(v.id(), BackendMethod::PullVolume, None)),
        );

    if with_floating_ips {
        let floating_ips = ctx.repository.floating_ips_of(id);
        plan = plan.then_all(floating_ip_steps(&ctx.timings, id, &floating_ips));
    }
    Ok(plan)
}

pub(super) fn create(ctx: &ChainContext<'_>, instance: &Resource) -> Result<ChainSpec, OrchestratorError> {
    let id = instance.id();
    Ok(
        ChainSpec::new(instance, "create", Family::Create, create_plan(ctx, instance, true)?)
            .on_success(Hook::SetInstanceOk(id))
            .on_failure(Hook::SetInstanceErred(id)),
    )
}

/// Create chain for an instance restored from a backup; its volumes carry
/// the backup's snapshots as their source.
pub fn backup_restoration(
    ctx: &ChainContext<'_>,
    instance: &Resource,
) -> Result<ChainSpec, OrchestratorError> {
    let id = instance.id();
    Ok(ChainSpec::new(
        instance,
        "restore",
        Family::Create,
        create_plan(ctx, instance, false)?,
    )
    .on_success(Hook::SetOk(id))
    .on_failure(Hook::SetBackupRestorationErred(id)))
}

pub(super) fn delete(
    ctx: &ChainContext<'_>,
    instance: &Resource,
    delete_volumes: bool,
) -> Result<ChainSpec, OrchestratorError> {
    let id = instance.id();
    let backups = ctx.repository.find(&ResourceFilter::kind(ResourceKind::Backup).owned_by(id));
    if !backups.is_empty() {
        return Err(OrchestratorError::DependentResources(format!(
            "Instance {} has {} backup(s); delete them first",
            id,
            backups.len()
        )));
    }

    if !instance.has_backend_id() {
        let plan = ChainPlan::new().then(TaskSpec::transition(id, Transition::BeginDeleting));
        return Ok(ChainSpec::new(instance, "delete", Family::Delete, plan)
            .on_success(Hook::DeleteInstance(id)));
    }

    let volumes = ordered_volumes(ctx, id);
    let mut plan = ChainPlan::new();
    if !delete_volumes {
        let branches = volumes
            .iter()
            .filter(|v| v.has_backend_id() && !v.as_volume().is_some_and(|d| d.bootable))
            .map(|v| {
                vec![
                    TaskSpec::call(v.id(), BackendMethod::DetachVolume, None),
                    TaskSpec::poll(
                        v.id(),
                        BackendMethod::PullVolumeRuntimeState,
                        runtime::VOLUME_AVAILABLE,
                        runtime::VOLUME_ERROR,
                    ),
                ]
            })
            .collect();
        plan = plan.fan_out(branches);
    }

    let floating_ips: Vec<Resource> = ctx
        .repository
        .floating_ips_of(id)
        .into_iter()
        .filter(Resource::has_backend_id)
        .collect();

    plan = plan
        .then(TaskSpec::call(
            id,
            BackendMethod::DeleteInstance,
            Some(Transition::BeginDeleting),
        ))
        .then(TaskSpec::check(id, BackendMethod::IsInstanceDeleted))
        .then(TaskSpec::method(
            id,
            MethodCall::new(BackendMethod::PullInstanceVolumes)
                .with_related(volumes.iter().map(Resource::id)),
        ))
        .then_all(floating_ips.iter().enumerate().map(|(index, f)| {
            TaskSpec::call(f.id(), BackendMethod::PullFloatingIpRuntimeState, None).with_countdown(
                ChainTimings::first_only(ctx.timings.floating_ip_poll_countdown, index),
            )
        }));

    Ok(ChainSpec::new(instance, "delete", Family::Delete, plan).on_success(Hook::DeleteInstance(id)))
}

pub(super) fn pull(instance: &Resource) -> Result<ChainSpec, OrchestratorError> {
    let id = instance.id();
    let plan = ChainPlan::new()
        .then(updating_call(id, BackendMethod::PullInstance))
        .then(TaskSpec::call(id, BackendMethod::PullInstanceSecurityGroups, None))
        .then(TaskSpec::call(id, BackendMethod::PullInstanceInternalIps, None));
    Ok(ChainSpec::new(instance, "pull", Family::Action("Pull".into()), plan))
}

fn require_runtime_state(instance: &Resource, expected: &[&str], operation: &str) -> Result<(), OrchestratorError> {
    if expected.contains(&instance.runtime_state.as_str()) {
        return Ok(());
    }
    Err(OrchestratorError::InvalidRequest(format!(
        "Cannot {} instance {} in runtime state {:?}",
        operation,
        instance.id(),
        instance.runtime_state
    )))
}

pub(super) fn change_flavor(instance: &Resource, operation: &Operation) -> Result<ChainSpec, OrchestratorError> {
    let Operation::ChangeFlavor {
        flavor_name,
        backend_flavor_id,
        cores,
        ram,
        disk,
    } = operation
    else {
        return Err(OrchestratorError::Unsupported {
            kind: ResourceKind::Instance,
            operation: operation.name(),
        });
    };
    require_runtime_state(instance, &[runtime::INSTANCE_SHUTOFF], "resize")?;
    if instance
        .as_instance()
        .is_some_and(|d| d.backend_flavor_id == *backend_flavor_id && !backend_flavor_id.is_empty())
    {
        return Err(OrchestratorError::InvalidRequest(format!(
            "Instance {} already has flavor {}",
            instance.id(),
            flavor_name
        )));
    }

    let id = instance.id();
    let plan = ChainPlan::new()
        .then(TaskSpec::method(
            id,
            MethodCall::new(BackendMethod::ResizeInstance)
                .with_transition(Transition::BeginUpdating)
                .with_param("flavor_id", backend_flavor_id)
                .with_param("cores", cores)
                .with_param("ram", ram)
                .with_param("disk", disk),
        ))
        .then(poll_instance(id, runtime::INSTANCE_VERIFY_RESIZE))
        .then(TaskSpec::call(id, BackendMethod::ConfirmInstanceResize, None))
        .then(poll_instance(id, runtime::INSTANCE_SHUTOFF));

    Ok(
        ChainSpec::new(instance, "change_flavor", Family::Action("Change flavor".into()), plan)
            .with_change(
                id,
                DetailChange::Flavor {
                    flavor_name: flavor_name.clone(),
                    backend_flavor_id: backend_flavor_id.clone(),
                    cores: *cores,
                    ram: *ram,
                    disk: *disk,
                },
            ),
    )
}

pub(super) fn power(instance: &Resource, operation: &Operation) -> Result<ChainSpec, OrchestratorError> {
    let (method, required, target) = match operation {
        Operation::Start => (
            BackendMethod::StartInstance,
            runtime::INSTANCE_SHUTOFF,
            runtime::INSTANCE_ACTIVE,
        ),
        Operation::Stop => (
            BackendMethod::StopInstance,
            runtime::INSTANCE_ACTIVE,
            runtime::INSTANCE_SHUTOFF,
        ),
        Operation::Restart => (
            BackendMethod::RestartInstance,
            runtime::INSTANCE_ACTIVE,
            runtime::INSTANCE_ACTIVE,
        ),
        other => {
            return Err(OrchestratorError::Unsupported {
                kind: ResourceKind::Instance,
                operation: other.name(),
            })
        }
    };
    require_runtime_state(instance, &[required], operation.name())?;

    let id = instance.id();
    let plan = ChainPlan::new()
        .then(updating_call(id, method))
        .then(poll_instance(id, target));
    Ok(ChainSpec::new(
        instance,
        operation.name(),
        Family::Action(operation.action().to_string()),
        plan,
    ))
}

pub(super) fn update_security_groups(
    ctx: &ChainContext<'_>,
    instance: &Resource,
    groups: &[ResourceId],
) -> Result<ChainSpec, OrchestratorError> {
    for group in groups {
        let group = ctx.get(*group)?;
        if group.kind() != ResourceKind::SecurityGroup || group.settings() != instance.settings() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "Resource {} is not a security group of the instance's settings",
                group.id()
            )));
        }
    }
    let id = instance.id();
    let plan = ChainPlan::new().then(TaskSpec::method(
        id,
        MethodCall::new(BackendMethod::PushInstanceSecurityGroups)
            .with_transition(Transition::BeginUpdating)
            .with_related(groups.iter().copied()),
    ));
    Ok(ChainSpec::new(
        instance,
        "update_security_groups",
        Family::Action("Update security groups".into()),
        plan,
    )
    .with_change(id, DetailChange::SecurityGroups(groups.to_vec())))
}

pub(super) fn update_internal_ips(instance: &Resource) -> Result<ChainSpec, OrchestratorError> {
    let plan = ChainPlan::new().then(updating_call(instance.id(), BackendMethod::PushInstanceInternalIps));
    Ok(ChainSpec::new(
        instance,
        "update_internal_ips",
        Family::Action("Update internal IPs".into()),
        plan,
    ))
}

/// Replaces the instance's floating IPs with `wanted`.
pub(super) fn update_floating_ips(
    ctx: &ChainContext<'_>,
    instance: &Resource,
    wanted: &[ResourceId],
) -> Result<ChainSpec, OrchestratorError> {
    let id = instance.id();
    let mut floating_ips = Vec::with_capacity(wanted.len());
    for floating_ip in wanted {
        let floating_ip = ctx.get(*floating_ip)?;
        let details = floating_ip.as_floating_ip().ok_or_else(|| {
            OrchestratorError::InvalidRequest(format!("Resource {} is not a floating IP", floating_ip.id()))
        })?;
        if details.instance.is_some_and(|owner| owner != id) || (details.is_booked && details.instance != Some(id)) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "Floating IP {} is already in use",
                floating_ip.id()
            )));
        }
        floating_ips.push(floating_ip);
    }

    let mut spec_changes: Vec<(ResourceId, DetailChange)> = floating_ips
        .iter()
        .map(|f| (f.id(), DetailChange::LinkFloatingIp(id)))
        .collect();
    for current in ctx.repository.floating_ips_of(id) {
        if !wanted.contains(&current.id()) {
            spec_changes.push((current.id(), DetailChange::UnlinkFloatingIp));
        }
    }

    let plan = ChainPlan::new()
        .then(TaskSpec::transition(id, Transition::BeginUpdating))
        .then_all(floating_ip_steps(&ctx.timings, id, &floating_ips))
        .then(TaskSpec::method(
            id,
            MethodCall::new(BackendMethod::PullFloatingIps)
                .independent()
                .with_related(wanted.iter().copied()),
        ));

    let mut spec = ChainSpec::new(
        instance,
        "update_floating_ips",
        Family::Action("Update floating IPs".into()),
        plan,
    )
    .on_success(Hook::SetInstanceOk(id))
    .on_failure(Hook::SetInstanceErred(id));
    for (resource, change) in spec_changes {
        spec = spec.with_change(resource, change);
    }
    Ok(spec)
}
