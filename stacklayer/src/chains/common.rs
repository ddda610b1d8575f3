//! Chains shared by several resource kinds.

use super::{ChainPlan, ChainSpec, Family};
use crate::backend::BackendMethod;
use crate::model::{Resource, ResourceId, Transition};
use crate::tasks::{MethodCall, TaskSpec};

/// Create call guarded by the provisioning throttle.
pub(super) fn throttled_create(resource: ResourceId, method: BackendMethod) -> TaskSpec {
    TaskSpec::method(
        resource,
        MethodCall::new(method)
            .with_transition(Transition::BeginCreating)
            .throttled(),
    )
}

/// Call that first moves the resource to `Updating`.
pub(super) fn updating_call(resource: ResourceId, method: BackendMethod) -> TaskSpec {
    TaskSpec::call(resource, method, Some(Transition::BeginUpdating))
}

/// Single throttled create call.
pub(super) fn create(resource: &Resource, method: BackendMethod) -> ChainSpec {
    let plan = ChainPlan::new().then(throttled_create(resource.id(), method));
    ChainSpec::new(resource, "create", Family::Create, plan)
}

/// Backend update when one of `watched` changed, otherwise a bare
/// transition.
pub(super) fn update(
    resource: &Resource,
    method: BackendMethod,
    changed_fields: &[String],
    watched: &[&str],
) -> ChainSpec {
    let id = resource.id();
    let step = if changed_fields.iter().any(|f| watched.contains(&f.as_str())) {
        updating_call(id, method)
    } else {
        TaskSpec::transition(id, Transition::BeginUpdating)
    };
    ChainSpec::new(resource, "update", Family::Update, ChainPlan::new().then(step))
}

/// One backend call under a named action.
pub(super) fn action(
    resource: &Resource,
    operation: &str,
    action: &str,
    method: BackendMethod,
) -> ChainSpec {
    let plan = ChainPlan::new().then(updating_call(resource.id(), method));
    ChainSpec::new(resource, operation, Family::Action(action.to_string()), plan)
}

/// Backend delete when the resource reached the backend, followed by an
/// existence check if the kind has one.
pub(super) fn delete_plan(
    resource: &Resource,
    method: BackendMethod,
    check: Option<BackendMethod>,
) -> ChainPlan {
    let id = resource.id();
    if !resource.has_backend_id() {
        return ChainPlan::new().then(TaskSpec::transition(id, Transition::BeginDeleting));
    }
    let plan = ChainPlan::new().then(TaskSpec::call(id, method, Some(Transition::BeginDeleting)));
    match check {
        Some(check) => plan.then(TaskSpec::check(id, check)),
        None => plan,
    }
}

pub(super) fn delete(
    resource: &Resource,
    method: BackendMethod,
    check: Option<BackendMethod>,
) -> ChainSpec {
    ChainSpec::new(
        resource,
        "delete",
        Family::Delete,
        delete_plan(resource, method, check),
    )
}
