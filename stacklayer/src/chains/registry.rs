//! Chain registry: `(kind, operation)` to builder.

use super::common::{action, create, delete, update};
use super::{backup, instance, network, snapshot, volume, ChainContext, ChainPlan, ChainSpec, Family};
use crate::backend::BackendMethod as M;
use crate::model::{Resource, ResourceKind, Transition};
use crate::tasks::TaskSpec;
use crate::orchestrator::{Operation, OrchestratorError};

/// Fields whose change must reach the backend.
const DESCRIPTIVE: &[&str] = &["name", "description"];
const SECURITY_GROUP_FIELDS: &[&str] = &["name", "description", "rules"];

/// Builds the chain realizing `operation` on `resource`.
pub fn build_chain(
    ctx: &ChainContext<'_>,
    resource: &Resource,
    operation: &Operation,
) -> Result<ChainSpec, OrchestratorError> {
    use Operation as Op;
    use ResourceKind as K;

    match (resource.kind(), operation) {
        (K::Volume, Op::Create) => volume::create(ctx, resource),
        (K::Volume, Op::Update { changed_fields }) => {
            Ok(update(resource, M::UpdateVolume, changed_fields, DESCRIPTIVE))
        }
        (K::Volume, Op::Delete { .. }) => volume::delete(ctx, resource),
        (K::Volume, Op::Pull) => Ok(action(resource, "pull", "Pull", M::PullVolume)),
        (K::Volume, Op::Extend { new_size }) => volume::extend(ctx, resource, *new_size),
        (K::Volume, Op::Attach { instance, device }) => {
            volume::attach(ctx, resource, *instance, device)
        }
        (K::Volume, Op::Detach) => volume::detach(resource),

        (K::Snapshot, Op::Create) => snapshot::create(ctx, resource),
        (K::Snapshot, Op::Update { changed_fields }) => {
            Ok(update(resource, M::UpdateSnapshot, changed_fields, DESCRIPTIVE))
        }
        (K::Snapshot, Op::Delete { .. }) => snapshot::delete(resource),
        (K::Snapshot, Op::Pull) => Ok(action(resource, "pull", "Pull", M::PullSnapshot)),

        (K::Instance, Op::Create) => instance::create(ctx, resource),
        (K::Instance, Op::Update { changed_fields }) => {
            Ok(update(resource, M::UpdateInstance, changed_fields, DESCRIPTIVE))
        }
        (K::Instance, Op::Delete { delete_volumes, .. }) => {
            instance::delete(ctx, resource, *delete_volumes)
        }
        (K::Instance, Op::Pull) => instance::pull(resource),
        (K::Instance, op @ Op::ChangeFlavor { .. }) => instance::change_flavor(resource, op),
        (K::Instance, op @ (Op::Start | Op::Stop | Op::Restart)) => instance::power(resource, op),
        (K::Instance, Op::UpdateSecurityGroups { groups }) => {
            instance::update_security_groups(ctx, resource, groups)
        }
        (K::Instance, Op::UpdateFloatingIps { floating_ips }) => {
            instance::update_floating_ips(ctx, resource, floating_ips)
        }
        (K::Instance, Op::UpdateInternalIps) => instance::update_internal_ips(resource),

        (K::Backup, Op::Create) => backup::create(ctx, resource),
        // Backups live only in the repository.
        (K::Backup, Op::Update { .. }) => Ok(ChainSpec::new(
            resource,
            "update",
            Family::Update,
            ChainPlan::new().then(TaskSpec::transition(resource.id(), Transition::BeginUpdating)),
        )),
        (K::Backup, Op::Delete { force, .. }) => backup::delete(ctx, resource, *force),

        (K::Tenant, Op::Create) => network::create_tenant(ctx, resource),
        (K::Tenant, Op::Update { changed_fields }) => {
            Ok(update(resource, M::UpdateTenant, changed_fields, DESCRIPTIVE))
        }
        (K::Tenant, Op::Delete { .. }) => network::delete_tenant(ctx, resource),
        (K::Tenant, Op::Pull) => Ok(action(resource, "pull", "Pull", M::PullTenant)),
        (K::Tenant, Op::PushQuotas) => {
            Ok(action(resource, "push_quotas", "Push quotas", M::PushTenantQuotas))
        }
        (K::Tenant, Op::PullSecurityGroups) => Ok(action(
            resource,
            "pull_security_groups",
            "Pull security groups",
            M::PullTenantSecurityGroups,
        )),
        (K::Tenant, Op::PullFloatingIps) => Ok(action(
            resource,
            "pull_floating_ips",
            "Pull floating IPs",
            M::PullTenantFloatingIps,
        )),

        (K::Network, Op::Create) => Ok(create(resource, M::CreateNetwork)),
        (K::Network, Op::Update { changed_fields }) => {
            Ok(update(resource, M::UpdateNetwork, changed_fields, DESCRIPTIVE))
        }
        (K::Network, Op::Delete { .. }) => Ok(delete(resource, M::DeleteNetwork, None)),

        (K::Subnet, Op::Create) => Ok(create(resource, M::CreateSubnet)),
        (K::Subnet, Op::Update { changed_fields }) => {
            Ok(update(resource, M::UpdateSubnet, changed_fields, DESCRIPTIVE))
        }
        (K::Subnet, Op::Delete { .. }) => Ok(delete(resource, M::DeleteSubnet, None)),

        (K::SecurityGroup, Op::Create) => Ok(create(resource, M::CreateSecurityGroup)),
        (K::SecurityGroup, Op::Update { changed_fields }) => Ok(update(
            resource,
            M::UpdateSecurityGroup,
            changed_fields,
            SECURITY_GROUP_FIELDS,
        )),
        (K::SecurityGroup, Op::Delete { .. }) => {
            Ok(delete(resource, M::DeleteSecurityGroup, None))
        }

        (K::FloatingIp, Op::Create) => Ok(create(resource, M::CreateFloatingIp)),
        (K::FloatingIp, Op::Delete { .. }) => {
            if resource.as_floating_ip().is_some_and(|f| f.instance.is_some()) {
                return Err(OrchestratorError::DependentResources(format!(
                    "Floating IP {} is assigned to an instance",
                    resource.id()
                )));
            }
            Ok(delete(resource, M::DeleteFloatingIp, None))
        }

        (kind, op) => Err(OrchestratorError::Unsupported {
            kind,
            operation: op.name(),
        }),
    }
}
