//! Tenant and network chains.

use super::common::throttled_create;
use super::{ChainContext, ChainPlan, ChainSpec, Family};
use crate::backend::{runtime, BackendMethod};
use crate::jobs::Hook;
use crate::model::{Resource, ResourceId, ResourceKind, Transition};
use crate::orchestrator::OrchestratorError;
use crate::repository::ResourceFilter;
use crate::tasks::{MethodCall, TaskSpec};

fn children(ctx: &ChainContext<'_>, kind: ResourceKind, parent: ResourceId) -> Vec<Resource> {
    ctx.repository.find(&ResourceFilter::kind(kind).owned_by(parent))
}

fn single(rows: Vec<Resource>, what: &str, tenant: ResourceId) -> Result<Resource, OrchestratorError> {
    rows.into_iter().next().ok_or_else(|| {
        OrchestratorError::InvalidRequest(format!("Tenant {} has no {}", tenant, what))
    })
}

/// Creates the tenant with its internal network, subnet and default
/// security groups.
pub(super) fn create_tenant(ctx: &ChainContext<'_>, tenant: &Resource) -> Result<ChainSpec, OrchestratorError> {
    let id = tenant.id();
    let network = single(children(ctx, ResourceKind::Network, id), "network", id)?;
    let subnet = single(
        children(ctx, ResourceKind::Subnet, network.id()),
        "subnet",
        id,
    )?;
    let groups = children(ctx, ResourceKind::SecurityGroup, id);
    let settings = ctx.repository.settings(tenant.settings())?;

    let mut plan = ChainPlan::new()
        .then(throttled_create(id, BackendMethod::CreateTenant))
        .then(TaskSpec::call(id, BackendMethod::AddAdminUserToTenant, None))
        .then(TaskSpec::call(id, BackendMethod::CreateTenantUser, None))
        .then(TaskSpec::call(
            network.id(),
            BackendMethod::CreateNetwork,
            Some(Transition::BeginCreating),
        ))
        .then(TaskSpec::call(
            subnet.id(),
            BackendMethod::CreateSubnet,
            Some(Transition::BeginCreating),
        ))
        .then(TaskSpec::method(
            id,
            MethodCall::new(BackendMethod::PushTenantQuotas)
                .with_success_runtime_state(runtime::TENANT_ONLINE),
        ))
        .fan_out(
            groups
                .iter()
                .map(|g| {
                    vec![
                        TaskSpec::call(
                            g.id(),
                            BackendMethod::CreateSecurityGroup,
                            Some(Transition::BeginCreating),
                        ),
                        TaskSpec::transition(g.id(), Transition::SetOk),
                    ]
                })
                .collect(),
        )
        .then(TaskSpec::call(id, BackendMethod::PullTenantSecurityGroups, None));

    if let Some(external) = &settings.external_network_id {
        plan = plan.then(TaskSpec::method(
            id,
            MethodCall::new(BackendMethod::ConnectTenantToExternalNetwork)
                .with_param("external_network_id", external),
        ));
    }

    Ok(ChainSpec::new(tenant, "create", Family::Create, plan)
        .on_success(Hook::TenantCreateSuccess {
            tenant: id,
            network: network.id(),
            subnet: subnet.id(),
        })
        .on_failure(Hook::TenantCreateErred {
            tenant: id,
            network: network.id(),
            subnet: subnet.id(),
        }))
}

/// Cleans the tenant up at the backend; its child rows go with it.
pub(super) fn delete_tenant(ctx: &ChainContext<'_>, tenant: &Resource) -> Result<ChainSpec, OrchestratorError> {
    let id = tenant.id();
    let instances: Vec<Resource> = ctx
        .repository
        .find(&ResourceFilter::kind(ResourceKind::Instance).in_settings(tenant.settings()));
    if !instances.is_empty() {
        return Err(OrchestratorError::DependentResources(format!(
            "Tenant {} still has {} instance(s)",
            id,
            instances.len()
        )));
    }

    let plan = super::common::delete_plan(tenant, BackendMethod::CleanupTenant, None);

    let mut hooks = Vec::new();
    for network in children(ctx, ResourceKind::Network, id) {
        for subnet in children(ctx, ResourceKind::Subnet, network.id()) {
            hooks.push(Hook::Delete(subnet.id()));
        }
        hooks.push(Hook::Delete(network.id()));
    }
    for group in children(ctx, ResourceKind::SecurityGroup, id) {
        hooks.push(Hook::Delete(group.id()));
    }
    hooks.push(Hook::Delete(id));

    Ok(ChainSpec::new(tenant, "delete", Family::Delete, plan).on_success(Hook::All(hooks)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::testing::Graph;
    use crate::chains::ChainTimings;
    use crate::model::{NetworkDetails, ResourceDetails, SecurityGroupDetails, SubnetDetails};
    use crate::repository::ResourceRepository;

    fn tenant_graph(graph: &Graph) -> (Resource, Resource, Resource, Resource) {
        let tenant = graph.insert("tenant", ResourceDetails::Tenant(Default::default()));
        let network = graph.insert(
            "tenant-int-net",
            ResourceDetails::Network(NetworkDetails {
                tenant: Some(tenant.id()),
            }),
        );
        let subnet = graph.insert(
            "tenant-sub-net",
            ResourceDetails::Subnet(SubnetDetails {
                network: Some(network.id()),
                cidr: "192.168.42.0/24".into(),
            }),
        );
        let group = graph.insert(
            "default",
            ResourceDetails::SecurityGroup(SecurityGroupDetails {
                tenant: Some(tenant.id()),
                rules: vec!["tcp/22".into()],
            }),
        );
        (tenant, network, subnet, group)
    }

    #[test]
    fn test_tenant_create_chain() {
        let graph = Graph::new();
        let ctx = ChainContext::new(&graph.repository, ChainTimings::default());
        let (tenant, network, subnet, group) = tenant_graph(&graph);
        let t = tenant.id();

        let spec = create_tenant(&ctx, &tenant).unwrap();
        assert_eq!(
            spec.plan.describe(),
            vec![vec![vec![
                format!("create_tenant({})", t),
                format!("add_admin_user_to_tenant({})", t),
                format!("create_tenant_user({})", t),
                format!("create_network({})", network.id()),
                format!("create_subnet({})", subnet.id()),
                format!("push_tenant_quotas({})", t),
                format!("create_security_group({})", group.id()),
                format!("set_ok({})", group.id()),
                format!("pull_tenant_security_groups({})", t),
            ]]]
        );
        assert!(matches!(spec.on_failure, Hook::TenantCreateErred { .. }));
    }

    #[test]
    fn test_external_network_is_connected_when_configured() {
        let graph = Graph::new();
        graph
            .repository
            .modify_settings(graph.settings, &mut |s| {
                s.external_network_id = Some("ext-net".into())
            })
            .unwrap();
        let ctx = ChainContext::new(&graph.repository, ChainTimings::default());
        let (tenant, ..) = tenant_graph(&graph);

        let spec = create_tenant(&ctx, &tenant).unwrap();
        let last = spec.plan.specs().last().unwrap();
        assert_eq!(last.name(), format!("connect_tenant_to_external_network({})", tenant.id()));
    }

    #[test]
    fn test_tenant_without_network_is_rejected() {
        let graph = Graph::new();
        let ctx = ChainContext::new(&graph.repository, ChainTimings::default());
        let tenant = graph.insert("tenant", ResourceDetails::Tenant(Default::default()));
        assert!(matches!(
            create_tenant(&ctx, &tenant),
            Err(OrchestratorError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_tenant_delete_removes_children_rows() {
        let graph = Graph::new();
        let ctx = ChainContext::new(&graph.repository, ChainTimings::default());
        let (tenant, network, subnet, group) = tenant_graph(&graph);
        let tenant = graph.materialize(tenant.id(), "tnt-1");

        let spec = delete_tenant(&ctx, &tenant).unwrap();
        assert_eq!(
            spec.on_success,
            Hook::All(vec![
                Hook::Delete(subnet.id()),
                Hook::Delete(network.id()),
                Hook::Delete(group.id()),
                Hook::Delete(tenant.id()),
            ])
        );
    }
}
