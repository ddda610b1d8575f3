//! Backend method vocabulary.

use crate::model::ResourceKind;
use std::fmt;

/// A named operation on the cloud backend.
///
/// Chains refer to backend calls by these names; the backend client maps
/// each one onto its provider API.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum BackendMethod {
    // Tenant
    CreateTenant,
    AddAdminUserToTenant,
    CreateTenantUser,
    PushTenantQuotas,
    PullTenant,
    PullTenantSecurityGroups,
    PullTenantFloatingIps,
    ConnectTenantToExternalNetwork,
    UpdateTenant,
    CleanupTenant,

    // Network and subnet
    CreateNetwork,
    UpdateNetwork,
    DeleteNetwork,
    CreateSubnet,
    UpdateSubnet,
    DeleteSubnet,

    // Security group
    CreateSecurityGroup,
    UpdateSecurityGroup,
    DeleteSecurityGroup,

    // Floating IP
    CreateFloatingIp,
    DeleteFloatingIp,
    PullFloatingIpRuntimeState,
    PullFloatingIps,

    // Volume
    CreateVolume,
    UpdateVolume,
    DeleteVolume,
    PullVolume,
    PullVolumeRuntimeState,
    IsVolumeDeleted,
    ExtendVolume,
    AttachVolume,
    DetachVolume,

    // Snapshot
    CreateSnapshot,
    UpdateSnapshot,
    DeleteSnapshot,
    PullSnapshot,
    PullSnapshotRuntimeState,
    IsSnapshotDeleted,

    // Instance
    CreateInstance,
    UpdateInstance,
    DeleteInstance,
    IsInstanceDeleted,
    PullInstance,
    PullInstanceRuntimeState,
    PullInstanceVolumes,
    PullInstanceSecurityGroups,
    PullInstanceInternalIps,
    PushInstanceFloatingIps,
    PushInstanceSecurityGroups,
    PushInstanceInternalIps,
    ResizeInstance,
    ConfirmInstanceResize,
    StartInstance,
    StopInstance,
    RestartInstance,
}

impl BackendMethod {
    /// Returns the snake-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTenant => "create_tenant",
            Self::AddAdminUserToTenant => "add_admin_user_to_tenant",
            Self::CreateTenantUser => "create_tenant_user",
            Self::PushTenantQuotas => "push_tenant_quotas",
            Self::PullTenant => "pull_tenant",
            Self::PullTenantSecurityGroups => "pull_tenant_security_groups",
            Self::PullTenantFloatingIps => "pull_tenant_floating_ips",
            Self::ConnectTenantToExternalNetwork => "connect_tenant_to_external_network",
            Self::UpdateTenant => "update_tenant",
            Self::CleanupTenant => "cleanup_tenant",
            Self::CreateNetwork => "create_network",
            Self::UpdateNetwork => "update_network",
            Self::DeleteNetwork => "delete_network",
            Self::CreateSubnet => "create_subnet",
            Self::UpdateSubnet => "update_subnet",
            Self::DeleteSubnet => "delete_subnet",
            Self::CreateSecurityGroup => "create_security_group",
            Self::UpdateSecurityGroup => "update_security_group",
            Self::DeleteSecurityGroup => "delete_security_group",
            Self::CreateFloatingIp => "create_floating_ip",
            Self::DeleteFloatingIp => "delete_floating_ip",
            Self::PullFloatingIpRuntimeState => "pull_floating_ip_runtime_state",
            Self::PullFloatingIps => "pull_floating_ips",
            Self::CreateVolume => "create_volume",
            Self::UpdateVolume => "update_volume",
            Self::DeleteVolume => "delete_volume",
            Self::PullVolume => "pull_volume",
            Self::PullVolumeRuntimeState => "pull_volume_runtime_state",
            Self::IsVolumeDeleted => "is_volume_deleted",
            Self::ExtendVolume => "extend_volume",
            Self::AttachVolume => "attach_volume",
            Self::DetachVolume => "detach_volume",
            Self::CreateSnapshot => "create_snapshot",
            Self::UpdateSnapshot => "update_snapshot",
            Self::DeleteSnapshot => "delete_snapshot",
            Self::PullSnapshot => "pull_snapshot",
            Self::PullSnapshotRuntimeState => "pull_snapshot_runtime_state",
            Self::IsSnapshotDeleted => "is_snapshot_deleted",
            Self::CreateInstance => "create_instance",
            Self::UpdateInstance => "update_instance",
            Self::DeleteInstance => "delete_instance",
            Self::IsInstanceDeleted => "is_instance_deleted",
            Self::PullInstance => "pull_instance",
            Self::PullInstanceRuntimeState => "pull_instance_runtime_state",
            Self::PullInstanceVolumes => "pull_instance_volumes",
            Self::PullInstanceSecurityGroups => "pull_instance_security_groups",
            Self::PullInstanceInternalIps => "pull_instance_internal_ips",
            Self::PushInstanceFloatingIps => "push_instance_floating_ips",
            Self::PushInstanceSecurityGroups => "push_instance_security_groups",
            Self::PushInstanceInternalIps => "push_instance_internal_ips",
            Self::ResizeInstance => "resize_instance",
            Self::ConfirmInstanceResize => "confirm_instance_resize",
            Self::StartInstance => "start_instance",
            Self::StopInstance => "stop_instance",
            Self::RestartInstance => "restart_instance",
        }
    }

    /// Kind of resource the method is invoked on.
    pub fn target_kind(&self) -> ResourceKind {
        use BackendMethod::*;
        match self {
            CreateTenant
            | AddAdminUserToTenant
            | CreateTenantUser
            | PushTenantQuotas
            | PullTenant
            | PullTenantSecurityGroups
            | PullTenantFloatingIps
            | ConnectTenantToExternalNetwork
            | UpdateTenant
            | CleanupTenant => ResourceKind::Tenant,
            CreateNetwork | UpdateNetwork | DeleteNetwork => ResourceKind::Network,
            CreateSubnet | UpdateSubnet | DeleteSubnet => ResourceKind::Subnet,
            CreateSecurityGroup | UpdateSecurityGroup | DeleteSecurityGroup => {
                ResourceKind::SecurityGroup
            }
            CreateFloatingIp | DeleteFloatingIp | PullFloatingIpRuntimeState => {
                ResourceKind::FloatingIp
            }
            CreateVolume | UpdateVolume | DeleteVolume | PullVolume | PullVolumeRuntimeState
            | IsVolumeDeleted | ExtendVolume | AttachVolume | DetachVolume => ResourceKind::Volume,
            CreateSnapshot | UpdateSnapshot | DeleteSnapshot | PullSnapshot
            | PullSnapshotRuntimeState | IsSnapshotDeleted => ResourceKind::Snapshot,
            PullFloatingIps
            | CreateInstance
            | UpdateInstance
            | DeleteInstance
            | IsInstanceDeleted
            | PullInstance
            | PullInstanceRuntimeState
            | PullInstanceVolumes
            | PullInstanceSecurityGroups
            | PullInstanceInternalIps
            | PushInstanceFloatingIps
            | PushInstanceSecurityGroups
            | PushInstanceInternalIps
            | ResizeInstance
            | ConfirmInstanceResize
            | StartInstance
            | StopInstance
            | RestartInstance => ResourceKind::Instance,
        }
    }

    /// Runtime-state pull method for a resource kind, if it has one.
    pub fn runtime_pull_for(kind: ResourceKind) -> Option<Self> {
        match kind {
            ResourceKind::Volume => Some(Self::PullVolumeRuntimeState),
            ResourceKind::Snapshot => Some(Self::PullSnapshotRuntimeState),
            ResourceKind::Instance => Some(Self::PullInstanceRuntimeState),
            ResourceKind::FloatingIp => Some(Self::PullFloatingIpRuntimeState),
            _ => None,
        }
    }
}

impl fmt::Display for BackendMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
