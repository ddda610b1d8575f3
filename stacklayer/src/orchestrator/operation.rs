//! Operations the orchestrator accepts.

use crate::model::ResourceId;
use std::fmt;

/// A user-facing lifecycle operation on one resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Create,
    /// Local fields already changed by the caller; `changed_fields` decides
    /// whether the backend needs to hear about it.
    Update { changed_fields: Vec<String> },
    Delete { force: bool, delete_volumes: bool },
    Pull,
    Extend { new_size: u64 },
    Attach { instance: ResourceId, device: String },
    Detach,
    ChangeFlavor {
        flavor_name: String,
        backend_flavor_id: String,
        cores: u64,
        ram: u64,
        disk: u64,
    },
    Start,
    Stop,
    Restart,
    UpdateSecurityGroups { groups: Vec<ResourceId> },
    UpdateFloatingIps { floating_ips: Vec<ResourceId> },
    UpdateInternalIps,
    PushQuotas,
    PullSecurityGroups,
    PullFloatingIps,
}

impl Operation {
    /// Plain delete: backend removal, volumes go with an instance.
    pub fn delete() -> Self {
        Self::Delete {
            force: false,
            delete_volumes: true,
        }
    }

    pub fn update<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Update {
            changed_fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Pull => "pull",
            Self::Extend { .. } => "extend",
            Self::Attach { .. } => "attach",
            Self::Detach => "detach",
            Self::ChangeFlavor { .. } => "change_flavor",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::UpdateSecurityGroups { .. } => "update_security_groups",
            Self::UpdateFloatingIps { .. } => "update_floating_ips",
            Self::UpdateInternalIps => "update_internal_ips",
            Self::PushQuotas => "push_quotas",
            Self::PullSecurityGroups => "pull_security_groups",
            Self::PullFloatingIps => "pull_floating_ips",
        }
    }

    /// Text stored in the resource's `action` while the chain runs.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update { .. } => "Update",
            Self::Delete { .. } => "Delete",
            Self::Pull => "Pull",
            Self::Extend { .. } => "Extend",
            Self::Attach { .. } => "Attach",
            Self::Detach => "Detach",
            Self::ChangeFlavor { .. } => "Change flavor",
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Restart => "Restart",
            Self::UpdateSecurityGroups { .. } => "Update security groups",
            Self::UpdateFloatingIps { .. } => "Update floating IPs",
            Self::UpdateInternalIps => "Update internal IPs",
            Self::PushQuotas => "Push quotas",
            Self::PullSecurityGroups => "Pull security groups",
            Self::PullFloatingIps => "Pull floating IPs",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
