//! Provisioning throttle.
//!
//! A throttled create first counts the resources of the same kind that are
//! already `Creating` in the same service settings. At or above the limit
//! the task asks for a retry instead of starting; the count and the
//! `begin_creating` transition that follows run under one gate so two tasks
//! cannot both take the last slot.

use super::TaskEnv;
use crate::executor::TaskError;
use crate::model::{Resource, ResourceKind, ResourceState};
use crate::repository::ResourceFilter;
use std::collections::HashMap;
use tracing::debug;

/// Concurrent-create limits per resource kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisionLimits {
    /// Limit for kinds without their own entry; `None` is unlimited.
    pub default_limit: Option<usize>,
    pub per_kind: HashMap<ResourceKind, usize>,
}

impl ProvisionLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, limit: usize) -> Self {
        self.default_limit = Some(limit);
        self
    }

    pub fn with_limit(mut self, kind: ResourceKind, limit: usize) -> Self {
        self.per_kind.insert(kind, limit);
        self
    }

    pub fn limit_for(&self, kind: ResourceKind) -> Option<usize> {
        self.per_kind.get(&kind).copied().or(self.default_limit)
    }
}

impl From<&crate::config::ThrottleSettings> for ProvisionLimits {
    fn from(settings: &crate::config::ThrottleSettings) -> Self {
        Self {
            default_limit: (settings.default_limit > 0).then_some(settings.default_limit),
            per_kind: settings
                .per_kind
                .iter()
                .map(|(kind, limit)| (*kind, *limit))
                .collect(),
        }
    }
}

/// Returns a retry reason when `resource`'s kind has no free slot.
pub(crate) fn check_capacity(env: &TaskEnv, resource: &Resource) -> Option<TaskError> {
    let limit = env.limits.limit_for(resource.kind())?;

    let in_progress = env
        .repository
        .find(
            &ResourceFilter::kind(resource.kind())
                .in_states(&[ResourceState::Creating])
                .in_settings(resource.settings()),
        )
        .len();

    if in_progress < limit {
        return None;
    }

    debug!(
        resource_id = %resource.id(),
        kind = %resource.kind(),
        in_progress,
        limit,
        "Provisioning limit reached, waiting"
    );
    Some(TaskError::new(format!(
        "{} provisioning limit reached ({} of {} in progress)",
        resource.kind(),
        in_progress,
        limit
    )))
}
