//! Orchestrator error types.

use crate::model::{QuotaName, ResourceId, ResourceKind, ResourceState};
use crate::repository::RepositoryError;
use thiserror::Error;

/// Synchronous rejection of an operation. No chain was submitted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The resource is not in a state the operation can start from.
    #[error("Cannot {operation} resource {resource} in state {state}")]
    IllegalTransition {
        resource: ResourceId,
        operation: &'static str,
        state: ResourceState,
    },

    /// Other resources block the operation.
    #[error("{0}")]
    DependentResources(String),

    #[error("Nothing to restore: {0}")]
    NothingToRestore(String),

    #[error("Quota {name} exceeded: usage {usage} + {requested} > limit {limit}")]
    Quota {
        name: QuotaName,
        usage: u64,
        requested: u64,
        limit: u64,
    },

    /// Parameters that cannot be applied to the resource.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Repository(RepositoryError),

    /// The executor is no longer accepting jobs.
    #[error("Scheduler is not accepting new chains")]
    SchedulerUnavailable,

    #[error("Operation {operation} is not supported for {kind}")]
    Unsupported {
        kind: ResourceKind,
        operation: &'static str,
    },
}

impl From<RepositoryError> for OrchestratorError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::QuotaExceeded {
                name,
                usage,
                requested,
                limit,
            } => Self::Quota {
                name,
                usage,
                requested,
                limit,
            },
            other => Self::Repository(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_errors_keep_their_numbers() {
        let err: OrchestratorError = RepositoryError::QuotaExceeded {
            name: QuotaName::Storage,
            usage: 90,
            requested: 20,
            limit: 100,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Quota storage exceeded: usage 90 + 20 > limit 100"
        );
    }

    #[test]
    fn test_other_repository_errors_pass_through() {
        let err: OrchestratorError = RepositoryError::NotFound(ResourceId(3)).into();
        assert_eq!(err, OrchestratorError::Repository(RepositoryError::NotFound(ResourceId(3))));
    }
}
