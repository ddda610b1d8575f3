//! Data model for managed cloud resources.
//!
//! Resources, their lifecycle state machine, quota consumption, backup and
//! snapshot schedules, and the service settings (connections) they live in.
//! The repository owns persistence; everything here is plain data plus the
//! rules that keep it consistent.

mod quota;
mod resource;
mod schedule;
mod settings;
mod state;

pub use quota::{consumption, consumption_delta, QuotaName, QuotaUsage};
pub use resource::{
    BackupDetails, FloatingIpDetails, InstanceDetails, NetworkDetails, NewResource, Resource,
    ResourceDetails, ResourceId, ResourceKind, SecurityGroupDetails, SettingsId,
    SnapshotDetails, SubnetDetails, TenantDetails, VolumeDetails, DEFAULT_ERROR_MESSAGE,
};
pub use schedule::{NewSchedule, Schedule, ScheduleId, ScheduleTarget};
pub use settings::{ServiceSettings, SettingsState};
pub use state::{ResourceState, Transition};

use thiserror::Error;

/// Errors raised when a change would break a model invariant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// The requested transition is not legal from the current state.
    #[error("Cannot {transition} resource in state {from}")]
    IllegalTransition {
        transition: Transition,
        from: ResourceState,
    },

    /// The backend identifier has already been assigned.
    #[error("Backend id already assigned ({existing}), refusing to replace with {requested}")]
    BackendIdAlreadyAssigned { existing: String, requested: String },

    /// The row left the states a write was planned for.
    #[error("Resource moved to state {0}")]
    StateMoved(ResourceState),
}
