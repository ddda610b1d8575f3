//! Resource lifecycle state machine.
//!
//! Every managed resource moves through the same lifecycle. The only way to
//! change [`ResourceState`] is to apply a named [`Transition`]; illegal
//! requests are rejected with [`ModelError::IllegalTransition`] so callers
//! can refuse an operation before any asynchronous work begins.
//!
//! ```text
//!  CreationScheduled ──begin_creating──► Creating ──set_ok──► Ok
//!                                                              │ ▲
//!                             schedule_updating ◄──────────────┘ │
//!  UpdateScheduled ──begin_updating──► Updating ──set_ok─────────┘
//!  Ok | Erred ──schedule_deleting──► DeletionScheduled ──begin_deleting──► Deleting
//!  * ──set_erred──► Erred ──recover──► Ok
//! ```

use super::ModelError;
use std::fmt;

/// Lifecycle state of a resource.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ResourceState {
    CreationScheduled,
    Creating,
    UpdateScheduled,
    Updating,
    DeletionScheduled,
    Deleting,
    Ok,
    Erred,
}

impl ResourceState {
    /// Stable states are not mid-transition: OK or ERRED.
    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Ok | Self::Erred)
    }

    /// Returns true while a chain is working on the resource.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Creating | Self::Updating | Self::Deleting)
    }

    /// Returns the upper-case label used in logs and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreationScheduled => "CREATION_SCHEDULED",
            Self::Creating => "CREATING",
            Self::UpdateScheduled => "UPDATE_SCHEDULED",
            Self::Updating => "UPDATING",
            Self::DeletionScheduled => "DELETION_SCHEDULED",
            Self::Deleting => "DELETING",
            Self::Ok => "OK",
            Self::Erred => "ERRED",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named move along the lifecycle.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Transition {
    BeginCreating,
    ScheduleUpdating,
    BeginUpdating,
    ScheduleDeleting,
    BeginDeleting,
    SetOk,
    SetErred,
    Recover,
}

impl Transition {
    /// Returns the target state if the transition is legal from `from`.
    pub fn apply(self, from: ResourceState) -> Result<ResourceState, ModelError> {
        use ResourceState as S;

        let target = match (self, from) {
            (Self::BeginCreating, S::CreationScheduled) => S::Creating,
            (Self::ScheduleUpdating, S::Ok) => S::UpdateScheduled,
            (Self::BeginUpdating, S::UpdateScheduled) => S::Updating,
            (Self::ScheduleDeleting, S::Ok | S::Erred) => S::DeletionScheduled,
            (Self::BeginDeleting, S::DeletionScheduled) => S::Deleting,
            (Self::SetOk, S::Creating | S::Updating) => S::Ok,
            (Self::SetErred, _) => S::Erred,
            (Self::Recover, S::Erred) => S::Ok,
            _ => {
                return Err(ModelError::IllegalTransition {
                    transition: self,
                    from,
                })
            }
        };
        Ok(target)
    }

    /// Returns the snake-case transition name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeginCreating => "begin_creating",
            Self::ScheduleUpdating => "schedule_updating",
            Self::BeginUpdating => "begin_updating",
            Self::ScheduleDeleting => "schedule_deleting",
            Self::BeginDeleting => "begin_deleting",
            Self::SetOk => "set_ok",
            Self::SetErred => "set_erred",
            Self::Recover => "recover",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
