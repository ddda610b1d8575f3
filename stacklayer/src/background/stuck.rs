//! Sweeper for resources stuck in CREATING.

use crate::events::ResourceEvent;
use crate::model::{ModelError, Resource, ResourceKind, ResourceState};
use crate::repository::{RepositoryError, ResourceFilter};
use crate::tasks::SharedEnv;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

pub const PROVISIONING_TIMED_OUT: &str = "Provisioning is timed out.";

const SWEPT_KINDS: [ResourceKind; 3] = [
    ResourceKind::Instance,
    ResourceKind::Volume,
    ResourceKind::Snapshot,
];

/// Errs resources whose creation has not finished within `timeout`.
pub struct StuckResourceSweeper {
    env: SharedEnv,
    timeout: Duration,
}

impl StuckResourceSweeper {
    pub fn new(env: SharedEnv, timeout: Duration) -> Self {
        Self { env, timeout }
    }

    /// Returns the number of resources erred.
    pub fn run_once(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.timeout;
        let mut erred = 0;
        for kind in SWEPT_KINDS {
            let stuck = self
                .env
                .repository
                .find(&ResourceFilter::kind(kind).in_states(&[ResourceState::Creating]))
                .into_iter()
                .filter(|r| r.modified() < cutoff);

            for resource in stuck {
                if self.time_out(&resource) {
                    erred += 1;
                }
            }
        }
        erred
    }

    /// Errs one listed resource if it is still creating. Returns true if
    /// it was erred.
    fn time_out(&self, resource: &Resource) -> bool {
        let result = self.env.repository.modify(resource.id(), &mut |r| {
            r.expect_state(&[ResourceState::Creating])?;
            r.set_erred(PROVISIONING_TIMED_OUT);
            Ok(())
        });
        match result {
            Ok(updated) => {
                warn!(
                    resource_id = %resource.id(),
                    kind = %resource.kind(),
                    name = %resource.name,
                    since = %resource.modified(),
                    "Provisioning timed out"
                );
                self.env.events.emit(ResourceEvent::erred(&updated));
                true
            }
            Err(RepositoryError::Model(ModelError::StateMoved(state))) => {
                debug!(resource_id = %resource.id(), state = %state, "Row left CREATING");
                false
            }
            Err(e) => {
                warn!(resource_id = %resource.id(), error = %e, "Failed to err stuck resource");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::events::RecordingEventSink;
    use crate::model::{NewResource, ResourceDetails, Transition, VolumeDetails};
    use crate::repository::{InMemoryRepository, ResourceRepository};
    use crate::tasks::TaskEnv;
    use std::sync::Arc;

    fn creating_volume(repository: &InMemoryRepository, name: &str) -> Resource {
        let settings = repository.insert_settings("cloud");
        let volume = repository
            .insert(NewResource::new(
                name,
                settings.id,
                ResourceDetails::Volume(VolumeDetails {
                    size: 1,
                    ..Default::default()
                }),
            ))
            .unwrap();
        repository
            .transition(volume.id(), Transition::BeginCreating)
            .unwrap()
            .1
    }

    #[test]
    fn test_old_creating_resources_are_erred() {
        let repository = Arc::new(InMemoryRepository::new());
        let events = Arc::new(RecordingEventSink::new());
        let env = Arc::new(TaskEnv::new(
            repository.clone(),
            Arc::new(SimulatedBackend::new()),
            events.clone(),
        ));
        let now = Utc::now();
        let stale = creating_volume(&repository, "stale");
        let recent = creating_volume(&repository, "recent");
        repository
            .backdate(stale.id(), now - Duration::minutes(31))
            .unwrap();

        let sweeper = StuckResourceSweeper::new(env, Duration::minutes(30));
        assert_eq!(sweeper.run_once(now), 1);

        let stale = repository.get(stale.id()).unwrap();
        assert_eq!(stale.state(), ResourceState::Erred);
        assert_eq!(stale.error_message, PROVISIONING_TIMED_OUT);
        assert_eq!(repository.get(recent.id()).unwrap().state(), ResourceState::Creating);
        assert_eq!(events.events_for(stale.id()).len(), 1);
    }

    #[test]
    fn test_resource_finished_since_listing_is_kept() {
        let repository = Arc::new(InMemoryRepository::new());
        let events = Arc::new(RecordingEventSink::new());
        let env = Arc::new(TaskEnv::new(
            repository.clone(),
            Arc::new(SimulatedBackend::new()),
            events.clone(),
        ));
        let listed = creating_volume(&repository, "slow");
        repository.transition(listed.id(), Transition::SetOk).unwrap();

        let sweeper = StuckResourceSweeper::new(env, Duration::minutes(30));
        assert!(!sweeper.time_out(&listed));

        let stored = repository.get(listed.id()).unwrap();
        assert_eq!(stored.state(), ResourceState::Ok);
        assert!(stored.error_message.is_empty());
        assert!(events.events_for(listed.id()).is_empty());
    }
}
