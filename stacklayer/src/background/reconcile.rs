//! Periodic pull of backend state into the repository.
//!
//! For every healthy service settings entry, volumes, snapshots and
//! instances are listed once at the backend and matched by backend id
//! against rows in a stable state (OK or ERRED):
//!
//! - missing at the backend: row erred, "Does not exist at backend." noted
//! - present: allow-listed fields copied; an erred row recovers to OK
//!
//! A failed listing stops the pass for that entry and marks the entry
//! erred. Rows already processed keep their updates.

use crate::backend::{apply_record, BackendError, BackendRecord, SyncField};
use crate::events::ResourceEvent;
use crate::model::{
    ModelError, Resource, ResourceKind, ResourceState, ServiceSettings, SettingsState, Transition,
};
use crate::repository::{RepositoryError, ResourceFilter, ResourceRepository};
use crate::tasks::SharedEnv;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Note recorded on rows whose backend counterpart is gone.
pub const MISSING_AT_BACKEND: &str = "Does not exist at backend.";

/// Kinds pulled, in order.
const PULLED_KINDS: [ResourceKind; 3] = [
    ResourceKind::Volume,
    ResourceKind::Snapshot,
    ResourceKind::Instance,
];

const STABLE_STATES: [ResourceState; 2] = [ResourceState::Ok, ResourceState::Erred];

/// Outcome counters of a reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rows with at least one field copied from the backend.
    pub synced: usize,
    /// Rows newly erred as missing at the backend.
    pub missing: usize,
    pub recovered: usize,
    /// Settings entries whose pass failed.
    pub failed_settings: usize,
}

impl ReconcileReport {
    fn merge(&mut self, other: ReconcileReport) {
        self.synced += other.synced;
        self.missing += other.missing;
        self.recovered += other.recovered;
        self.failed_settings += other.failed_settings;
    }
}

/// Message after noting the row is missing; the note is never repeated.
fn missing_message(current: &str) -> String {
    if current.contains(MISSING_AT_BACKEND) {
        current.to_string()
    } else if current.is_empty() {
        MISSING_AT_BACKEND.to_string()
    } else {
        format!("{} ({})", current, MISSING_AT_BACKEND)
    }
}

/// Detects and repairs drift between the repository and the backend.
pub struct Reconciler {
    env: SharedEnv,
}

impl Reconciler {
    pub fn new(env: SharedEnv) -> Self {
        Self { env }
    }

    /// Runs one full pass over every healthy settings entry.
    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for settings in self.env.repository.list_settings() {
            if settings.state != SettingsState::Ok {
                continue;
            }
            report.merge(self.reconcile_settings(&settings).await);
        }
        info!(
            synced = report.synced,
            missing = report.missing,
            recovered = report.recovered,
            failed_settings = report.failed_settings,
            "Reconciliation pass complete"
        );
        report
    }

    /// Pulls one settings entry; a listing failure errs the entry.
    pub async fn reconcile_settings(&self, settings: &ServiceSettings) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for kind in PULLED_KINDS {
            match self.env.backend.list(settings.id, kind).await {
                Ok(records) => report.merge(self.reconcile_kind(settings, kind, records)),
                Err(e) => {
                    self.fail_settings(settings, &e);
                    report.failed_settings += 1;
                    break;
                }
            }
        }
        report
    }

    fn fail_settings(&self, settings: &ServiceSettings, err: &BackendError) {
        error!(
            settings_id = %settings.id,
            settings = %settings.name,
            error = %err,
            "Failed to pull resources for service settings"
        );
        let message = err.to_string();
        if let Err(e) = self
            .env
            .repository
            .modify_settings(settings.id, &mut |s| s.set_erred(message.clone()))
        {
            warn!(settings_id = %settings.id, error = %e, "Failed to err service settings");
        }
    }

    fn reconcile_kind(
        &self,
        settings: &ServiceSettings,
        kind: ResourceKind,
        records: Vec<BackendRecord>,
    ) -> ReconcileReport {
        let by_id: HashMap<String, BackendRecord> = records
            .into_iter()
            .map(|record| (record.backend_id.clone(), record))
            .collect();
        let rows = self.env.repository.find(
            &ResourceFilter::kind(kind)
                .in_states(&STABLE_STATES)
                .in_settings(settings.id),
        );
        debug!(
            settings_id = %settings.id,
            kind = %kind,
            rows = rows.len(),
            backend = by_id.len(),
            "Reconciling"
        );

        let mut report = ReconcileReport::default();
        for row in rows {
            match by_id.get(row.backend_id()).filter(|_| row.has_backend_id()) {
                None => {
                    if self.mark_missing(&row) {
                        report.missing += 1;
                    }
                }
                Some(record) => {
                    let (synced, recovered) = self.sync(&row, record);
                    report.synced += usize::from(synced);
                    report.recovered += usize::from(recovered);
                }
            }
        }
        report
    }

    /// Returns true if the row was newly erred. A row that left the stable
    /// states since it was listed is left to whatever moved it.
    fn mark_missing(&self, row: &Resource) -> bool {
        let mut was_erred = false;
        let mut previous_message = String::new();
        let result = self.env.repository.modify(row.id(), &mut |r| {
            r.expect_state(&STABLE_STATES)?;
            was_erred = r.state() == ResourceState::Erred;
            previous_message = r.error_message.clone();
            let message = missing_message(&r.error_message);
            r.set_erred(&message);
            r.runtime_state.clear();
            Ok(())
        });
        match result {
            Ok(updated) => {
                warn!(
                    resource_id = %row.id(),
                    kind = %row.kind(),
                    name = %row.name,
                    "Resource does not exist at backend"
                );
                if !was_erred || updated.error_message != previous_message {
                    self.env.events.emit(ResourceEvent::erred(&updated));
                }
                !was_erred
            }
            Err(RepositoryError::Model(ModelError::StateMoved(state))) => {
                debug!(resource_id = %row.id(), state = %state, "Row moved, not marking missing");
                false
            }
            Err(e) => {
                warn!(resource_id = %row.id(), error = %e, "Failed to mark missing resource");
                false
            }
        }
    }

    /// Copies allow-listed fields. Returns `(synced, recovered)`.
    fn sync(&self, row: &Resource, record: &BackendRecord) -> (bool, bool) {
        let fields = SyncField::allow_list(row.kind());
        let mut changed = false;
        let mut recovered = false;
        let result = self.env.repository.modify(row.id(), &mut |r| {
            r.expect_state(&STABLE_STATES)?;
            changed = apply_record(r, record, fields)?;
            recovered = false;
            if r.state() == ResourceState::Erred {
                r.transition(Transition::Recover)?;
                recovered = true;
            }
            Ok(())
        });

        match result {
            Ok(updated) => {
                if changed {
                    self.env.events.emit(ResourceEvent::synced(&updated));
                }
                if recovered {
                    info!(resource_id = %row.id(), kind = %row.kind(), "Resource recovered from backend");
                    self.env.events.emit(ResourceEvent::recovered(&updated));
                }
                (changed, recovered)
            }
            Err(RepositoryError::Model(ModelError::StateMoved(state))) => {
                debug!(resource_id = %row.id(), state = %state, "Row moved on, not syncing");
                (false, false)
            }
            Err(e) => {
                warn!(resource_id = %row.id(), error = %e, "Failed to pull resource");
                (false, false)
            }
        }
    }
}
