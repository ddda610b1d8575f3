//! Service settings: one configured connection to a cloud.

use super::quota::{QuotaName, QuotaUsage};
use super::resource::SettingsId;
use std::collections::BTreeMap;

/// Health of a service settings entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsState {
    Ok,
    Erred,
}

/// A cloud connection and the quotas scoped to it.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceSettings {
    pub id: SettingsId,
    pub name: String,
    pub state: SettingsState,
    pub error_message: String,
    /// External network to connect new tenants to.
    pub external_network_id: Option<String>,
    pub quotas: BTreeMap<QuotaName, QuotaUsage>,
}

impl ServiceSettings {
    pub fn new(id: SettingsId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: SettingsState::Ok,
            error_message: String::new(),
            external_network_id: None,
            quotas: BTreeMap::new(),
        }
    }

    pub fn quota(&self, name: QuotaName) -> QuotaUsage {
        self.quotas.get(&name).copied().unwrap_or_default()
    }

    pub fn set_erred(&mut self, message: impl Into<String>) {
        self.state = SettingsState::Erred;
        self.error_message = message.into();
    }

    pub fn recover(&mut self) {
        self.state = SettingsState::Ok;
        self.error_message.clear();
    }
}
