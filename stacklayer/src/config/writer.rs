//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;
use crate::model::ResourceKind;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let per_kind = ResourceKind::ALL
        .iter()
        .map(|kind| {
            let limit = config
                .throttle
                .per_kind
                .get(kind)
                .map(|l| l.to_string())
                .unwrap_or_default();
            format!("{} = {}", kind.as_str(), limit)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"[executor]
; Chain executor settings.
; Maximum concurrent tasks across all chains (default: 128)
max_concurrent_tasks = {}
; Queue capacity for submitted chains (default: 256)
job_channel_capacity = {}
; Concurrent backend calls (default: 32)
backend_concurrent = {}
; Concurrent repository-only tasks (default: 64)
repository_concurrent = {}

[throttle]
; Maximum resources of one type in CREATING per service settings.
; 0 means unlimited (default: 0)
default_limit = {}
; Per-type limits; leave empty to use default_limit
{}

[poll]
; Backend runtime state polls (default: 300 tries, 5 seconds apart)
max_retries = {}
retry_delay_secs = {}
; Backend deletion checks (default: 60 tries, 5 seconds apart)
check_max_retries = {}
check_retry_delay_secs = {}
; Wait between throttled create attempts (default: 5)
throttle_retry_delay_secs = {}

[timings]
; Countdowns before the first poll after a backend call
volume_poll_countdown_secs = {}
snapshot_poll_countdown_secs = {}
floating_ip_poll_countdown_secs = {}
; Pause between volume completion and instance creation (default: 10)
instance_settle_secs = {}

[background]
; Pull of backend state into the repository (default: 3600)
reconcile_interval_secs = {}
; Backup and snapshot schedule check (default: 60)
schedule_interval_secs = {}
; Deletion of expired backups and snapshots (default: 3600)
expiry_interval_secs = {}
; Check for resources stuck in CREATING (default: 600)
stuck_interval_secs = {}
; Minutes before a CREATING resource is erred (default: 30)
stuck_timeout_mins = {}

[logging]
; Log file location (default: ~/.stacklayer/stacklayer.log)
file = {}
"#,
        config.executor.max_concurrent_tasks,
        config.executor.job_channel_capacity,
        config.executor.backend_concurrent,
        config.executor.repository_concurrent,
        config.throttle.default_limit,
        per_kind,
        config.poll.max_retries,
        config.poll.retry_delay_secs,
        config.poll.check_max_retries,
        config.poll.check_retry_delay_secs,
        config.poll.throttle_retry_delay_secs,
        config.timings.volume_poll_countdown_secs,
        config.timings.snapshot_poll_countdown_secs,
        config.timings.floating_ip_poll_countdown_secs,
        config.timings.instance_settle_secs,
        config.background.reconcile_interval_secs,
        config.background.schedule_interval_secs,
        config.background.expiry_interval_secs,
        config.background.stuck_interval_secs,
        config.background.stuck_timeout_mins,
        path_to_string(&config.logging.file),
    )
}

/// Convert a path to string, using ~ for home directory.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_written_file_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");

        let mut config = ConfigFile::default();
        config.executor.max_concurrent_tasks = 12;
        config.throttle.per_kind.insert(ResourceKind::Instance, 3);
        config.background.stuck_timeout_mins = 45;
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unset_kinds_written_empty() {
        let content = to_config_string(&ConfigFile::default());
        assert!(content.contains("\nsecurity_group = \n"));
        assert!(content.contains("[background]"));
    }

    #[test]
    fn test_home_paths_use_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(path_to_string(&home.join("a.log")), "~/a.log");
        }
        assert_eq!(path_to_string(Path::new("/tmp/a.log")), "/tmp/a.log");
    }
}
