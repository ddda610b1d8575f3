//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::{Ini, Properties};
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::model::ResourceKind;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [executor] section
    if let Some(section) = ini.section(Some("executor")) {
        let executor = &mut config.executor;
        overlay_positive(section, "executor", "max_concurrent_tasks", &mut executor.max_concurrent_tasks)?;
        overlay_positive(section, "executor", "job_channel_capacity", &mut executor.job_channel_capacity)?;
        overlay_positive(section, "executor", "backend_concurrent", &mut executor.backend_concurrent)?;
        overlay_positive(section, "executor", "repository_concurrent", &mut executor.repository_concurrent)?;
    }

    // [throttle] section
    if let Some(section) = ini.section(Some("throttle")) {
        overlay(section, "throttle", "default_limit", &mut config.throttle.default_limit)?;
        for kind in ResourceKind::ALL {
            let key = kind.as_str();
            let Some(v) = section.get(key) else {
                continue;
            };
            if v.trim().is_empty() {
                continue;
            }
            let limit = parse_number(v, "throttle", key)?;
            config.throttle.per_kind.insert(kind, limit);
        }
    }

    // [poll] section
    if let Some(section) = ini.section(Some("poll")) {
        let poll = &mut config.poll;
        overlay(section, "poll", "max_retries", &mut poll.max_retries)?;
        overlay(section, "poll", "retry_delay_secs", &mut poll.retry_delay_secs)?;
        overlay(section, "poll", "check_max_retries", &mut poll.check_max_retries)?;
        overlay(section, "poll", "check_retry_delay_secs", &mut poll.check_retry_delay_secs)?;
        overlay(section, "poll", "throttle_retry_delay_secs", &mut poll.throttle_retry_delay_secs)?;
    }

    // [timings] section
    if let Some(section) = ini.section(Some("timings")) {
        let timings = &mut config.timings;
        overlay(section, "timings", "volume_poll_countdown_secs", &mut timings.volume_poll_countdown_secs)?;
        overlay(section, "timings", "snapshot_poll_countdown_secs", &mut timings.snapshot_poll_countdown_secs)?;
        overlay(section, "timings", "instance_settle_secs", &mut timings.instance_settle_secs)?;
        overlay(section, "timings", "floating_ip_poll_countdown_secs", &mut timings.floating_ip_poll_countdown_secs)?;
    }

    // [background] section
    if let Some(section) = ini.section(Some("background")) {
        let background = &mut config.background;
        overlay_positive(section, "background", "reconcile_interval_secs", &mut background.reconcile_interval_secs)?;
        overlay_positive(section, "background", "schedule_interval_secs", &mut background.schedule_interval_secs)?;
        overlay_positive(section, "background", "expiry_interval_secs", &mut background.expiry_interval_secs)?;
        overlay_positive(section, "background", "stuck_interval_secs", &mut background.stuck_interval_secs)?;
        overlay_positive(section, "background", "stuck_timeout_mins", &mut background.stuck_timeout_mins)?;
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = expand_tilde(v);
            }
        }
    }

    Ok(config)
}

fn parse_number<T: FromStr>(value: &str, section: &str, key: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be a non-negative integer".to_string(),
        })
}

/// Replaces `target` when the key is present and non-empty.
fn overlay<T: FromStr>(
    section: &Properties,
    name: &str,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigFileError> {
    if let Some(v) = section.get(key) {
        if !v.trim().is_empty() {
            *target = parse_number(v, name, key)?;
        }
    }
    Ok(())
}

/// Like [`overlay`], rejecting zero.
fn overlay_positive<T>(
    section: &Properties,
    name: &str,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigFileError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(v) = section.get(key) else {
        return Ok(());
    };
    if v.trim().is_empty() {
        return Ok(());
    }
    let value: T = parse_number(v, name, key)?;
    if value == T::default() {
        return Err(ConfigFileError::InvalidValue {
            section: name.to_string(),
            key: key.to_string(),
            value: v.to_string(),
            reason: "must be a positive integer".to_string(),
        });
    }
    *target = value;
    Ok(())
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
