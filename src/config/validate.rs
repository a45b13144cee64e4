// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, RawConfigFile, RawThoriumSection, ThoriumSection};
use crate::errors::{Result, StateError};
use crate::low::RequisiteKind;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = StateError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_disabled_requisites(&raw)?;
        let thorium = validate_thorium(&raw.thorium)?;
        Ok(ConfigFile::new_unchecked(raw.state, thorium))
    }
}

fn validate_disabled_requisites(cfg: &RawConfigFile) -> Result<()> {
    for name in &cfg.state.disabled_requisites {
        if RequisiteKind::parse(name).is_none() {
            return Err(StateError::Config(format!(
                "[state].disabled_requisites: unknown requisite '{name}'"
            )));
        }
    }
    Ok(())
}

fn validate_thorium(raw: &RawThoriumSection) -> Result<ThoriumSection> {
    let defaults = ThoriumSection::default();
    let section = ThoriumSection {
        interval: duration_or(&raw.interval, "interval", defaults.interval)?,
        event_wait: duration_or(&raw.event_wait, "event_wait", defaults.event_wait)?,
        recompile: duration_or(&raw.recompile, "recompile", defaults.recompile)?,
    };

    if section.interval.is_zero() {
        return Err(StateError::Config(
            "[thorium].interval must be greater than zero".to_string(),
        ));
    }
    Ok(section)
}

fn duration_or(value: &Option<String>, key: &str, default: Duration) -> Result<Duration> {
    match value {
        Some(s) => parse_duration(s)
            .map_err(|e| StateError::Config(format!("[thorium].{key}: {e}"))),
        None => Ok(default),
    }
}

/// Parse durations like `"500ms"`, `"1s"`, `"5m"` or `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}
