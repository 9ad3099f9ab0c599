//! Engine configuration.
//!
//! Provides `SyncConfig`, the knobs shared by the API and any embedding
//! client, plus the environment lookup helpers used to build it. Every knob
//! is range-checked so an operator cannot push the scheduler outside the
//! supported window.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::normalize_text_option;

pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 1_000;
pub const MIN_SYNC_INTERVAL_MS: u64 = 500;
pub const MAX_SYNC_INTERVAL_MS: u64 = 5_000;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MIN_MAX_RETRIES: u32 = 1;
pub const MAX_MAX_RETRIES: u32 = 10;

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const MAX_BATCH_SIZE: usize = 100;

pub const DEFAULT_APPLY_TIMEOUT_MS: u64 = 10_000;
pub const MIN_APPLY_TIMEOUT_MS: u64 = 100;
pub const MAX_APPLY_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::Error {
    fn from(value: ConfigError) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}

/// Runtime knobs of the synchronization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Period of the reconciliation timer
    #[serde(with = "duration_ms")]
    pub sync_interval: Duration,
    /// Failed attempts allowed before a record is rolled back
    pub max_retries: u32,
    /// Records dispatched concurrently per batch
    pub batch_size: usize,
    /// Upper bound on a single remote-apply call
    #[serde(with = "duration_ms")]
    pub apply_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_millis(DEFAULT_SYNC_INTERVAL_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: DEFAULT_BATCH_SIZE,
            apply_timeout: Duration::from_millis(DEFAULT_APPLY_TIMEOUT_MS),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let sync_interval_ms = parse_in_range(
            &lookup,
            "FORECOURT_SYNC_INTERVAL_MS",
            DEFAULT_SYNC_INTERVAL_MS,
            MIN_SYNC_INTERVAL_MS..=MAX_SYNC_INTERVAL_MS,
        )?;
        let max_retries = parse_in_range(
            &lookup,
            "FORECOURT_MAX_RETRIES",
            DEFAULT_MAX_RETRIES,
            MIN_MAX_RETRIES..=MAX_MAX_RETRIES,
        )?;
        let batch_size = parse_in_range(
            &lookup,
            "FORECOURT_BATCH_SIZE",
            DEFAULT_BATCH_SIZE,
            1..=MAX_BATCH_SIZE,
        )?;
        let apply_timeout_ms = parse_in_range(
            &lookup,
            "FORECOURT_APPLY_TIMEOUT_MS",
            DEFAULT_APPLY_TIMEOUT_MS,
            MIN_APPLY_TIMEOUT_MS..=MAX_APPLY_TIMEOUT_MS,
        )?;

        let config = Self {
            sync_interval: Duration::from_millis(sync_interval_ms),
            max_retries,
            batch_size,
            apply_timeout: Duration::from_millis(apply_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every knob against its supported range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_sync_interval(self.sync_interval)?;
        validate_max_retries(self.max_retries)?;
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ConfigError::Invalid(format!(
                "batch size must be in [1, {MAX_BATCH_SIZE}]"
            )));
        }
        let timeout_ms = crate::util::duration_millis(self.apply_timeout);
        if !(MIN_APPLY_TIMEOUT_MS..=MAX_APPLY_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(ConfigError::Invalid(format!(
                "apply timeout must be in [{MIN_APPLY_TIMEOUT_MS}, {MAX_APPLY_TIMEOUT_MS}] ms"
            )));
        }
        Ok(())
    }
}

pub fn validate_sync_interval(interval: Duration) -> Result<(), ConfigError> {
    let millis = crate::util::duration_millis(interval);
    if (MIN_SYNC_INTERVAL_MS..=MAX_SYNC_INTERVAL_MS).contains(&millis) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "sync interval must be in [{MIN_SYNC_INTERVAL_MS}, {MAX_SYNC_INTERVAL_MS}] ms, got {millis}"
        )))
    }
}

pub fn validate_max_retries(max_retries: u32) -> Result<(), ConfigError> {
    if (MIN_MAX_RETRIES..=MAX_MAX_RETRIES).contains(&max_retries) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "max retries must be in [{MIN_MAX_RETRIES}, {MAX_MAX_RETRIES}], got {max_retries}"
        )))
    }
}

fn parse_in_range<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    range: std::ops::RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<T>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )))
    }
}

pub fn value_or_default(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

pub fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

pub fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

/// Parse common boolean spellings (`1/0`, `true/false`, `yes/no`, `on/off`).
pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(crate::util::duration_millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
