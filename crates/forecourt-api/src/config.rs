use std::collections::HashMap;
use std::env;
use std::fmt;

use forecourt_core::config::{
    optional_trimmed, parse_bool_flag, required_trimmed, value_or_default, ConfigError,
};
use forecourt_core::util::is_http_url;
use forecourt_core::SyncConfig;

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub apply_url: String,
    pub apply_token: Option<String>,
    pub scheduler_autostart: bool,
    pub sync: SyncConfig,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("apply_url", &self.apply_url)
            .field(
                "apply_token",
                &self.apply_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scheduler_autostart", &self.scheduler_autostart)
            .field("sync", &self.sync)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "FORECOURT_API_BIND_ADDR", "127.0.0.1:8080");

        let apply_url = required_trimmed(&lookup, "FORECOURT_APPLY_URL")?;
        if !is_http_url(&apply_url) {
            return Err(ConfigError::Invalid(
                "FORECOURT_APPLY_URL must start with http:// or https://".to_string(),
            ));
        }
        let apply_token = optional_trimmed(&lookup, "FORECOURT_APPLY_TOKEN");

        let scheduler_autostart = match optional_trimmed(&lookup, "FORECOURT_SCHEDULER_AUTOSTART")
        {
            Some(raw) => parse_bool_flag(&raw).ok_or_else(|| {
                ConfigError::Invalid(
                    "FORECOURT_SCHEDULER_AUTOSTART must be true or false".to_string(),
                )
            })?,
            None => true,
        };

        let sync = SyncConfig::from_lookup(&lookup)?;

        Ok(Self {
            bind_addr,
            apply_url: apply_url.trim_end_matches('/').to_string(),
            apply_token,
            scheduler_autostart,
            sync,
        })
    }
}
