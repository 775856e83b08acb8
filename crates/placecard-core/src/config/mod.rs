//! Engine configuration.
//!
//! `EngineConfig` is read from a JSON file with every field optional, then
//! `PLACECARD_*` environment variables override individual values. Store
//! credentials are not part of this file; adapters read them from their own
//! environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::OperatorId;
use crate::retry::RetryPolicy;
use crate::sync::SyncConfig;
use crate::util::non_blank;
use crate::validate::ValidationRules;

pub const ENV_IDLE_TIMEOUT_SECS: &str = "PLACECARD_IDLE_TIMEOUT_SECS";
pub const ENV_REAPER_INTERVAL_SECS: &str = "PLACECARD_REAPER_INTERVAL_SECS";
pub const ENV_WATCHERS: &str = "PLACECARD_WATCHERS";
pub const ENV_COUNTRY_CODE: &str = "PLACECARD_COUNTRY_CODE";
pub const ENV_NOTIFICATION_TIMEOUT_MS: &str = "PLACECARD_NOTIFICATION_TIMEOUT_MS";

/// Runtime settings for the editing engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Sessions without operator input for this long are cancelled.
    pub idle_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    pub sync_retry: RetryPolicy,
    pub upload_retry: RetryPolicy,
    pub max_merge_rounds: u32,
    pub notification_timeout_ms: u64,
    /// Operators who receive a summary of every committed change.
    pub watchers: Vec<OperatorId>,
    pub validation: ValidationRules,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 900,
            reaper_interval_secs: 60,
            sync_retry: RetryPolicy::default(),
            upload_retry: RetryPolicy::default(),
            max_merge_rounds: 3,
            notification_timeout_ms: 5_000,
            watchers: Vec::new(),
            validation: ValidationRules::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::Config(format!("Failed to parse config at {}: {error}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, then apply overrides from the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_path(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PLACECARD_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| non_blank(lookup(key));

        if let Some(value) = read(ENV_IDLE_TIMEOUT_SECS) {
            self.idle_timeout_secs = parse_number(ENV_IDLE_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = read(ENV_REAPER_INTERVAL_SECS) {
            self.reaper_interval_secs = parse_number(ENV_REAPER_INTERVAL_SECS, &value)?;
        }
        if let Some(value) = read(ENV_NOTIFICATION_TIMEOUT_MS) {
            self.notification_timeout_ms = parse_number(ENV_NOTIFICATION_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = read(ENV_COUNTRY_CODE) {
            self.validation.phone.default_country_code =
                value.trim_start_matches('+').to_string();
        }
        if let Some(value) = read(ENV_WATCHERS) {
            self.watchers = value
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| {
                    id.parse::<OperatorId>().map_err(|error| {
                        Error::Config(format!("{ENV_WATCHERS}: invalid operator id '{id}': {error}"))
                    })
                })
                .collect::<Result<_>>()?;
        }

        self.validate()
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_secs == 0 {
            return Err(Error::Config("idle_timeout_secs must be positive".to_string()));
        }
        if self.reaper_interval_secs == 0 {
            return Err(Error::Config(
                "reaper_interval_secs must be positive".to_string(),
            ));
        }
        if self.max_merge_rounds == 0 {
            return Err(Error::Config("max_merge_rounds must be positive".to_string()));
        }
        for (name, retry) in [("sync_retry", &self.sync_retry), ("upload_retry", &self.upload_retry)]
        {
            if retry.max_attempts == 0 {
                return Err(Error::Config(format!(
                    "{name}.max_attempts must be positive"
                )));
            }
        }

        let phone = &self.validation.phone;
        if phone.default_country_code.is_empty()
            || !phone
                .default_country_code
                .chars()
                .all(|ch| ch.is_ascii_digit())
        {
            return Err(Error::Config(format!(
                "default_country_code must be digits, got '{}'",
                phone.default_country_code
            )));
        }
        if phone.national_number_len == 0 {
            return Err(Error::Config(
                "national_number_len must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub const fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    #[must_use]
    pub const fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    #[must_use]
    pub const fn sync(&self) -> SyncConfig {
        SyncConfig {
            retry: self.sync_retry,
            max_merge_rounds: self.max_merge_rounds,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|error| Error::Config(format!("{key}: invalid value '{value}': {error}")))
}
