use std::time::Duration;

use tracing::debug;
use unitflow_core::DelayPolicy;

use crate::error::ConfigError;

pub const DB_URL_VAR: &str = "UNITFLOW_DB_URL";
pub const FEEDBACK_DELAY_VAR: &str = "UNITFLOW_FEEDBACK_DELAY_MS";
pub const SUCCESS_DELAY_VAR: &str = "UNITFLOW_SUCCESS_DELAY_MS";
pub const CELEBRATE_DELAY_VAR: &str = "UNITFLOW_CELEBRATE_DELAY_MS";

pub const DEFAULT_DB_URL: &str = "sqlite://unitflow.sqlite3";

/// Runtime settings for the flow engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub database_url: String,
    pub delays: DelayPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DB_URL.to_owned(),
            delays: DelayPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Read overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a set variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read overrides through `lookup`; unset variables keep their defaults.
    ///
    /// The jump delay follows the feedback delay.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a set variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(DB_URL_VAR) {
            if url.trim().is_empty() {
                return Err(ConfigError::Empty { var: DB_URL_VAR });
            }
            config.database_url = url.trim().to_owned();
        }
        if let Some(delay) = millis(&lookup, FEEDBACK_DELAY_VAR)? {
            config.delays.feedback = delay;
            config.delays.jump = delay;
        }
        if let Some(delay) = millis(&lookup, SUCCESS_DELAY_VAR)? {
            config.delays.success = delay;
        }
        if let Some(delay) = millis(&lookup, CELEBRATE_DELAY_VAR)? {
            config.delays.celebrate = delay;
        }

        debug!(database_url = %config.database_url, delays = ?config.delays, "engine config loaded");
        Ok(config)
    }
}

fn millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidMillis { var, raw })
        })
        .transpose()
}
