//! Engine configuration, read from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LOCK_TIMEOUT_MS_VAR: &str = "STOCKLEDGER_LOCK_TIMEOUT_MS";
pub const LOCK_RETRIES_VAR: &str = "STOCKLEDGER_LOCK_RETRIES";
pub const ALERTS_ENABLED_VAR: &str = "STOCKLEDGER_ALERTS_ENABLED";
pub const HISTORY_LIMIT_VAR: &str = "STOCKLEDGER_HISTORY_LIMIT";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Longest wait for one row lock before a batch fails with `LockTimeout`.
    pub lock_timeout_ms: u64,
    /// Automatic retries of a document transition after `LockTimeout`.
    pub lock_retries: u32,
    /// Publish low-stock / depletion alerts after committed batches.
    pub alerts_enabled: bool,
    /// Cap on rows returned by ledger history queries.
    pub history_limit: usize,
    /// Only read by the Postgres backend.
    pub database_url: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            lock_retries: 1,
            alerts_enabled: true,
            history_limit: 500,
            database_url: None,
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by any `STOCKLEDGER_*` / `DATABASE_URL` variable that is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`LedgerConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = lookup(LOCK_TIMEOUT_MS_VAR) {
            config.lock_timeout_ms = parse(LOCK_TIMEOUT_MS_VAR, &v)?;
        }
        if let Some(v) = lookup(LOCK_RETRIES_VAR) {
            config.lock_retries = parse(LOCK_RETRIES_VAR, &v)?;
        }
        if let Some(v) = lookup(ALERTS_ENABLED_VAR) {
            config.alerts_enabled = parse(ALERTS_ENABLED_VAR, &v)?;
        }
        if let Some(v) = lookup(HISTORY_LIMIT_VAR) {
            config.history_limit = parse(HISTORY_LIMIT_VAR, &v)?;
        }
        config.database_url = lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty());
        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_lock_retries(mut self, retries: u32) -> Self {
        self.lock_retries = retries;
        self
    }

    pub fn with_alerts(mut self, enabled: bool) -> Self {
        self.alerts_enabled = enabled;
        self
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = LedgerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.lock_timeout(), Duration::from_secs(2));
        assert_eq!(config.lock_retries, 1);
        assert_eq!(config.history_limit, 500);
    }

    #[test]
    fn variables_override_defaults() {
        let config = LedgerConfig::from_lookup(lookup(&[
            (LOCK_TIMEOUT_MS_VAR, "150"),
            (LOCK_RETRIES_VAR, "3"),
            (ALERTS_ENABLED_VAR, "false"),
            (HISTORY_LIMIT_VAR, "20"),
            (DATABASE_URL_VAR, "postgres://localhost/stock"),
        ]))
        .unwrap();
        assert_eq!(config.lock_timeout_ms, 150);
        assert_eq!(config.lock_retries, 3);
        assert!(!config.alerts_enabled);
        assert_eq!(config.history_limit, 20);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/stock")
        );
    }

    #[test]
    fn unparseable_value_names_the_variable() {
        let err = LedgerConfig::from_lookup(lookup(&[(LOCK_TIMEOUT_MS_VAR, "soon")])).unwrap_err();
        assert!(err.to_string().contains(LOCK_TIMEOUT_MS_VAR));
    }
}
