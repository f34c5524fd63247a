//! Worker configuration.
//!
//! Defaults match production; `from_env` overrides individual values from
//! `HARVESTRY_SYNC_*` variables.

use std::time::Duration;

use thiserror::Error;

use harvestry_sync::RetryPolicy;

pub const ENV_ENABLED: &str = "HARVESTRY_SYNC_ENABLED";
pub const ENV_INTERVAL_SECS: &str = "HARVESTRY_SYNC_INTERVAL_SECS";
pub const ENV_BATCH_SIZE: &str = "HARVESTRY_SYNC_BATCH_SIZE";
pub const ENV_MAX_CONCURRENT_LICENSES: &str = "HARVESTRY_SYNC_MAX_CONCURRENT_LICENSES";
pub const ENV_CLAIM_TIMEOUT_SECS: &str = "HARVESTRY_SYNC_CLAIM_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Sync worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// When false the loop keeps ticking but does no work.
    pub enabled: bool,
    /// How often to poll for due licenses
    pub interval: Duration,
    /// Maximum items fetched per license per tick
    pub batch_size: usize,
    /// Licenses processed in parallel within one tick
    pub max_concurrent_licenses: usize,
    /// Processing claims older than this are handed back to the queue
    pub claim_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            batch_size: 50,
            max_concurrent_licenses: 4,
            claim_timeout: Duration::from_secs(10 * 60),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_ENABLED) {
            config.enabled = parse_bool(ENV_ENABLED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_INTERVAL_SECS) {
            config.interval = Duration::from_secs(parse_positive(ENV_INTERVAL_SECS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            config.batch_size = parse_positive(ENV_BATCH_SIZE, &raw)? as usize;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_LICENSES) {
            config.max_concurrent_licenses =
                parse_positive(ENV_MAX_CONCURRENT_LICENSES, &raw)? as usize;
        }
        if let Some(raw) = lookup(ENV_CLAIM_TIMEOUT_SECS) {
            config.claim_timeout = Duration::from_secs(parse_positive(ENV_CLAIM_TIMEOUT_SECS, &raw)?);
        }

        Ok(config)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_concurrent_licenses(mut self, max: usize) -> Self {
        self.max_concurrent_licenses = max.max(1);
        self
    }

    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 50);
        assert!(config.enabled);
    }

    #[test]
    fn overrides_are_applied() {
        let config = WorkerConfig::from_lookup(lookup(&[
            (ENV_ENABLED, "false"),
            (ENV_INTERVAL_SECS, "5"),
            (ENV_BATCH_SIZE, " 10 "),
            (ENV_MAX_CONCURRENT_LICENSES, "2"),
            (ENV_CLAIM_TIMEOUT_SECS, "120"),
        ]))
        .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_concurrent_licenses, 2);
        assert_eq!(config.claim_timeout, Duration::from_secs(120));
    }

    #[test]
    fn malformed_and_zero_values_are_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[(ENV_BATCH_SIZE, "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: ENV_BATCH_SIZE,
                value: "lots".to_string()
            }
        );

        assert!(WorkerConfig::from_lookup(lookup(&[(ENV_INTERVAL_SECS, "0")])).is_err());
        assert!(WorkerConfig::from_lookup(lookup(&[(ENV_ENABLED, "maybe")])).is_err());
    }
}
