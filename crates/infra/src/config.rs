//! Control-plane configuration loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

use syncplane_events::ListenerKind;
use syncplane_scheduling::{BackoffConfig, RetryConfig};

use crate::persistence::SyncPersistenceConfig;

pub const STATE_LISTENER_ENV: &str = "SYNCPLANE_STATE_LISTENER";
pub const FLUSH_PERIOD_ENV: &str = "SYNCPLANE_PERSISTENCE_FLUSH_PERIOD_SECS";
pub const FLUSH_TERMINATION_TIMEOUT_ENV: &str =
    "SYNCPLANE_PERSISTENCE_FLUSH_TERMINATION_TIMEOUT_SECS";
pub const FINAL_FLUSH_ATTEMPTS_ENV: &str = "SYNCPLANE_PERSISTENCE_FINAL_FLUSH_ATTEMPTS";
pub const SUCCESSIVE_COMPLETE_LIMIT_ENV: &str =
    "SYNCPLANE_RETRIES_SUCCESSIVE_COMPLETE_FAILURE_LIMIT";
pub const TOTAL_COMPLETE_LIMIT_ENV: &str = "SYNCPLANE_RETRIES_TOTAL_COMPLETE_FAILURE_LIMIT";
pub const SUCCESSIVE_PARTIAL_LIMIT_ENV: &str = "SYNCPLANE_RETRIES_SUCCESSIVE_PARTIAL_FAILURE_LIMIT";
pub const TOTAL_PARTIAL_LIMIT_ENV: &str = "SYNCPLANE_RETRIES_TOTAL_PARTIAL_FAILURE_LIMIT";
pub const COMPLETE_BACKOFF_MIN_ENV: &str = "SYNCPLANE_RETRIES_COMPLETE_BACKOFF_MIN_SECS";
pub const COMPLETE_BACKOFF_MAX_ENV: &str = "SYNCPLANE_RETRIES_COMPLETE_BACKOFF_MAX_SECS";
pub const COMPLETE_BACKOFF_BASE_ENV: &str = "SYNCPLANE_RETRIES_COMPLETE_BACKOFF_BASE";

/// Everything the control plane reads at startup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub listener: ListenerKind,
    pub persistence: SyncPersistenceConfig,
    pub retries: RetryConfig,
}

impl ControlPlaneConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from `lookup`, falling back to defaults for
    /// every variable it does not return.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(STATE_LISTENER_ENV) {
            config.listener = raw
                .parse()
                .with_context(|| format!("invalid {STATE_LISTENER_ENV}"))?;
        }

        let persistence = &mut config.persistence;
        if let Some(secs) = parse_var::<u64>(&lookup, FLUSH_PERIOD_ENV)? {
            if secs == 0 {
                return Err(anyhow!("{FLUSH_PERIOD_ENV} must be positive"));
            }
            persistence.flush_period = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, FLUSH_TERMINATION_TIMEOUT_ENV)? {
            persistence.termination_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, FINAL_FLUSH_ATTEMPTS_ENV)? {
            if attempts == 0 {
                return Err(anyhow!("{FINAL_FLUSH_ATTEMPTS_ENV} must be at least 1"));
            }
            persistence.final_flush_attempts = attempts;
        }

        let limits = &mut config.retries.limits;
        for (name, slot) in [
            (SUCCESSIVE_COMPLETE_LIMIT_ENV, &mut limits.successive_complete_failures),
            (TOTAL_COMPLETE_LIMIT_ENV, &mut limits.total_complete_failures),
            (SUCCESSIVE_PARTIAL_LIMIT_ENV, &mut limits.successive_partial_failures),
            (TOTAL_PARTIAL_LIMIT_ENV, &mut limits.total_partial_failures),
        ] {
            if let Some(limit) = parse_var::<u32>(&lookup, name)? {
                *slot = limit;
            }
        }

        let defaults = config.retries.complete_failure_backoff.unwrap_or(BackoffConfig {
            min_secs: 10,
            max_secs: 1_800,
            base: 3,
        });
        let backoff = BackoffConfig {
            min_secs: parse_var(&lookup, COMPLETE_BACKOFF_MIN_ENV)?.unwrap_or(defaults.min_secs),
            max_secs: parse_var(&lookup, COMPLETE_BACKOFF_MAX_ENV)?.unwrap_or(defaults.max_secs),
            base: parse_var(&lookup, COMPLETE_BACKOFF_BASE_ENV)?.unwrap_or(defaults.base),
        };
        backoff.build().with_context(|| {
            format!(
                "invalid complete-failure backoff ({COMPLETE_BACKOFF_MIN_ENV}, \
                 {COMPLETE_BACKOFF_MAX_ENV}, {COMPLETE_BACKOFF_BASE_ENV})"
            )
        })?;
        config.retries.complete_failure_backoff = Some(backoff);

        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid {name}: '{raw}'"))
        })
        .transpose()
}
