//! Failure classification, retry limits and backoff selection.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use syncplane_core::CoreResult;

use crate::backoff::{BackoffConfig, BackoffPolicy};

/// Class of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The attempt made no forward progress.
    Complete,
    /// The attempt committed some progress before failing.
    Partial,
}

impl FailureClass {
    pub fn from_progress(made_progress: bool) -> Self {
        if made_progress {
            FailureClass::Partial
        } else {
            FailureClass::Complete
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Complete => "complete",
            FailureClass::Partial => "partial",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure counters of one job lineage.
///
/// Persisted between attempts so a restarted supervisor keeps counting where
/// the previous one stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryState {
    pub successive_complete_failures: u32,
    pub total_complete_failures: u32,
    pub successive_partial_failures: u32,
    pub total_partial_failures: u32,
}

/// Upper bounds of the four counters. A counter at its limit stops retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryLimits {
    pub successive_complete_failures: u32,
    pub total_complete_failures: u32,
    pub successive_partial_failures: u32,
    pub total_partial_failures: u32,
}

impl RetryLimits {
    pub const UNBOUNDED: RetryLimits = RetryLimits {
        successive_complete_failures: u32::MAX,
        total_complete_failures: u32::MAX,
        successive_partial_failures: u32::MAX,
        total_partial_failures: u32::MAX,
    };
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

/// Deployment configuration of retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub limits: RetryLimits,
    pub complete_failure_backoff: Option<BackoffConfig>,
    pub partial_failure_backoff: Option<BackoffConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            limits: RetryLimits {
                successive_complete_failures: 5,
                total_complete_failures: 10,
                successive_partial_failures: 1_000,
                total_partial_failures: 20,
            },
            complete_failure_backoff: Some(BackoffConfig {
                min_secs: 10,
                max_secs: 1_800,
                base: 3,
            }),
            partial_failure_backoff: None,
        }
    }
}

/// Decides whether a failed job is retried and how long to wait first.
///
/// Two independent tracks are counted. A failure of one class increments that
/// class's successive and total counters and resets the *other* class's
/// successive counter: a partial failure breaks a streak of complete failures
/// and vice versa.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryManager {
    state: RetryState,
    limits: RetryLimits,
    complete_failure_backoff: Option<BackoffPolicy>,
    partial_failure_backoff: Option<BackoffPolicy>,
    last_failure: Option<FailureClass>,
}

impl RetryManager {
    /// Unbounded limits, no backoff.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RetryConfig) -> CoreResult<Self> {
        let complete = config
            .complete_failure_backoff
            .as_ref()
            .map(BackoffConfig::build)
            .transpose()?;
        let partial = config
            .partial_failure_backoff
            .as_ref()
            .map(BackoffConfig::build)
            .transpose()?;

        Ok(Self {
            limits: config.limits,
            complete_failure_backoff: complete,
            partial_failure_backoff: partial,
            ..Self::default()
        })
    }

    pub fn with_limits(mut self, limits: RetryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_complete_failure_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.complete_failure_backoff = Some(policy);
        self
    }

    pub fn with_partial_failure_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.partial_failure_backoff = Some(policy);
        self
    }

    /// Resume counting from previously persisted counters.
    pub fn with_state(mut self, state: RetryState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn limits(&self) -> RetryLimits {
        self.limits
    }

    /// Class of the most recent failure recorded by this instance.
    pub fn last_failure_class(&self) -> Option<FailureClass> {
        self.last_failure
    }

    /// Record the outcome of one failed attempt.
    pub fn record_failure(&mut self, partial: bool) {
        self.record(FailureClass::from_progress(partial));
    }

    pub fn record(&mut self, class: FailureClass) {
        let s = &mut self.state;
        match class {
            FailureClass::Complete => {
                s.successive_complete_failures = s.successive_complete_failures.saturating_add(1);
                s.total_complete_failures = s.total_complete_failures.saturating_add(1);
                s.successive_partial_failures = 0;
            }
            FailureClass::Partial => {
                s.successive_partial_failures = s.successive_partial_failures.saturating_add(1);
                s.total_partial_failures = s.total_partial_failures.saturating_add(1);
                s.successive_complete_failures = 0;
            }
        }
        self.last_failure = Some(class);

        debug!(failure_class = %class, retry_state = ?self.state, "recorded failed attempt");
    }

    /// True iff every counter is strictly below its limit.
    pub fn should_retry(&self) -> bool {
        let s = &self.state;
        let l = &self.limits;
        s.successive_complete_failures < l.successive_complete_failures
            && s.total_complete_failures < l.total_complete_failures
            && s.successive_partial_failures < l.successive_partial_failures
            && s.total_partial_failures < l.total_partial_failures
    }

    /// Wait before the next attempt. Complete-failure backoff has priority.
    pub fn get_backoff(&self) -> Duration {
        let s = &self.state;
        if s.successive_complete_failures > 0 {
            if let Some(policy) = &self.complete_failure_backoff {
                return policy.get_backoff(s.successive_complete_failures);
            }
        }
        if s.successive_partial_failures > 0 {
            if let Some(policy) = &self.partial_failure_backoff {
                return policy.get_backoff(s.successive_partial_failures);
            }
        }
        Duration::ZERO
    }

    /// `get_backoff()` formatted for attempt logs, e.g. `1m 20s`.
    pub fn backoff_string(&self) -> String {
        format_duration(self.get_backoff())
    }
}

impl std::fmt::Display for RetryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn limit(l: u32) -> String {
            if l == u32::MAX {
                "unbounded".to_string()
            } else {
                l.to_string()
            }
        }

        let s = &self.state;
        let l = &self.limits;
        write!(
            f,
            "successive complete failures {}/{}, total complete failures {}/{}, \
             successive partial failures {}/{}, total partial failures {}/{}",
            s.successive_complete_failures,
            limit(l.successive_complete_failures),
            s.total_complete_failures,
            limit(l.total_complete_failures),
            s.successive_partial_failures,
            limit(l.successive_partial_failures),
            s.total_partial_failures,
            limit(l.total_partial_failures),
        )
    }
}

fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    if total == 0 {
        return if d.is_zero() {
            "0s".to_string()
        } else {
            format!("{}ms", d.subsec_millis())
        };
    }

    let (h, m, s) = (total / 3_600, (total % 3_600) / 60, total % 60);
    let mut parts = Vec::with_capacity(3);
    if h > 0 {
        parts.push(format!("{h}h"));
    }
    if m > 0 {
        parts.push(format!("{m}m"));
    }
    if s > 0 {
        parts.push(format!("{s}s"));
    }
    parts.join(" ")
}
