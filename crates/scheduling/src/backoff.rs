//! Exponential backoff between retry attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use syncplane_core::{CoreError, CoreResult};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Exponential backoff: `min * base^(ordinal - 1)`, capped at `max`.
///
/// Immutable once constructed; `new` rejects `min > max` and `base < 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    min_interval: Duration,
    max_interval: Duration,
    base: u32,
}

impl BackoffPolicy {
    pub fn new(min_interval: Duration, max_interval: Duration, base: u32) -> CoreResult<Self> {
        if min_interval > max_interval {
            return Err(CoreError::validation(format!(
                "backoff min interval {min_interval:?} exceeds max interval {max_interval:?}"
            )));
        }
        if base < 2 {
            return Err(CoreError::validation(format!(
                "backoff base must be >= 2, got {base}"
            )));
        }

        Ok(Self {
            min_interval,
            max_interval,
            base,
        })
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Wait before the attempt following the `ordinal`-th failure (1-indexed).
    ///
    /// `ordinal == 0` means nothing has failed yet, so there is no wait.
    pub fn get_backoff(&self, ordinal: u32) -> Duration {
        if ordinal == 0 || self.min_interval.is_zero() {
            return Duration::ZERO;
        }

        let max = self.max_interval.as_nanos();
        let wait = u128::from(self.base)
            .checked_pow(ordinal - 1)
            .and_then(|factor| self.min_interval.as_nanos().checked_mul(factor))
            .map_or(max, |nanos| nanos.min(max));

        if wait == max {
            return self.max_interval;
        }

        // wait < max, so the seconds fit in u64.
        Duration::new(
            (wait / NANOS_PER_SEC) as u64,
            (wait % NANOS_PER_SEC) as u32,
        )
    }
}

/// Serializable form of a [`BackoffPolicy`], in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub min_secs: u64,
    pub max_secs: u64,
    pub base: u32,
}

impl BackoffConfig {
    pub fn build(&self) -> CoreResult<BackoffPolicy> {
        BackoffPolicy::new(
            Duration::from_secs(self.min_secs),
            Duration::from_secs(self.max_secs),
            self.base,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(min: u64, max: u64, base: u32) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(min), Duration::from_secs(max), base).unwrap()
    }

    #[test]
    fn doubles_from_min() {
        let p = policy(10, 3_600, 2);
        assert_eq!(p.get_backoff(0), Duration::ZERO);
        assert_eq!(p.get_backoff(1), Duration::from_secs(10));
        assert_eq!(p.get_backoff(2), Duration::from_secs(20));
        assert_eq!(p.get_backoff(3), Duration::from_secs(40));
        assert_eq!(p.get_backoff(4), Duration::from_secs(80));
    }

    #[test]
    fn clamps_to_max() {
        let p = policy(10, 3_600, 3);
        assert_eq!(p.get_backoff(5), Duration::from_secs(810));
        assert_eq!(p.get_backoff(6), Duration::from_secs(2_430));
        assert_eq!(p.get_backoff(7), Duration::from_secs(3_600));
        assert_eq!(p.get_backoff(u32::MAX), Duration::from_secs(3_600));
    }

    #[test]
    fn sub_second_intervals_are_exact() {
        let p = BackoffPolicy::new(Duration::from_millis(150), Duration::from_secs(1), 2).unwrap();
        assert_eq!(p.get_backoff(2), Duration::from_millis(300));
        assert_eq!(p.get_backoff(4), Duration::from_secs(1));
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(
            BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(1), 2),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(2), 1),
            Err(CoreError::Validation(_))
        ));
        assert!(BackoffPolicy::new(Duration::ZERO, Duration::ZERO, 2).is_ok());
    }

    #[test]
    fn zero_min_never_waits() {
        let p = policy(0, 3_600, 10);
        assert_eq!(p.get_backoff(5), Duration::ZERO);
        assert_eq!(p.get_backoff(40), Duration::ZERO);
        assert_eq!(p.get_backoff(u32::MAX), Duration::ZERO);
    }

    #[test]
    fn config_builds_policy() {
        let cfg = BackoffConfig {
            min_secs: 10,
            max_secs: 1_800,
            base: 3,
        };
        let p = cfg.build().unwrap();
        assert_eq!(p.min_interval(), Duration::from_secs(10));
        assert_eq!(p.max_interval(), Duration::from_secs(1_800));
        assert_eq!(p.base(), 3);

        let bad = BackoffConfig { base: 0, ..cfg };
        assert!(bad.build().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the wait never shrinks as failures accumulate and never
        /// exceeds the configured maximum; a zero minimum means no wait at all.
        #[test]
        fn backoff_is_monotonic_and_bounded(
            min_ms in 0u64..10_000,
            extra_ms in 0u64..10_000_000,
            base in 2u32..10,
            n in prop_oneof![0u32..200, (u32::MAX - 8)..u32::MAX]
        ) {
            let p = BackoffPolicy::new(
                Duration::from_millis(min_ms),
                Duration::from_millis(min_ms + extra_ms),
                base,
            ).unwrap();

            let a = p.get_backoff(n);
            let b = p.get_backoff(n + 1);
            prop_assert!(a <= b);
            prop_assert!(b <= p.max_interval());
            prop_assert_eq!(p.get_backoff(0), Duration::ZERO);
            if min_ms == 0 {
                prop_assert_eq!(b, Duration::ZERO);
            }
        }
    }
}
