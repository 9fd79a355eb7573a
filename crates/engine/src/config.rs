//! Engine and worker configuration.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compiler::MAX_DELAY_DAYS;
use crate::models::DelayUnit;

/// Longest single back-off a configuration may ask for; the same bound as a
/// delay node.
pub const MAX_BACKOFF_SECONDS: u64 = MAX_DELAY_DAYS as u64 * 24 * 60 * 60;

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_seconds() -> u64 {
    30
}

fn default_backoff_cap_seconds() -> u64 {
    3600
}

/// Tuning knobs for the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per action node visit before the instance fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential back-off between retries.
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    /// Upper bound on a single back-off delay.
    #[serde(default = "default_backoff_cap_seconds")]
    pub backoff_cap_seconds: u64,
    /// Unit applied to delay nodes authored without one.
    #[serde(default)]
    pub default_delay_unit: DelayUnit,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_seconds: default_backoff_base_seconds(),
            backoff_cap_seconds: default_backoff_cap_seconds(),
            default_delay_unit: DelayUnit::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("backoff_cap_seconds ({cap}) is below backoff_base_seconds ({base})")]
    CapBelowBase { base: u64, cap: u64 },
    #[error("backoff_cap_seconds ({cap}) exceeds the maximum of {max}")]
    CapTooLarge { cap: u64, max: u64 },
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.backoff_cap_seconds < self.backoff_base_seconds {
            return Err(ConfigError::CapBelowBase {
                base: self.backoff_base_seconds,
                cap: self.backoff_cap_seconds,
            });
        }
        if self.backoff_cap_seconds > MAX_BACKOFF_SECONDS {
            return Err(ConfigError::CapTooLarge {
                cap: self.backoff_cap_seconds,
                max: MAX_BACKOFF_SECONDS,
            });
        }
        Ok(())
    }

    /// Delay before retrying after the `failed_attempt`-th (1-based) failure:
    /// `base · 2^(failed_attempt - 1)`, capped.
    ///
    /// Never exceeds [`MAX_BACKOFF_SECONDS`], even for a configuration that
    /// skipped [`validate`](Self::validate).
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(failed_attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let seconds = self
            .backoff_base_seconds
            .saturating_mul(factor)
            .min(self.backoff_cap_seconds)
            .min(MAX_BACKOFF_SECONDS);
        i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::days(MAX_DELAY_DAYS))
    }
}

/// Tuning knobs for the polling workers and the reconciliation sweep.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often an idle worker polls the scheduler.
    pub poll_interval: StdDuration,
    /// How often the sweeper looks for lost instances.
    pub sweep_interval: StdDuration,
    /// How far past `resume_at` (or since the last update of a running
    /// instance) before the sweeper requeues it.
    pub grace: StdDuration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_secs(1),
            sweep_interval: StdDuration::from_secs(60),
            grace: StdDuration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base_seconds, 30);
        assert_eq!(config.backoff_cap_seconds, 3600);
        assert_eq!(config.default_delay_unit, DelayUnit::Minutes);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "max_attempts": 5, "default_delay_unit": "hours" }"#)
                .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_base_seconds, 30);
        assert_eq!(config.default_delay_unit, DelayUnit::Hours);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = EngineConfig::default();
        assert_eq!(config.backoff(1), Duration::seconds(30));
        assert_eq!(config.backoff(2), Duration::seconds(60));
        assert_eq!(config.backoff(3), Duration::seconds(120));
        assert_eq!(config.backoff(8), Duration::seconds(3600));
        assert_eq!(config.backoff(200), Duration::seconds(3600));
    }

    #[test]
    fn validation_rejects_nonsense() {
        let zero = EngineConfig { max_attempts: 0, ..EngineConfig::default() };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroAttempts));

        let inverted = EngineConfig {
            backoff_base_seconds: 60,
            backoff_cap_seconds: 10,
            ..EngineConfig::default()
        };
        assert!(matches!(inverted.validate(), Err(ConfigError::CapBelowBase { .. })));

        let huge = EngineConfig {
            backoff_base_seconds: 100_000_000_000_000_000,
            backoff_cap_seconds: 100_000_000_000_000_000,
            ..EngineConfig::default()
        };
        assert!(matches!(huge.validate(), Err(ConfigError::CapTooLarge { .. })));

        let longest = EngineConfig {
            backoff_base_seconds: MAX_BACKOFF_SECONDS,
            backoff_cap_seconds: MAX_BACKOFF_SECONDS,
            ..EngineConfig::default()
        };
        assert_eq!(longest.validate(), Ok(()));
    }

    #[test]
    fn backoff_stays_bounded_for_unvalidated_configs() {
        let huge = EngineConfig {
            backoff_base_seconds: 100_000_000_000_000_000,
            backoff_cap_seconds: u64::MAX,
            ..EngineConfig::default()
        };
        assert_eq!(huge.backoff(1), Duration::days(MAX_DELAY_DAYS));
        assert_eq!(huge.backoff(64), Duration::days(MAX_DELAY_DAYS));
    }
}
