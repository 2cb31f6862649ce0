//! Reconnect backoff policy.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{MqttError, MqttResult};

/// Geometric backoff between connect attempts, capped and floored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    #[serde(default = "default_initial")]
    pub initial_delay_ms: u64,
    /// Upper bound once the curve saturates.
    #[serde(default = "default_max")]
    pub max_delay_ms: u64,
    /// Growth factor per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// No delay is ever shorter than this.
    #[serde(default = "default_min")]
    pub min_delay_ms: u64,
    /// Give up after this many consecutive failures (None = unlimited).
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial(),
            max_delay_ms: default_max(),
            multiplier: default_multiplier(),
            min_delay_ms: default_min(),
            max_attempts: None,
        }
    }
}

fn default_initial() -> u64 {
    1_000
}

fn default_max() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.5
}

fn default_min() -> u64 {
    100
}

impl BackoffPolicy {
    pub fn validate(&self) -> MqttResult<()> {
        if self.min_delay_ms == 0 {
            return Err(MqttError::Config("backoff min_delay_ms must be > 0".into()));
        }
        if self.max_delay_ms < self.min_delay_ms {
            return Err(MqttError::Config(format!(
                "backoff max_delay_ms ({}) below min_delay_ms ({})",
                self.max_delay_ms, self.min_delay_ms
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(MqttError::Config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(MqttError::Config("backoff max_attempts must be > 0".into()));
        }
        Ok(())
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `initial * multiplier^(attempt-1)`, clamped to `[min_delay, max_delay]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped.clamp(self.min_delay_ms, self.max_delay_ms))
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }

    /// Sum of every delay the policy can produce. None if attempts are unlimited.
    pub fn max_total_delay(&self) -> Option<Duration> {
        self.max_attempts
            .map(|max| (1..max).map(|attempt| self.delay_for(attempt)).sum())
    }
}
