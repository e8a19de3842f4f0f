//! Retry policies for workflow steps.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound applied to every computed retry delay.
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// How the delay between retry attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Constant,
    /// Delay grows as `base * attempt`.
    Linear,
    /// Delay grows as `base * 2^(attempt - 1)`.
    Exponential,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Per-step retry configuration.
///
/// `max_attempts` counts total body invocations, so `max_attempts: 3`
/// means one initial run plus up to two retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before the step is declared exhausted. Minimum 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Growth curve for subsequent retries.
    #[serde(default = "default_backoff")]
    pub backoff: Backoff,
    /// Wall-clock bound on a single body invocation, in seconds. `None`
    /// falls back to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_attempt_timeout_secs: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_backoff() -> Backoff {
    Backoff::Exponential
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff: default_backoff(),
            per_attempt_timeout_secs: None,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries: a single attempt decides the step.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            backoff: Backoff::Constant,
            per_attempt_timeout_secs: None,
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    ///
    /// `attempt` is 1-based: it is the number of the attempt that just
    /// failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Delay to wait before retry number `attempt + 1`, capped at
    /// [`MAX_RETRY_DELAY_MS`]. `attempt` is the 1-based attempt that
    /// just failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.backoff {
            Backoff::Constant => self.base_delay_ms,
            Backoff::Linear => self.base_delay_ms.saturating_mul(attempt as u64),
            Backoff::Exponential => {
                let shift = (attempt - 1).min(63);
                self.base_delay_ms
                    .saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX))
            }
        };
        Duration::from_millis(raw.min(MAX_RETRY_DELAY_MS))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
