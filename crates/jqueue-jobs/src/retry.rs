//! Retry policies and the per-job retry state machine.

use jqueue_config::RetryConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Backoff strategy enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry immediately.
    None,
    /// One time unit between attempts.
    Fixed,
    /// `2^attempt` time units between attempts.
    #[default]
    Exponential,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(BackoffStrategy::None),
            "fixed" => Ok(BackoffStrategy::Fixed),
            "exponential" => Ok(BackoffStrategy::Exponential),
            other => Err(format!("unknown backoff strategy: {other}")),
        }
    }
}

/// Backoff policy applied between attempts of one job.
///
/// The retry budget itself lives on the job (`max_retries`); the policy only
/// decides how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Backoff strategy.
    pub strategy: BackoffStrategy,

    /// Length of one time unit.
    pub unit: Duration,

    /// Optional cap on a single delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Creates a policy that retries without waiting.
    pub fn none() -> Self {
        Self {
            strategy: BackoffStrategy::None,
            unit: Duration::ZERO,
            max_delay: None,
        }
    }

    /// Creates a fixed delay policy.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            unit: delay,
            max_delay: None,
        }
    }

    /// Creates an exponential backoff policy with the given time unit.
    pub fn exponential(unit: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            unit,
            max_delay: None,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (counting from 1).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed => self.unit,
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                self.unit.saturating_mul(factor)
            }
        };

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        // The strategy name is checked by config validation.
        let strategy = config.strategy.parse().unwrap_or_default();
        Self {
            strategy,
            unit: Duration::from_millis(config.unit_ms),
            max_delay: config.max_delay_ms.map(Duration::from_millis),
        }
    }
}

/// Decision after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the delay, then run the attempt again.
    RetryAfter(Duration),
    /// Budget exhausted.
    GiveUp,
}

/// Attempt counter for one job's retry lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    max_retries: u32,
}

impl RetryState {
    /// Starts a retry lifetime. `retries` is the count already consumed.
    pub fn new(retries: u32, max_retries: u32) -> Self {
        Self {
            attempt: retries,
            max_retries,
        }
    }

    /// Failed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempts still allowed, including the next one.
    pub fn remaining(&self) -> u32 {
        self.max_retries.saturating_add(1).saturating_sub(self.attempt)
    }

    /// Records a failed attempt.
    pub fn on_failure(&mut self, policy: &RetryPolicy) -> RetryDecision {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt > self.max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(policy.delay_for_attempt(self.attempt))
        }
    }
}
