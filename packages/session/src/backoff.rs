//! Retry delay policies.
//!
//! A [`RetryPolicy`] pairs an attempt bound with a delay function. The session
//! actor owns one [`RetryCounter`] per retry loop and asks it for the next
//! [`ScheduledRetry`]; nothing here touches a timer, so bounds and delays are
//! testable on their own.

use std::time::Duration;

/// Maps a 1-indexed attempt number to a delay.
pub trait DelayFn: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// `min(base * 2^attempt, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub cap: Duration,
}

impl DelayFn for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

/// `step * attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub step: Duration,
}

impl DelayFn for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}

/// Upper bound on attempts plus the delay before each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy<D> {
    pub max_attempts: u32,
    pub delay: D,
}

impl<D: DelayFn> RetryPolicy<D> {
    /// Delay before `attempt`, or `None` once the bound is exceeded.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        (1..=self.max_attempts)
            .contains(&attempt)
            .then(|| self.delay.delay(attempt))
    }
}

/// A retry the driver should run after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub attempt: u32,
    pub delay: Duration,
}

/// Attempt counter for one retry episode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounter {
    attempts: u32,
}

impl RetryCounter {
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Increments the counter and returns the retry to schedule, or `None`
    /// when the policy's bound has been reached. The counter is not advanced
    /// past the bound.
    pub fn schedule_next<D: DelayFn>(
        &mut self,
        policy: &RetryPolicy<D>,
    ) -> Option<ScheduledRetry> {
        let attempt = self.attempts.checked_add(1)?;
        let delay = policy.delay_for(attempt)?;
        self.attempts = attempt;

        Some(ScheduledRetry { attempt, delay })
    }

    pub const fn reset(&mut self) {
        self.attempts = 0;
    }
}
