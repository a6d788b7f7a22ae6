//! Retry with capped exponential backoff.
//!
//! A [`BackoffPolicy`] is a plain value; every call site that talks to a remote
//! service carries its own policy (listing calls tolerate many quick retries,
//! publishing fewer and slower ones) and hands the operation to
//! [`BackoffPolicy::execute`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::millis;
use crate::error::RetryError;

/// Parameters of one retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(rename = "min_delay_ms", with = "millis")]
    pub min_delay: Duration,
    /// Upper bound for any delay, jitter included.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Multiplier applied per further failed attempt.
    pub growth_factor: f64,
    /// Randomise each delay within a quarter of its value, clamped to the bounds.
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay,
            max_delay,
            growth_factor: 2.0,
            jitter: false,
        }
    }

    /// A single attempt, no delays.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Defaults for paginated listing calls against the source.
    pub fn listing() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(8)).with_jitter(true)
    }

    /// Defaults for publish calls against the target platform.
    pub fn publish() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(30)).with_jitter(true)
    }

    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn ceiling(&self) -> Duration {
        self.max_delay.max(self.min_delay)
    }

    /// Delay before the next attempt after `attempt` (1-based) has failed, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let growth = if self.growth_factor.is_finite() && self.growth_factor >= 1.0 {
            self.growth_factor
        } else {
            1.0
        };
        let secs = self.min_delay.as_secs_f64() * growth.powi(exponent);
        let ceiling = self.ceiling();
        if !secs.is_finite() || secs >= ceiling.as_secs_f64() {
            ceiling
        } else {
            Duration::from_secs_f64(secs).max(self.min_delay)
        }
    }

    /// The actual delay to sleep: [`Self::delay_for_attempt`] with jitter applied.
    /// Always within `[min_delay, max(min_delay, max_delay)]`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let window = delay / 4;
        let low = delay.saturating_sub(window).max(self.min_delay);
        let high = (delay + window).min(self.ceiling());
        if low >= high {
            return low;
        }
        rand::thread_rng().gen_range(low..=high)
    }

    /// Run `operation` until it succeeds or `max_attempts` is reached.
    ///
    /// `observer` sees every failed attempt before the policy sleeps; it is for
    /// diagnostics and cannot influence the loop.
    pub async fn execute<T, E, Op, Fut, Obs>(
        &self,
        operation: Op,
        observer: Obs,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Obs: FnMut(&RetryState<'_, E>),
    {
        self.execute_when(operation, |_: &E| true, observer).await
    }

    /// Like [`Self::execute`], but stops early when `should_retry` rejects an error.
    pub async fn execute_when<T, E, Op, Fut, Pred, Obs>(
        &self,
        mut operation: Op,
        should_retry: Pred,
        mut observer: Obs,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Pred: Fn(&E) -> bool,
        Obs: FnMut(&RetryState<'_, E>),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= max_attempts || !should_retry(&error) {
                observer(&RetryState {
                    attempt,
                    max_attempts,
                    error: &error,
                    next_delay: None,
                });
                return Err(RetryError {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = self.next_delay(attempt);
            observer(&RetryState {
                attempt,
                max_attempts,
                error: &error,
                next_delay: Some(delay),
            });
            drop(error);
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::listing()
    }
}

/// Snapshot of a retry loop handed to observers after a failed attempt.
#[derive(Debug)]
pub struct RetryState<'e, E> {
    /// 1-based index of the attempt that just failed.
    pub attempt: u32,
    pub max_attempts: u32,
    pub error: &'e E,
    /// `None` when the loop is giving up.
    pub next_delay: Option<Duration>,
}

/// Observer that logs each failed attempt as a warning.
pub fn warn_on_retry<E: fmt::Display>(
    operation: &'static str,
    subject: &str,
) -> impl FnMut(&RetryState<'_, E>) + Send {
    let subject = subject.to_string();
    move |state: &RetryState<'_, E>| match state.next_delay {
        Some(delay) => warn!(
            operation,
            subject = %subject,
            attempt = state.attempt,
            max_attempts = state.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %state.error,
            "[RETRY] Attempt failed, backing off"
        ),
        None => warn!(
            operation,
            subject = %subject,
            attempt = state.attempt,
            max_attempts = state.max_attempts,
            error = %state.error,
            "[RETRY] Giving up"
        ),
    }
}
