use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{Backoff, Jitter, delay_for};
use crate::error::{BuildError, Error};

/// Inclusive cap on the number of attempt cycles in one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryLimit {
    Unlimited,
    Limited(u32),
}

impl RetryLimit {
    /// Whether another attempt may follow the given count of completed
    /// cycles.
    pub fn permits(&self, attempts: u32) -> bool {
        match *self {
            RetryLimit::Unlimited => true,
            RetryLimit::Limited(limit) => attempts < limit,
        }
    }
}

/// Predicate over an attempt's value/failure pair.
pub(crate) type Classifier<T, E> =
    Arc<dyn Fn(Option<&T>, Option<&Error<E>>) -> bool + Send + Sync>;

/// Classification of one completed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Accept the outcome as terminal.
    Accept { success: bool },
    /// Defer another attempt after the wait.
    Retry { wait: Duration },
    /// Terminate immediately, keeping the current outcome.
    Abort { success: bool },
}

/// Immutable retry configuration: attempt and duration bounds, the delay
/// schedule, and the retry/abort classifiers.
///
/// With no classifiers configured the defaults apply: any failure
/// retries, any value is accepted. Configuring `retry_on`/`retry_if`
/// replaces the failure default; `retry_when` only adds value matching
/// on top of it.
#[derive(Clone)]
pub struct RetryPolicy<T, E> {
    limit: RetryLimit,
    max_duration: Option<Duration>,
    backoff: Backoff,
    jitter: Jitter,
    retry_conditions: Vec<Classifier<T, E>>,
    retry_values: Vec<Classifier<T, E>>,
    abort_conditions: Vec<Classifier<T, E>>,
    abort_values: Vec<Classifier<T, E>>,
}

impl<T, E> Default for RetryPolicy<T, E> {
    /// Three attempts, no delay, default classification.
    fn default() -> Self {
        Self {
            limit: RetryLimit::Limited(3),
            max_duration: None,
            backoff: Backoff::default(),
            jitter: Jitter::None,
            retry_conditions: Vec::new(),
            retry_values: Vec::new(),
            abort_conditions: Vec::new(),
            abort_values: Vec::new(),
        }
    }
}

impl<T, E> RetryPolicy<T, E> {
    pub fn builder() -> RetryPolicyBuilder<T, E> {
        RetryPolicyBuilder::new()
    }

    pub fn limit(&self) -> RetryLimit {
        self.limit
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    pub(crate) fn wants_retry(&self, value: Option<&T>, failure: Option<&Error<E>>) -> bool {
        if self.retry_values.iter().any(|c| c(value, failure)) {
            return true;
        }
        if !self.retry_conditions.is_empty() {
            return self.retry_conditions.iter().any(|c| c(value, failure));
        }
        failure.is_some()
    }

    pub(crate) fn wants_abort(&self, value: Option<&T>, failure: Option<&Error<E>>) -> bool {
        self.abort_values.iter().any(|c| c(value, failure))
            || self.abort_conditions.iter().any(|c| c(value, failure))
    }

    /// Delay before the next attempt; `None` once the duration budget is
    /// spent.
    fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        let wait = delay_for(&self.backoff, &self.jitter, attempt);
        match self.max_duration {
            None => Some(wait),
            Some(max) => {
                let remaining = max.saturating_sub(elapsed);
                if remaining.is_zero() {
                    None
                } else {
                    Some(wait.min(remaining))
                }
            }
        }
    }

    fn within_bounds(&self, cycles: u32, elapsed: Duration) -> bool {
        self.limit.permits(cycles) && self.max_duration.is_none_or(|max| elapsed < max)
    }

    /// Applies the classification order: abort first, then retry under
    /// the attempt/duration bounds, then terminal acceptance. `cycles`
    /// is the count of admission cycles completed, rejected ones
    /// included.
    pub(crate) fn classify(
        &self,
        value: Option<&T>,
        failure: Option<&Error<E>>,
        cycles: u32,
        elapsed: Duration,
    ) -> Verdict {
        let retryable = self.wants_retry(value, failure);
        if self.wants_abort(value, failure) {
            return Verdict::Abort {
                success: failure.is_none() && !retryable,
            };
        }
        if retryable && self.within_bounds(cycles, elapsed) {
            if let Some(wait) = self.next_delay(cycles, elapsed) {
                return Verdict::Retry { wait };
            }
        }
        Verdict::Accept {
            success: failure.is_none() && !retryable,
        }
    }
}

impl<T, E> fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("limit", &self.limit)
            .field("max_duration", &self.max_duration)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("retry_conditions", &self.retry_conditions.len())
            .field("retry_values", &self.retry_values.len())
            .field("abort_conditions", &self.abort_conditions.len())
            .field("abort_values", &self.abort_values.len())
            .finish()
    }
}

/// Builder for [`RetryPolicy`]; `build` validates the configuration.
pub struct RetryPolicyBuilder<T, E> {
    limit: RetryLimit,
    max_duration: Option<Duration>,
    backoff: Backoff,
    jitter: Jitter,
    retry_conditions: Vec<Classifier<T, E>>,
    retry_values: Vec<Classifier<T, E>>,
    abort_conditions: Vec<Classifier<T, E>>,
    abort_values: Vec<Classifier<T, E>>,
}

impl<T, E> Default for RetryPolicyBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> RetryPolicyBuilder<T, E> {
    pub fn new() -> Self {
        Self {
            limit: RetryLimit::Limited(3),
            max_duration: None,
            backoff: Backoff::default(),
            jitter: Jitter::None,
            retry_conditions: Vec::new(),
            retry_values: Vec::new(),
            abort_conditions: Vec::new(),
            abort_values: Vec::new(),
        }
    }

    /// Caps total attempt cycles per execution.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.limit = RetryLimit::Limited(attempts);
        self
    }

    /// Removes the attempt cap; pair with `max_duration` or an abort
    /// classifier to keep executions bounded.
    pub fn unlimited_attempts(mut self) -> Self {
        self.limit = RetryLimit::Unlimited;
        self
    }

    /// Caps wall-clock time from the first attempt; the last delay is
    /// clamped to whatever remains.
    pub fn max_duration(mut self, max: Duration) -> Self {
        self.max_duration = Some(max);
        self
    }

    pub fn fixed_delay(mut self, delay: Duration) -> Self {
        self.backoff = Backoff::Fixed { delay };
        self
    }

    pub fn exponential_delay(mut self, delay: Duration, factor: f64, max_delay: Duration) -> Self {
        self.backoff = Backoff::Exponential {
            delay,
            factor,
            max_delay,
        };
        self
    }

    pub fn random_delay(mut self, min: Duration, max: Duration) -> Self {
        self.backoff = Backoff::Random { min, max };
        self
    }

    /// Absolute jitter: a uniform offset in `[-jitter, +jitter]`.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Jitter::Absolute(jitter);
        self
    }

    /// Relative jitter: a uniform offset within `factor` of the computed
    /// delay. `factor` must lie within `[0, 1]`.
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter = Jitter::Relative(factor);
        self
    }

    /// Retries when the failure matches; configuring any failure
    /// condition replaces the retry-all-failures default.
    pub fn retry_on(
        mut self,
        predicate: impl Fn(&Error<E>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_conditions
            .push(Arc::new(move |_, failure| failure.is_some_and(&predicate)));
        self
    }

    /// Retries when the predicate matches the attempt's value/failure
    /// pair.
    pub fn retry_if(
        mut self,
        predicate: impl Fn(Option<&T>, Option<&Error<E>>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_conditions.push(Arc::new(predicate));
        self
    }

    /// Retries when the attempt yields a value equal to `value`.
    pub fn retry_when(mut self, value: T) -> Self
    where
        T: PartialEq + Send + Sync + 'static,
    {
        self.retry_values
            .push(Arc::new(move |v, _| v == Some(&value)));
        self
    }

    /// Aborts retrying when the failure matches, propagating the current
    /// outcome.
    pub fn abort_on(
        mut self,
        predicate: impl Fn(&Error<E>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.abort_conditions
            .push(Arc::new(move |_, failure| failure.is_some_and(&predicate)));
        self
    }

    /// Aborts retrying when the predicate matches the attempt's
    /// value/failure pair.
    pub fn abort_if(
        mut self,
        predicate: impl Fn(Option<&T>, Option<&Error<E>>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.abort_conditions.push(Arc::new(predicate));
        self
    }

    /// Aborts retrying when the attempt yields a value equal to `value`.
    pub fn abort_when(mut self, value: T) -> Self
    where
        T: PartialEq + Send + Sync + 'static,
    {
        self.abort_values
            .push(Arc::new(move |v, _| v == Some(&value)));
        self
    }

    pub fn build(self) -> Result<RetryPolicy<T, E>, BuildError> {
        if self.limit == RetryLimit::Limited(0) {
            return Err(BuildError::ZeroAttempts);
        }
        if let Backoff::Exponential { factor, .. } = self.backoff {
            if factor < 1.0 {
                return Err(BuildError::DelayFactorTooSmall(factor));
            }
        }
        if let Backoff::Random { min, max } = self.backoff {
            if min > max {
                return Err(BuildError::InvalidDelayRange);
            }
        }
        if let Jitter::Relative(factor) = self.jitter {
            if !(0.0..=1.0).contains(&factor) {
                return Err(BuildError::JitterFactorOutOfRange(factor));
            }
        }
        Ok(RetryPolicy {
            limit: self.limit,
            max_duration: self.max_duration,
            backoff: self.backoff,
            jitter: self.jitter,
            retry_conditions: self.retry_conditions,
            retry_values: self.retry_values,
            abort_conditions: self.abort_conditions,
            abort_values: self.abort_values,
        })
    }
}
