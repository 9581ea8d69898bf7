use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inter-attempt delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay: Duration },
    /// `delay * factor^(attempt - 1)`, capped at `max_delay`.
    Exponential {
        delay: Duration,
        factor: f64,
        max_delay: Duration,
    },
    /// Uniform random delay drawn from `[min, max]`.
    Random { min: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed {
            delay: Duration::ZERO,
        }
    }
}

impl Backoff {
    /// Base delay after the given completed attempt (the first attempt
    /// is 1).
    pub fn base(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential {
                delay,
                factor,
                max_delay,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let scaled = delay.as_secs_f64() * factor.powi(exponent);
                // powi overshoots to infinity long before the cap matters
                let capped = scaled.min(max_delay.as_secs_f64());
                Duration::from_secs_f64(capped.max(0.0))
            }
            Backoff::Random { min, max } => {
                if max <= min {
                    min
                } else {
                    let nanos =
                        rand::rng().random_range(min.as_nanos() as u64..=max.as_nanos() as u64);
                    Duration::from_nanos(nanos)
                }
            }
        }
    }
}

/// Random perturbation applied to a computed delay, clamped at zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Jitter {
    #[default]
    None,
    /// Uniform offset in `[-jitter, +jitter]`.
    Absolute(Duration),
    /// Uniform offset in `[-base * factor, +base * factor]`.
    Relative(f64),
}

impl Jitter {
    pub fn apply(&self, base: Duration) -> Duration {
        let range = match *self {
            Jitter::None => return base,
            Jitter::Absolute(jitter) => jitter.as_secs_f64(),
            Jitter::Relative(factor) => base.as_secs_f64() * factor,
        };
        if range <= 0.0 {
            return base;
        }
        let offset = rand::rng().random_range(-range..=range);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }
}

/// Full delay for the attempt that just completed.
pub(crate) fn delay_for(backoff: &Backoff, jitter: &Jitter, attempt: u32) -> Duration {
    jitter.apply(backoff.base(attempt))
}
