use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::CancelToken;

/// Monotonic time source consumed by the runners and the circuit
/// breaker. Injectable so duration-sensitive behavior can be driven by a
/// manual clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Blocks for `duration` or until `cancel` fires, whichever comes
    /// first. Returns `false` when the wait was interrupted.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

/// Default clock: [`Instant::now`] plus a condvar wait on the cancel
/// token.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        cancel.wait_for(duration)
    }
}

pub(crate) fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
