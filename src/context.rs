use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Error;

/// Cooperative cancellation flag shared between an execution, its caller
/// and the context snapshots handed to the operation.
///
/// Cancelling never force-interrupts a running attempt: it aborts any
/// pending inter-attempt sleep and is observed at the next policy
/// boundary.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Waits out `duration`; returns `false` if cancelled first.
    pub(crate) fn wait_for(&self, duration: Duration) -> bool {
        let started = Instant::now();
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            let elapsed = started.elapsed();
            if elapsed >= duration {
                return true;
            }
            self.inner
                .signal
                .wait_for(&mut cancelled, duration - elapsed);
        }
        false
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Per-execution record of attempts and the most recent attempt's
/// outcome.
///
/// The engine holds the mutable original; operations receive a clone
/// that shares only the cancellation token, so long-running work can
/// bail out cooperatively by polling [`ExecutionContext::is_cancelled`].
#[derive(Debug, Clone)]
pub struct ExecutionContext<T, E> {
    start: Instant,
    attempts: u32,
    cycles: u32,
    last_result: Option<T>,
    last_failure: Option<Error<E>>,
    cancel: CancelToken,
}

impl<T, E> ExecutionContext<T, E> {
    pub(crate) fn new(start: Instant, cancel: CancelToken) -> Self {
        Self {
            start,
            attempts: 0,
            cycles: 0,
            last_result: None,
            last_failure: None,
            cancel,
        }
    }

    /// Monotonic timestamp taken when the execution was entered.
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Number of operation invocations so far, the first being 1.
    /// Incremented exactly once per invocation, so the operation always
    /// observes consecutive values.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of admission cycles begun so far, including cycles a
    /// breaker rejected before the operation ran. This is what attempt
    /// caps bound, so an execution whose breaker keeps rejecting still
    /// terminates.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Elapsed wall time relative to `now`.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
    }

    /// The most recent attempt's value, if it produced one.
    pub fn last_result(&self) -> Option<&T> {
        self.last_result.as_ref()
    }

    /// The most recent attempt's failure, if it produced one.
    pub fn last_failure(&self) -> Option<&Error<E>> {
        self.last_failure.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The execution's cancellation token.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn begin_cycle(&mut self) {
        self.cycles += 1;
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    pub(crate) fn record(&mut self, result: Option<T>, failure: Option<Error<E>>) {
        self.last_result = result;
        self.last_failure = failure;
    }
}
