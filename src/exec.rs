use std::sync::Arc;

use crate::breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::context::ExecutionContext;
use crate::error::Error;
use crate::fallback::Fallback;
use crate::outcome::Outcome;
use crate::retry::{RetryPolicy, Verdict};

/// Admission decision taken before an attempt descends past a policy.
#[derive(Debug)]
pub enum Admission<E> {
    Admit,
    Reject(Error<E>),
}

/// Per-execution policy executor.
///
/// Executors never invoke the inner stack themselves: the runner
/// trampolines, consulting `before_attempt` outermost-first and folding
/// each attempt's outcome through `on_outcome` innermost-first. The same
/// executors drive both the sync and the async runner, which is what
/// keeps the two modes semantically identical.
pub trait PolicyExec<T, E>: Send {
    /// Consulted before the attempt reaches the seats beneath this one.
    fn before_attempt(&mut self, ctx: &ExecutionContext<T, E>) -> Admission<E> {
        let _ = ctx;
        Admission::Admit
    }

    /// Observes the outcome produced beneath this seat and transforms
    /// it: terminal, or non-terminal with a wait for the runner.
    fn on_outcome(&mut self, ctx: &ExecutionContext<T, E>, outcome: Outcome<T, E>)
    -> Outcome<T, E>;

    /// Whether this outcome should be handled on the scheduler rather
    /// than inline. Only the async runner consults this.
    fn defer_outcome(&self, outcome: &Outcome<T, E>) -> bool {
        let _ = outcome;
        false
    }
}

/// Retry seat: classifies each inner outcome and computes the pre-retry
/// delay.
pub(crate) struct RetryExec<T, E> {
    policy: RetryPolicy<T, E>,
    clock: Arc<dyn Clock>,
}

impl<T, E> RetryExec<T, E> {
    pub(crate) fn new(policy: RetryPolicy<T, E>, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }
}

impl<T, E> PolicyExec<T, E> for RetryExec<T, E> {
    fn on_outcome(
        &mut self,
        ctx: &ExecutionContext<T, E>,
        outcome: Outcome<T, E>,
    ) -> Outcome<T, E> {
        if !outcome.is_complete() {
            return outcome;
        }
        let elapsed = ctx.elapsed_at(self.clock.now());
        // the bound runs on cycles so rejected admissions also exhaust it
        match self
            .policy
            .classify(outcome.value(), outcome.failure(), ctx.cycles(), elapsed)
        {
            Verdict::Retry { wait } => {
                tracing::debug!(
                    attempt = ctx.attempts(),
                    wait_ms = wait.as_millis() as u64,
                    "attempt failed, retrying"
                );
                outcome.retry_after(wait)
            }
            Verdict::Accept { success } | Verdict::Abort { success } => {
                outcome.complete_with(success)
            }
        }
    }
}

/// Breaker seat: gates admission on breaker state and records attempt
/// outcomes into the shared breaker.
pub(crate) struct BreakerExec<T, E> {
    breaker: CircuitBreaker<T, E>,
    admitted: bool,
}

impl<T, E> BreakerExec<T, E> {
    pub(crate) fn new(breaker: CircuitBreaker<T, E>) -> Self {
        Self {
            breaker,
            admitted: false,
        }
    }
}

impl<T, E> PolicyExec<T, E> for BreakerExec<T, E> {
    fn before_attempt(&mut self, _ctx: &ExecutionContext<T, E>) -> Admission<E> {
        match self.breaker.try_acquire() {
            Ok(()) => {
                self.admitted = true;
                Admission::Admit
            }
            Err(failure) => {
                tracing::debug!("attempt rejected, circuit breaker open");
                Admission::Reject(failure)
            }
        }
    }

    fn on_outcome(
        &mut self,
        _ctx: &ExecutionContext<T, E>,
        outcome: Outcome<T, E>,
    ) -> Outcome<T, E> {
        if self.admitted {
            if outcome.is_complete() {
                self.breaker.record_outcome(outcome.value(), outcome.failure());
            } else {
                // an outer policy will re-enter; this cycle recorded nothing
                self.breaker.release();
            }
            self.admitted = false;
        }
        outcome
    }
}

/// Fallback seat: substitutes terminal non-success outcomes.
pub(crate) struct FallbackExec<T, E> {
    fallback: Fallback<T, E>,
}

impl<T, E> FallbackExec<T, E> {
    pub(crate) fn new(fallback: Fallback<T, E>) -> Self {
        Self { fallback }
    }
}

impl<T, E> PolicyExec<T, E> for FallbackExec<T, E> {
    fn on_outcome(
        &mut self,
        ctx: &ExecutionContext<T, E>,
        outcome: Outcome<T, E>,
    ) -> Outcome<T, E> {
        if !outcome.is_complete() || outcome.is_success() {
            return outcome;
        }
        match self.fallback.apply(outcome.value(), outcome.failure(), ctx) {
            Ok(value) => Outcome::success(value),
            Err(failure) => Outcome::from_failure(Error::Operation(failure)),
        }
    }

    fn defer_outcome(&self, outcome: &Outcome<T, E>) -> bool {
        self.fallback.is_asynchronous() && outcome.is_complete() && !outcome.is_success()
    }
}
