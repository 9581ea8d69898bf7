use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;

use crate::breaker::CircuitBreaker;
use crate::clock::{Clock, default_clock};
use crate::context::{CancelToken, ExecutionContext};
use crate::error::{BuildError, Error};
use crate::events::{Entry, Event, ListenerSet, Listeners, Terminal};
use crate::exec::{Admission, BreakerExec, FallbackExec, PolicyExec, RetryExec};
use crate::fallback::Fallback;
use crate::handle::{AsyncOp, ExecutionHandle, launch};
use crate::operation::{Operation, SyncOperation};
use crate::outcome::Outcome;
use crate::retry::RetryPolicy;
use crate::scheduler::{Scheduler, TokioScheduler};

type ExecFactory<T, E> = Arc<dyn Fn() -> Box<dyn PolicyExec<T, E>> + Send + Sync>;

#[derive(Clone)]
enum PolicySeat<T, E> {
    Retry(RetryPolicy<T, E>),
    Breaker(CircuitBreaker<T, E>),
    Fallback(Fallback<T, E>),
    Custom(ExecFactory<T, E>),
}

/// Composed policy pipeline plus its execution environment.
///
/// Policies are declared outermost-first; the user operation is the
/// innermost seat. Each seat observes the outcome produced beneath it
/// and may transform, defer or short-circuit it. One pipeline value can
/// drive any number of executions, on the caller's thread ([`run`]) or
/// over a scheduler ([`spawn`]).
///
/// [`run`]: Pipeline::run
/// [`spawn`]: Pipeline::spawn
///
/// ```
/// use std::time::Duration;
/// use steadfast::{Fallback, Pipeline, RetryPolicy};
///
/// let retry = RetryPolicy::builder()
///     .max_attempts(3)
///     .fixed_delay(Duration::from_millis(5))
///     .build()?;
/// let pipeline = Pipeline::new()
///     .fallback(Fallback::value("cached"))?
///     .retry(retry)?;
///
/// let result: Result<&str, _> = pipeline.run(|_| Err::<&str, _>("down"));
/// assert_eq!(result, Ok("cached"));
/// # Ok::<(), steadfast::BuildError>(())
/// ```
#[derive(Clone)]
pub struct Pipeline<T, E> {
    seats: Vec<PolicySeat<T, E>>,
    listeners: ListenerSet<T, E>,
    clock: Arc<dyn Clock>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<T, E> Default for Pipeline<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Pipeline<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            seats: Vec::new(),
            listeners: ListenerSet::new(),
            clock: default_clock(),
            scheduler: None,
        }
    }

    /// Adds the retry seat; at most one per pipeline.
    pub fn retry(mut self, policy: RetryPolicy<T, E>) -> Result<Self, BuildError> {
        if self.seats.iter().any(|s| matches!(s, PolicySeat::Retry(_))) {
            return Err(BuildError::DuplicatePolicy("retry"));
        }
        self.seats.push(PolicySeat::Retry(policy));
        Ok(self)
    }

    /// Adds the breaker seat; at most one per pipeline. The breaker
    /// itself may be shared with other pipelines.
    pub fn breaker(mut self, breaker: CircuitBreaker<T, E>) -> Result<Self, BuildError> {
        if self
            .seats
            .iter()
            .any(|s| matches!(s, PolicySeat::Breaker(_)))
        {
            return Err(BuildError::DuplicatePolicy("circuit breaker"));
        }
        self.seats.push(PolicySeat::Breaker(breaker));
        Ok(self)
    }

    /// Adds the fallback seat; at most one per pipeline.
    pub fn fallback(mut self, fallback: Fallback<T, E>) -> Result<Self, BuildError> {
        if self
            .seats
            .iter()
            .any(|s| matches!(s, PolicySeat::Fallback(_)))
        {
            return Err(BuildError::DuplicatePolicy("fallback"));
        }
        self.seats.push(PolicySeat::Fallback(fallback));
        Ok(self)
    }

    /// Adds a custom seat built from `factory` once per execution; see
    /// [`PolicyExec`] for the contract.
    pub fn custom(
        mut self,
        factory: impl Fn() -> Box<dyn PolicyExec<T, E>> + Send + Sync + 'static,
    ) -> Self {
        self.seats.push(PolicySeat::Custom(Arc::new(factory)));
        self
    }

    /// Overrides the monotonic time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Scheduler used for async executions and scheduler-dispatched
    /// listeners; defaults to the ambient tokio runtime at spawn time.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        self.listeners.complete.push(Entry::inline(f));
        self
    }

    /// Like [`Pipeline::on_complete`], dispatched through the scheduler.
    pub fn on_complete_async(mut self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        self.listeners.complete.push(Entry::scheduled(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        self.listeners.success.push(Entry::inline(f));
        self
    }

    pub fn on_success_async(mut self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        self.listeners.success.push(Entry::scheduled(f));
        self
    }

    pub fn on_failure(mut self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        self.listeners.failure.push(Entry::inline(f));
        self
    }

    pub fn on_failure_async(mut self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        self.listeners.failure.push(Entry::scheduled(f));
        self
    }

    /// Fires for every attempt whose outcome was classified a failure,
    /// the final one included.
    pub fn on_failed_attempt(mut self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        self.listeners.failed_attempt.push(Entry::inline(f));
        self
    }

    pub fn on_failed_attempt_async(
        mut self,
        f: impl Fn(&Event<T, E>) + Send + Sync + 'static,
    ) -> Self {
        self.listeners.failed_attempt.push(Entry::scheduled(f));
        self
    }

    /// Fires before each wait for another attempt.
    pub fn on_retry(mut self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        self.listeners.retry.push(Entry::inline(f));
        self
    }

    pub fn on_retry_async(mut self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        self.listeners.retry.push(Entry::scheduled(f));
        self
    }

    /// Fresh executors for one execution, outermost-first.
    pub(crate) fn executors(&self) -> Vec<Box<dyn PolicyExec<T, E>>> {
        self.seats
            .iter()
            .map(|seat| match seat {
                PolicySeat::Retry(policy) => Box::new(RetryExec::new(
                    policy.clone(),
                    self.clock.clone(),
                )) as Box<dyn PolicyExec<T, E>>,
                PolicySeat::Breaker(breaker) => Box::new(BreakerExec::new(breaker.clone())),
                PolicySeat::Fallback(fallback) => Box::new(FallbackExec::new(fallback.clone())),
                PolicySeat::Custom(factory) => factory(),
            })
            .collect()
    }

    /// Runs `op` on the caller's thread until a terminal outcome.
    pub fn run<F>(&self, op: F) -> Result<T, Error<E>>
    where
        F: FnMut(&ExecutionContext<T, E>) -> Result<T, E>,
    {
        self.execute_sync(CancelToken::new(), op)
    }

    /// Like [`Pipeline::run`], with an externally held token another
    /// thread may use to interrupt waits between attempts. A running
    /// attempt is never force-interrupted; interruption takes effect at
    /// the next policy boundary.
    pub fn run_with<F>(&self, token: CancelToken, op: F) -> Result<T, Error<E>>
    where
        F: FnMut(&ExecutionContext<T, E>) -> Result<T, E>,
    {
        self.execute_sync(token, op)
    }

    /// Runs a trait-shaped operation; closures go through
    /// [`Pipeline::run`].
    pub fn run_op<O>(&self, op: O) -> Result<T, Error<E>>
    where
        O: SyncOperation<T, E>,
    {
        self.execute_sync(CancelToken::new(), op)
    }

    fn execute_sync<O>(&self, token: CancelToken, mut op: O) -> Result<T, Error<E>>
    where
        O: SyncOperation<T, E>,
    {
        let mut executors = self.executors();
        let listeners = Listeners::new(self.listeners.clone(), self.scheduler.clone());
        let mut ctx = ExecutionContext::new(self.clock.now(), token.clone());

        loop {
            if token.is_cancelled() {
                return self.conclude(
                    &listeners,
                    &ctx,
                    Outcome::from_failure(Error::Interrupted),
                    false,
                );
            }
            ctx.begin_cycle();

            let mut rejection = None;
            for (idx, seat) in executors.iter_mut().enumerate() {
                if let Admission::Reject(failure) = seat.before_attempt(&ctx) {
                    rejection = Some((idx, failure));
                    break;
                }
            }

            let (mut outcome, outer, invoked) = match rejection {
                Some((idx, failure)) => {
                    ctx.record(None, Some(failure.clone()));
                    (Outcome::from_failure(failure), idx, false)
                }
                None => {
                    ctx.begin_attempt();
                    let result = op.run(&ctx);
                    ctx.record(
                        result.as_ref().ok().cloned(),
                        result.as_ref().err().map(|e| Error::Operation(e.clone())),
                    );
                    (Outcome::of_attempt(result), executors.len(), true)
                }
            };
            for idx in (0..outer).rev() {
                outcome = executors[idx].on_outcome(&ctx, outcome);
            }

            if outcome.is_complete() {
                return self.conclude(&listeners, &ctx, outcome, invoked);
            }

            let event = self.event(&ctx, &outcome);
            if invoked {
                listeners.failed_attempt(&event);
            }
            listeners.retry(&event);
            if !self.clock.sleep(outcome.wait(), &token) {
                tracing::debug!("inter-attempt wait interrupted");
                return self.conclude(
                    &listeners,
                    &ctx,
                    Outcome::from_failure(Error::Interrupted),
                    false,
                );
            }
        }
    }

    /// Starts an asynchronous execution of `op`.
    ///
    /// Each attempt runs as a scheduled task; between attempts control
    /// returns to the scheduler. Without a configured scheduler this
    /// uses the ambient tokio runtime and panics outside one.
    pub fn spawn<F, Fut>(&self, op: F) -> ExecutionHandle<T, E>
    where
        F: Fn(ExecutionContext<T, E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let op: AsyncOp<T, E> = Arc::new(move |ctx| op(ctx).boxed());
        self.spawn_inner(op)
    }

    /// Starts an asynchronous execution of a trait-shaped operation.
    pub fn spawn_op(&self, op: Arc<dyn Operation<T, E>>) -> ExecutionHandle<T, E> {
        let op: AsyncOp<T, E> = Arc::new(move |ctx| {
            let op = op.clone();
            async move { op.execute(ctx).await }.boxed()
        });
        self.spawn_inner(op)
    }

    fn spawn_inner(&self, op: AsyncOp<T, E>) -> ExecutionHandle<T, E> {
        let scheduler = self
            .scheduler
            .clone()
            .unwrap_or_else(|| Arc::new(TokioScheduler::current()));
        let listeners = Listeners::new(self.listeners.clone(), Some(scheduler.clone()));
        launch(self.executors(), op, scheduler, self.clock.clone(), listeners)
    }

    fn event(&self, ctx: &ExecutionContext<T, E>, outcome: &Outcome<T, E>) -> Event<T, E> {
        Event::new(outcome, ctx, ctx.elapsed_at(self.clock.now()))
    }

    fn conclude(
        &self,
        listeners: &Listeners<T, E>,
        ctx: &ExecutionContext<T, E>,
        outcome: Outcome<T, E>,
        invoked: bool,
    ) -> Result<T, Error<E>> {
        let event = self.event(ctx, &outcome);
        if invoked && !outcome.is_success() {
            listeners.failed_attempt(&event);
        }
        let kind = if outcome.is_success() {
            Terminal::Success
        } else {
            Terminal::Failure
        };
        listeners.terminal(kind, event);
        outcome.into_result()
    }
}
