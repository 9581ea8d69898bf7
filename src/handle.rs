use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::context::{CancelToken, ExecutionContext};
use crate::error::Error;
use crate::events::{Entry, Event, Listeners, Terminal};
use crate::exec::{Admission, PolicyExec};
use crate::outcome::Outcome;
use crate::scheduler::{ScheduleHandle, Scheduler};

pub(crate) type AsyncOp<T, E> =
    Arc<dyn Fn(ExecutionContext<T, E>) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Shared state of one asynchronous execution. Every attempt is a task
/// submitted to the scheduler; re-entry after a delay is a newly
/// scheduled task carrying this state, not a nested continuation.
struct Execution<T, E> {
    executors: Mutex<Vec<Box<dyn PolicyExec<T, E>>>>,
    ctx: Mutex<ExecutionContext<T, E>>,
    op: AsyncOp<T, E>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    listeners: Listeners<T, E>,
    token: CancelToken,
    pending: Mutex<Option<Box<dyn ScheduleHandle>>>,
    outcome_tx: watch::Sender<Option<Outcome<T, E>>>,
}

pub(crate) fn launch<T, E>(
    executors: Vec<Box<dyn PolicyExec<T, E>>>,
    op: AsyncOp<T, E>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    listeners: Listeners<T, E>,
) -> ExecutionHandle<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let token = CancelToken::new();
    let (outcome_tx, outcome_rx) = watch::channel(None);
    let execution = Arc::new(Execution {
        executors: Mutex::new(executors),
        ctx: Mutex::new(ExecutionContext::new(clock.now(), token.clone())),
        op,
        scheduler,
        clock,
        listeners,
        token,
        pending: Mutex::new(None),
        outcome_tx,
    });
    schedule_attempt(&execution, Duration::ZERO);
    ExecutionHandle {
        execution,
        outcome_rx,
    }
}

fn schedule_attempt<T, E>(execution: &Arc<Execution<T, E>>, delay: Duration)
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let this = execution.clone();
    let task = async move { attempt(this).await }.boxed();
    let handle = execution.scheduler.schedule(delay, task);
    *execution.pending.lock() = Some(handle);
}

/// One attempt cycle: admission outermost-first, at most one operation
/// invocation, then the outcome fold.
async fn attempt<T, E>(execution: Arc<Execution<T, E>>)
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    if execution.token.is_cancelled() {
        publish(&execution, Outcome::from_failure(Error::Cancelled));
        return;
    }

    let rejection = {
        let mut executors = execution.executors.lock();
        let mut ctx = execution.ctx.lock();
        ctx.begin_cycle();
        let mut rejection = None;
        for (idx, seat) in executors.iter_mut().enumerate() {
            if let Admission::Reject(failure) = seat.before_attempt(&ctx) {
                rejection = Some((idx, failure));
                break;
            }
        }
        rejection
    };

    match rejection {
        Some((idx, failure)) => {
            execution.ctx.lock().record(None, Some(failure.clone()));
            advance(&execution, Outcome::from_failure(failure), idx, false);
        }
        None => {
            let snapshot = {
                let mut ctx = execution.ctx.lock();
                ctx.begin_attempt();
                ctx.clone()
            };
            let result = (execution.op)(snapshot).await;
            if execution.token.is_cancelled() {
                // the attempt lost the race against cancel(); its outcome
                // is discarded
                return;
            }
            {
                let mut ctx = execution.ctx.lock();
                ctx.record(
                    result.as_ref().ok().cloned(),
                    result.as_ref().err().map(|e| Error::Operation(e.clone())),
                );
            }
            let outer = execution.executors.lock().len();
            advance(&execution, Outcome::of_attempt(result), outer, true);
        }
    }
}

/// Folds the outcome through executors `outer-1 ..= 0`, hopping to the
/// scheduler whenever a seat asks for deferred handling.
fn advance<T, E>(
    execution: &Arc<Execution<T, E>>,
    mut outcome: Outcome<T, E>,
    mut outer: usize,
    invoked: bool,
) where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    while outer > 0 {
        let idx = outer - 1;
        if execution.executors.lock()[idx].defer_outcome(&outcome) {
            let this = execution.clone();
            let task = async move {
                let next = {
                    let mut executors = this.executors.lock();
                    let ctx = this.ctx.lock();
                    executors[idx].on_outcome(&ctx, outcome)
                };
                advance(&this, next, idx, invoked);
            }
            .boxed();
            let handle = execution.scheduler.schedule(Duration::ZERO, task);
            *execution.pending.lock() = Some(handle);
            return;
        }
        outcome = {
            let mut executors = execution.executors.lock();
            let ctx = execution.ctx.lock();
            executors[idx].on_outcome(&ctx, outcome)
        };
        outer = idx;
    }
    settle(execution, outcome, invoked);
}

fn settle<T, E>(execution: &Arc<Execution<T, E>>, outcome: Outcome<T, E>, invoked: bool)
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let event = {
        let ctx = execution.ctx.lock();
        Event::new(&outcome, &ctx, ctx.elapsed_at(execution.clock.now()))
    };

    if !outcome.is_complete() {
        if invoked {
            execution.listeners.failed_attempt(&event);
        }
        execution.listeners.retry(&event);
        if execution.token.is_cancelled() {
            publish(execution, Outcome::from_failure(Error::Cancelled));
            return;
        }
        tracing::debug!(
            wait_ms = outcome.wait().as_millis() as u64,
            "scheduling next attempt"
        );
        schedule_attempt(execution, outcome.wait());
        return;
    }

    if invoked && !outcome.is_success() {
        execution.listeners.failed_attempt(&event);
    }
    publish(execution, outcome);
}

/// Publishes the terminal outcome to the handle first, then notifies
/// listeners. Returns whether this call won the publication.
fn publish<T, E>(execution: &Arc<Execution<T, E>>, outcome: Outcome<T, E>) -> bool
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let published = execution.outcome_tx.send_if_modified(|slot| {
        if slot.is_some() {
            false
        } else {
            *slot = Some(outcome.clone());
            true
        }
    });
    if !published {
        return false;
    }
    let event = {
        let ctx = execution.ctx.lock();
        Event::new(&outcome, &ctx, ctx.elapsed_at(execution.clock.now()))
    };
    let kind = if outcome.is_success() {
        Terminal::Success
    } else {
        Terminal::Failure
    };
    execution.listeners.terminal(kind, event);
    true
}

/// Handle to an asynchronous execution.
///
/// Clones observe the same execution. Dropping the handle does not
/// cancel the attempts.
pub struct ExecutionHandle<T, E> {
    execution: Arc<Execution<T, E>>,
    outcome_rx: watch::Receiver<Option<Outcome<T, E>>>,
}

impl<T, E> Clone for ExecutionHandle<T, E> {
    fn clone(&self) -> Self {
        Self {
            execution: self.execution.clone(),
            outcome_rx: self.outcome_rx.clone(),
        }
    }
}

impl<T, E> ExecutionHandle<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Waits for the terminal outcome.
    pub async fn get(&self) -> Result<T, Error<E>> {
        let mut rx = self.outcome_rx.clone();
        let outcome = {
            let guard = match rx.wait_for(|slot| slot.is_some()).await {
                Ok(guard) => guard,
                // the sender lives in self.execution, so the channel
                // cannot close before a terminal outcome is published
                Err(_) => return Err(Error::Cancelled),
            };
            (*guard).clone()
        };
        match outcome {
            Some(outcome) => outcome.into_result(),
            None => Err(Error::Cancelled),
        }
    }

    /// Waits up to `timeout` for the terminal outcome. Failing with
    /// [`Error::Timeout`] leaves the underlying execution running.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<T, Error<E>> {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    /// The terminal outcome, if already published.
    pub fn outcome(&self) -> Option<Outcome<T, E>> {
        self.outcome_rx.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        self.outcome_rx.borrow().is_some()
    }

    /// Cancels the execution: sets the context's cancellation flag,
    /// cancels any pending scheduled attempt, and publishes a terminal
    /// [`Error::Cancelled`] outcome. A running attempt is not
    /// interrupted, but its outcome is discarded. Returns `false` when a
    /// terminal outcome had already been published.
    pub fn cancel(&self) -> bool {
        if self.is_done() {
            return false;
        }
        self.execution.token.cancel();
        if let Some(pending) = self.execution.pending.lock().take() {
            pending.cancel();
        }
        publish(&self.execution, Outcome::from_failure(Error::Cancelled))
    }

    /// The execution's cancellation token, for cooperative operations.
    pub fn cancel_token(&self) -> CancelToken {
        self.execution.token.clone()
    }

    /// Runs `f` once the execution completes; immediately if it already
    /// has.
    pub fn on_complete(&self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> &Self {
        self.execution.listeners.add_terminal(None, Entry::inline(f));
        self
    }

    /// Like [`ExecutionHandle::on_complete`], dispatched through the
    /// scheduler.
    pub fn on_complete_async(&self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> &Self {
        self.execution
            .listeners
            .add_terminal(None, Entry::scheduled(f));
        self
    }

    pub fn on_success(&self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> &Self {
        self.execution
            .listeners
            .add_terminal(Some(Terminal::Success), Entry::inline(f));
        self
    }

    pub fn on_success_async(&self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> &Self {
        self.execution
            .listeners
            .add_terminal(Some(Terminal::Success), Entry::scheduled(f));
        self
    }

    pub fn on_failure(&self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> &Self {
        self.execution
            .listeners
            .add_terminal(Some(Terminal::Failure), Entry::inline(f));
        self
    }

    pub fn on_failure_async(&self, f: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> &Self {
        self.execution
            .listeners
            .add_terminal(Some(Terminal::Failure), Entry::scheduled(f));
        self
    }
}
