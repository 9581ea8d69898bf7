use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Cancellable handle to a scheduled task.
pub trait ScheduleHandle: Send + Sync {
    /// Prevents a not-yet-finished task from running to completion;
    /// returns whether cancellation took effect.
    fn cancel(&self) -> bool;
}

/// Minimal scheduler consumed by the async runner: run a task after a
/// delay, with best-effort cancellation. The engine only submits
/// short-lived tasks and never holds its own locks across a submission.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Box<dyn ScheduleHandle>;
}

/// Scheduler over a tokio runtime handle.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler over the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime, like `tokio::spawn` does.
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Box<dyn ScheduleHandle> {
        let join = self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        });
        Box::new(TokioHandle { join })
    }
}

struct TokioHandle {
    join: JoinHandle<()>,
}

impl ScheduleHandle for TokioHandle {
    fn cancel(&self) -> bool {
        if self.join.is_finished() {
            return false;
        }
        self.join.abort();
        true
    }
}
