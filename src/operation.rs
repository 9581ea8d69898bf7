use async_trait::async_trait;

use crate::context::ExecutionContext;

/// Synchronous user operation driven by the caller-thread runner.
///
/// Implemented for any `FnMut(&ExecutionContext<T, E>) -> Result<T, E>`;
/// closures that don't care about the context just ignore the argument.
pub trait SyncOperation<T, E> {
    fn run(&mut self, ctx: &ExecutionContext<T, E>) -> Result<T, E>;
}

impl<T, E, F> SyncOperation<T, E> for F
where
    F: FnMut(&ExecutionContext<T, E>) -> Result<T, E>,
{
    fn run(&mut self, ctx: &ExecutionContext<T, E>) -> Result<T, E> {
        self(ctx)
    }
}

/// Asynchronous user operation for struct-shaped call sites; plain async
/// closures go straight into [`Pipeline::spawn`](crate::Pipeline::spawn).
///
/// The context is a read-only snapshot taken before the attempt. It
/// shares the execution's cancellation token, so long-running operations
/// can poll [`ExecutionContext::is_cancelled`] and bail out
/// cooperatively; the engine itself never force-interrupts an attempt.
#[async_trait]
pub trait Operation<T, E>: Send + Sync {
    async fn execute(&self, ctx: ExecutionContext<T, E>) -> Result<T, E>;
}
