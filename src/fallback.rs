use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::Error;

type FallbackFn<T, E> = Arc<
    dyn Fn(Option<&T>, Option<&Error<E>>, &ExecutionContext<T, E>) -> Result<T, E> + Send + Sync,
>;

/// Substitutes a terminal failure with an alternative result.
///
/// The fallback function may itself fail, in which case its failure
/// replaces the inner one. With `asynchronous()` set, the async runner
/// computes the fallback on the scheduler rather than inline.
#[derive(Clone)]
pub struct Fallback<T, E> {
    compute: FallbackFn<T, E>,
    asynchronous: bool,
}

impl<T, E> Fallback<T, E> {
    /// Fallback computed from the failed outcome and execution context.
    pub fn of(
        compute: impl Fn(Option<&T>, Option<&Error<E>>, &ExecutionContext<T, E>) -> Result<T, E>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            compute: Arc::new(compute),
            asynchronous: false,
        }
    }

    /// Fixed substitute value.
    pub fn value(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::of(move |_, _, _| Ok(value.clone()))
    }

    /// Defers the fallback computation to the scheduler in async mode.
    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    pub(crate) fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    pub(crate) fn apply(
        &self,
        value: Option<&T>,
        failure: Option<&Error<E>>,
        ctx: &ExecutionContext<T, E>,
    ) -> Result<T, E> {
        (self.compute)(value, failure, ctx)
    }
}

impl<T, E> fmt::Debug for Fallback<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallback")
            .field("asynchronous", &self.asynchronous)
            .finish()
    }
}
