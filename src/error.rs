use std::time::Duration;

/// Failure surfaced by an execution.
///
/// The operation's own error type `E` is carried through the policy stack
/// untouched; the remaining variants are raised by the library itself so
/// callers can tell them apart at the final boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error<E> {
    /// The operation's own failure, surfaced once retries are exhausted
    /// or aborted.
    #[error("operation failed")]
    Operation(E),

    /// No attempt was admitted because the circuit breaker is open.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// A sync execution was interrupted while waiting between attempts.
    #[error("execution interrupted")]
    Interrupted,

    /// The execution was cancelled through its handle or token.
    #[error("execution cancelled")]
    Cancelled,

    /// No terminal outcome was published within the deadline given to
    /// [`get_timeout`](crate::ExecutionHandle::get_timeout). The
    /// underlying execution keeps running.
    #[error("no terminal outcome within {0:?}")]
    Timeout(Duration),
}

impl<E> Error<E> {
    /// The operation failure carried by this error, if that is what it is.
    pub fn operation(&self) -> Option<&E> {
        match self {
            Error::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            Error::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen)
    }
}

/// Configuration rejected when a policy or pipeline is built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("jitter_factor must lie within [0, 1], got {0}")]
    JitterFactorOutOfRange(f64),

    #[error("delay_factor must be at least 1, got {0}")]
    DelayFactorTooSmall(f64),

    #[error("random delay range requires min <= max")]
    InvalidDelayRange,

    #[error("threshold requires 1 <= n <= m, got {n} of {m}")]
    InvalidThreshold { n: u32, m: u32 },

    #[error("{0} policy already configured on this pipeline")]
    DuplicatePolicy(&'static str),
}
