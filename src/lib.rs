//! Policy-driven resilience for fallible operations.
//!
//! `steadfast` wraps an arbitrary operation with retry, circuit-breaking
//! and fallback behavior. Policies compose into a [`Pipeline`]
//! (outermost-first, the operation innermost); each seat observes the
//! outcome produced beneath it and may transform, defer or
//! short-circuit it. The same composition drives a blocking runner on
//! the caller's thread and a scheduler-backed async runner with
//! identical semantics.
//!
//! ```no_run
//! use std::time::Duration;
//! use steadfast::prelude::*;
//!
//! # fn fetch() -> Result<String, String> { Ok("ok".into()) }
//! # fn main() -> Result<(), steadfast::BuildError> {
//! let retry = RetryPolicy::builder()
//!     .max_attempts(4)
//!     .exponential_delay(Duration::from_millis(50), 2.0, Duration::from_secs(1))
//!     .jitter_factor(0.2)
//!     .build()?;
//! let breaker = CircuitBreaker::builder()
//!     .failure_threshold(Threshold::of(3, 5))
//!     .delay(Duration::from_secs(10))
//!     .build()?;
//!
//! let pipeline = Pipeline::new()
//!     .fallback(Fallback::value("cached".to_string()))?
//!     .retry(retry)?
//!     .breaker(breaker)?;
//!
//! let value = pipeline.run(|_| fetch());
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub use async_trait::async_trait;

pub use backoff::{Backoff, Jitter};
pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerBuilder, Threshold};
pub use clock::{Clock, SystemClock};
pub use context::{CancelToken, ExecutionContext};
pub use error::{BuildError, Error};
pub use events::Event;
pub use exec::{Admission, PolicyExec};
pub use fallback::Fallback;
pub use handle::ExecutionHandle;
pub use operation::{Operation, SyncOperation};
pub use outcome::Outcome;
pub use pipeline::Pipeline;
pub use retry::{RetryLimit, RetryPolicy, RetryPolicyBuilder};
pub use scheduler::{ScheduleHandle, Scheduler, TokioScheduler};

pub mod backoff;
pub mod breaker;
pub mod clock;
pub mod context;
pub mod error;
pub mod events;
pub mod exec;
pub mod fallback;
pub mod handle;
pub mod operation;
pub mod outcome;
pub mod pipeline;
pub mod retry;
pub mod scheduler;

pub mod prelude {
    pub use crate::backoff::{Backoff, Jitter};
    pub use crate::breaker::{BreakerState, CircuitBreaker, Threshold};
    pub use crate::context::{CancelToken, ExecutionContext};
    pub use crate::error::{BuildError, Error};
    pub use crate::events::Event;
    pub use crate::fallback::Fallback;
    pub use crate::handle::ExecutionHandle;
    pub use crate::pipeline::Pipeline;
    pub use crate::retry::{RetryLimit, RetryPolicy, RetryPolicyBuilder};

    // prelude justification: custom schedulers and clocks are the usual
    // seams in tests
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::scheduler::{ScheduleHandle, Scheduler, TokioScheduler};

    // prelude justification: needed whenever an operation is a struct
    // rather than a closure
    pub use crate::operation::{Operation, SyncOperation};

    pub use crate::async_trait;
}
