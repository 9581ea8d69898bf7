use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Error produced by [`FlakyService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError(pub &'static str);

/// One scripted response.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Yield(bool),
    Fail(&'static str),
}

/// Scripted fallible service: each call pops the next step; once the
/// script runs out, every call fails.
#[derive(Clone)]
pub struct FlakyService {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    script: VecDeque<Step>,
    calls: u32,
}

impl FlakyService {
    pub fn scripted(script: impl IntoIterator<Item = Step>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                script: script.into_iter().collect(),
                calls: 0,
            })),
        }
    }

    pub fn always_failing() -> Self {
        Self::scripted([])
    }

    pub fn calls(&self) -> u32 {
        self.inner.lock().calls
    }

    pub fn call(&self) -> Result<bool, ServiceError> {
        let mut inner = self.inner.lock();
        inner.calls += 1;
        match inner.script.pop_front() {
            Some(Step::Yield(value)) => Ok(value),
            Some(Step::Fail(message)) => Err(ServiceError(message)),
            None => Err(ServiceError("script exhausted")),
        }
    }
}
