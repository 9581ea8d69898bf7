use std::time::Duration;

use crate::error::Error;

/// What an attempt produced: a value or a failure, never both.
#[derive(Debug, Clone)]
enum Payload<T, E> {
    Value(T),
    Failure(Error<E>),
}

/// The uniform outcome passed up the policy stack.
///
/// Each policy receives the outcome produced beneath it and returns either
/// a terminal outcome, or a non-terminal one carrying the wait the runner
/// honors before re-entering the stack for another attempt.
#[derive(Debug, Clone)]
pub struct Outcome<T, E> {
    payload: Payload<T, E>,
    complete: bool,
    success: bool,
    wait: Duration,
}

impl<T, E> Outcome<T, E> {
    /// Terminal success carrying `value`.
    pub fn success(value: T) -> Self {
        Self {
            payload: Payload::Value(value),
            complete: true,
            success: true,
            wait: Duration::ZERO,
        }
    }

    /// Terminal failure.
    pub fn from_failure(failure: Error<E>) -> Self {
        Self {
            payload: Payload::Failure(failure),
            complete: true,
            success: false,
            wait: Duration::ZERO,
        }
    }

    /// Raw outcome of one attempt, provisionally terminal; the policies
    /// above reclassify it.
    pub fn of_attempt(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(failure) => Self::from_failure(Error::Operation(failure)),
        }
    }

    /// Downgrades to a non-terminal outcome asking for another attempt
    /// after `wait`.
    pub fn retry_after(mut self, wait: Duration) -> Self {
        self.complete = false;
        self.success = false;
        self.wait = wait;
        self
    }

    /// Re-marks the outcome terminal with the given classification.
    pub(crate) fn complete_with(mut self, success: bool) -> Self {
        self.complete = true;
        self.success = success;
        self.wait = Duration::ZERO;
        self
    }

    pub fn value(&self) -> Option<&T> {
        match &self.payload {
            Payload::Value(v) => Some(v),
            Payload::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Error<E>> {
        match &self.payload {
            Payload::Value(_) => None,
            Payload::Failure(f) => Some(f),
        }
    }

    /// Whether this outcome is terminal for the execution.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Terminal and classified successful.
    pub fn is_success(&self) -> bool {
        self.complete && self.success
    }

    /// Delay the runner honors before the next attempt; zero for
    /// terminal outcomes.
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Collapses the outcome for the caller: failures become `Err`, any
    /// carried value becomes `Ok`. A value the producing policy
    /// classified as a failure still comes back as `Ok`; the
    /// classification is visible through failure listeners.
    pub fn into_result(self) -> Result<T, Error<E>> {
        match self.payload {
            Payload::Value(v) => Ok(v),
            Payload::Failure(f) => Err(f),
        }
    }
}
