use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, default_clock};
use crate::error::{BuildError, Error};
use crate::retry::Classifier;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Normal operation, attempts are admitted.
    Closed,
    /// Attempts are rejected until the cooldown elapses.
    Open,
    /// A bounded number of probes test whether the guarded resource
    /// recovered.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// `n` outcomes out of the last `m` recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    n: u32,
    m: u32,
}

impl Threshold {
    /// `n` out of the last `m`; validated when the breaker is built.
    pub fn of(n: u32, m: u32) -> Self {
        Self { n, m }
    }

    /// `n` consecutive outcomes.
    pub fn consecutive(n: u32) -> Self {
        Self { n, m: n }
    }

    pub fn count(&self) -> u32 {
        self.n
    }

    pub fn window(&self) -> u32 {
        self.m
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.n == 0 || self.n > self.m {
            Err(BuildError::InvalidThreshold {
                n: self.n,
                m: self.m,
            })
        } else {
            Ok(())
        }
    }
}

/// Bit-packed ring of the last `capacity` outcomes, with a running count
/// of set bits so threshold checks never scan.
#[derive(Debug, Clone)]
struct Ring {
    bits: Vec<u64>,
    capacity: u32,
    len: u32,
    head: u32,
    ones: u32,
}

impl Ring {
    fn new(capacity: u32) -> Self {
        let blocks = (capacity as usize).div_ceil(64).max(1);
        Self {
            bits: vec![0; blocks],
            capacity,
            len: 0,
            head: 0,
            ones: 0,
        }
    }

    fn push(&mut self, bit: bool) {
        if self.len == self.capacity {
            if self.get(self.head) {
                self.ones -= 1;
            }
        } else {
            self.len += 1;
        }
        self.set(self.head, bit);
        if bit {
            self.ones += 1;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    fn get(&self, idx: u32) -> bool {
        (self.bits[(idx / 64) as usize] >> (idx % 64)) & 1 == 1
    }

    fn set(&mut self, idx: u32, bit: bool) {
        let block = &mut self.bits[(idx / 64) as usize];
        let mask = 1u64 << (idx % 64);
        if bit {
            *block |= mask;
        } else {
            *block &= !mask;
        }
    }

    fn ones(&self) -> u32 {
        self.ones
    }

    fn clear(&mut self) {
        self.bits.fill(0);
        self.len = 0;
        self.head = 0;
        self.ones = 0;
    }
}

#[derive(Debug)]
struct BreakerCore {
    state: BreakerState,
    /// Closed-state window; a set bit is a failure.
    failures: Ring,
    /// Half-open window; a set bit is a successful probe.
    probes: Ring,
    opened_at: Option<Instant>,
    inflight_probes: u32,
}

struct BreakerShared<T, E> {
    failure_threshold: Threshold,
    success_threshold: Threshold,
    delay: Duration,
    failure_classifier: Option<Classifier<T, E>>,
    clock: Arc<dyn Clock>,
    core: Mutex<BreakerCore>,
}

/// Shared circuit breaker.
///
/// Clones are handles onto the same state; one breaker may gate any
/// number of concurrent executions. Admission and outcome recording run
/// under a single breaker-scoped lock, so state transitions are
/// linearizable across executions.
#[derive(Clone)]
pub struct CircuitBreaker<T, E> {
    shared: Arc<BreakerShared<T, E>>,
}

impl<T, E> CircuitBreaker<T, E> {
    pub fn builder() -> CircuitBreakerBuilder<T, E> {
        CircuitBreakerBuilder::new()
    }

    pub fn state(&self) -> BreakerState {
        self.shared.core.lock().state
    }

    /// Failures recorded in the current closed-state window.
    pub fn recent_failures(&self) -> u32 {
        self.shared.core.lock().failures.ones()
    }

    /// Manually trips the breaker open.
    pub fn open(&self) {
        let now = self.shared.clock.now();
        Self::to_open(&mut self.shared.core.lock(), now);
    }

    /// Manually closes the breaker and clears its windows.
    pub fn close(&self) {
        Self::to_closed(&mut self.shared.core.lock());
    }

    /// Admission check. Admission in half-open holds a probe slot until
    /// the outcome is recorded or released.
    pub(crate) fn try_acquire(&self) -> Result<(), Error<E>> {
        let mut core = self.shared.core.lock();
        match core.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let now = self.shared.clock.now();
                let expired = core
                    .opened_at
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.shared.delay);
                if expired {
                    Self::to_half_open(&mut core);
                    core.inflight_probes = 1;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => {
                if core.inflight_probes < self.shared.success_threshold.window() {
                    core.inflight_probes += 1;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen)
                }
            }
        }
    }

    /// Releases a held probe slot without recording an outcome (the
    /// attempt never ran to completion at this seat's level).
    pub(crate) fn release(&self) {
        let mut core = self.shared.core.lock();
        if core.state == BreakerState::HalfOpen {
            core.inflight_probes = core.inflight_probes.saturating_sub(1);
        }
    }

    /// Classifies and records one attempt outcome, driving transitions.
    pub(crate) fn record_outcome(&self, value: Option<&T>, failure: Option<&Error<E>>) {
        let failed = match &self.shared.failure_classifier {
            Some(classify) => classify(value, failure),
            None => failure.is_some(),
        };
        self.record(failed);
    }

    fn record(&self, failed: bool) {
        let mut core = self.shared.core.lock();
        match core.state {
            BreakerState::Closed => {
                core.failures.push(failed);
                if core.failures.ones() >= self.shared.failure_threshold.count() {
                    let now = self.shared.clock.now();
                    Self::to_open(&mut core, now);
                }
            }
            BreakerState::HalfOpen => {
                core.inflight_probes = core.inflight_probes.saturating_sub(1);
                if failed {
                    let now = self.shared.clock.now();
                    Self::to_open(&mut core, now);
                } else {
                    core.probes.push(true);
                    if core.probes.ones() >= self.shared.success_threshold.count() {
                        Self::to_closed(&mut core);
                    }
                }
            }
            BreakerState::Open => {
                // a late outcome from before the transition; nothing to record
            }
        }
    }

    fn to_open(core: &mut BreakerCore, now: Instant) {
        if core.state != BreakerState::Open {
            tracing::warn!(from = %core.state, "circuit breaker opened");
        }
        core.state = BreakerState::Open;
        core.opened_at = Some(now);
        core.failures.clear();
        core.probes.clear();
        core.inflight_probes = 0;
    }

    fn to_half_open(core: &mut BreakerCore) {
        tracing::info!("circuit breaker half-open, admitting probes");
        core.state = BreakerState::HalfOpen;
        core.probes.clear();
        core.inflight_probes = 0;
    }

    fn to_closed(core: &mut BreakerCore) {
        if core.state != BreakerState::Closed {
            tracing::info!("circuit breaker closed");
        }
        core.state = BreakerState::Closed;
        core.opened_at = None;
        core.failures.clear();
        core.probes.clear();
        core.inflight_probes = 0;
    }
}

impl<T, E> fmt::Debug for CircuitBreaker<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failure_threshold", &self.shared.failure_threshold)
            .field("success_threshold", &self.shared.success_threshold)
            .field("delay", &self.shared.delay)
            .finish()
    }
}

/// Builder for [`CircuitBreaker`]; `build` validates the thresholds.
pub struct CircuitBreakerBuilder<T, E> {
    failure_threshold: Threshold,
    success_threshold: Threshold,
    delay: Duration,
    failure_classifier: Option<Classifier<T, E>>,
    clock: Arc<dyn Clock>,
}

impl<T, E> Default for CircuitBreakerBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> CircuitBreakerBuilder<T, E> {
    pub fn new() -> Self {
        Self {
            failure_threshold: Threshold::consecutive(5),
            success_threshold: Threshold::consecutive(1),
            delay: Duration::from_secs(30),
            failure_classifier: None,
            clock: default_clock(),
        }
    }

    /// Opens after `n` failures within the last `m` outcomes.
    pub fn failure_threshold(mut self, threshold: Threshold) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Closes after `n` successful probes within the last `m`; `m` is
    /// also the half-open probe budget.
    pub fn success_threshold(mut self, threshold: Threshold) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Cooldown before an open breaker admits a probe.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Custom failure classification; the default treats any failure as
    /// a failure and any value as a success.
    pub fn failure_if(
        mut self,
        predicate: impl Fn(Option<&T>, Option<&Error<E>>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.failure_classifier = Some(Arc::new(predicate));
        self
    }

    /// Overrides the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<CircuitBreaker<T, E>, BuildError> {
        self.failure_threshold.validate()?;
        self.success_threshold.validate()?;
        Ok(CircuitBreaker {
            shared: Arc::new(BreakerShared {
                failure_threshold: self.failure_threshold,
                success_threshold: self.success_threshold,
                delay: self.delay,
                failure_classifier: self.failure_classifier,
                clock: self.clock,
                core: Mutex::new(BreakerCore {
                    state: BreakerState::Closed,
                    failures: Ring::new(self.failure_threshold.window()),
                    probes: Ring::new(self.success_threshold.window()),
                    opened_at: None,
                    inflight_probes: 0,
                }),
            }),
        })
    }
}
