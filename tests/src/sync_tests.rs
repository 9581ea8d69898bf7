use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use steadfast::prelude::*;

use crate::flaky::{FlakyService, ServiceError, Step};
use crate::support::ManualClock;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

fn bump(counter: &Arc<AtomicU32>) -> impl Fn(&Event<bool, ServiceError>) + Send + Sync + 'static {
    let counter = counter.clone();
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn exhausted_retries_fire_failure_listeners_with_the_last_value() {
    let service = FlakyService::scripted([
        Step::Fail("boom"),
        Step::Fail("boom"),
        Step::Yield(false),
        Step::Yield(false),
        Step::Yield(true),
    ]);
    let (failed, retried, succeeded, completed) = (counter(), counter(), counter(), counter());
    let failures = Arc::new(Mutex::new(Vec::new()));

    let sink = failures.clone();
    let pipeline = Pipeline::new()
        .retry(
            RetryPolicy::builder()
                .max_attempts(3)
                .retry_when(false)
                .build()
                .expect("valid policy"),
        )
        .expect("single retry seat")
        .on_failed_attempt(bump(&failed))
        .on_retry(bump(&retried))
        .on_success(bump(&succeeded))
        .on_complete(bump(&completed))
        .on_failure(move |event: &Event<bool, ServiceError>| {
            sink.lock().push((event.result, event.attempts));
        });

    let result = pipeline.run(|_: &ExecutionContext<bool, ServiceError>| service.call());

    // the classification failed but the value itself is surfaced
    assert_eq!(result, Ok(false));
    assert_eq!(service.calls(), 3);
    assert_eq!(failed.load(Ordering::SeqCst), 3);
    assert_eq!(retried.load(Ordering::SeqCst), 2);
    assert_eq!(succeeded.load(Ordering::SeqCst), 0);
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(failures.lock().as_slice(), &[(Some(false), 3)]);
}

#[test]
fn attempt_cap_bounds_invocations() {
    let service = FlakyService::always_failing();
    let pipeline = Pipeline::new()
        .retry(
            RetryPolicy::builder()
                .max_attempts(4)
                .build()
                .expect("valid policy"),
        )
        .expect("single retry seat");
    let result = pipeline.run(|_: &ExecutionContext<bool, ServiceError>| service.call());
    assert_eq!(result, Err(Error::Operation(ServiceError("script exhausted"))));
    assert_eq!(service.calls(), 4);
}

#[test]
fn attempts_observed_by_the_operation_increase_by_one() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let pipeline = Pipeline::new()
        .retry(
            RetryPolicy::<bool, ServiceError>::builder()
                .max_attempts(3)
                .build()
                .expect("valid policy"),
        )
        .expect("single retry seat");
    let _ = pipeline.run(|ctx: &ExecutionContext<bool, ServiceError>| {
        sink.lock().push(ctx.attempts());
        Err(ServiceError("down"))
    });
    assert_eq!(observed.lock().as_slice(), &[1, 2, 3]);
}

#[test]
fn abort_preempts_retry_and_surfaces_the_failure() {
    let service = FlakyService::always_failing();
    let pipeline = Pipeline::new()
        .retry(
            RetryPolicy::builder()
                .unlimited_attempts()
                .abort_on(|failure: &Error<ServiceError>| {
                    failure.operation() == Some(&ServiceError("script exhausted"))
                })
                .build()
                .expect("valid policy"),
        )
        .expect("single retry seat");
    let result = pipeline.run(|_: &ExecutionContext<bool, ServiceError>| service.call());
    assert_eq!(result, Err(Error::Operation(ServiceError("script exhausted"))));
    assert_eq!(service.calls(), 1);
}

#[test]
fn exponential_backoff_sleeps_follow_the_schedule() {
    let clock = ManualClock::new();
    let service = FlakyService::always_failing();
    let pipeline = Pipeline::new()
        .clock(clock.clone())
        .retry(
            RetryPolicy::builder()
                .max_attempts(7)
                .exponential_delay(ms(10), 2.0, ms(100))
                .build()
                .expect("valid policy"),
        )
        .expect("single retry seat");

    let _ = pipeline.run(|_: &ExecutionContext<bool, ServiceError>| service.call());

    assert_eq!(service.calls(), 7);
    assert_eq!(
        clock.sleeps(),
        vec![ms(10), ms(20), ms(40), ms(80), ms(100), ms(100)]
    );
}

#[test]
fn max_duration_clamps_the_last_sleep() {
    let clock = ManualClock::new();
    let service = FlakyService::always_failing();
    let pipeline = Pipeline::new()
        .clock(clock.clone())
        .retry(
            RetryPolicy::builder()
                .unlimited_attempts()
                .fixed_delay(ms(100))
                .max_duration(ms(250))
                .build()
                .expect("valid policy"),
        )
        .expect("single retry seat");

    let _ = pipeline.run(|_: &ExecutionContext<bool, ServiceError>| service.call());

    // two full sleeps, one clamped to the remaining budget, then terminal
    assert_eq!(clock.sleeps(), vec![ms(100), ms(100), ms(50)]);
    assert_eq!(service.calls(), 4);
}

#[test]
fn delays_are_honored_on_the_wall_clock() {
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let sink = stamps.clone();
    let pipeline = Pipeline::new()
        .retry(
            RetryPolicy::<bool, ServiceError>::builder()
                .max_attempts(3)
                .fixed_delay(ms(20))
                .build()
                .expect("valid policy"),
        )
        .expect("single retry seat");
    let _ = pipeline.run(|_: &ExecutionContext<bool, ServiceError>| {
        sink.lock().push(Instant::now());
        Err(ServiceError("down"))
    });
    let stamps = stamps.lock();
    assert_eq!(stamps.len(), 3);
    for pair in stamps.windows(2) {
        assert!(pair[1] - pair[0] >= ms(20));
    }
}

#[test]
fn fallback_substitutes_after_exhaustion() {
    let service = FlakyService::always_failing();
    let (succeeded, failed_terminal) = (counter(), counter());
    let pipeline = Pipeline::new()
        .fallback(Fallback::value(true))
        .expect("single fallback")
        .retry(RetryPolicy::default())
        .expect("single retry seat")
        .on_success(bump(&succeeded))
        .on_failure(bump(&failed_terminal));

    let result = pipeline.run(|_: &ExecutionContext<bool, ServiceError>| service.call());

    assert_eq!(result, Ok(true));
    assert_eq!(service.calls(), 3);
    assert_eq!(succeeded.load(Ordering::SeqCst), 1);
    assert_eq!(failed_terminal.load(Ordering::SeqCst), 0);
}

#[test]
fn failing_fallback_replaces_the_original_failure() {
    let service = FlakyService::always_failing();
    let pipeline = Pipeline::new()
        .fallback(Fallback::of(|_, _, _| Err(ServiceError("fallback down"))))
        .expect("single fallback")
        .retry(RetryPolicy::default())
        .expect("single retry seat");
    let result = pipeline.run(|_: &ExecutionContext<bool, ServiceError>| service.call());
    assert_eq!(result, Err(Error::Operation(ServiceError("fallback down"))));
}

#[test]
fn open_breaker_rejects_without_invoking_the_operation() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::builder()
        .failure_threshold(Threshold::of(2, 2))
        .success_threshold(Threshold::consecutive(1))
        .delay(Duration::from_secs(1))
        .clock(clock.clone())
        .build()
        .expect("valid breaker");
    let service = FlakyService::scripted([
        Step::Fail("down"),
        Step::Fail("down"),
        Step::Yield(true),
    ]);
    let pipeline = Pipeline::new()
        .clock(clock.clone())
        .breaker(breaker.clone())
        .expect("single breaker");
    let run = |p: &Pipeline<bool, ServiceError>| {
        p.run(|_: &ExecutionContext<bool, ServiceError>| service.call())
    };

    assert!(run(&pipeline).is_err());
    assert!(run(&pipeline).is_err());
    assert_eq!(breaker.state(), BreakerState::Open);

    // rejected without reaching the service
    assert_eq!(run(&pipeline), Err(Error::CircuitOpen));
    assert_eq!(service.calls(), 2);

    clock.advance(Duration::from_secs(1));
    assert_eq!(run(&pipeline), Ok(true));
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(service.calls(), 3);
}

#[test]
fn retry_outside_a_breaker_retries_rejections() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::builder()
        .failure_threshold(Threshold::consecutive(1))
        .delay(Duration::from_secs(120))
        .clock(clock.clone())
        .build()
        .expect("valid breaker");
    let service = FlakyService::always_failing();
    let pipeline = Pipeline::new()
        .clock(clock.clone())
        .retry(
            RetryPolicy::builder()
                .max_attempts(3)
                .build()
                .expect("valid policy"),
        )
        .expect("single retry seat")
        .breaker(breaker)
        .expect("single breaker");

    let result = pipeline.run(|_: &ExecutionContext<bool, ServiceError>| service.call());

    // first cycle trips the breaker; the remaining cycles are rejected
    // admissions, still bounded by the attempt cap
    assert_eq!(result, Err(Error::CircuitOpen));
    assert_eq!(service.calls(), 1);
}

#[test]
fn operation_attempts_stay_consecutive_across_rejected_admissions() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::builder()
        .failure_threshold(Threshold::consecutive(1))
        .success_threshold(Threshold::consecutive(1))
        .delay(ms(50))
        .clock(clock.clone())
        .build()
        .expect("valid breaker");
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let service = FlakyService::scripted([Step::Fail("down"), Step::Yield(true)]);
    let pipeline = Pipeline::new()
        .clock(clock.clone())
        .retry(
            RetryPolicy::builder()
                .max_attempts(6)
                .fixed_delay(ms(10))
                .build()
                .expect("valid policy"),
        )
        .expect("single retry seat")
        .breaker(breaker)
        .expect("single breaker");

    let result = pipeline.run(|ctx: &ExecutionContext<bool, ServiceError>| {
        sink.lock().push(ctx.attempts());
        service.call()
    });

    // cycles 2 through 5 are rejected admissions; once the cooldown
    // elapses the operation observes 2, not a jump to 6
    assert_eq!(result, Ok(true));
    assert_eq!(service.calls(), 2);
    assert_eq!(observed.lock().as_slice(), &[1, 2]);
}

#[test]
fn cancelling_the_token_interrupts_the_wait() {
    let token = CancelToken::new();
    let service = FlakyService::always_failing();
    let pipeline = Pipeline::new()
        .retry(
            RetryPolicy::builder()
                .unlimited_attempts()
                .fixed_delay(Duration::from_secs(30))
                .build()
                .expect("valid policy"),
        )
        .expect("single retry seat");

    let canceller = token.clone();
    let thread = std::thread::spawn(move || {
        std::thread::sleep(ms(50));
        canceller.cancel();
    });

    let started = Instant::now();
    let result =
        pipeline.run_with(token, |_: &ExecutionContext<bool, ServiceError>| service.call());
    thread.join().expect("canceller thread panicked");

    assert_eq!(result, Err(Error::Interrupted));
    assert_eq!(service.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(30));
}
