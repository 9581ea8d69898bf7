use std::time::Duration;

use steadfast::prelude::*;

use crate::flaky::{FlakyService, ServiceError};
use crate::support::ManualClock;

#[test]
fn a_breaker_shared_across_pipelines_gates_both() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::builder()
        .failure_threshold(Threshold::consecutive(2))
        .delay(Duration::from_secs(60))
        .clock(clock.clone())
        .build()
        .expect("valid breaker");

    let first: Pipeline<bool, ServiceError> = Pipeline::new()
        .breaker(breaker.clone())
        .expect("single breaker");
    let second: Pipeline<bool, ServiceError> = Pipeline::new()
        .breaker(breaker.clone())
        .expect("single breaker");

    let service = FlakyService::always_failing();
    let op = |_: &ExecutionContext<bool, ServiceError>| service.call();
    assert!(first.run(op).is_err());
    assert!(first.run(op).is_err());
    assert_eq!(breaker.state(), BreakerState::Open);

    // the second pipeline observes the trip immediately
    assert_eq!(second.run(op), Err(Error::CircuitOpen));
    assert_eq!(service.calls(), 2);
}

#[test]
fn concurrent_recordings_keep_the_breaker_consistent() {
    let breaker: CircuitBreaker<bool, ServiceError> = CircuitBreaker::builder()
        .failure_threshold(Threshold::of(50, 100))
        .success_threshold(Threshold::consecutive(2))
        .delay(Duration::from_secs(60))
        .build()
        .expect("valid breaker");

    let threads: Vec<_> = (0..8)
        .map(|worker| {
            let breaker = breaker.clone();
            std::thread::spawn(move || {
                let pipeline: Pipeline<bool, ServiceError> = Pipeline::new()
                    .breaker(breaker)
                    .expect("single breaker");
                for round in 0..100u32 {
                    // mixed outcomes from every worker
                    let fail = (round + worker) % 2 == 0;
                    let _ = pipeline.run(|_: &ExecutionContext<bool, ServiceError>| {
                        if fail {
                            Err(ServiceError("flaky"))
                        } else {
                            Ok(true)
                        }
                    });
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().expect("worker panicked");
    }

    // transitions are linearizable: whatever interleaving happened, the
    // breaker landed in a legal state with a bounded window
    let state = breaker.state();
    assert!(matches!(
        state,
        BreakerState::Closed | BreakerState::Open | BreakerState::HalfOpen
    ));
    assert!(breaker.recent_failures() <= 100);
}

#[test]
fn half_open_failure_reopens_through_the_pipeline() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::builder()
        .failure_threshold(Threshold::consecutive(1))
        .success_threshold(Threshold::consecutive(1))
        .delay(Duration::from_secs(5))
        .clock(clock.clone())
        .build()
        .expect("valid breaker");
    let pipeline: Pipeline<bool, ServiceError> = Pipeline::new()
        .clock(clock.clone())
        .breaker(breaker.clone())
        .expect("single breaker");
    let service = FlakyService::always_failing();
    let op = |_: &ExecutionContext<bool, ServiceError>| service.call();

    assert!(pipeline.run(op).is_err());
    assert_eq!(breaker.state(), BreakerState::Open);

    clock.advance(Duration::from_secs(5));
    // the probe fails and the cooldown starts over
    assert!(pipeline.run(op).is_err());
    assert_eq!(breaker.state(), BreakerState::Open);
    assert_eq!(pipeline.run(op), Err(Error::CircuitOpen));
    assert_eq!(service.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn async_executions_respect_the_breaker() {
    let breaker: CircuitBreaker<bool, ServiceError> = CircuitBreaker::builder()
        .failure_threshold(Threshold::consecutive(1))
        .delay(Duration::from_secs(60))
        .build()
        .expect("valid breaker");
    breaker.open();
    let pipeline: Pipeline<bool, ServiceError> = Pipeline::new()
        .breaker(breaker)
        .expect("single breaker");

    let service = FlakyService::always_failing();
    let scripted = service.clone();
    let handle = pipeline.spawn(move |_ctx| {
        let scripted = scripted.clone();
        async move { scripted.call() }
    });

    assert_eq!(handle.get().await, Err(Error::CircuitOpen));
    assert_eq!(service.calls(), 0);
}
