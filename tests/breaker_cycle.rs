//! Full breaker cycle at production-shaped settings: ten consecutive
//! timeouts open the circuit, the open timer expires into a half-open probe,
//! and success after the probe window closes it, with the listener observing
//! the whole `Closed -> Open -> HalfOpen -> Closed` sequence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use outbox_drain::{BreakerPhase, CircuitBreaker};
use tokio::time::sleep;

#[tokio::test]
async fn breaker_walks_the_full_cycle() {
    let breaker = CircuitBreaker::new(
        10,
        Duration::from_millis(150), // open duration
        Duration::from_millis(80),  // half-open probe window
        3,
    );

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let transitions_clone = Arc::clone(&transitions);
    breaker.on_transition(move |from, to| {
        transitions_clone.lock().unwrap().push((from, to));
    });

    // ten consecutive transport timeouts
    for i in 0..10 {
        assert!(
            !breaker.should_block().await,
            "breaker blocked before threshold (failure {i})"
        );
        breaker.on_failure().await;
    }
    assert_eq!(breaker.state().await, BreakerPhase::Open);

    // blocked for the whole open duration
    assert!(breaker.should_block().await);
    sleep(Duration::from_millis(60)).await;
    assert!(breaker.should_block().await);

    // the expiring check transitions to half-open and is let through
    sleep(Duration::from_millis(120)).await;
    assert!(!breaker.should_block().await);
    assert_eq!(breaker.state().await, BreakerPhase::HalfOpen);

    // first probe success lands inside the window: still probing
    breaker.on_success().await;
    assert_eq!(breaker.state().await, BreakerPhase::HalfOpen);

    // second success after the window has run its course closes the circuit
    sleep(Duration::from_millis(100)).await;
    breaker.on_success().await;
    assert_eq!(breaker.state().await, BreakerPhase::Closed);

    let seen = transitions.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (BreakerPhase::Closed, BreakerPhase::Open),
            (BreakerPhase::Open, BreakerPhase::HalfOpen),
            (BreakerPhase::HalfOpen, BreakerPhase::Closed),
        ]
    );
}

#[tokio::test]
async fn half_open_failure_restarts_the_open_timer() {
    let breaker = CircuitBreaker::new(
        2,
        Duration::from_millis(60),
        Duration::from_millis(40),
        3,
    );

    breaker.on_failure().await;
    breaker.on_failure().await;
    assert_eq!(breaker.state().await, BreakerPhase::Open);

    sleep(Duration::from_millis(80)).await;
    assert!(!breaker.should_block().await);
    assert_eq!(breaker.state().await, BreakerPhase::HalfOpen);

    // a failed probe snaps straight back to open, no threshold needed
    breaker.on_failure().await;
    assert_eq!(breaker.state().await, BreakerPhase::Open);
    assert!(breaker.should_block().await);

    // and the cycle repeats
    sleep(Duration::from_millis(80)).await;
    assert!(!breaker.should_block().await);
    assert_eq!(breaker.state().await, BreakerPhase::HalfOpen);
}
