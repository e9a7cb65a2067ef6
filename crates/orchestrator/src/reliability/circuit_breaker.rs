//! Circuit Breaker Implementation
//!
//! Windowed failure-rate breaker guarding a single librarian. The circuit opens
//! once enough samples in the rolling window have failed, rejects every call
//! during the cooldown, then lets probe calls through in half-open state until
//! enough consecutive successes close it again.

use athenaeum_core::{
    CircuitBreakerConfig, CircuitState, EngineEvent, ErrorCode, EventBus, Response, ResponseError,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EVENT_SOURCE: &str = "circuit_breaker";

/// Rejection returned while the circuit is open
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Circuit breaker '{breaker}' is open, retry after {}ms", .retry_after.as_millis())]
pub struct CircuitOpen {
    pub breaker: String,
    pub retry_after: Duration,
}

impl CircuitOpen {
    pub fn into_response(self) -> Response {
        let retry_after_ms = self.retry_after.as_millis() as u64;
        Response::error(
            ResponseError::new(ErrorCode::CircuitBreakerOpen, self.to_string())
                .with_details(json!({ "retryAfterMs": retry_after_ms })),
        )
    }
}

/// Outcome of a call made through [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was rejected without running
    #[error(transparent)]
    Open(CircuitOpen),

    /// The call ran and failed
    #[error("{0}")]
    Inner(E),
}

/// Snapshot of a breaker's counters
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub samples_in_window: usize,
    pub failures_in_window: usize,
    pub failure_rate: f64,
    pub consecutive_successes: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub state_transitions: u64,
    /// Time left in the cooldown while open
    pub retry_after: Option<Duration>,
    pub since_last_failure: Option<Duration>,
}

/// Request outcome for failure-rate tracking
#[derive(Debug, Clone, Copy)]
struct RequestOutcome {
    timestamp: Instant,
    success: bool,
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    window: VecDeque<RequestOutcome>,
    consecutive_successes: u32,
    next_retry: Option<Instant>,
    last_failure: Option<Instant>,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    state_transitions: u64,
}

/// Circuit breaker for one librarian
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    events: Option<Arc<EventBus>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `f` through the breaker.
    ///
    /// While open, `f` is never invoked and `BreakerError::Open` is returned.
    /// Otherwise `f`'s result is recorded and passed through untouched.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire().map_err(BreakerError::Open)?;

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Decide whether a call may proceed, moving Open → HalfOpen once the
    /// cooldown has elapsed
    pub fn try_acquire(&self) -> Result<CircuitState, CircuitOpen> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            let now = Instant::now();

            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => Ok(inner.state),
                CircuitState::Open => match inner.next_retry {
                    Some(next_retry) if now < next_retry => {
                        inner.total_rejections += 1;
                        let retry_after = next_retry - now;
                        events.push(EngineEvent::BreakerRejected {
                            breaker: self.name.clone(),
                            retry_after_ms: retry_after.as_millis() as u64,
                        });
                        Err(CircuitOpen {
                            breaker: self.name.clone(),
                            retry_after,
                        })
                    }
                    _ => {
                        self.transition_to_half_open(&mut inner, &mut events);
                        Ok(CircuitState::HalfOpen)
                    }
                },
            }
        };

        if let Err(rejection) = &result {
            debug!(
                breaker = %self.name,
                retry_after_ms = rejection.retry_after.as_millis() as u64,
                "Call rejected by open circuit"
            );
        }
        self.emit(events);
        result
    }

    /// Record successful operation
    pub fn record_success(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            self.push_sample(&mut inner, now, true);
            inner.total_successes += 1;

            if inner.state == CircuitState::Open {
                warn!(breaker = %self.name, "Recorded success while circuit is open");
                self.transition_to_half_open(&mut inner, &mut events);
            }

            if inner.state == CircuitState::HalfOpen {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition_to_closed(&mut inner, &mut events);
                }
            }

            debug!(breaker = %self.name, state = %inner.state, "Recorded successful operation");
            events.push(EngineEvent::BreakerSuccess {
                breaker: self.name.clone(),
                state: inner.state,
            });
        }
        self.emit(events);
    }

    /// Record failed operation
    pub fn record_failure(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            self.push_sample(&mut inner, now, false);
            inner.total_failures += 1;
            inner.last_failure = Some(now);

            match inner.state {
                CircuitState::Closed => {
                    if self.should_open(&inner) {
                        self.transition_to_open(&mut inner, now, &mut events);
                    }
                }
                CircuitState::HalfOpen => {
                    // Any failed probe reopens the circuit
                    self.transition_to_open(&mut inner, now, &mut events);
                }
                CircuitState::Open => {}
            }

            debug!(breaker = %self.name, state = %inner.state, "Recorded failed operation");
            events.push(EngineEvent::BreakerFailure {
                breaker: self.name.clone(),
                state: inner.state,
            });
        }
        self.emit(events);
    }

    /// Return to Closed and forget all samples and counters
    pub fn reset(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            *inner = BreakerInner::default();
            if previous != CircuitState::Closed {
                events.push(EngineEvent::BreakerStateChanged {
                    breaker: self.name.clone(),
                    from: previous,
                    to: CircuitState::Closed,
                });
            }
        }
        info!(breaker = %self.name, "Circuit breaker reset");
        self.emit(events);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        let now = Instant::now();
        let cutoff = now.checked_sub(self.config.window_size());

        let (samples, failures) = inner
            .window
            .iter()
            .filter(|outcome| cutoff.map_or(true, |cutoff| outcome.timestamp >= cutoff))
            .fold((0usize, 0usize), |(samples, failures), outcome| {
                (samples + 1, failures + usize::from(!outcome.success))
            });

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            samples_in_window: samples,
            failures_in_window: failures,
            failure_rate: if samples == 0 {
                0.0
            } else {
                failures as f64 / samples as f64
            },
            consecutive_successes: inner.consecutive_successes,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            state_transitions: inner.state_transitions,
            retry_after: match inner.state {
                CircuitState::Open => inner
                    .next_retry
                    .map(|next_retry| next_retry.saturating_duration_since(now)),
                _ => None,
            },
            since_last_failure: inner
                .last_failure
                .map(|failed_at| now.saturating_duration_since(failed_at)),
        }
    }

    fn push_sample(&self, inner: &mut BreakerInner, now: Instant, success: bool) {
        inner.window.push_back(RequestOutcome {
            timestamp: now,
            success,
        });
        Self::cleanup_old_requests(&mut inner.window, now, self.config.window_size());
    }

    /// Drop samples older than the rolling window
    fn cleanup_old_requests(window: &mut VecDeque<RequestOutcome>, now: Instant, size: Duration) {
        let Some(cutoff) = now.checked_sub(size) else {
            return;
        };
        while window.front().is_some_and(|outcome| outcome.timestamp < cutoff) {
            window.pop_front();
        }
    }

    fn should_open(&self, inner: &BreakerInner) -> bool {
        let samples = inner.window.len();
        if samples < self.config.volume_threshold as usize {
            return false;
        }
        let failures = inner.window.iter().filter(|outcome| !outcome.success).count();
        failures as f64 / samples as f64 >= self.config.failure_threshold
    }

    fn transition_to_open(
        &self,
        inner: &mut BreakerInner,
        now: Instant,
        events: &mut Vec<EngineEvent>,
    ) {
        warn!(
            breaker = %self.name,
            cooldown_ms = self.config.timeout_ms,
            "Circuit breaker opening - blocking requests"
        );
        inner.next_retry = Some(now + self.config.timeout());
        inner.consecutive_successes = 0;
        self.set_state(inner, CircuitState::Open, events);
    }

    fn transition_to_half_open(&self, inner: &mut BreakerInner, events: &mut Vec<EngineEvent>) {
        info!(breaker = %self.name, "Circuit breaker transitioning to half-open - testing recovery");
        inner.consecutive_successes = 0;
        inner.next_retry = None;
        self.set_state(inner, CircuitState::HalfOpen, events);
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner, events: &mut Vec<EngineEvent>) {
        info!(breaker = %self.name, "Circuit breaker closing - librarian recovered");
        inner.consecutive_successes = 0;
        inner.next_retry = None;
        inner.window.clear();
        self.set_state(inner, CircuitState::Closed, events);
    }

    fn set_state(&self, inner: &mut BreakerInner, to: CircuitState, events: &mut Vec<EngineEvent>) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.state_transitions += 1;
        events.push(EngineEvent::BreakerStateChanged {
            breaker: self.name.clone(),
            from,
            to,
        });
    }

    fn emit(&self, events: Vec<EngineEvent>) {
        if let Some(bus) = &self.events {
            for event in events {
                bus.publish(EVENT_SOURCE, event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(volume: u32, success: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 0.5,
            volume_threshold: volume,
            window_size_ms: 60_000,
            timeout_ms: 1_000,
            success_threshold: success,
        }
    }

    fn tripped(volume: u32, success: u32) -> CircuitBreaker {
        let breaker = CircuitBreaker::new("search", config(volume, success));
        for _ in 0..volume {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker
    }

    #[test]
    fn test_stays_closed_below_volume_threshold() {
        let breaker = CircuitBreaker::new("search", config(5, 2));
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_stays_closed_below_failure_rate() {
        let breaker = CircuitBreaker::new("search", config(4, 2));
        for _ in 0..3 {
            breaker.record_success();
        }
        breaker.record_failure();
        breaker.record_failure();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.samples_in_window, 5);
        assert!((stats.failure_rate - 0.4).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_never_invokes_fn() {
        let breaker = tripped(3, 2);
        let calls = AtomicUsize::new(0);

        for _ in 0..5 {
            let result = breaker
                .execute(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                })
                .await;
            assert!(matches!(result, Err(BreakerError::Open(_))));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.stats().total_rejections, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_lets_next_call_probe() {
        let breaker = tripped(3, 2);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(breaker.try_acquire(), Ok(CircuitState::HalfOpen));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_successes_close_the_circuit() {
        let breaker = tripped(3, 2);
        tokio::time::advance(Duration::from_secs(1)).await;

        let first = breaker.execute(|| async { Ok::<_, String>(1) }).await;
        assert_eq!(first.unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.execute(|| async { Ok::<_, String>(2) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().samples_in_window, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = tripped(3, 2);
        tokio::time::advance(Duration::from_secs(1)).await;

        breaker.execute(|| async { Ok::<_, String>(()) }).await.unwrap();
        let result = breaker
            .execute(|| async { Err::<(), _>("still broken".to_string()) })
            .await;

        match result {
            Err(BreakerError::Inner(message)) => assert_eq!(message, "still broken"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().retry_after, Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_samples_leave_the_window() {
        let breaker = CircuitBreaker::new(
            "search",
            CircuitBreakerConfig {
                window_size_ms: 100,
                ..config(3, 1)
            },
        );
        breaker.record_failure();
        breaker.record_failure();

        tokio::time::advance(Duration::from_millis(150)).await;
        breaker.record_failure();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.samples_in_window, 1);
        assert_eq!(stats.total_failures, 3);
    }

    #[test]
    fn test_rejection_response_is_recoverable() {
        let response = CircuitOpen {
            breaker: "search".into(),
            retry_after: Duration::from_millis(250),
        }
        .into_response();

        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::CircuitBreakerOpen);
        assert!(error.recoverable);
        assert_eq!(error.details.unwrap()["retryAfterMs"], 250);
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let bus = Arc::new(EventBus::new(16));
        let mut receiver = bus.subscribe();
        let breaker = CircuitBreaker::new("search", config(1, 1)).with_events(bus);

        breaker.record_failure();

        let mut topics = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            topics.push(event.topic);
        }
        assert_eq!(topics, vec!["breaker.state_changed", "breaker.failure"]);
    }

    #[test]
    fn test_reset_closes_circuit() {
        let breaker = tripped(2, 1);
        breaker.reset();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.total_failures, 0);
    }

    proptest! {
        #[test]
        fn prop_opens_exactly_at_volume_and_rate(successes in 0u32..20, failures in 0u32..40) {
            let breaker = CircuitBreaker::new("prop", config(10, 3));
            for _ in 0..successes {
                breaker.record_success();
            }
            for _ in 0..failures {
                breaker.record_failure();
            }

            let total = successes + failures;
            let should_open = total >= 10 && 2 * failures >= total;
            prop_assert_eq!(breaker.state() == CircuitState::Open, should_open);
        }
    }
}
