// Circuit breaker wrapping the sandbox and LLM clients.
//
// Three states. CLOSED counts consecutive failures and trips OPEN at the
// threshold; OPEN short-circuits every call until the retry timeout elapses;
// HALF_OPEN admits exactly one probe at a time and closes again after enough
// consecutive probe successes. A quiet period in CLOSED decays the failure
// count so old failures don't accumulate across unrelated incidents.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED that trip the breaker.
    pub failure_threshold: u32,
    /// Consecutive HALF_OPEN successes required to close.
    pub success_threshold: u32,
    /// How long OPEN rejects calls before permitting a probe.
    pub timeout: Duration,
    /// Quiet period in CLOSED after which the failure count resets.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The breaker is OPEN (or a HALF_OPEN probe is already in flight);
    /// the downstream was not called.
    Open,
    /// The downstream was called and failed.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerError::Open => write!(f, "circuit breaker open"),
            BreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    probe_in_flight: bool,
    next_attempt_at: Option<Instant>,
    last_failure_at: Option<Instant>,
}

/// Per-downstream circuit breaker. Cheap to share behind an `Arc`.
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        CircuitBreaker {
            name,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                probe_in_flight: false,
                next_attempt_at: None,
                last_failure_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Run `f` through the breaker. When OPEN, the call fails immediately
    /// without touching the downstream.
    pub async fn execute<T, E, F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            crate::metrics::BREAKER_REJECTIONS_TOTAL
                .with_label_values(&[self.name])
                .inc();
            return Err(BreakerError::Open);
        }

        match f().await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        match inner.state {
            BreakerState::Closed => {
                // Decay stale failures after a quiet period.
                if let Some(last) = inner.last_failure_at {
                    if now.duration_since(last) > self.config.reset_timeout {
                        inner.consecutive_failures = 0;
                        inner.last_failure_at = None;
                    }
                }
                true
            }
            BreakerState::Open => {
                let due = inner.next_attempt_at.map(|t| now >= t).unwrap_or(true);
                if due {
                    tracing::info!(breaker = self.name, "Circuit breaker half-open, probing");
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
                inner.last_failure_at = None;
            }
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    tracing::info!(breaker = self.name, "Circuit breaker closed");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.last_failure_at = None;
                    inner.next_attempt_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.last_failure_at = Some(now);
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(breaker = self.name, "Circuit breaker opened");
                    crate::metrics::BREAKER_OPENS_TOTAL
                        .with_label_values(&[self.name])
                        .inc();
                    inner.state = BreakerState::Open;
                    inner.next_attempt_at = Some(now + self.config.timeout);
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!(breaker = self.name, "Probe failed, circuit breaker re-opened");
                crate::metrics::BREAKER_OPENS_TOTAL
                    .with_label_values(&[self.name])
                    .inc();
                inner.probe_in_flight = false;
                inner.half_open_successes = 0;
                inner.state = BreakerState::Open;
                inner.next_attempt_at = Some(now + self.config.timeout);
            }
            BreakerState::Open => {
                inner.next_attempt_at = Some(now + self.config.timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_millis(20),
            reset_timeout: Duration::from_millis(50),
        }
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.execute(|| async { Err::<(), _>("boom") }).await.map(|_| ())
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.execute(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_closed_to_open_at_threshold() {
        let cb = CircuitBreaker::new("test", quick_config());
        assert_eq!(cb.state(), BreakerState::Closed);

        for _ in 0..3 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_open_short_circuits_without_calling_downstream() {
        let cb = CircuitBreaker::new("test", quick_config());
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }

        let calls = AtomicU32::new(0);
        let result = cb
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, &'static str>(()) }
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_recovery() {
        let cb = CircuitBreaker::new("test", quick_config());
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        // First probe succeeds, still half-open
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        // Second consecutive success closes
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", quick_config());
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), BreakerState::Open);

        // And the fresh timeout applies: immediate call is rejected
        let result = succeed(&cb).await;
        assert!(matches!(result, Err(BreakerError::Open)));
    }

    #[tokio::test]
    async fn test_half_open_admits_single_probe() {
        let cb = CircuitBreaker::new("test", quick_config());
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Acquire the probe slot by hand, then a second caller must bounce.
        assert!(cb.try_acquire());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(!cb.try_acquire());

        cb.on_success();
        // Slot free again for the next probe
        assert!(cb.try_acquire());
    }

    #[tokio::test]
    async fn test_closed_failure_decay() {
        let cb = CircuitBreaker::new("test", quick_config());
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), BreakerState::Closed);

        // Quiet period longer than reset_timeout clears the streak
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), BreakerState::Closed);
    }
}
