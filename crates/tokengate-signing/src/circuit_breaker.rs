//! Circuit breaker guarding calls to the remote signer.
//!
//! ```text
//! ┌────────┐  failure_threshold  ┌──────┐   open_timeout   ┌──────────┐
//! │ Closed │ ──────reached─────→ │ Open │ ────elapsed────→ │ HalfOpen │
//! └────────┘                     └──────┘ ←─probe fails─── └──────────┘
//!      ↑                                                        │
//!      └──────────────────────── probe succeeds ────────────────┘
//! ```
//!
//! Half-open admits exactly one probe; concurrent callers fail fast until the
//! probe settles. A probe whose future is dropped before completing counts as
//! a failure.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before a probe is allowed.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

/// Outcome of a call rejected by, or passed through, the breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation.
    Open { retry_after: Duration },
    /// The operation ran and failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { retry_after } => {
                write!(f, "circuit open, retry after {:?}", retry_after)
            }
            BreakerError::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Thread-safe circuit breaker. Cloning shares state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                open_timeout: config.open_timeout,
            },
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            })),
        }
    }

    /// Run `operation` through the breaker. Every error counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_counting(operation, |_| true).await
    }

    /// Run `operation` through the breaker, counting only errors for which
    /// `is_failure` returns true. Other errors leave the breaker as if the
    /// call had succeeded.
    pub async fn call_counting<F, Fut, T, E, P>(
        &self,
        operation: F,
        is_failure: P,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let admission = self
            .admit()
            .map_err(|retry_after| BreakerError::Open { retry_after })?;
        let mut guard = AdmissionGuard {
            breaker: self,
            admission,
            settled: false,
        };

        let result = operation().await;
        let success = match &result {
            Ok(_) => true,
            Err(e) => !is_failure(e),
        };
        guard.settle(success);
        result.map_err(BreakerError::Inner)
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn admit(&self) -> Result<Admission, Duration> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.open_timeout);
                if elapsed >= self.config.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!(
                        breaker = %self.name,
                        previous_state = "open",
                        new_state = "half_open",
                        "Circuit breaker admitting probe"
                    );
                    Ok(Admission::Probe)
                } else {
                    Err(self.config.open_timeout - elapsed)
                }
            }
            CircuitState::HalfOpen if inner.probe_in_flight => Err(Duration::ZERO),
            CircuitState::HalfOpen => {
                inner.probe_in_flight = true;
                Ok(Admission::Probe)
            }
        }
    }

    fn record(&self, admission: Admission, success: bool) {
        let mut inner = self.inner.lock();
        if admission == Admission::Probe {
            inner.probe_in_flight = false;
        }

        match (admission, success) {
            (Admission::Probe, true) => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                tracing::info!(
                    breaker = %self.name,
                    previous_state = "half_open",
                    new_state = "closed",
                    "Circuit breaker closed after successful probe"
                );
            }
            (Admission::Probe, false) => {
                inner.state = CircuitState::Open;
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure = Some(Instant::now());
                tracing::warn!(
                    breaker = %self.name,
                    previous_state = "half_open",
                    new_state = "open",
                    open_timeout_secs = self.config.open_timeout.as_secs(),
                    "Circuit breaker re-opened after probe failure"
                );
            }
            (Admission::Normal, true) => {
                if inner.state == CircuitState::Closed {
                    inner.failure_count = 0;
                }
            }
            (Admission::Normal, false) => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.state == CircuitState::Closed
                    && inner.failure_count >= self.config.failure_threshold
                {
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(Instant::now());
                    tracing::warn!(
                        breaker = %self.name,
                        failure_count = inner.failure_count,
                        open_timeout_secs = self.config.open_timeout.as_secs(),
                        "Circuit breaker opened after consecutive failures"
                    );
                }
            }
        }
    }
}

struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl AdmissionGuard<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.admission, success);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        // Cancelled before completion: a dropped probe must not wedge half-open.
        if !self.settled && self.admission == Admission::Probe {
            self.breaker.record(Admission::Probe, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_timeout,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        cb.call(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn test_starts_closed_and_passes_through() {
        let cb = breaker(3, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(fail(&cb).await, Err(BreakerError::Inner("boom")));
        assert_eq!(cb.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let cb = breaker(3, Duration::from_secs(30));
        for _ in 0..3 {
            assert!(matches!(fail(&cb).await, Err(BreakerError::Inner(_))));
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let mut invoked = false;
        let result = cb
            .call(|| {
                invoked = true;
                async { Ok::<_, &'static str>(()) }
            })
            .await;
        assert!(!invoked);
        match result {
            Err(BreakerError::Open { retry_after }) => {
                assert!(retry_after <= Duration::from_secs(30));
                assert!(retry_after > Duration::from_secs(25));
            }
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(30));
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        succeed(&cb).await.unwrap();
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 2);
    }

    #[tokio::test]
    async fn test_probe_success_closes() {
        let cb = breaker(1, Duration::from_millis(10));
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(10));
        fail(&cb).await.ok();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(fail(&cb).await, Err(BreakerError::Inner(_))));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(succeed(&cb).await, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn test_half_open_admits_single_probe() {
        let cb = breaker(1, Duration::from_millis(10));
        fail(&cb).await.ok();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_cb = cb.clone();
        let probe = tokio::spawn(async move {
            probe_cb
                .call(|| async move {
                    release_rx.await.ok();
                    Ok::<_, &'static str>(1)
                })
                .await
        });

        // Let the probe get admitted
        while cb.state() != CircuitState::HalfOpen {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            succeed(&cb).await,
            Err(BreakerError::Open { .. })
        ));

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_probe_counts_as_failure() {
        let cb = breaker(1, Duration::from_millis(10));
        fail(&cb).await.ok();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = tokio::time::timeout(
            Duration::from_millis(5),
            cb.call(|| async {
                std::future::pending::<()>().await;
                Ok::<_, &'static str>(())
            }),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_uncounted_errors_do_not_trip() {
        let cb = breaker(1, Duration::from_secs(30));
        let result = cb
            .call_counting(|| async { Err::<(), _>("rejected") }, |_| false)
            .await;
        assert_eq!(result, Err(BreakerError::Inner("rejected")));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }
}
