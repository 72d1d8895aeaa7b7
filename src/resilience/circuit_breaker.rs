//! Circuit breaker for instance protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: instance assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call after the open timeout has elapsed
//! Half-Open → Closed: half_open_limit trial successes
//! Half-Open → Open: any trial failure (fresh opened_at)
//! Half-Open → Open: an admitted trial dropped without a result
//! ```
//!
//! # Design Decisions
//! - Per-instance circuit breaker (not global)
//! - Rejection is an explicit `CircuitOpen` error, never a call failure
//! - State lives behind a per-breaker mutex so different instances never contend

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::validation::{circuit_breaker_errors, ensure_valid};
use crate::config::CircuitBreakerConfig;
use crate::error::{BalancerError, BalancerResult};
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    half_open_trials_remaining: u32,
    half_open_admitted: u32,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_trials_remaining: u32,
    /// Milliseconds spent OPEN so far, only while OPEN.
    pub open_for_ms: Option<u64>,
}

/// Circuit breaker guarding a single instance.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker. Fails on non-positive thresholds.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> BalancerResult<Self> {
        ensure_valid(circuit_breaker_errors(&config))?;
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                half_open_trials_remaining: 0,
                half_open_admitted: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// State as of the most recent transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.lock().opened_at
    }

    /// Whether a call made now would be admitted. Does not transition.
    pub fn is_available(&self) -> bool {
        self.is_available_at(Instant::now())
    }

    pub(crate) fn is_available_at(&self, now: Instant) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.timeout_elapsed(&inner, now),
            CircuitState::HalfOpen => inner.half_open_admitted < self.config.half_open_limit,
        }
    }

    /// Admit or reject a call.
    ///
    /// An OPEN breaker whose timeout has elapsed moves to HALF_OPEN and admits
    /// this call as the first trial.
    pub fn try_acquire(&self) -> BalancerResult<()> {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, now: Instant) -> BalancerResult<()> {
        self.admit(now).map(|_| ())
    }

    /// Admit a call and return a permit that reports its outcome.
    ///
    /// Dropping the permit of a HALF_OPEN trial without calling
    /// [`CallPermit::success`] or [`CallPermit::failure`] counts as a failed
    /// trial, so a cancelled call cannot hold the trial budget forever.
    pub fn acquire(&self) -> BalancerResult<CallPermit<'_>> {
        self.acquire_at(Instant::now())
    }

    pub(crate) fn acquire_at(&self, now: Instant) -> BalancerResult<CallPermit<'_>> {
        let trial = self.admit(now)?;
        Ok(CallPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// Returns whether the admitted call is a HALF_OPEN trial.
    fn admit(&self, now: Instant) -> BalancerResult<bool> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                if !self.timeout_elapsed(&inner, now) {
                    return Err(self.rejection());
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.half_open_trials_remaining = self.config.half_open_limit;
                inner.half_open_admitted = 1;
                Ok(true)
            }
            CircuitState::HalfOpen => {
                if inner.half_open_admitted >= self.config.half_open_limit {
                    return Err(self.rejection());
                }
                inner.half_open_admitted += 1;
                Ok(true)
            }
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            tracing::warn!(instance = %self.name, "Half-open trial dropped without a result");
            inner.failure_count += 1;
            self.open(&mut inner, Instant::now());
        }
    }

    /// Report a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_trials_remaining = inner.half_open_trials_remaining.saturating_sub(1);
                if inner.half_open_trials_remaining == 0 {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.failure_count = 0;
                    inner.half_open_admitted = 0;
                    inner.opened_at = None;
                }
            }
            // Late result from a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    /// Report a failed call.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now())
    }

    pub(crate) fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                self.open(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Manually close the breaker.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.half_open_trials_remaining = 0;
        inner.half_open_admitted = 0;
        tracing::info!(instance = %self.name, "Circuit breaker manually reset");
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        CircuitBreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_trials_remaining: inner.half_open_trials_remaining,
            open_for_ms: match inner.state {
                CircuitState::Open => inner.opened_at.map(|t| t.elapsed().as_millis() as u64),
                _ => None,
            },
        }
    }

    fn timeout_elapsed(&self, inner: &BreakerInner, now: Instant) -> bool {
        let opened_at = match inner.opened_at {
            Some(t) => t,
            None => return true,
        };
        now.saturating_duration_since(opened_at) >= self.config.timeout()
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) {
        self.transition(inner, CircuitState::Open);
        inner.opened_at = Some(now);
        inner.half_open_trials_remaining = 0;
        inner.half_open_admitted = 0;
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Open => tracing::warn!(
                instance = %self.name,
                from = from.as_str(),
                failures = inner.failure_count,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                instance = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker transition"
            ),
        }
        metrics::record_breaker_transition(&self.name, from.as_str(), to.as_str());
    }

    fn rejection(&self) -> BalancerError {
        BalancerError::CircuitOpen {
            instance: self.name.clone(),
        }
    }

    /// Remaining time before an OPEN breaker admits a trial.
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(self.config.timeout().saturating_sub(opened_at.elapsed()))
            }
            _ => None,
        }
    }
}

/// An admitted call. Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure).
#[derive(Debug)]
#[must_use = "dropping a half-open permit reopens the circuit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.abandon_trial();
        }
    }
}
