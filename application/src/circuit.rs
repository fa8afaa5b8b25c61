//! Thread-safe wrapper around the domain circuit breaker.
//!
//! The message bus owns one of these for the whole process. Reads (`is_open`)
//! vastly outnumber writes, so the effective state is also published through
//! an atomic that readers consult without taking the lock.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use toolbridge_domain::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Transition};
use tracing::{info, warn};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

fn encode(state: CircuitState) -> u8 {
    match state {
        CircuitState::Closed => CLOSED,
        CircuitState::Open => OPEN,
        CircuitState::HalfOpen => HALF_OPEN,
    }
}

pub struct SharedCircuitBreaker {
    name: String,
    inner: Mutex<CircuitBreaker>,
    published: AtomicU8,
}

impl SharedCircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(CircuitBreaker::new(config)),
            published: AtomicU8::new(CLOSED),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let result = f(&mut guard);
        self.published.store(encode(guard.raw_state()), Ordering::Release);
        result
    }

    /// True while attempts are rejected.
    ///
    /// The closed fast path never locks; only a published open state is
    /// re-checked against the cool-down.
    pub fn is_open(&self, now: Instant) -> bool {
        match self.published.load(Ordering::Acquire) {
            CLOSED => false,
            _ => self.with(|cb| cb.is_open(now)),
        }
    }

    pub fn try_acquire(&self, now: Instant) -> bool {
        let (admitted, transition) = self.with(|cb| cb.try_acquire(now));
        self.log_transition(transition);
        admitted
    }

    pub fn record_success(&self) {
        let transition = self.with(|cb| cb.record_success());
        self.log_transition(transition);
    }

    pub fn record_failure(&self, now: Instant) {
        let transition = self.with(|cb| cb.record_failure(now));
        self.log_transition(transition);
    }

    pub fn state(&self, now: Instant) -> CircuitState {
        self.with(|cb| cb.state_at(now))
    }

    pub fn snapshot(&self, now: Instant) -> CircuitSnapshot {
        self.with(|cb| cb.snapshot(now))
    }

    pub fn reset(&self) {
        self.with(|cb| cb.reset());
    }

    fn log_transition(&self, transition: Option<Transition>) {
        match transition {
            Some(Transition::Opened) => warn!("Circuit '{}' opened", self.name),
            Some(Transition::Reopened) => warn!("Circuit '{}' reopened after failed probe", self.name),
            Some(Transition::HalfOpened) => info!("Circuit '{}' half-open, admitting probe", self.name),
            Some(Transition::Closed) => info!("Circuit '{}' closed", self.name),
            None => {}
        }
    }
}
