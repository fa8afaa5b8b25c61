//! Circuit breaker state machine.
//!
//! One parameterized implementation serves both the router (one instance per
//! provider) and the message bus (a single instance). Time is passed in
//! explicitly so transitions are deterministic under test.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Thresholds for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
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

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A state change worth logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Closed → Open after reaching the failure threshold.
    Opened,
    /// Open → HalfOpen, a probe was admitted.
    HalfOpened,
    /// HalfOpen → Closed after a successful probe.
    Closed,
    /// HalfOpen → Open after a failed probe.
    Reopened,
}

/// Serializable view of a breaker for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    /// Milliseconds until an open circuit admits a probe (0 when not open).
    pub retry_in_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_failures: 0,
            total_successes: 0,
            last_failure: None,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// Stored state, without applying the cool-down.
    pub fn raw_state(&self) -> CircuitState {
        self.state
    }

    /// Effective state at `now`: an open circuit whose cool-down elapsed reads as half-open.
    pub fn state_at(&self, now: Instant) -> CircuitState {
        match self.state {
            CircuitState::Open if self.cooldown_elapsed(now) => CircuitState::HalfOpen,
            other => other,
        }
    }

    /// True while the circuit rejects every attempt.
    pub fn is_open(&self, now: Instant) -> bool {
        self.state == CircuitState::Open && !self.cooldown_elapsed(now)
    }

    /// Whether [`try_acquire`](Self::try_acquire) would succeed at `now`, without claiming anything.
    pub fn would_admit(&self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooldown_elapsed(now),
            CircuitState::HalfOpen => !self.probe_in_flight,
        }
    }

    /// Claim permission for one attempt.
    ///
    /// Closed always admits. Open admits nothing until the cool-down elapses,
    /// then flips to half-open and admits exactly one probe. Further attempts
    /// are refused until that probe is resolved.
    pub fn try_acquire(&mut self, now: Instant) -> (bool, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (true, None),
            CircuitState::Open => {
                if self.cooldown_elapsed(now) {
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    (true, Some(Transition::HalfOpened))
                } else {
                    (false, None)
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    (false, None)
                } else {
                    self.probe_in_flight = true;
                    (true, None)
                }
            }
        }
    }

    pub fn record_success(&mut self) -> Option<Transition> {
        self.total_successes += 1;
        self.consecutive_failures = 0;
        self.probe_in_flight = false;
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.opened_at = None;
                Some(Transition::Closed)
            }
            // A late success from an attempt admitted before the circuit opened.
            CircuitState::Open | CircuitState::Closed => None,
        }
    }

    pub fn record_failure(&mut self, now: Instant) -> Option<Transition> {
        self.total_failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);
        self.probe_in_flight = false;
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                Some(Transition::Reopened)
            }
            CircuitState::Closed if self.consecutive_failures >= self.config.failure_threshold => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                Some(Transition::Opened)
            }
            CircuitState::Open => {
                self.opened_at = Some(now);
                None
            }
            CircuitState::Closed => None,
        }
    }

    /// Give back a half-open probe slot whose attempt ended without an outcome.
    ///
    /// The circuit stays half-open and admits the next caller. Returns whether
    /// a slot was actually freed.
    pub fn release_probe(&mut self) -> bool {
        if self.state == CircuitState::HalfOpen && self.probe_in_flight {
            self.probe_in_flight = false;
            true
        } else {
            false
        }
    }

    /// Return to closed and forget failure history.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    pub fn snapshot(&self, now: Instant) -> CircuitSnapshot {
        let retry_in = match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                (opened + self.config.cooldown).saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        };
        CircuitSnapshot {
            state: self.state_at(now),
            consecutive_failures: self.consecutive_failures,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            failure_threshold: self.config.failure_threshold,
            cooldown_ms: self.config.cooldown.as_millis() as u64,
            retry_in_ms: retry_in.as_millis() as u64,
        }
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        match self.opened_at {
            Some(opened) => now.saturating_duration_since(opened) >= self.config.cooldown,
            None => true,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig::new(
            threshold,
            Duration::from_secs(cooldown_secs),
        ))
    }

    fn open_breaker(now: Instant) -> CircuitBreaker {
        let mut cb = breaker(3, 30);
        for _ in 0..3 {
            cb.record_failure(now);
        }
        cb
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let now = Instant::now();
        let mut cb = breaker(3, 30);
        assert_eq!(cb.record_failure(now), None);
        assert_eq!(cb.record_failure(now), None);
        assert_eq!(cb.state_at(now), CircuitState::Closed);
        assert_eq!(cb.record_failure(now), Some(Transition::Opened));
        assert_eq!(cb.state_at(now), CircuitState::Open);
        assert!(cb.is_open(now));
    }

    #[test]
    fn success_resets_the_streak() {
        let now = Instant::now();
        let mut cb = breaker(3, 30);
        cb.record_failure(now);
        cb.record_failure(now);
        cb.record_success();
        cb.record_failure(now);
        cb.record_failure(now);
        assert_eq!(cb.state_at(now), CircuitState::Closed);
    }

    #[test]
    fn open_rejects_until_cooldown() {
        let now = Instant::now();
        let mut cb = open_breaker(now);
        assert_eq!(cb.try_acquire(now), (false, None));
        assert_eq!(
            cb.try_acquire(now + Duration::from_secs(29)),
            (false, None)
        );
        assert!(!cb.would_admit(now + Duration::from_secs(29)));
    }

    #[test]
    fn exactly_one_probe_after_cooldown() {
        let now = Instant::now();
        let mut cb = open_breaker(now);
        let later = now + Duration::from_secs(30);
        assert_eq!(cb.state_at(later), CircuitState::HalfOpen);
        assert_eq!(cb.try_acquire(later), (true, Some(Transition::HalfOpened)));
        assert_eq!(cb.try_acquire(later), (false, None));
        assert_eq!(cb.try_acquire(later), (false, None));
    }

    #[test]
    fn probe_success_closes() {
        let now = Instant::now();
        let mut cb = open_breaker(now);
        let later = now + Duration::from_secs(31);
        assert!(cb.try_acquire(later).0);
        assert_eq!(cb.record_success(), Some(Transition::Closed));
        assert_eq!(cb.state_at(later), CircuitState::Closed);
        assert!(cb.try_acquire(later).0);
        assert!(cb.try_acquire(later).0);
    }

    #[test]
    fn probe_failure_reopens_with_fresh_cooldown() {
        let now = Instant::now();
        let mut cb = open_breaker(now);
        let later = now + Duration::from_secs(31);
        assert!(cb.try_acquire(later).0);
        assert_eq!(cb.record_failure(later), Some(Transition::Reopened));
        assert!(cb.is_open(later + Duration::from_secs(29)));
        assert!(!cb.is_open(later + Duration::from_secs(30)));
    }

    #[test]
    fn released_probe_admits_the_next_caller() {
        let now = Instant::now();
        let mut cb = open_breaker(now);
        let later = now + Duration::from_secs(30);
        assert!(cb.try_acquire(later).0);
        assert!(!cb.would_admit(later));

        assert!(cb.release_probe());
        assert_eq!(cb.state_at(later), CircuitState::HalfOpen);
        assert!(cb.would_admit(later));
        assert_eq!(cb.try_acquire(later), (true, None));
        assert_eq!(cb.record_success(), Some(Transition::Closed));
    }

    #[test]
    fn release_is_a_no_op_outside_a_probe() {
        let now = Instant::now();
        let mut cb = breaker(3, 30);
        assert!(!cb.release_probe());
        let mut cb_open = open_breaker(now);
        assert!(!cb_open.release_probe());
        assert!(cb_open.is_open(now));
        cb.record_failure(now);
        assert_eq!(cb.consecutive_failures(), 1);
    }

    #[test]
    fn snapshot_reports_retry_window() {
        let now = Instant::now();
        let cb = open_breaker(now);
        let snap = cb.snapshot(now + Duration::from_secs(10));
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.consecutive_failures, 3);
        assert_eq!(snap.retry_in_ms, 20_000);
    }

    #[test]
    fn threshold_is_at_least_one() {
        let cfg = CircuitBreakerConfig::new(0, Duration::from_secs(1));
        assert_eq!(cfg.failure_threshold, 1);
    }
}
